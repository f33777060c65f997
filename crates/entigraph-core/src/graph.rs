//! Node arena
//!
//! Nodes live in a slot vector addressed by [`NodeId`]. Container links are
//! plain handles: a child never owns its parent, and a removed node leaves a
//! tombstone so stale handles fail with [`GraphError::NodeNotFound`] instead
//! of aliasing a newer node.

use crate::error::{GraphError, Result};
use entigraph_model::{EntityType, NodeId, Property, Record, Slot};
use std::sync::Arc;

/// One entity instance
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub(crate) id: NodeId,
    pub(crate) node_type: Arc<EntityType>,
    pub(crate) record: Record,
    pub(crate) container: Option<NodeId>,
    pub(crate) containment_property: Option<String>,
    pub(crate) persistent: bool,
    pub(crate) modified: bool,
}

impl GraphNode {
    /// Handle of this node
    #[inline]
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Concrete type
    #[inline]
    #[must_use]
    pub fn node_type(&self) -> &Arc<EntityType> {
        &self.node_type
    }

    /// Concrete type name
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.node_type.name()
    }

    /// Raw property bag
    #[inline]
    #[must_use]
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Owning node, if contained
    #[inline]
    #[must_use]
    pub fn container(&self) -> Option<NodeId> {
        self.container
    }

    /// Property of the container holding this node
    #[inline]
    #[must_use]
    pub fn containment_property(&self) -> Option<&str> {
        self.containment_property.as_deref()
    }

    /// Top of a containment chain
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.container.is_none()
    }

    /// Known to the backing store
    #[inline]
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Changed since last cleared
    #[inline]
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Read a slot through the property accessor, or by field name when the
    /// property is undeclared (open types)
    #[must_use]
    pub fn slot(&self, property: Option<&Property>, name: &str) -> Option<&Slot> {
        match property {
            Some(p) => p.accessor().get(&self.record),
            None => self.record.get(name),
        }
    }

    pub(crate) fn slot_mut(&mut self, property: Option<&Property>, name: &str) -> Option<&mut Slot> {
        match property {
            Some(p) => p.accessor().get_mut(&mut self.record),
            None => self.record.get_mut(name),
        }
    }

    pub(crate) fn write(&mut self, property: Option<&Property>, name: &str, slot: Slot) {
        match property {
            Some(p) => p.accessor().set(&mut self.record, slot),
            None => {
                self.record.set(name, slot);
            }
        }
    }

    /// Slot for a collection, created empty when absent or null
    pub(crate) fn collection_mut(
        &mut self,
        property: Option<&Property>,
        name: &str,
        kind: entigraph_model::CollectionKind,
    ) -> Result<&mut Slot> {
        let present = self
            .slot(property, name)
            .is_some_and(|s| s.collection_kind().is_some());
        if !present {
            if let Some(existing) = self.slot(property, name) {
                if !existing.is_null() {
                    return Err(GraphError::invalid(format!(
                        "{}.{name} does not hold a collection",
                        self.id
                    )));
                }
            }
            self.write(property, name, Slot::empty(kind));
        }
        let id = self.id;
        self.slot_mut(property, name)
            .ok_or_else(|| GraphError::invalid(format!("{id}.{name} cannot hold a collection")))
    }
}

/// Arena of nodes
///
/// Slots are never reused, so the arena holds one entry per node created in
/// the session, live or removed. Create-if-absent paths resolve identity
/// before allocating; only deletes and failed inserts leave tombstones.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    slots: Vec<Option<GraphNode>>,
    live: usize,
}

impl Graph {
    /// Create empty arena
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning its handle
    pub(crate) fn insert(&mut self, node_type: Arc<EntityType>, record: Record) -> Result<NodeId> {
        let index = u32::try_from(self.slots.len())
            .map_err(|_| GraphError::invalid("node arena exhausted"))?;
        let id = NodeId::new(index);
        self.slots.push(Some(GraphNode {
            id,
            node_type,
            record,
            container: None,
            containment_property: None,
            persistent: false,
            modified: false,
        }));
        self.live += 1;
        Ok(id)
    }

    /// Live node by handle
    ///
    /// # Errors
    /// Returns [`GraphError::NodeNotFound`] for removed or unknown handles.
    pub fn get(&self, id: NodeId) -> Result<&GraphNode> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(GraphError::NodeNotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Result<&mut GraphNode> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Check if handle names a live node
    #[inline]
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_ok()
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<GraphNode> {
        let removed = self.slots.get_mut(id.index()).and_then(Option::take);
        if removed.is_some() {
            self.live -= 1;
        }
        removed
    }

    /// Live nodes in creation order
    pub fn iter(&self) -> impl Iterator<Item = &GraphNode> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut GraphNode> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    /// Number of live nodes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// No live nodes
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
