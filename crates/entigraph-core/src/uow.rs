//! Unit of work
//!
//! Owns the node arena and the identity map for one session. Every node
//! created, resolved or reconstituted within the session lives here, and at
//! most one live node answers to any registered key.

use crate::config::MapperConfig;
use crate::error::{GraphError, Result};
use crate::graph::{Graph, GraphNode};
use crate::identity::{KeyDeriver, NodeSource, PendingSource};
use entigraph_identity::IdentityMap;
use entigraph_model::{
    EntityKey, EntityType, KeyKind, Metamodel, NodeId, Property, Record, Slot, Value,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use ulid::Ulid;

/// Session-scoped object graph
#[derive(Debug)]
pub struct UnitOfWork {
    id: Ulid,
    meta: Arc<dyn Metamodel>,
    config: MapperConfig,
    graph: Graph,
    identities: IdentityMap<NodeId>,
}

impl UnitOfWork {
    /// Create with default configuration
    #[must_use]
    pub fn new(meta: Arc<dyn Metamodel>) -> Self {
        Self {
            id: Ulid::new(),
            meta,
            config: MapperConfig::default(),
            graph: Graph::new(),
            identities: IdentityMap::new(),
        }
    }

    /// Create with explicit configuration
    ///
    /// # Errors
    /// Returns [`GraphError::Config`] if the configuration is invalid.
    pub fn with_config(meta: Arc<dyn Metamodel>, config: MapperConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new(meta)
        })
    }

    /// Session id
    #[inline]
    #[must_use]
    pub fn id(&self) -> Ulid {
        self.id
    }

    /// Metamodel in use
    #[inline]
    #[must_use]
    pub fn metamodel(&self) -> &Arc<dyn Metamodel> {
        &self.meta
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Node arena
    #[inline]
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Identity map
    #[inline]
    #[must_use]
    pub fn identities(&self) -> &IdentityMap<NodeId> {
        &self.identities
    }

    /// Live node by handle
    ///
    /// # Errors
    /// Returns [`GraphError::NodeNotFound`] for dead handles.
    #[inline]
    pub fn node(&self, id: NodeId) -> Result<&GraphNode> {
        self.graph.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut GraphNode> {
        self.graph.get_mut(id)
    }

    pub(crate) fn entity_type(&self, name: &str) -> Result<Arc<EntityType>> {
        self.meta
            .entity_type(name)
            .ok_or_else(|| GraphError::UnknownType(name.to_string()))
    }

    /// Property `name` of the node's type
    ///
    /// `Ok(None)` means the type is open and the name is undeclared.
    pub(crate) fn property_of(&self, node: NodeId, name: &str) -> Result<Option<Property>> {
        let type_name = self.graph.get(node)?.type_name();
        match self.meta.find_property(type_name, name) {
            Some(property) => Ok(Some(property)),
            None if self.meta.is_open(type_name) => Ok(None),
            None => Err(GraphError::UnresolvedProperty {
                type_name: type_name.to_string(),
                property: name.to_string(),
            }),
        }
    }

    /// Anchor for identities scoped to one owner's collection
    #[must_use]
    pub fn slot_anchor(owner: NodeId, property: &str) -> String {
        format!("@{owner}.{property}")
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a node of `type_name` holding `record`
    ///
    /// Nodes already placed in containment slots of `record` get this node
    /// as their container. The new node is not registered in the identity
    /// map; see [`UnitOfWork::identify`] and [`UnitOfWork::attach`].
    ///
    /// # Errors
    /// - [`GraphError::UnknownType`] if the type is unknown
    /// - [`GraphError::NodeNotFound`] if `record` references a dead node
    pub fn create(&mut self, type_name: &str, record: Record) -> Result<NodeId> {
        let ty = self.entity_type(type_name)?;
        let mut children = Vec::new();
        for property in self.meta.properties(type_name) {
            if let Some(slot) = property.accessor().get(&record) {
                for target in slot.nodes() {
                    self.graph.get(target)?;
                    if property.is_containment() {
                        children.push((target, property.name().to_string()));
                    }
                }
            }
        }

        let id = self.graph.insert(ty, record)?;
        for (child, property) in children {
            self.set_container(child, id, &property)?;
        }
        tracing::trace!("Created {} as {}", type_name, id);
        Ok(id)
    }

    /// Create-if-absent: return the live node sharing the identity that
    /// `record` derives, else create and register a new one
    ///
    /// Keys are derived from `record` before anything is allocated, so a
    /// hit leaves the arena untouched.
    ///
    /// # Errors
    /// Propagates creation, derivation and registration errors.
    pub fn attach(
        &mut self,
        type_name: &str,
        record: Record,
        anchor: Option<&str>,
    ) -> Result<NodeId> {
        self.entity_type(type_name)?;
        let keys = {
            let source = PendingSource::Pending {
                graph: &self.graph,
                type_name,
                record: &record,
            };
            let deriver = self.deriver();
            let mut keys = deriver.natural(&source, anchor)?;
            keys.extend(deriver.surrogate(&source, anchor)?);
            keys
        };
        for key in &keys {
            if let Some(existing) = self.lookup(key)? {
                return Ok(existing);
            }
        }
        let node = self.create(type_name, record)?;
        self.identify(node, anchor)?;
        Ok(node)
    }

    /// Drop a node that was never meant to survive, releasing its children
    pub(crate) fn discard(&mut self, node: NodeId) -> Result<()> {
        self.detach(node)?;
        for other in self.graph.iter_mut() {
            if other.container == Some(node) {
                other.container = None;
                other.containment_property = None;
            }
        }
        self.identities.evict_node(node);
        self.graph.remove(node);
        Ok(())
    }

    /// Delete a node and every node it contains, transitively
    ///
    /// The node is removed from its container's slot, its keys and those of
    /// its dependents are evicted, and surviving references to any deleted
    /// node are cleared. Returns the deleted handles, the node itself first.
    ///
    /// # Errors
    /// - [`GraphError::NodeNotFound`] for a dead handle
    pub fn delete(&mut self, node: NodeId) -> Result<Vec<NodeId>> {
        let mut doomed = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            doomed.push(current);
            stack.extend(self.dependents(current)?);
        }

        self.detach(node)?;
        for id in &doomed {
            self.identities.evict_node(*id);
            self.graph.remove(*id);
        }
        for survivor in self.graph.iter_mut() {
            if scrub_refs(&mut survivor.record, &seen) {
                survivor.modified = true;
            }
        }
        tracing::debug!("Deleted {} with {} dependents", node, doomed.len() - 1);
        Ok(doomed)
    }

    /// Copy a node and its containment subtree
    ///
    /// References between copied nodes are redirected to the copies;
    /// references leaving the subtree are kept. The copy is a new root and
    /// is not registered in the identity map.
    ///
    /// # Errors
    /// - [`GraphError::NodeNotFound`] for a dead handle
    /// - [`GraphError::StructuralCycle`] if the subtree is cyclic
    pub fn deep_copy(&mut self, node: NodeId) -> Result<NodeId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                return Err(GraphError::StructuralCycle { node: current });
            }
            order.push(current);
            stack.extend(self.dependents(current)?);
        }

        let mut mapping = HashMap::with_capacity(order.len());
        for old in &order {
            let source = self.graph.get(*old)?;
            let (ty, record) = (Arc::clone(&source.node_type), source.record.clone());
            mapping.insert(*old, self.graph.insert(ty, record)?);
        }

        for old in &order {
            let (container, property) = {
                let source = self.graph.get(*old)?;
                (source.container, source.containment_property.clone())
            };
            let copy = self.graph.get_mut(mapping[old])?;
            remap_refs(&mut copy.record, &mapping);
            copy.modified = true;
            if *old != node {
                copy.container = container.and_then(|c| mapping.get(&c).copied());
                copy.containment_property = property;
            }
        }
        tracing::debug!("Copied {} ({} nodes) to {}", node, order.len(), mapping[&node]);
        Ok(mapping[&node])
    }

    /// Narrow a node to a subtype of its current type
    ///
    /// # Errors
    /// - [`GraphError::UnknownType`] if `subtype` is unknown
    /// - [`GraphError::TypeMismatch`] if `subtype` does not extend the
    ///   node's current type
    pub fn downcast(&mut self, node: NodeId, subtype: &str) -> Result<()> {
        let target = self.entity_type(subtype)?;
        let current = self.graph.get(node)?.type_name().to_string();
        if current == subtype {
            return Ok(());
        }
        if !self.meta.is_subtype(subtype, &current) {
            return Err(GraphError::mismatch(
                format!("subtype of {current}"),
                subtype,
            ));
        }
        let n = self.graph.get_mut(node)?;
        n.node_type = target;
        n.modified = true;
        tracing::debug!("Downcast {} from {} to {}", node, current, subtype);
        Ok(())
    }

    /// Flag a node as known to the backing store
    ///
    /// # Errors
    /// Returns [`GraphError::NodeNotFound`] for dead handles.
    pub fn mark_persistent(&mut self, node: NodeId) -> Result<()> {
        self.graph.get_mut(node)?.persistent = true;
        Ok(())
    }

    /// Flag a node as changed
    ///
    /// # Errors
    /// Returns [`GraphError::NodeNotFound`] for dead handles.
    pub fn mark_modified(&mut self, node: NodeId) -> Result<()> {
        self.graph.get_mut(node)?.modified = true;
        Ok(())
    }

    /// Reset the changed flag
    ///
    /// # Errors
    /// Returns [`GraphError::NodeNotFound`] for dead handles.
    pub fn clear_modified(&mut self, node: NodeId) -> Result<()> {
        self.graph.get_mut(node)?.modified = false;
        Ok(())
    }

    /// Nodes currently flagged as changed
    pub fn modified_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.iter().filter(|n| n.modified).map(GraphNode::id)
    }

    // ------------------------------------------------------------------
    // Containment
    // ------------------------------------------------------------------

    /// Owning node, if any
    ///
    /// # Errors
    /// Returns [`GraphError::NodeNotFound`] for dead handles.
    #[inline]
    pub fn container(&self, node: NodeId) -> Result<Option<NodeId>> {
        Ok(self.graph.get(node)?.container)
    }

    /// Record `parent` as the container of `child` under `property`
    ///
    /// Re-parenting overwrites the previous edge and removes `child` from
    /// the slot that held it before. Only the back-link is managed here;
    /// placing `child` in the parent's slot is up to the caller.
    ///
    /// # Errors
    /// - [`GraphError::NodeNotFound`] for dead handles
    /// - [`GraphError::UnresolvedProperty`] if `parent` has no such property
    /// - [`GraphError::StructuralCycle`] if `child` already contains `parent`
    pub fn set_container(&mut self, child: NodeId, parent: NodeId, property: &str) -> Result<()> {
        self.graph.get(child)?;
        self.property_of(parent, property)?;

        let mut seen = HashSet::new();
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == child || !seen.insert(current) {
                return Err(GraphError::StructuralCycle { node: current });
            }
            cursor = self.graph.get(current)?.container;
        }

        let (old_parent, old_property) = {
            let node = self.graph.get(child)?;
            (node.container, node.containment_property.clone())
        };
        if let (Some(old_parent), Some(old_property)) = (old_parent, old_property) {
            if old_parent != parent || old_property != property {
                self.remove_from_slot(old_parent, &old_property, child)?;
            }
        }

        let node = self.graph.get_mut(child)?;
        node.container = Some(parent);
        node.containment_property = Some(property.to_string());
        Ok(())
    }

    /// Remove a node from its container, making it a root
    ///
    /// # Errors
    /// Returns [`GraphError::NodeNotFound`] for dead handles.
    pub fn detach(&mut self, node: NodeId) -> Result<()> {
        let (parent, property) = {
            let n = self.graph.get(node)?;
            (n.container, n.containment_property.clone())
        };
        if let (Some(parent), Some(property)) = (parent, property) {
            self.remove_from_slot(parent, &property, node)?;
        }
        let n = self.graph.get_mut(node)?;
        n.container = None;
        n.containment_property = None;
        Ok(())
    }

    fn remove_from_slot(&mut self, owner: NodeId, property: &str, child: NodeId) -> Result<()> {
        if !self.graph.contains(owner) {
            return Ok(());
        }
        let type_name = self.graph.get(owner)?.type_name().to_string();
        let declared = self.meta.find_property(&type_name, property);
        let node = self.graph.get_mut(owner)?;
        let Some(slot) = node.slot_mut(declared.as_ref(), property) else {
            return Ok(());
        };
        let changed = match slot {
            Slot::Node(id) if *id == child => {
                *slot = Slot::Value(Value::Null);
                true
            }
            Slot::List(items) | Slot::Set(items) => {
                let before = items.len();
                items.retain(|e| e.node() != Some(child));
                items.len() != before
            }
            Slot::Map(entries) => {
                let before = entries.len();
                entries.retain(|_, e| e.node() != Some(child));
                entries.len() != before
            }
            Slot::Node(_) | Slot::Value(_) => false,
        };
        if changed {
            node.modified = true;
        }
        Ok(())
    }

    /// Top of the containment chain
    ///
    /// # Errors
    /// - [`GraphError::StructuralCycle`] if the chain revisits a node
    /// - [`GraphError::NodeNotFound`] for dead handles
    pub fn root_of(&self, node: NodeId) -> Result<NodeId> {
        let mut seen = HashSet::new();
        let mut current = node;
        loop {
            if !seen.insert(current) {
                return Err(GraphError::StructuralCycle { node: current });
            }
            match self.graph.get(current)?.container {
                Some(parent) => current = parent,
                None => return Ok(current),
            }
        }
    }

    /// Nodes held in the containment slots of `node`
    ///
    /// # Errors
    /// Returns [`GraphError::NodeNotFound`] for dead handles.
    pub fn dependents(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let n = self.graph.get(node)?;
        Ok(self
            .meta
            .properties(n.type_name())
            .iter()
            .filter(|p| p.is_containment())
            .filter_map(|p| n.slot(Some(p), p.name()))
            .flat_map(Slot::nodes)
            .collect())
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    fn deriver(&self) -> KeyDeriver<'_> {
        KeyDeriver::new(self.meta.as_ref(), self.config.max_key_depth)
    }

    /// Surrogate key of `node` under `anchor`
    ///
    /// `None` if the type has no identifier or the identifier is blank.
    ///
    /// # Errors
    /// Returns [`GraphError::NodeNotFound`] for dead handles.
    pub fn derive_surrogate_key(
        &self,
        node: NodeId,
        anchor: Option<&str>,
    ) -> Result<Option<EntityKey>> {
        self.deriver()
            .surrogate(&NodeSource::new(&self.graph, node)?, anchor)
    }

    /// Natural keys of `node` under `anchor`, most specific type first
    ///
    /// # Errors
    /// - [`GraphError::StructuralCycle`] if key fields reference back into
    ///   the node being keyed
    /// - [`GraphError::NodeNotFound`] for dead handles
    pub fn derive_natural_keys(&self, node: NodeId, anchor: Option<&str>) -> Result<Vec<EntityKey>> {
        self.deriver()
            .natural(&NodeSource::new(&self.graph, node)?, anchor)
    }

    /// Find the live node sharing `candidate`'s identity
    ///
    /// Natural keys are tried first, then the surrogate key. May return
    /// `candidate` itself if it is already registered.
    ///
    /// # Errors
    /// Propagates derivation errors and stale-key re-registration conflicts.
    pub fn resolve(&mut self, candidate: NodeId, anchor: Option<&str>) -> Result<Option<NodeId>> {
        for key in self.derive_natural_keys(candidate, anchor)? {
            if let Some(found) = self.lookup(&key)? {
                return Ok(Some(found));
            }
        }
        match self.derive_surrogate_key(candidate, anchor)? {
            Some(key) => self.lookup(&key),
            None => Ok(None),
        }
    }

    /// Node registered under `key`
    ///
    /// A key whose node no longer derives it is stale: the key is evicted,
    /// the node is re-registered under its current keys of the same kind,
    /// and `None` is returned.
    ///
    /// # Errors
    /// Propagates derivation errors and re-registration conflicts.
    pub fn lookup(&mut self, key: &EntityKey) -> Result<Option<NodeId>> {
        let Some(found) = self.identities.lookup(key) else {
            return Ok(None);
        };
        if !self.graph.contains(found) {
            self.identities.evict_node(found);
            return Ok(None);
        }
        if self.config.repair_stale_keys {
            let current = match key.kind() {
                KeyKind::Natural => self.derive_natural_keys(found, key.anchor())?,
                KeyKind::Surrogate => self
                    .derive_surrogate_key(found, key.anchor())?
                    .into_iter()
                    .collect(),
            };
            if !current.contains(key) {
                tracing::debug!("Stale key {} evicted from {}", key, found);
                self.identities.evict(key);
                for fresh in current {
                    self.register(found, fresh)?;
                }
                return Ok(None);
            }
        }
        Ok(Some(found))
    }

    /// Register `node` under `key`
    ///
    /// Keys left behind by removed nodes are reclaimed.
    ///
    /// # Errors
    /// - [`GraphError::IdentityConflict`] if another live node holds `key`
    /// - [`GraphError::NodeNotFound`] for dead handles
    pub fn register(&mut self, node: NodeId, key: EntityKey) -> Result<()> {
        self.graph.get(node)?;
        if let Some(existing) = self.identities.peek(&key) {
            if !self.graph.contains(existing) {
                self.identities.evict_node(existing);
            }
        }
        self.identities.insert(key, node)?;
        Ok(())
    }

    /// Remove one key
    pub fn evict(&mut self, key: &EntityKey) -> Option<NodeId> {
        self.identities.evict(key)
    }

    /// Derive and register every key of `node` under `anchor`
    ///
    /// Keys previously registered for the node under the same anchor that
    /// it no longer derives are evicted first. Returns the current keys.
    ///
    /// # Errors
    /// - [`GraphError::IdentityConflict`] if a key belongs to another node
    /// - derivation errors
    pub fn identify(&mut self, node: NodeId, anchor: Option<&str>) -> Result<Vec<EntityKey>> {
        let mut keys = self.derive_natural_keys(node, anchor)?;
        if let Some(surrogate) = self.derive_surrogate_key(node, anchor)? {
            keys.push(surrogate);
        }
        let stale: Vec<EntityKey> = self
            .identities
            .keys_of(node)
            .iter()
            .filter(|k| k.anchor() == anchor && !keys.contains(k))
            .cloned()
            .collect();
        for key in &stale {
            self.identities.evict(key);
        }
        for key in &keys {
            self.register(node, key.clone())?;
        }
        Ok(keys)
    }

    /// True if writing `property` on a node of `type_name` can change the
    /// node's keys
    pub(crate) fn is_identity_field(&self, type_name: &str, property: &str) -> bool {
        if self.meta.identifier(type_name).as_deref() == Some(property) {
            return true;
        }
        self.meta.ancestry(type_name).iter().any(|ty| {
            ty.declared_natural_key()
                .is_some_and(|fields| fields.iter().any(|f| f == property))
        })
    }

    /// Anchors `node` holds keys under
    pub(crate) fn key_anchors(&self, node: NodeId) -> Vec<Option<String>> {
        let mut anchors: Vec<Option<String>> = Vec::new();
        for key in self.identities.keys_of(node) {
            let anchor = key.anchor().map(str::to_string);
            if !anchors.contains(&anchor) {
                anchors.push(anchor);
            }
        }
        anchors
    }

    /// Re-derive the keys of `node` under each of `anchors`
    ///
    /// # Errors
    /// Same as [`UnitOfWork::identify`].
    pub(crate) fn reidentify(&mut self, node: NodeId, anchors: &[Option<String>]) -> Result<()> {
        for anchor in anchors {
            self.identify(node, anchor.as_deref())?;
        }
        Ok(())
    }

    /// Point every reference to `from` at `to`, then drop `from`
    pub(crate) fn redirect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.graph.get(to)?;
        let mapping = HashMap::from([(from, to)]);
        for node in self.graph.iter_mut() {
            if node.id != from && remap_refs(&mut node.record, &mapping) {
                node.modified = true;
            }
        }
        let (container, property) = {
            let n = self.graph.get(from)?;
            (n.container, n.containment_property.clone())
        };
        if self.graph.get(to)?.container.is_none() {
            if let (Some(container), Some(property)) = (container, property) {
                if container != to {
                    let n = self.graph.get_mut(to)?;
                    n.container = Some(container);
                    n.containment_property = Some(property);
                }
            }
        }
        for node in self.graph.iter_mut() {
            if node.container == Some(from) {
                node.container = Some(to);
            }
        }
        self.identities.evict_node(from);
        self.graph.remove(from);
        tracing::trace!("Redirected {} to {}", from, to);
        Ok(())
    }
}

/// Redirect node references found in `mapping`; true if anything changed
fn remap_refs(record: &mut Record, mapping: &HashMap<NodeId, NodeId>) -> bool {
    let mut changed = false;
    let mut remap = |id: &mut NodeId| {
        if let Some(target) = mapping.get(id) {
            *id = *target;
            changed = true;
        }
    };
    for (_, slot) in record.iter_mut() {
        match slot {
            Slot::Node(id) => remap(id),
            Slot::List(items) | Slot::Set(items) => {
                for item in items.iter_mut() {
                    if let entigraph_model::Element::Node(id) = item {
                        remap(id);
                    }
                }
            }
            Slot::Map(entries) => {
                for item in entries.values_mut() {
                    if let entigraph_model::Element::Node(id) = item {
                        remap(id);
                    }
                }
            }
            Slot::Value(_) => {}
        }
    }
    changed
}

/// Clear references to removed nodes; true if anything changed
fn scrub_refs(record: &mut Record, removed: &HashSet<NodeId>) -> bool {
    let mut changed = false;
    let dead = |e: &entigraph_model::Element| e.node().is_some_and(|id| removed.contains(&id));
    for (_, slot) in record.iter_mut() {
        match slot {
            Slot::Node(id) if removed.contains(id) => {
                *slot = Slot::Value(Value::Null);
                changed = true;
            }
            Slot::List(items) | Slot::Set(items) => {
                let before = items.len();
                items.retain(|e| !dead(e));
                changed |= items.len() != before;
            }
            Slot::Map(entries) => {
                let before = entries.len();
                entries.retain(|_, e| !dead(e));
                changed |= entries.len() != before;
            }
            Slot::Node(_) | Slot::Value(_) => {}
        }
    }
    changed
}
