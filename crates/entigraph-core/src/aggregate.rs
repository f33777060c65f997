//! Aggregate builder
//!
//! Walks the graph from a root, canonicalizes every reached node against
//! the identity map and returns the set of nodes and links making up the
//! aggregate. Collections are visited before to-one references, so list
//! elements get their slot-anchored identity before anything else can
//! reach them through a plain reference.
//!
//! Visited state is local to one [`AggregateBuilder::build`] call; two
//! builds over the same graph never see each other's marks.

use crate::error::{GraphError, Result};
use crate::uow::UnitOfWork;
use entigraph_model::{NodeId, Property, Slot, TraversalMask};
use std::collections::HashSet;
use std::fmt::Debug;

/// What a reached node stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Carries its own state and is part of the aggregate
    Owned,
    /// Placeholder standing in for an entity defined elsewhere
    Reference,
}

/// Decides whether a node is owned data or a reference placeholder
pub trait Examine: Debug + Send + Sync {
    /// Classify `node`
    ///
    /// # Errors
    /// Implementations propagate lookup failures.
    fn examine(&self, uow: &UnitOfWork, node: NodeId) -> Result<Classification>;
}

/// Treats a node holding nothing but its identifier as a reference
#[derive(Debug, Clone, Copy, Default)]
pub struct StubExaminer;

impl Examine for StubExaminer {
    fn examine(&self, uow: &UnitOfWork, node: NodeId) -> Result<Classification> {
        let n = uow.node(node)?;
        let Some(identifier) = uow.metamodel().identifier(n.type_name()) else {
            return Ok(Classification::Owned);
        };
        let mut has_id = false;
        for (name, slot) in n.record().iter() {
            if name == identifier {
                has_id = slot.value().is_some_and(|v| !v.is_blank());
            } else if !is_empty(slot) {
                return Ok(Classification::Owned);
            }
        }
        Ok(if has_id {
            Classification::Reference
        } else {
            Classification::Owned
        })
    }
}

fn is_empty(slot: &Slot) -> bool {
    match slot {
        Slot::Value(v) => v.is_null(),
        Slot::Node(_) => false,
        Slot::List(items) | Slot::Set(items) => items.is_empty(),
        Slot::Map(entries) => entries.is_empty(),
    }
}

/// One edge of an aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Holder
    pub from: NodeId,
    /// Property on the holder
    pub property: String,
    /// Target
    pub to: NodeId,
    /// Target is owned by the holder
    pub containment: bool,
}

/// Result of one traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    root: NodeId,
    nodes: Vec<NodeId>,
    links: Vec<Link>,
}

impl Aggregate {
    /// Starting node (canonical)
    #[inline]
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Traversed nodes in visit order, root first
    #[inline]
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Edges followed or recorded
    #[inline]
    #[must_use]
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Whether `node` was traversed
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Number of traversed nodes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Nothing traversed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Builds aggregates, optionally restricted by a traversal mask
///
/// # Example
///
/// ```rust,ignore
/// let aggregate = AggregateBuilder::new()
///     .with_mask("items,customer".parse()?)
///     .build(&mut uow, order)?;
/// ```
#[derive(Debug)]
pub struct AggregateBuilder {
    mask: Option<TraversalMask>,
    anchor: Option<String>,
    examiner: Box<dyn Examine>,
}

impl Default for AggregateBuilder {
    fn default() -> Self {
        Self {
            mask: None,
            anchor: None,
            examiner: Box::new(StubExaminer),
        }
    }
}

impl AggregateBuilder {
    /// Builder with no mask and the stub examiner
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only follow properties the mask enters
    #[must_use]
    pub fn with_mask(mut self, mask: TraversalMask) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Anchor for identities of non-contained nodes
    #[must_use]
    pub fn with_anchor(mut self, anchor: impl Into<String>) -> Self {
        self.anchor = Some(anchor.into());
        self
    }

    /// Use the mask fingerprint as the anchor, so different views of the
    /// same entities stay apart
    ///
    /// # Errors
    /// Returns [`GraphError::InvalidArgument`] if no mask is set.
    pub fn anchored_by_mask(mut self) -> Result<Self> {
        let fingerprint = self
            .mask
            .as_ref()
            .map(TraversalMask::fingerprint)
            .ok_or_else(|| GraphError::invalid("anchoring by mask needs a mask"))?;
        self.anchor = Some(fingerprint);
        Ok(self)
    }

    /// Replace the examiner
    #[must_use]
    pub fn with_examiner(mut self, examiner: impl Examine + 'static) -> Self {
        self.examiner = Box::new(examiner);
        self
    }

    /// Traverse from `root`
    ///
    /// Every reached entity is resolved through the identity map; when a
    /// placeholder resolves to an existing node the holder's slot is
    /// re-pointed at that node and the placeholder is dropped. Containment
    /// targets are registered under their slot anchor and descended into;
    /// other targets are linked but only traversed when the mask enters
    /// them and they are contained.
    ///
    /// # Errors
    /// - [`GraphError::IdentityConflict`] if two owned nodes claim one identity
    /// - [`GraphError::StructuralCycle`] if containment links form a cycle
    pub fn build(&self, uow: &mut UnitOfWork, root: NodeId) -> Result<Aggregate> {
        let span = tracing::debug_span!("aggregate", uow = %uow.id(), root = %root);
        let _guard = span.enter();

        let anchor = self.anchor.as_deref();
        let root = match uow.resolve(root, anchor)? {
            Some(found) if found != root => self.merge(uow, root, found)?,
            _ => root,
        };
        uow.identify(root, anchor)?;

        let mut visited = HashSet::new();
        let mut aggregate = Aggregate {
            root,
            nodes: Vec::new(),
            links: Vec::new(),
        };
        self.visit(uow, root, self.mask.as_ref(), &mut visited, &mut aggregate)?;
        tracing::debug!(
            "Aggregate of {} holds {} nodes and {} links",
            root,
            aggregate.nodes.len(),
            aggregate.links.len()
        );
        Ok(aggregate)
    }

    fn visit(
        &self,
        uow: &mut UnitOfWork,
        node: NodeId,
        mask: Option<&TraversalMask>,
        visited: &mut HashSet<NodeId>,
        aggregate: &mut Aggregate,
    ) -> Result<()> {
        if !visited.insert(node) {
            return Ok(());
        }
        aggregate.nodes.push(node);

        let type_name = uow.node(node)?.type_name().to_string();
        let properties = uow.metamodel().properties(&type_name);

        for property in properties.iter().filter(|p| p.is_collection()) {
            let child_mask = match mask {
                Some(m) => match m.child(property.name()) {
                    Some(child) => Some(child),
                    None => continue,
                },
                None => None,
            };
            let members = uow
                .node(node)?
                .slot(Some(property), property.name())
                .map(Slot::nodes)
                .unwrap_or_default();
            for member in members {
                let canonical = self.canonicalize(uow, node, property, member)?;
                if property.is_containment() {
                    uow.set_container(canonical, node, property.name())?;
                }
                aggregate.links.push(Link {
                    from: node,
                    property: property.name().to_string(),
                    to: canonical,
                    containment: property.is_containment(),
                });
                self.visit(uow, canonical, child_mask, visited, aggregate)?;
            }
        }

        let singles: Vec<&Property> = match mask {
            Some(m) => m
                .names()
                .filter_map(|name| {
                    properties
                        .iter()
                        .find(|p| p.answers_to(name) && !p.is_collection())
                })
                .collect(),
            None => properties.iter().filter(|p| !p.is_collection()).collect(),
        };
        for property in singles {
            if property.is_scalar() {
                continue;
            }
            let target = uow
                .node(node)?
                .slot(Some(property), property.name())
                .and_then(Slot::node);
            let Some(target) = target else {
                continue;
            };
            let canonical = self.canonicalize(uow, node, property, target)?;
            aggregate.links.push(Link {
                from: node,
                property: property.name().to_string(),
                to: canonical,
                containment: property.is_containment(),
            });
            if property.is_containment() {
                uow.set_container(canonical, node, property.name())?;
                let child_mask = mask.and_then(|m| m.child(property.name()));
                self.visit(uow, canonical, child_mask, visited, aggregate)?;
            }
        }
        Ok(())
    }

    /// Resolve `member` (held by `owner.property`) to its canonical node
    fn canonicalize(
        &self,
        uow: &mut UnitOfWork,
        owner: NodeId,
        property: &Property,
        member: NodeId,
    ) -> Result<NodeId> {
        let anchor = if property.is_containment() {
            Some(UnitOfWork::slot_anchor(owner, property.name()))
        } else {
            self.anchor.clone()
        };
        match uow.resolve(member, anchor.as_deref())? {
            Some(found) if found != member => self.merge(uow, member, found),
            _ => {
                uow.identify(member, anchor.as_deref())?;
                Ok(member)
            }
        }
    }

    /// Fold `duplicate` into `canonical` if it is only a placeholder
    fn merge(&self, uow: &mut UnitOfWork, duplicate: NodeId, canonical: NodeId) -> Result<NodeId> {
        match self.examiner.examine(uow, duplicate)? {
            Classification::Reference => {
                uow.redirect(duplicate, canonical)?;
                Ok(canonical)
            }
            Classification::Owned => {
                let key = uow
                    .identities()
                    .keys_of(canonical)
                    .first()
                    .cloned()
                    .ok_or(GraphError::NodeNotFound(canonical))?;
                Err(GraphError::IdentityConflict {
                    key,
                    existing: canonical.to_string(),
                    incoming: duplicate.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigraph_model::{
        Element, EntityType, Metamodel, Property, Record, ScalarType, TypeRegistry, Value,
    };
    use std::sync::Arc;

    fn meta() -> Arc<dyn Metamodel> {
        Arc::new(
            TypeRegistry::new()
                .with(
                    EntityType::new("Customer")
                        .property(Property::scalar("id", ScalarType::Int))
                        .property(Property::scalar("name", ScalarType::Text))
                        .identifier("id"),
                )
                .unwrap()
                .with(
                    EntityType::new("Order")
                        .property(Property::scalar("id", ScalarType::Int))
                        .property(Property::list_of("items", "Item"))
                        .property(Property::reference("customer", "Customer"))
                        .identifier("id"),
                )
                .unwrap()
                .with(
                    EntityType::new("Item")
                        .property(Property::scalar("sku", ScalarType::Text))
                        .natural_key(["sku"]),
                )
                .unwrap(),
        )
    }

    fn customer(uow: &mut UnitOfWork, name: Option<&str>) -> NodeId {
        let mut record = Record::new().with("id", Value::Int(7));
        if let Some(name) = name {
            record = record.with("name", Value::from(name));
        }
        uow.create("Customer", record).unwrap()
    }

    fn order(uow: &mut UnitOfWork, id: i64, customer: NodeId, skus: &[&str]) -> NodeId {
        let items: Vec<Element> = skus
            .iter()
            .map(|sku| {
                uow.create("Item", Record::new().with("sku", Value::from(*sku)))
                    .unwrap()
                    .into()
            })
            .collect();
        uow.create(
            "Order",
            Record::new()
                .with("id", Value::Int(id))
                .with("items", Slot::List(items))
                .with("customer", customer),
        )
        .unwrap()
    }

    #[test]
    fn stub_examiner() {
        let mut uow = UnitOfWork::new(meta());
        let stub = customer(&mut uow, None);
        let full = customer(&mut uow, Some("Ada"));
        assert_eq!(StubExaminer.examine(&uow, stub).unwrap(), Classification::Reference);
        assert_eq!(StubExaminer.examine(&uow, full).unwrap(), Classification::Owned);
    }

    #[test]
    fn placeholders_collapse_onto_canonical_node() {
        let mut uow = UnitOfWork::new(meta());
        let ada = customer(&mut uow, Some("Ada"));
        uow.identify(ada, None).unwrap();
        let stub = customer(&mut uow, None);
        let o = order(&mut uow, 1, stub, &["A", "B"]);

        let aggregate = AggregateBuilder::new().build(&mut uow, o).unwrap();
        assert_eq!(uow.get_node(o, "customer").unwrap(), Some(ada));
        assert!(uow.node(stub).is_err());
        // the customer is linked but not part of the aggregate
        assert!(!aggregate.contains(ada));
        assert_eq!(aggregate.len(), 3);
        assert!(aggregate
            .links()
            .iter()
            .any(|l| l.property == "customer" && l.to == ada && !l.containment));
    }

    #[test]
    fn owned_duplicates_conflict() {
        let mut uow = UnitOfWork::new(meta());
        let first = customer(&mut uow, Some("Ada"));
        uow.identify(first, None).unwrap();
        let second = customer(&mut uow, Some("Grace"));
        let o = order(&mut uow, 1, second, &[]);
        assert!(matches!(
            AggregateBuilder::new().build(&mut uow, o),
            Err(GraphError::IdentityConflict { .. })
        ));
    }

    #[test]
    fn elements_are_keyed_per_owner() {
        let mut uow = UnitOfWork::new(meta());
        let c = customer(&mut uow, Some("Ada"));
        let a = order(&mut uow, 1, c, &["A"]);
        let b = order(&mut uow, 2, c, &["A"]);
        let builder = AggregateBuilder::new();
        let first = builder.build(&mut uow, a).unwrap();
        let second = builder.build(&mut uow, b).unwrap();

        // same sku under different owners stays two nodes
        let a_item = uow.get_node(a, "items.0").unwrap().unwrap();
        let b_item = uow.get_node(b, "items.0").unwrap().unwrap();
        assert_ne!(a_item, b_item);
        assert!(first.contains(a_item));
        assert!(second.contains(b_item));
    }

    #[test]
    fn mask_limits_traversal() {
        let mut uow = UnitOfWork::new(meta());
        let c = customer(&mut uow, Some("Ada"));
        let o = order(&mut uow, 1, c, &["A"]);
        let mask: TraversalMask = "customer".parse().unwrap();
        let aggregate = AggregateBuilder::new()
            .with_mask(mask)
            .anchored_by_mask()
            .unwrap()
            .build(&mut uow, o)
            .unwrap();
        assert_eq!(aggregate.nodes(), &[o]);
        assert_eq!(aggregate.links().len(), 1);
        let key = uow.derive_surrogate_key(c, Some("customer")).unwrap().unwrap();
        assert_eq!(uow.lookup(&key).unwrap(), Some(c));
    }

    #[test]
    fn rebuild_is_stable() {
        let mut uow = UnitOfWork::new(meta());
        let c = customer(&mut uow, Some("Ada"));
        let o = order(&mut uow, 1, c, &["A", "B"]);
        let builder = AggregateBuilder::new();
        let first = builder.build(&mut uow, o).unwrap();
        let second = builder.build(&mut uow, o).unwrap();
        assert_eq!(first, second);
    }
}
