//! Key derivation
//!
//! Surrogate and natural keys are computed from a [`KeySource`], which is
//! either a live graph node or the sibling columns of a row prefix. Both
//! resolve the same way, so a key derived from a row equals the key the
//! resulting node would derive once built.

use crate::error::{GraphError, Result};
use crate::graph::{Graph, GraphNode};
use entigraph_model::{EntityKey, KeyPart, Metamodel, NodeId, PropertyKind, Record, Slot, Value};
use std::collections::HashSet;

/// Something a key can be read from
pub(crate) trait KeySource: Sized {
    /// Concrete type name
    fn type_name(&self) -> &str;

    /// Non-null scalar stored under a property
    fn scalar(&self, meta: &dyn Metamodel, field: &str) -> Option<Value>;

    /// Source for the entity referenced by a to-one property
    fn nested(&self, meta: &dyn Metamodel, field: &str) -> Result<Option<Self>>;

    /// Node handle, for cycle detection
    fn node(&self) -> Option<NodeId>;
}

/// Key source over a live node
pub(crate) struct NodeSource<'g> {
    graph: &'g Graph,
    node: &'g GraphNode,
}

impl<'g> NodeSource<'g> {
    pub(crate) fn new(graph: &'g Graph, id: NodeId) -> Result<Self> {
        Ok(Self {
            graph,
            node: graph.get(id)?,
        })
    }

    fn read(&self, meta: &dyn Metamodel, field: &str) -> Option<&'g Slot> {
        let property = meta.find_property(self.node.type_name(), field);
        self.node.slot(property.as_ref(), field)
    }
}

impl KeySource for NodeSource<'_> {
    fn type_name(&self) -> &str {
        self.node.type_name()
    }

    fn scalar(&self, meta: &dyn Metamodel, field: &str) -> Option<Value> {
        self.read(meta, field)
            .and_then(Slot::value)
            .filter(|v| !v.is_null())
            .cloned()
    }

    fn nested(&self, meta: &dyn Metamodel, field: &str) -> Result<Option<Self>> {
        match self.read(meta, field).and_then(Slot::node) {
            Some(id) => Self::new(self.graph, id).map(Some),
            None => Ok(None),
        }
    }

    fn node(&self) -> Option<NodeId> {
        Some(self.node.id())
    }
}

/// Key source over a record that is not in the graph yet
///
/// References inside the record are followed into the live graph.
pub(crate) enum PendingSource<'g> {
    Pending {
        graph: &'g Graph,
        type_name: &'g str,
        record: &'g Record,
    },
    Live(NodeSource<'g>),
}

impl KeySource for PendingSource<'_> {
    fn type_name(&self) -> &str {
        match self {
            Self::Pending { type_name, .. } => type_name,
            Self::Live(node) => node.type_name(),
        }
    }

    fn scalar(&self, meta: &dyn Metamodel, field: &str) -> Option<Value> {
        match self {
            Self::Pending {
                type_name, record, ..
            } => read_record(meta, type_name, record, field)
                .and_then(Slot::value)
                .filter(|v| !v.is_null())
                .cloned(),
            Self::Live(node) => node.scalar(meta, field),
        }
    }

    fn nested(&self, meta: &dyn Metamodel, field: &str) -> Result<Option<Self>> {
        match self {
            Self::Pending {
                graph,
                type_name,
                record,
            } => match read_record(meta, type_name, record, field).and_then(Slot::node) {
                Some(id) => NodeSource::new(*graph, id).map(|n| Some(Self::Live(n))),
                None => Ok(None),
            },
            Self::Live(node) => Ok(node.nested(meta, field)?.map(Self::Live)),
        }
    }

    fn node(&self) -> Option<NodeId> {
        match self {
            Self::Pending { .. } => None,
            Self::Live(node) => node.node(),
        }
    }
}

fn read_record<'r>(
    meta: &dyn Metamodel,
    type_name: &str,
    record: &'r Record,
    field: &str,
) -> Option<&'r Slot> {
    match meta.find_property(type_name, field) {
        Some(property) => property.accessor().get(record),
        None => record.get(field),
    }
}

/// Derives keys against a metamodel
pub(crate) struct KeyDeriver<'m> {
    meta: &'m dyn Metamodel,
    max_depth: usize,
}

impl<'m> KeyDeriver<'m> {
    pub(crate) fn new(meta: &'m dyn Metamodel, max_depth: usize) -> Self {
        Self { meta, max_depth }
    }

    /// Identifier-based key under the root type, `None` if the type has no
    /// identifier or its value is blank
    pub(crate) fn surrogate<S: KeySource>(
        &self,
        source: &S,
        anchor: Option<&str>,
    ) -> Result<Option<EntityKey>> {
        let type_name = source.type_name();
        let Some(identifier) = self.meta.identifier(type_name) else {
            return Ok(None);
        };
        let Some(value) = source.scalar(self.meta, &identifier) else {
            return Ok(None);
        };
        if value.is_blank() {
            return Ok(None);
        }
        let root = self
            .meta
            .root_type(type_name)
            .ok_or_else(|| GraphError::UnknownType(type_name.to_string()))?;
        Ok(Some(EntityKey::surrogate(
            root.name(),
            value,
            anchor.map(str::to_string),
        )))
    }

    /// One natural key per ancestor declaring one, most specific first
    ///
    /// Declarations whose fields cannot all be resolved yield no key.
    pub(crate) fn natural<S: KeySource>(
        &self,
        source: &S,
        anchor: Option<&str>,
    ) -> Result<Vec<EntityKey>> {
        let mut visiting = HashSet::new();
        self.natural_within(source, anchor, &mut visiting, 0)
    }

    fn natural_within<S: KeySource>(
        &self,
        source: &S,
        anchor: Option<&str>,
        visiting: &mut HashSet<NodeId>,
        depth: usize,
    ) -> Result<Vec<EntityKey>> {
        if depth > self.max_depth {
            return Err(GraphError::invalid(format!(
                "natural key of {} nests deeper than {}",
                source.type_name(),
                self.max_depth
            )));
        }
        if let Some(node) = source.node() {
            if !visiting.insert(node) {
                return Err(GraphError::StructuralCycle { node });
            }
        }

        let mut keys = Vec::new();
        for ty in self.meta.ancestry(source.type_name()) {
            let Some(fields) = ty.declared_natural_key() else {
                continue;
            };
            let mut parts = Vec::with_capacity(fields.len());
            for field in fields {
                match self.field_part(source, field, visiting, depth)? {
                    Some(part) => parts.push((field.clone(), part)),
                    None => break,
                }
            }
            if parts.len() == fields.len() {
                keys.push(EntityKey::natural(
                    ty.name(),
                    parts,
                    anchor.map(str::to_string),
                ));
            }
        }

        if let Some(node) = source.node() {
            visiting.remove(&node);
        }
        Ok(keys)
    }

    /// Value of one natural-key field; dotted fields walk references
    fn field_part<S: KeySource>(
        &self,
        source: &S,
        field: &str,
        visiting: &mut HashSet<NodeId>,
        depth: usize,
    ) -> Result<Option<KeyPart>> {
        let (head, rest) = match field.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (field, None),
        };
        let property = self.meta.find_property(source.type_name(), head);
        match property.as_ref().map(|p| p.kind()) {
            Some(PropertyKind::Reference { .. }) => {
                let Some(nested) = source.nested(self.meta, head)? else {
                    return Ok(None);
                };
                match rest {
                    Some(rest) => self.field_part(&nested, rest, visiting, depth + 1),
                    None => self.entity_part(&nested, visiting, depth + 1),
                }
            }
            Some(PropertyKind::Collection { .. }) => Ok(None),
            Some(PropertyKind::Scalar(_)) | None if rest.is_none() => Ok(source
                .scalar(self.meta, head)
                .filter(|v| !v.is_blank())
                .map(KeyPart::Value)),
            Some(PropertyKind::Scalar(_)) | None => Ok(None),
        }
    }

    /// Identity of a referenced entity: surrogate first, else natural
    fn entity_part<S: KeySource>(
        &self,
        source: &S,
        visiting: &mut HashSet<NodeId>,
        depth: usize,
    ) -> Result<Option<KeyPart>> {
        if let Some(key) = self.surrogate(source, None)? {
            return Ok(Some(KeyPart::Key(Box::new(key))));
        }
        let naturals = self.natural_within(source, None, visiting, depth)?;
        Ok(naturals.into_iter().next().map(|k| KeyPart::Key(Box::new(k))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigraph_model::{EntityType, Property, Record, ScalarType, TypeRegistry};
    use std::sync::Arc;

    fn geography() -> TypeRegistry {
        TypeRegistry::new()
            .with(
                EntityType::new("Country")
                    .property(Property::scalar("code", ScalarType::Text))
                    .natural_key(["code"]),
            )
            .unwrap()
            .with(
                EntityType::new("State")
                    .property(Property::scalar("code", ScalarType::Text))
                    .property(Property::reference("country", "Country"))
                    .natural_key(["country", "code"]),
            )
            .unwrap()
            .with(
                EntityType::new("Link")
                    .property(Property::scalar("id", ScalarType::Int))
                    .property(Property::reference("next", "Link"))
                    .identifier("id"),
            )
            .unwrap()
            .with(
                EntityType::new("Ring")
                    .property(Property::reference("next", "Ring"))
                    .natural_key(["next"]),
            )
            .unwrap()
    }

    fn add(graph: &mut Graph, meta: &TypeRegistry, ty: &str, record: Record) -> NodeId {
        let ty = meta.entity_type(ty).unwrap();
        graph.insert(Arc::clone(&ty), record).unwrap()
    }

    #[test]
    fn nested_natural_key_uses_referenced_identity() {
        let meta = geography();
        let mut graph = Graph::new();
        let us = add(&mut graph, &meta, "Country", Record::new().with("code", Value::from("US")));
        let ny = add(
            &mut graph,
            &meta,
            "State",
            Record::new().with("code", Value::from("NY")).with("country", us),
        );

        let deriver = KeyDeriver::new(&meta, 8);
        let keys = deriver
            .natural(&NodeSource::new(&graph, ny).unwrap(), None)
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].to_string(), r#"State{country: Country{code: "US"}, code: "NY"}"#);
    }

    #[test]
    fn missing_field_yields_no_key() {
        let meta = geography();
        let mut graph = Graph::new();
        let ny = add(&mut graph, &meta, "State", Record::new().with("code", Value::from("NY")));
        let deriver = KeyDeriver::new(&meta, 8);
        let keys = deriver
            .natural(&NodeSource::new(&graph, ny).unwrap(), None)
            .unwrap();
        assert!(keys.is_empty());
    }

    #[test]
    fn blank_identifier_yields_no_surrogate() {
        let meta = geography();
        let mut graph = Graph::new();
        let a = add(&mut graph, &meta, "Link", Record::new().with("id", Value::Null));
        let deriver = KeyDeriver::new(&meta, 8);
        let source = NodeSource::new(&graph, a).unwrap();
        assert!(deriver.surrogate(&source, None).unwrap().is_none());
    }

    #[test]
    fn self_referencing_natural_key_is_a_cycle() {
        let meta = geography();
        let mut graph = Graph::new();
        let a = add(&mut graph, &meta, "Ring", Record::new());
        let b = add(&mut graph, &meta, "Ring", Record::new().with("next", a));
        graph.get_mut(a).unwrap().record.set("next", Slot::Node(b));

        let deriver = KeyDeriver::new(&meta, 8);
        let err = deriver
            .natural(&NodeSource::new(&graph, a).unwrap(), None)
            .unwrap_err();
        assert!(matches!(err, GraphError::StructuralCycle { .. }));
    }
}
