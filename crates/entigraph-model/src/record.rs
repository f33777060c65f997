//! Record storage
//!
//! A [`Record`] is the data wrapped by one graph node: an ordered bag of
//! named [`Slot`]s. Slots refer to other records through [`NodeId`]
//! handles, never through owning pointers.

use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Handle to a node in a unit of work's arena
///
/// Non-owning; a handle may outlive the node it names, lookups then fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Wrap a raw arena index
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Raw arena index
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Collection member
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Element {
    /// Entity element
    Node(NodeId),
    /// Scalar element
    Value(Value),
}

impl Element {
    /// Entity handle, if any
    #[inline]
    #[must_use]
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            Self::Value(_) => None,
        }
    }

    /// Scalar content, if any
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Node(_) => None,
        }
    }
}

impl From<NodeId> for Element {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl From<Value> for Element {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

/// Collection flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    /// Ordered, positional
    List,
    /// Ordered, no duplicate members
    Set,
    /// Keyed by string
    Map,
}

/// Contents of one record field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Slot {
    /// Scalar
    Value(Value),
    /// To-one reference
    Node(NodeId),
    /// List of elements
    List(Vec<Element>),
    /// Insertion-ordered set of elements
    Set(Vec<Element>),
    /// Keyed elements
    Map(IndexMap<String, Element>),
}

impl Slot {
    /// Empty collection of the given kind
    #[must_use]
    pub fn empty(kind: CollectionKind) -> Self {
        match kind {
            CollectionKind::List => Self::List(Vec::new()),
            CollectionKind::Set => Self::Set(Vec::new()),
            CollectionKind::Map => Self::Map(IndexMap::new()),
        }
    }

    /// Scalar content, if any
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// To-one target, if any
    #[inline]
    #[must_use]
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// Collection kind, if this slot is a collection
    #[must_use]
    pub fn collection_kind(&self) -> Option<CollectionKind> {
        match self {
            Self::List(_) => Some(CollectionKind::List),
            Self::Set(_) => Some(CollectionKind::Set),
            Self::Map(_) => Some(CollectionKind::Map),
            Self::Value(_) | Self::Node(_) => None,
        }
    }

    /// Null scalar
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }

    /// Elements in iteration order (map values in insertion order)
    #[must_use]
    pub fn elements(&self) -> Vec<&Element> {
        match self {
            Self::List(items) | Self::Set(items) => items.iter().collect(),
            Self::Map(entries) => entries.values().collect(),
            Self::Value(_) | Self::Node(_) => Vec::new(),
        }
    }

    /// Every node handle held by this slot
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeId> {
        match self {
            Self::Node(id) => vec![*id],
            _ => self.elements().into_iter().filter_map(Element::node).collect(),
        }
    }
}

impl From<Value> for Slot {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<NodeId> for Slot {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl From<Element> for Slot {
    fn from(e: Element) -> Self {
        match e {
            Element::Node(id) => Self::Node(id),
            Element::Value(v) => Self::Value(v),
        }
    }
}

/// Ordered bag of named slots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: IndexMap<String, Slot>,
}

impl Record {
    /// Empty record
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, slot: impl Into<Slot>) -> Self {
        self.fields.insert(name.into(), slot.into());
        self
    }

    /// Read a field
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Slot> {
        self.fields.get(name)
    }

    /// Mutable access to a field
    #[inline]
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Slot> {
        self.fields.get_mut(name)
    }

    /// Write a field, returning the previous slot
    #[inline]
    pub fn set(&mut self, name: impl Into<String>, slot: Slot) -> Option<Slot> {
        self.fields.insert(name.into(), slot)
    }

    /// Remove a field
    #[inline]
    pub fn remove(&mut self, name: &str) -> Option<Slot> {
        self.fields.shift_remove(name)
    }

    /// Check field presence
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Field names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Fields in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Slot)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Mutable fields in insertion order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Slot)> {
        self.fields.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// No fields at all
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, S: Into<Slot>> FromIterator<(K, S)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, S)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, s)| (k.into(), s.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_builder_keeps_order() {
        let record = Record::new()
            .with("id", Value::Int(1))
            .with("name", Value::from("a"))
            .with("owner", NodeId::new(4));
        let names: Vec<_> = record.names().collect();
        assert_eq!(names, vec!["id", "name", "owner"]);
        assert_eq!(record.get("owner").and_then(Slot::node), Some(NodeId::new(4)));
    }

    #[test]
    fn slot_nodes_cover_collections() {
        let list = Slot::List(vec![
            Element::Node(NodeId::new(1)),
            Element::Value(Value::Int(2)),
            Element::Node(NodeId::new(3)),
        ]);
        assert_eq!(list.nodes(), vec![NodeId::new(1), NodeId::new(3)]);
        assert_eq!(list.collection_kind(), Some(CollectionKind::List));

        let mut entries = IndexMap::new();
        entries.insert("a".to_string(), Element::Node(NodeId::new(9)));
        assert_eq!(Slot::Map(entries).nodes(), vec![NodeId::new(9)]);
    }

    #[test]
    fn remove_preserves_remaining_order() {
        let mut record: Record = [("a", Value::Int(1)), ("b", Value::Int(2)), ("c", Value::Int(3))]
            .into_iter()
            .collect();
        record.remove("b");
        assert_eq!(record.names().collect::<Vec<_>>(), vec!["a", "c"]);
    }
}
