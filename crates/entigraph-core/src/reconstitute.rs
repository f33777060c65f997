//! Reconstitution of object graphs from flat rows
//!
//! A [`Reconstituter`] consumes rows whose columns are dotted paths below a
//! root alias (`order.items.0.sku`) and grows the graph of a
//! [`UnitOfWork`] one row at a time. Entities reached through a column are
//! located by identity before anything is created:
//!
//! 1. the row-local table, so every column of one row under a prefix lands
//!    on the same node
//! 2. the companion cache, keyed by anchor path and the identity derived
//!    from sibling columns
//! 3. the unit of work's identity map
//! 4. for identity-less targets, whatever already sits in the slot, at
//!    the addressed position, or last in the collection when no position
//!    is given
//!
//! Reserved columns (configurable, see [`MapperConfig`](crate::MapperConfig))
//! carry list indices (`$index`), map keys (`$key`) and narrowing type names
//! (`$type`) for the prefix they are attached to. Null values are skipped.
//!
//! Each row is validated against the metamodel before anything is written,
//! so a malformed row leaves the graph untouched. Identity conflicts found
//! while registering the row's nodes still surface after the row's values
//! are in place; earlier rows are never rolled back.

use crate::error::{GraphError, Result};
use crate::identity::{KeyDeriver, KeySource};
use crate::row::Row;
use crate::uow::UnitOfWork;
use entigraph_model::{
    CollectionKind, Element, ElementType, EntityKey, Metamodel, NodeId, Property, PropertyKind,
    Record, Slot, Value,
};
use std::collections::HashMap;

/// Row source for key derivation
struct RowSource<'r> {
    row: &'r Row,
    prefix: String,
    type_name: String,
    type_column: &'r str,
}

impl KeySource for RowSource<'_> {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn scalar(&self, _meta: &dyn Metamodel, field: &str) -> Option<Value> {
        self.row
            .get(&format!("{}.{field}", self.prefix))
            .filter(|v| !v.is_null())
            .cloned()
    }

    fn nested(&self, meta: &dyn Metamodel, field: &str) -> Result<Option<Self>> {
        let Some(property) = meta.find_property(&self.type_name, field) else {
            return Ok(None);
        };
        let Some(target) = property.target_type() else {
            return Ok(None);
        };
        let prefix = format!("{}.{field}", self.prefix);
        if !self.row.has_prefix(&prefix) {
            return Ok(None);
        }
        let type_name = narrow(meta, self.row, &prefix, self.type_column, target)?;
        Ok(Some(Self {
            row: self.row,
            prefix,
            type_name,
            type_column: self.type_column,
        }))
    }

    fn node(&self) -> Option<NodeId> {
        None
    }
}

/// Declared type, or the subtype named by the prefix's type column
fn narrow(
    meta: &dyn Metamodel,
    row: &Row,
    prefix: &str,
    type_column: &str,
    declared: &str,
) -> Result<String> {
    let Some(named) = row
        .get(&format!("{prefix}.{type_column}"))
        .filter(|v| !v.is_null())
    else {
        return Ok(declared.to_string());
    };
    let name = named
        .as_str()
        .ok_or_else(|| GraphError::invalid(format!("{prefix}.{type_column} must be text")))?;
    if meta.entity_type(name).is_none() {
        return Err(GraphError::UnknownType(name.to_string()));
    }
    if !meta.is_subtype(name, declared) {
        return Err(GraphError::mismatch(format!("subtype of {declared}"), name));
    }
    Ok(name.to_string())
}

/// Column path with list positions removed
fn strip_indices(prefix: &str) -> String {
    prefix
        .split('.')
        .filter(|s| !s.bytes().all(|b| b.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(".")
}

/// Whether some other non-null column sits at or below `prefix`
fn feeds_data(row: &Row, reserved: &str, prefix: &str) -> bool {
    row.iter().any(|(column, value)| {
        column != reserved
            && !value.is_null()
            && column
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    })
}

/// Map key as text
fn key_text(value: &Value) -> String {
    value
        .as_str()
        .map_or_else(|| value.to_string(), str::to_string)
}

/// Intermediate step of a column
#[derive(Debug)]
enum Hop {
    /// Value object without identity under a to-one property
    Embedded { property: Property, target: String },
    /// Entity under a to-one property
    Entity {
        property: Property,
        prefix: String,
        target: String,
    },
    /// Entity element of a collection
    Element {
        property: Property,
        kind: CollectionKind,
        prefix: String,
        target: String,
        index: Option<usize>,
        key: Option<String>,
    },
}

/// Final step of a column
#[derive(Debug)]
enum Leaf {
    Scalar {
        property: Option<Property>,
        name: String,
    },
    Element {
        property: Property,
        kind: CollectionKind,
        index: Option<usize>,
        key: Option<String>,
        dedup: bool,
    },
    Append {
        name: String,
    },
}

#[derive(Debug)]
struct ColumnPlan {
    hops: Vec<Hop>,
    leaf: Leaf,
    value: Value,
}

/// Builds graphs from flat rows
#[derive(Debug, Clone)]
pub struct Reconstituter {
    alias: String,
    root_type: String,
    anchor: Option<String>,
    cache: HashMap<EntityKey, NodeId>,
    roots: Vec<NodeId>,
    rows: usize,
}

impl Reconstituter {
    /// Reconstituter for columns below `alias`, rooted at `root_type`
    #[must_use]
    pub fn new(alias: impl Into<String>, root_type: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            root_type: root_type.into(),
            anchor: None,
            cache: HashMap::new(),
            roots: Vec::new(),
            rows: 0,
        }
    }

    /// Anchor for roots and non-contained entities
    #[must_use]
    pub fn with_anchor(mut self, anchor: impl Into<String>) -> Self {
        self.anchor = Some(anchor.into());
        self
    }

    /// Root alias
    #[inline]
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Declared root type
    #[inline]
    #[must_use]
    pub fn root_type(&self) -> &str {
        &self.root_type
    }

    /// Roots built so far, in order of first appearance
    #[inline]
    #[must_use]
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Rows consumed so far
    #[inline]
    #[must_use]
    pub fn rows_applied(&self) -> usize {
        self.rows
    }

    /// Entries in the companion cache
    #[inline]
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Apply every row, stopping at the first error
    ///
    /// Returns the roots built so far.
    ///
    /// # Errors
    /// See [`Reconstituter::apply_row`].
    pub fn apply_rows<'r>(
        &mut self,
        uow: &mut UnitOfWork,
        rows: impl IntoIterator<Item = &'r Row>,
    ) -> Result<Vec<NodeId>> {
        for row in rows {
            self.apply_row(uow, row)?;
        }
        tracing::debug!(
            "Reconstituted {} roots from {} rows",
            self.roots.len(),
            self.rows
        );
        Ok(self.roots.clone())
    }

    /// Apply one row, returning the root it extended
    ///
    /// A row whose every value is null (or that holds only reserved
    /// columns) is a no-op and returns `None`. Rows from which no root
    /// identity can be derived extend the most recent root.
    ///
    /// # Errors
    /// - [`GraphError::InvalidArgument`] for columns outside the alias or
    ///   shaped against the metamodel (scalar with a suffix, entity without
    ///   one, map element without a key column)
    /// - [`GraphError::UnresolvedProperty`] for unknown names on non-open types
    /// - [`GraphError::TypeMismatch`] for values or narrowing types that do
    ///   not fit
    /// - [`GraphError::IdentityConflict`] if a built node's identity is
    ///   already held by a node this reconstituter did not produce
    pub fn apply_row(&mut self, uow: &mut UnitOfWork, row: &Row) -> Result<Option<NodeId>> {
        let span = tracing::trace_span!("row", uow = %uow.id(), index = self.rows);
        let _guard = span.enter();

        let (root_type, plans) = self.plan_row(uow, row)?;
        self.rows += 1;
        if plans.is_empty() {
            return Ok(None);
        }

        let mut reached: Vec<(NodeId, Option<String>)> = Vec::new();
        let root = self.locate_root(uow, row, &root_type)?;
        reached.push((root, self.anchor.clone()));

        let mut local: HashMap<String, NodeId> = HashMap::new();
        for plan in plans {
            self.apply_column(uow, row, root, plan, &mut local, &mut reached)?;
        }

        reached.dedup();
        for (node, anchor) in reached {
            uow.identify(node, anchor.as_deref())?;
        }
        if !self.roots.contains(&root) {
            self.roots.push(root);
        }
        tracing::debug!("Applied row {} to {}", self.rows, root);
        Ok(Some(root))
    }

    // ------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------

    fn plan_row(&self, uow: &UnitOfWork, row: &Row) -> Result<(String, Vec<ColumnPlan>)> {
        let meta = uow.metamodel().as_ref();
        let config = uow.config();
        if meta.entity_type(&self.root_type).is_none() {
            return Err(GraphError::UnknownType(self.root_type.clone()));
        }
        let root_type = narrow(meta, row, &self.alias, &config.type_column, &self.root_type)?;

        let mut plans = Vec::new();
        for (column, value) in row.iter() {
            if value.is_null() {
                continue;
            }
            let segments: Vec<&str> = column.split('.').collect();
            let Some((head, rest)) = segments.split_first() else {
                continue;
            };
            if *head != self.alias {
                return Err(GraphError::invalid(format!(
                    "column '{column}' is not below '{}'",
                    self.alias
                )));
            }
            if rest.last().is_some_and(|s| config.is_reserved(s)) {
                if let Some((prefix, _)) = column.rsplit_once('.') {
                    if !feeds_data(row, column, prefix) {
                        tracing::warn!("Ignoring {}: no value below {}", column, prefix);
                    }
                }
                continue;
            }
            if rest.is_empty() {
                return Err(GraphError::invalid(format!(
                    "column '{column}' names the root itself"
                )));
            }
            plans.push(self.plan_column(uow, row, column, &root_type, rest, value.clone())?);
        }
        Ok((root_type, plans))
    }

    fn plan_column(
        &self,
        uow: &UnitOfWork,
        row: &Row,
        column: &str,
        root_type: &str,
        segments: &[&str],
        value: Value,
    ) -> Result<ColumnPlan> {
        let meta = uow.metamodel().as_ref();
        let config = uow.config();
        let mut type_name = root_type.to_string();
        let mut prefix = self.alias.clone();
        let mut hops = Vec::new();
        let mut i = 0;

        while i < segments.len() {
            let segment = segments[i];
            let last = i + 1 == segments.len();

            let property = match meta.find_property(&type_name, segment) {
                Some(property) => property,
                None if meta.is_open(&type_name) && last => {
                    let leaf = match segment.strip_suffix(config.append_marker.as_str()) {
                        Some(name) if !name.is_empty() => Leaf::Append {
                            name: name.to_string(),
                        },
                        _ => Leaf::Scalar {
                            property: None,
                            name: segment.to_string(),
                        },
                    };
                    return Ok(ColumnPlan { hops, leaf, value });
                }
                None => {
                    return Err(GraphError::UnresolvedProperty {
                        type_name,
                        property: segment.to_string(),
                    })
                }
            };
            prefix = format!("{prefix}.{segment}");

            match property.kind().clone() {
                PropertyKind::Scalar(ty) => {
                    if !last {
                        return Err(GraphError::invalid(format!(
                            "'{column}': '{segment}' is a scalar"
                        )));
                    }
                    if !ty.accepts(&value) {
                        return Err(GraphError::mismatch(ty.to_string(), value.type_name()));
                    }
                    let name = property.name().to_string();
                    return Ok(ColumnPlan {
                        hops,
                        leaf: Leaf::Scalar {
                            property: Some(property),
                            name,
                        },
                        value,
                    });
                }
                PropertyKind::Reference { target, .. } => {
                    if last {
                        return Err(GraphError::invalid(format!(
                            "'{column}': '{segment}' holds an entity, not a value"
                        )));
                    }
                    let target = narrow(meta, row, &prefix, &config.type_column, &target)?;
                    let embedded = meta.entity_type(&target).is_some_and(|t| t.is_embedded());
                    type_name.clone_from(&target);
                    hops.push(if embedded {
                        Hop::Embedded { property, target }
                    } else {
                        Hop::Entity {
                            property,
                            prefix: prefix.clone(),
                            target,
                        }
                    });
                }
                PropertyKind::Collection { kind, element, .. } => {
                    let mut index = None;
                    if kind != CollectionKind::Map {
                        if let Some(position) = segments.get(i + 1).and_then(|s| s.parse::<usize>().ok()) {
                            index = Some(position);
                            prefix = format!("{prefix}.{}", segments[i + 1]);
                            i += 1;
                        }
                    }
                    if index.is_none() {
                        index = row
                            .get(&format!("{prefix}.{}", config.index_column))
                            .and_then(Value::as_index);
                    }
                    let key = if kind == CollectionKind::Map {
                        let key = row
                            .get(&format!("{prefix}.{}", config.key_column))
                            .filter(|v| !v.is_null())
                            .map(key_text)
                            .ok_or_else(|| {
                                GraphError::invalid(format!(
                                    "'{column}': map element needs a {} column",
                                    config.key_column
                                ))
                            })?;
                        Some(key)
                    } else {
                        None
                    };
                    let last = i + 1 == segments.len();

                    match element {
                        ElementType::Scalar(ty) => {
                            if !last {
                                return Err(GraphError::invalid(format!(
                                    "'{column}': '{segment}' holds scalars"
                                )));
                            }
                            if !ty.accepts(&value) {
                                return Err(GraphError::mismatch(
                                    ty.to_string(),
                                    value.type_name(),
                                ));
                            }
                            let dedup = index.is_none() && !meta.is_open(&type_name);
                            return Ok(ColumnPlan {
                                hops,
                                leaf: Leaf::Element {
                                    property,
                                    kind,
                                    index,
                                    key,
                                    dedup,
                                },
                                value,
                            });
                        }
                        ElementType::Entity(target) => {
                            if last {
                                return Err(GraphError::invalid(format!(
                                    "'{column}': '{segment}' holds entities, not values"
                                )));
                            }
                            let target = narrow(meta, row, &prefix, &config.type_column, &target)?;
                            type_name.clone_from(&target);
                            hops.push(Hop::Element {
                                property,
                                kind,
                                prefix: prefix.clone(),
                                target,
                                index,
                                key,
                            });
                        }
                    }
                }
            }
            i += 1;
        }
        Err(GraphError::invalid(format!("column '{column}' ends on an entity")))
    }

    // ------------------------------------------------------------------
    // Application
    // ------------------------------------------------------------------

    fn apply_column(
        &mut self,
        uow: &mut UnitOfWork,
        row: &Row,
        root: NodeId,
        plan: ColumnPlan,
        local: &mut HashMap<String, NodeId>,
        reached: &mut Vec<(NodeId, Option<String>)>,
    ) -> Result<()> {
        let mut current = root;
        for hop in &plan.hops {
            current = match hop {
                Hop::Embedded { property, target } => {
                    self.embedded(uow, current, property, target)?
                }
                Hop::Entity { prefix, .. } | Hop::Element { prefix, .. } => {
                    if let Some(node) = local.get(prefix) {
                        *node
                    } else {
                        let node = self.entity(uow, row, current, hop, reached)?;
                        local.insert(prefix.clone(), node);
                        node
                    }
                }
            };
        }

        let ColumnPlan { leaf, value, .. } = plan;
        let node = uow.node_mut(current)?;
        match leaf {
            Leaf::Scalar { property, name } => {
                node.write(property.as_ref(), &name, Slot::Value(value));
            }
            Leaf::Element {
                property,
                kind,
                index,
                key,
                dedup,
            } => {
                let slot = node.collection_mut(Some(&property), property.name(), kind)?;
                insert_element(slot, Element::Value(value), index, key.as_deref(), dedup);
            }
            Leaf::Append { name } => {
                if let Slot::List(items) = node.collection_mut(None, &name, CollectionKind::List)? {
                    items.push(Element::Value(value));
                }
            }
        }
        Ok(())
    }

    /// Embedded value object: reuse the one in the slot, else create it
    fn embedded(
        &mut self,
        uow: &mut UnitOfWork,
        owner: NodeId,
        property: &Property,
        target: &str,
    ) -> Result<NodeId> {
        let existing = uow
            .node(owner)?
            .slot(Some(property), property.name())
            .and_then(Slot::node);
        let node = match existing {
            Some(node) => node,
            None => {
                let node = uow.create(target, Record::new())?;
                uow.mark_persistent(node)?;
                uow.node_mut(owner)?
                    .write(Some(property), property.name(), Slot::Node(node));
                node
            }
        };
        conform(uow, node, target)?;
        if property.is_containment() {
            uow.set_container(node, owner, property.name())?;
        }
        Ok(node)
    }

    /// Locate or create the entity a hop leads to and link it to `owner`
    fn entity(
        &mut self,
        uow: &mut UnitOfWork,
        row: &Row,
        owner: NodeId,
        hop: &Hop,
        reached: &mut Vec<(NodeId, Option<String>)>,
    ) -> Result<NodeId> {
        let (property, prefix, target, collection) = match hop {
            Hop::Entity {
                property,
                prefix,
                target,
            } => (property, prefix, target, None),
            Hop::Element {
                property,
                kind,
                prefix,
                target,
                index,
                key,
            } => (property, prefix, target, Some((*kind, *index, key.as_deref()))),
            Hop::Embedded { property, target } => return self.embedded(uow, owner, property, target),
        };

        let key = self.row_key(uow, row, prefix, target)?;
        let containment = property.is_containment();
        let (path_anchor, scope) = if containment {
            let slot_anchor = UnitOfWork::slot_anchor(owner, property.name());
            (slot_anchor.clone(), Some(slot_anchor))
        } else {
            (strip_indices(prefix), self.anchor.clone())
        };

        let positional = match collection {
            None => uow
                .node(owner)?
                .slot(Some(property), property.name())
                .and_then(Slot::node),
            Some((kind, index, map_key)) => {
                let slot = uow
                    .node_mut(owner)?
                    .collection_mut(Some(property), property.name(), kind)?;
                match (slot, index, map_key) {
                    (Slot::Map(entries), _, Some(k)) => entries.get(k).and_then(Element::node),
                    (Slot::List(items) | Slot::Set(items), Some(i), _) => {
                        items.get(i).and_then(Element::node)
                    }
                    (Slot::List(items) | Slot::Set(items), None, _) => {
                        items.last().and_then(Element::node)
                    }
                    _ => None,
                }
            }
        };

        let node = match self.find(uow, key.as_ref(), &path_anchor, scope.as_deref())? {
            Some(found) => found,
            None => match positional {
                Some(existing) if key.is_none() => existing,
                _ => {
                    let node = uow.create(target, Record::new())?;
                    uow.mark_persistent(node)?;
                    self.remember(key.as_ref(), &path_anchor, scope.as_deref(), node);
                    tracing::trace!("Created {} for {}", node, prefix);
                    node
                }
            },
        };
        conform(uow, node, target)?;

        match collection {
            None => {
                if positional != Some(node) {
                    uow.node_mut(owner)?
                        .write(Some(property), property.name(), Slot::Node(node));
                }
            }
            Some((kind, index, map_key)) => {
                let slot = uow
                    .node_mut(owner)?
                    .collection_mut(Some(property), property.name(), kind)?;
                insert_element(slot, Element::Node(node), index, map_key, true);
            }
        }
        if containment {
            uow.set_container(node, owner, property.name())?;
        }
        reached.push((node, scope));
        Ok(node)
    }

    fn locate_root(&mut self, uow: &mut UnitOfWork, row: &Row, root_type: &str) -> Result<NodeId> {
        let key = self.row_key(uow, row, &self.alias, root_type)?;
        let path_anchor = self.alias.clone();
        let scope = self.anchor.clone();
        let last = self.roots.last().copied();
        let node = match self.find(uow, key.as_ref(), &path_anchor, scope.as_deref())? {
            Some(found) => found,
            None => match (key.as_ref(), last) {
                (None, Some(last)) if uow.graph().contains(last) => last,
                _ => {
                    let node = uow.create(root_type, Record::new())?;
                    uow.mark_persistent(node)?;
                    self.remember(key.as_ref(), &path_anchor, scope.as_deref(), node);
                    tracing::debug!("New {} root {}", root_type, node);
                    node
                }
            },
        };
        conform(uow, node, root_type)?;
        Ok(node)
    }

    /// Identity of the entity below `prefix`, natural key first
    fn row_key(
        &self,
        uow: &UnitOfWork,
        row: &Row,
        prefix: &str,
        type_name: &str,
    ) -> Result<Option<EntityKey>> {
        let source = RowSource {
            row,
            prefix: prefix.to_string(),
            type_name: type_name.to_string(),
            type_column: &uow.config().type_column,
        };
        let deriver = KeyDeriver::new(uow.metamodel().as_ref(), uow.config().max_key_depth);
        if let Some(natural) = deriver.natural(&source, None)?.into_iter().next() {
            return Ok(Some(natural));
        }
        deriver.surrogate(&source, None)
    }

    /// Companion cache by anchor path, then by scope, then the identity map
    fn find(
        &mut self,
        uow: &mut UnitOfWork,
        key: Option<&EntityKey>,
        path_anchor: &str,
        scope: Option<&str>,
    ) -> Result<Option<NodeId>> {
        let Some(key) = key else {
            return Ok(None);
        };
        let by_path = key.with_anchor(Some(path_anchor.to_string()));
        let by_scope = key.with_anchor(scope.map(str::to_string));
        for cached in [&by_path, &by_scope] {
            if let Some(node) = self.cache.get(cached).copied() {
                if uow.graph().contains(node) {
                    return Ok(Some(node));
                }
                self.cache.remove(cached);
            }
        }
        let found = uow.lookup(&by_scope)?;
        if let Some(node) = found {
            self.remember(Some(key), path_anchor, scope, node);
        }
        Ok(found)
    }

    fn remember(
        &mut self,
        key: Option<&EntityKey>,
        path_anchor: &str,
        scope: Option<&str>,
        node: NodeId,
    ) {
        if let Some(key) = key {
            self.cache
                .insert(key.with_anchor(Some(path_anchor.to_string())), node);
            self.cache.insert(key.with_anchor(scope.map(str::to_string)), node);
        }
    }
}

/// Make `node` an instance of `target`, downcasting when `target` is more
/// specific
fn conform(uow: &mut UnitOfWork, node: NodeId, target: &str) -> Result<()> {
    let current = uow.node(node)?.type_name().to_string();
    let meta = uow.metamodel();
    if meta.is_subtype(&current, target) {
        Ok(())
    } else if meta.is_subtype(target, &current) {
        uow.downcast(node, target)
    } else {
        Err(GraphError::mismatch(target, current))
    }
}

/// Insert following collection semantics; false if nothing changed
///
/// - map: put by key, skipped when the key already holds `element`
/// - set: add if absent
/// - list: skipped when `index` already holds `element`, or when `dedup`
///   is on and `element` is present anywhere; appended otherwise. Scalar
///   columns dedup only when they carry no index.
fn insert_element(
    slot: &mut Slot,
    element: Element,
    index: Option<usize>,
    key: Option<&str>,
    dedup: bool,
) -> bool {
    match slot {
        Slot::Map(entries) => {
            let Some(key) = key else {
                return false;
            };
            if entries.get(key) == Some(&element) {
                return false;
            }
            entries.insert(key.to_string(), element);
            true
        }
        Slot::Set(items) => {
            if items.contains(&element) {
                return false;
            }
            items.push(element);
            true
        }
        Slot::List(items) => {
            if index.is_some_and(|i| items.get(i) == Some(&element)) {
                return false;
            }
            if dedup && items.contains(&element) {
                return false;
            }
            items.push(element);
            true
        }
        Slot::Value(_) | Slot::Node(_) => false,
    }
}
