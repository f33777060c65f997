//! Path interpreter
//!
//! Evaluates [`PathExpr`]s against the graph of a [`UnitOfWork`]. Reads
//! return the addressed [`Slot`] (or `None` when nothing is there); writes
//! type-check against the metamodel, keep containment back-links in step
//! with the slots, and flag the written node as modified.
//!
//! # Selectors
//!
//! | Form | Read | Write |
//! |------|------|-------|
//! | `items.0`, `items[1]` | element at position | replace (append at end) |
//! | `items.0+`, `items[1+]` | element at position | insert before position |
//! | `items.<<` | last element | append |
//! | `items[sku=A]` | first match | replace first match |
//! | `attrs[color]` | map entry | put |
//!
//! On a map-valued property a numeric selector is used as the key, written
//! form included: `attrs[1]` reads key `"1"`.

use crate::error::{GraphError, Result};
use crate::uow::UnitOfWork;
use entigraph_model::{
    Element, ElementType, EntityKey, NodeId, PathExpr, Property, PropertyKind, ScalarType,
    Selector, Slot, Step, Value,
};

impl UnitOfWork {
    /// Read the slot addressed by `path`, relative to `node`
    ///
    /// # Errors
    /// - [`GraphError::Path`] if `path` does not parse
    /// - see [`UnitOfWork::get_path`]
    pub fn get(&mut self, node: NodeId, path: &str) -> Result<Option<Slot>> {
        let path: PathExpr = path.parse()?;
        self.get_path(node, &path)
    }

    /// Read the slot addressed by a parsed path
    ///
    /// Every step but the last must land on a single node; a missing
    /// intermediate value ends the walk with `None`.
    ///
    /// # Errors
    /// - [`GraphError::UnresolvedProperty`] for unknown names on non-open types
    /// - [`GraphError::InvalidArgument`] if an intermediate step yields a
    ///   scalar or collection, or a selector is applied to a non-collection
    /// - [`GraphError::StructuralCycle`] if `/` meets a containment cycle
    pub fn get_path(&mut self, node: NodeId, path: &PathExpr) -> Result<Option<Slot>> {
        let start = if path.is_absolute() {
            self.root_of(node)?
        } else {
            self.node(node)?;
            node
        };
        let Some((first, rest)) = path.split_first() else {
            return Ok(Some(Slot::Node(start)));
        };

        let found = self.read_step(start, first)?;
        if rest.is_empty() {
            return Ok(found);
        }
        match found {
            Some(Slot::Node(next)) => self.get_path(next, &rest),
            None | Some(Slot::Value(Value::Null)) => Ok(None),
            Some(_) => Err(GraphError::invalid(format!(
                "'{first}' does not lead to a single node"
            ))),
        }
    }

    /// Read a scalar
    ///
    /// # Errors
    /// [`GraphError::InvalidArgument`] if the path addresses a node or a
    /// collection, plus everything [`UnitOfWork::get`] returns.
    pub fn get_value(&mut self, node: NodeId, path: &str) -> Result<Option<Value>> {
        match self.get(node, path)? {
            None => Ok(None),
            Some(Slot::Value(v)) => Ok(Some(v)),
            Some(_) => Err(GraphError::invalid(format!("'{path}' is not a scalar"))),
        }
    }

    /// Read a to-one reference or a single collection element
    ///
    /// # Errors
    /// [`GraphError::InvalidArgument`] if the path addresses a scalar or a
    /// collection, plus everything [`UnitOfWork::get`] returns.
    pub fn get_node(&mut self, node: NodeId, path: &str) -> Result<Option<NodeId>> {
        match self.get(node, path)? {
            None | Some(Slot::Value(Value::Null)) => Ok(None),
            Some(Slot::Node(id)) => Ok(Some(id)),
            Some(_) => Err(GraphError::invalid(format!("'{path}' is not a node"))),
        }
    }

    /// Write `value` at `path`, relative to `node`
    ///
    /// # Errors
    /// - [`GraphError::Path`] if `path` does not parse
    /// - see [`UnitOfWork::set_path`]
    pub fn set(&mut self, node: NodeId, path: &str, value: impl Into<Slot>) -> Result<()> {
        let path: PathExpr = path.parse()?;
        self.set_path(node, &path, value.into())
    }

    /// Write through a parsed path
    ///
    /// The prefix is resolved like [`UnitOfWork::get_path`] and must land on
    /// a node; the last step names the property written.
    ///
    /// # Errors
    /// - [`GraphError::TypeMismatch`] if the value does not fit the property
    /// - [`GraphError::InvalidArgument`] for wrongly shaped values, `/` or
    ///   `..` as the last step, or selectors out of range
    /// - [`GraphError::StructuralCycle`] if a containment write would make a
    ///   node contain one of its ancestors
    pub fn set_path(&mut self, node: NodeId, path: &PathExpr, value: Slot) -> Result<()> {
        let Some((last, prefix)) = path.split_last() else {
            return Err(GraphError::invalid("cannot assign to the root"));
        };
        let target = match self.get_path(node, &prefix)? {
            Some(Slot::Node(target)) => target,
            Some(_) => {
                return Err(GraphError::invalid(format!(
                    "'{prefix}' does not lead to a single node"
                )))
            }
            None => return Err(GraphError::invalid(format!("'{prefix}' resolves to nothing"))),
        };

        match last {
            Step::Container => Err(GraphError::invalid(
                "'..' cannot be assigned, use set_container",
            )),
            Step::Property { name, selector } => {
                let property = self.property_of(target, name)?;
                let canonical = property.as_ref().map_or(name.as_str(), Property::name);
                let type_name = self.node(target)?.type_name().to_string();
                let anchors = if self.is_identity_field(&type_name, canonical) {
                    self.key_anchors(target)
                } else {
                    Vec::new()
                };
                let keyed = !anchors.is_empty();
                let previous = if keyed {
                    self.node(target)?.slot(property.as_ref(), name).cloned()
                } else {
                    None
                };
                match selector {
                    None => self.assign(target, property.as_ref(), name, value)?,
                    Some(selector) => {
                        self.assign_element(target, property.as_ref(), name, selector, value)?;
                    }
                }
                if keyed {
                    if let Err(err) = self.reidentify(target, &anchors) {
                        let restored = previous.unwrap_or(Slot::Value(Value::Null));
                        self.node_mut(target)?.write(property.as_ref(), name, restored);
                        self.reidentify(target, &anchors)?;
                        return Err(err);
                    }
                }
                tracing::trace!("Set {}.{}", target, path);
                self.mark_modified(target)
            }
        }
    }

    /// Create a node of `type_name` and write each `(path, value)` pair
    ///
    /// Nothing is kept if any write fails.
    ///
    /// # Errors
    /// Everything [`UnitOfWork::create`] and [`UnitOfWork::set`] return.
    pub fn insert_value<I, P, V>(&mut self, type_name: &str, fields: I) -> Result<NodeId>
    where
        I: IntoIterator<Item = (P, V)>,
        P: AsRef<str>,
        V: Into<Slot>,
    {
        let node = self.create(type_name, entigraph_model::Record::new())?;
        for (path, value) in fields {
            if let Err(err) = self.set(node, path.as_ref(), value) {
                self.discard(node)?;
                return Err(err);
            }
        }
        Ok(node)
    }

    fn read_step(&mut self, node: NodeId, step: &Step) -> Result<Option<Slot>> {
        let Step::Property { name, selector } = step else {
            return Ok(self.container(node)?.map(Slot::Node));
        };
        let property = self.property_of(node, name)?;
        let slot = self.node(node)?.slot(property.as_ref(), name).cloned();
        let Some(selector) = selector else {
            return Ok(slot);
        };
        let Some(slot) = slot else {
            return Ok(None);
        };
        if slot.collection_kind().is_none() {
            if slot.is_null() {
                return Ok(None);
            }
            return Err(GraphError::invalid(format!("'{name}' is not a collection")));
        }

        let element = match selector {
            Selector::Index(index) => match &slot {
                Slot::Map(entries) => entries.get(&index.written().to_string()).cloned(),
                _ => slot.elements().get(index.position).map(|e| (*e).clone()),
            },
            Selector::Append => slot.elements().last().map(|e| (*e).clone()),
            Selector::Key(key) => match &slot {
                Slot::Map(entries) => entries.get(key).cloned(),
                _ => return Err(GraphError::invalid(format!("'{name}' is not a map"))),
            },
            Selector::Filter { attr, literal } => self
                .filter(node, property.as_ref(), name, &slot, attr, literal)?
                .map(Element::Node),
        };
        Ok(element.map(Slot::from))
    }

    /// First entity element of `slot` whose `attr` equals `literal`
    ///
    /// Filters on the identifier go through the identity map first.
    fn filter(
        &mut self,
        owner: NodeId,
        property: Option<&Property>,
        name: &str,
        slot: &Slot,
        attr: &str,
        literal: &str,
    ) -> Result<Option<NodeId>> {
        let members = slot.nodes();
        if let Some(target) = property.and_then(Property::target_type) {
            if self.metamodel().identifier(target).as_deref() == Some(attr) {
                let root = self
                    .metamodel()
                    .root_type(target)
                    .ok_or_else(|| GraphError::UnknownType(target.to_string()))?;
                let anchor = property
                    .filter(|p| p.is_containment())
                    .map(|_| Self::slot_anchor(owner, name));
                let value = self.literal_value(target, attr, literal);
                let key = EntityKey::surrogate(root.name(), value, anchor);
                if let Some(found) = self.lookup(&key)? {
                    if members.contains(&found) {
                        return Ok(Some(found));
                    }
                }
            }
        }

        for member in members {
            let n = self.node(member)?;
            let declared = self.metamodel().find_property(n.type_name(), attr);
            let hit = n
                .slot(declared.as_ref(), attr)
                .and_then(Slot::value)
                .is_some_and(|v| v.matches_literal(literal));
            if hit {
                return Ok(Some(member));
            }
        }
        Ok(None)
    }

    /// Literal typed after the attribute's declared scalar type
    fn literal_value(&self, type_name: &str, attr: &str, literal: &str) -> Value {
        let declared = self
            .metamodel()
            .find_property(type_name, attr)
            .and_then(|p| match p.kind() {
                PropertyKind::Scalar(ty) => Some(*ty),
                _ => None,
            });
        let parsed = match declared {
            Some(ScalarType::Int) => literal.parse().ok().map(Value::Int),
            Some(ScalarType::Float) => literal.parse().ok().map(Value::Float),
            Some(ScalarType::Bool) => literal.parse().ok().map(Value::Bool),
            _ => None,
        };
        parsed.unwrap_or_else(|| Value::from(literal))
    }

    fn assign(
        &mut self,
        target: NodeId,
        property: Option<&Property>,
        name: &str,
        value: Slot,
    ) -> Result<()> {
        match property.map(Property::kind) {
            Some(PropertyKind::Scalar(ty)) => {
                let v = value
                    .value()
                    .ok_or_else(|| GraphError::invalid(format!("'{name}' holds a scalar")))?;
                if !ty.accepts(v) {
                    return Err(GraphError::mismatch(ty.to_string(), v.type_name()));
                }
            }
            Some(PropertyKind::Reference { target: expected, .. }) => match &value {
                Slot::Node(child) => self.check_entity(*child, expected)?,
                Slot::Value(Value::Null) => {}
                _ => return Err(GraphError::invalid(format!("'{name}' holds a node"))),
            },
            Some(PropertyKind::Collection { kind, element, .. }) => {
                if !value.is_null() {
                    if value.collection_kind() != Some(*kind) {
                        return Err(GraphError::invalid(format!("'{name}' holds a {kind:?}")));
                    }
                    for e in value.elements() {
                        self.check_element(element, e)?;
                    }
                }
            }
            None => {}
        }

        let containment = property.is_some_and(Property::is_containment);
        let incoming = value.nodes();
        if containment {
            for child in &incoming {
                self.check_containable(*child, target)?;
            }
        }
        let outgoing = if containment {
            self.node(target)?
                .slot(property, name)
                .map(Slot::nodes)
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        self.node_mut(target)?.write(property, name, value);

        if containment {
            for old in outgoing.into_iter().filter(|o| !incoming.contains(o)) {
                self.release(old, target)?;
            }
            for child in incoming {
                self.set_container(child, target, name)?;
            }
        }
        Ok(())
    }

    fn assign_element(
        &mut self,
        target: NodeId,
        property: Option<&Property>,
        name: &str,
        selector: &Selector,
        value: Slot,
    ) -> Result<()> {
        let element = match value {
            Slot::Node(id) => Element::Node(id),
            Slot::Value(v) => Element::Value(v),
            _ => {
                return Err(GraphError::invalid(format!(
                    "cannot place a collection inside '{name}'"
                )))
            }
        };
        let (kind, containment) = match property.map(Property::kind) {
            Some(PropertyKind::Collection {
                kind,
                element: element_type,
                containment,
            }) => {
                self.check_element(element_type, &element)?;
                (*kind, *containment)
            }
            Some(_) => return Err(GraphError::invalid(format!("'{name}' is not a collection"))),
            None => {
                let existing = self
                    .node(target)?
                    .slot(None, name)
                    .and_then(Slot::collection_kind);
                let fallback = if matches!(selector, Selector::Key(_)) {
                    entigraph_model::CollectionKind::Map
                } else {
                    entigraph_model::CollectionKind::List
                };
                (existing.unwrap_or(fallback), false)
            }
        };
        if containment {
            if let Element::Node(child) = element {
                self.check_containable(child, target)?;
            }
        }

        let hit = match selector {
            Selector::Filter { attr, literal } => {
                let current = self.node(target)?.slot(property, name).cloned();
                match current {
                    Some(slot) => self.filter(target, property, name, &slot, attr, literal)?,
                    None => None,
                }
            }
            _ => None,
        };

        let slot = self.node_mut(target)?.collection_mut(property, name, kind)?;
        let displaced = place(slot, selector, element.clone(), hit, name)?;

        if containment {
            if let Some(Element::Node(old)) = displaced {
                if element.node() != Some(old) {
                    self.release(old, target)?;
                }
            }
            if let Element::Node(child) = element {
                self.set_container(child, target, name)?;
            }
        }
        Ok(())
    }

    fn check_entity(&self, node: NodeId, expected: &str) -> Result<()> {
        let found = self.node(node)?.type_name();
        if self.metamodel().is_subtype(found, expected) {
            Ok(())
        } else {
            Err(GraphError::mismatch(expected, found))
        }
    }

    fn check_element(&self, expected: &ElementType, element: &Element) -> Result<()> {
        match (expected, element) {
            (ElementType::Scalar(ty), Element::Value(v)) => {
                if ty.accepts(v) {
                    Ok(())
                } else {
                    Err(GraphError::mismatch(ty.to_string(), v.type_name()))
                }
            }
            (ElementType::Entity(ty), Element::Node(id)) => self.check_entity(*id, ty),
            (ElementType::Scalar(ty), Element::Node(_)) => Err(GraphError::mismatch(ty.to_string(), "node")),
            (ElementType::Entity(ty), Element::Value(v)) => {
                Err(GraphError::mismatch(ty.as_str(), v.type_name()))
            }
        }
    }

    /// `child` may be placed under `parent` without closing a cycle
    fn check_containable(&self, child: NodeId, parent: NodeId) -> Result<()> {
        let mut cursor = Some(parent);
        let mut steps = 0usize;
        while let Some(current) = cursor {
            if current == child || steps > self.graph().len() {
                return Err(GraphError::StructuralCycle { node: current });
            }
            steps += 1;
            cursor = self.container(current)?;
        }
        Ok(())
    }

    /// Clear the back-link of a node dropped from `owner`'s slot
    fn release(&mut self, child: NodeId, owner: NodeId) -> Result<()> {
        let node = self.node_mut(child)?;
        if node.container == Some(owner) {
            node.container = None;
            node.containment_property = None;
        }
        Ok(())
    }
}

/// Put `element` into a collection slot, returning the element it replaced
fn place(
    slot: &mut Slot,
    selector: &Selector,
    element: Element,
    hit: Option<NodeId>,
    name: &str,
) -> Result<Option<Element>> {
    let unique = matches!(slot, Slot::Set(_));
    match slot {
        Slot::Map(entries) => match selector {
            Selector::Index(index) => Ok(entries.insert(index.written().to_string(), element)),
            Selector::Key(key) => Ok(entries.insert(key.clone(), element)),
            Selector::Append => Err(GraphError::invalid(format!("cannot append to map '{name}'"))),
            Selector::Filter { .. } => {
                let key = entries
                    .iter()
                    .find(|(_, e)| hit.is_some() && e.node() == hit)
                    .map(|(k, _)| k.clone())
                    .ok_or_else(|| GraphError::invalid(format!("no element of '{name}' matches")))?;
                Ok(entries.insert(key, element))
            }
        },
        Slot::List(items) | Slot::Set(items) => {
            if unique && items.contains(&element) {
                return Ok(None);
            }
            match selector {
                Selector::Key(_) => {
                    return Err(GraphError::invalid(format!("'{name}' is not a map")))
                }
                Selector::Filter { .. }
                    if !hit.is_some_and(|h| items.iter().any(|e| e.node() == Some(h))) =>
                {
                    return Err(GraphError::invalid(format!("no element of '{name}' matches")))
                }
                _ => {}
            }
            // a node already in the list is moved, never duplicated
            let mut shift = 0;
            if let Some(at) = element
                .node()
                .and_then(|id| items.iter().position(|e| e.node() == Some(id)))
            {
                let unchanged = match selector {
                    Selector::Index(index) => !index.insert && index.position == at,
                    Selector::Append => at + 1 == items.len(),
                    Selector::Filter { .. } => hit == element.node(),
                    Selector::Key(_) => false,
                };
                if unchanged {
                    return Ok(None);
                }
                if let Selector::Index(index) = selector {
                    if index.position > items.len() {
                        return Err(out_of_range(name, index.position, items.len()));
                    }
                    if at < index.position {
                        shift = 1;
                    }
                }
                items.remove(at);
            }
            match selector {
                Selector::Index(index) if index.insert => {
                    let position = index.position - shift;
                    if position > items.len() {
                        return Err(out_of_range(name, index.position, items.len()));
                    }
                    items.insert(position, element);
                    Ok(None)
                }
                Selector::Index(index) => match (index.position - shift).cmp(&items.len()) {
                    std::cmp::Ordering::Less => Ok(Some(std::mem::replace(
                        &mut items[index.position - shift],
                        element,
                    ))),
                    std::cmp::Ordering::Equal => {
                        items.push(element);
                        Ok(None)
                    }
                    std::cmp::Ordering::Greater => {
                        Err(out_of_range(name, index.position, items.len()))
                    }
                },
                Selector::Append => {
                    items.push(element);
                    Ok(None)
                }
                Selector::Key(_) => Err(GraphError::invalid(format!("'{name}' is not a map"))),
                Selector::Filter { .. } => {
                    let position = hit
                        .and_then(|h| items.iter().position(|e| e.node() == Some(h)))
                        .ok_or_else(|| {
                            GraphError::invalid(format!("no element of '{name}' matches"))
                        })?;
                    Ok(Some(std::mem::replace(&mut items[position], element)))
                }
            }
        }
        Slot::Value(_) | Slot::Node(_) => {
            Err(GraphError::invalid(format!("'{name}' is not a collection")))
        }
    }
}

fn out_of_range(name: &str, position: usize, len: usize) -> GraphError {
    GraphError::invalid(format!("index {position} out of range for '{name}' (len {len})"))
}
