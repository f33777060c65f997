//! Metamodel capability
//!
//! Describes entity shapes: ordered properties, identifier, natural key,
//! containment and collection classification. Property access goes through
//! a [`PropertyAccessor`] registered per property instead of reflection.

use crate::error::ModelError;
use crate::record::{CollectionKind, Record, Slot};
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;

/// Declared type of a scalar property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScalarType {
    /// Any leaf value
    #[default]
    Any,
    /// Boolean
    Bool,
    /// Integer
    Int,
    /// Float (integers are widened)
    Float,
    /// Text
    Text,
    /// Timestamp
    Timestamp,
}

impl ScalarType {
    /// Whether `value` may be stored in a property of this type
    ///
    /// Null is accepted everywhere.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (Self::Any, _) => true,
            (Self::Bool, Value::Bool(_))
            | (Self::Int, Value::Int(_))
            | (Self::Float, Value::Float(_) | Value::Int(_))
            | (Self::Text, Value::Text(_))
            | (Self::Timestamp, Value::Timestamp(_)) => true,
            _ => false,
        }
    }
}

impl Display for ScalarType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// Element type of a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// Scalar elements
    Scalar(ScalarType),
    /// Entity elements of the named type
    Entity(String),
}

/// Classification of a property
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// Data-typed leaf
    Scalar(ScalarType),
    /// To-one entity reference
    Reference {
        /// Target type name
        target: String,
        /// Target lifecycle is owned by the holder
        containment: bool,
    },
    /// To-many collection
    Collection {
        /// List, set or map
        kind: CollectionKind,
        /// Element type
        element: ElementType,
        /// Entity elements are owned by the holder
        containment: bool,
    },
}

/// Get/set capability for one property
///
/// The default [`FieldAccessor`] reads the record field of the same name;
/// custom implementations map a property onto any record layout.
pub trait PropertyAccessor: Send + Sync + Debug {
    /// Read the slot
    fn get<'r>(&self, record: &'r Record) -> Option<&'r Slot>;

    /// Mutable access to the slot
    fn get_mut<'r>(&self, record: &'r mut Record) -> Option<&'r mut Slot>;

    /// Write the slot
    fn set(&self, record: &mut Record, slot: Slot);
}

/// Accessor backed by a named record field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAccessor {
    field: String,
}

impl FieldAccessor {
    /// Accessor for the given storage field
    #[inline]
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    /// Storage field name
    #[inline]
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }
}

impl PropertyAccessor for FieldAccessor {
    fn get<'r>(&self, record: &'r Record) -> Option<&'r Slot> {
        record.get(&self.field)
    }

    fn get_mut<'r>(&self, record: &'r mut Record) -> Option<&'r mut Slot> {
        record.get_mut(&self.field)
    }

    fn set(&self, record: &mut Record, slot: Slot) {
        record.set(self.field.clone(), slot);
    }
}

/// One property of an entity type
#[derive(Debug, Clone)]
pub struct Property {
    name: String,
    aliases: Vec<String>,
    kind: PropertyKind,
    accessor: Arc<dyn PropertyAccessor>,
}

impl Property {
    /// Property with the default field accessor
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        let name = name.into();
        Self {
            accessor: Arc::new(FieldAccessor::new(name.clone())),
            name,
            aliases: Vec::new(),
            kind,
        }
    }

    /// Scalar property
    #[inline]
    #[must_use]
    pub fn scalar(name: impl Into<String>, ty: ScalarType) -> Self {
        Self::new(name, PropertyKind::Scalar(ty))
    }

    /// Non-containment to-one reference
    #[inline]
    #[must_use]
    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            PropertyKind::Reference {
                target: target.into(),
                containment: false,
            },
        )
    }

    /// Containment to-one reference
    #[inline]
    #[must_use]
    pub fn contains(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            PropertyKind::Reference {
                target: target.into(),
                containment: true,
            },
        )
    }

    /// Collection property (not containment until [`Property::contained`])
    #[inline]
    #[must_use]
    pub fn collection(name: impl Into<String>, kind: CollectionKind, element: ElementType) -> Self {
        Self::new(
            name,
            PropertyKind::Collection {
                kind,
                element,
                containment: false,
            },
        )
    }

    /// Containment list of entities
    #[inline]
    #[must_use]
    pub fn list_of(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::collection(name, CollectionKind::List, ElementType::Entity(target.into())).contained()
    }

    /// Mark a reference or collection as containment
    #[must_use]
    pub fn contained(mut self) -> Self {
        match &mut self.kind {
            PropertyKind::Reference { containment, .. }
            | PropertyKind::Collection { containment, .. } => *containment = true,
            PropertyKind::Scalar(_) => {}
        }
        self
    }

    /// Add an alternative name
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Store under a different record field
    #[must_use]
    pub fn stored_as(self, field: impl Into<String>) -> Self {
        self.with_accessor(Arc::new(FieldAccessor::new(field)))
    }

    /// Replace the accessor
    #[must_use]
    pub fn with_accessor(mut self, accessor: Arc<dyn PropertyAccessor>) -> Self {
        self.accessor = accessor;
        self
    }

    /// Property name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Alternative names
    #[inline]
    #[must_use]
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Match by name or alias
    #[must_use]
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }

    /// Classification
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    /// Accessor capability
    #[inline]
    #[must_use]
    pub fn accessor(&self) -> &dyn PropertyAccessor {
        self.accessor.as_ref()
    }

    /// Data-typed leaf
    #[inline]
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, PropertyKind::Scalar(_))
    }

    /// To-many
    #[inline]
    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(self.kind, PropertyKind::Collection { .. })
    }

    /// Target lifecycle owned by the holder
    #[must_use]
    pub fn is_containment(&self) -> bool {
        match self.kind {
            PropertyKind::Reference { containment, .. }
            | PropertyKind::Collection { containment, .. } => containment,
            PropertyKind::Scalar(_) => false,
        }
    }

    /// Entity type reached through this property, if any
    #[must_use]
    pub fn target_type(&self) -> Option<&str> {
        match &self.kind {
            PropertyKind::Reference { target, .. }
            | PropertyKind::Collection {
                element: ElementType::Entity(target),
                ..
            } => Some(target),
            _ => None,
        }
    }

    /// Collection kind, if a collection
    #[must_use]
    pub fn collection_kind(&self) -> Option<CollectionKind> {
        match self.kind {
            PropertyKind::Collection { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

/// Shape of one entity type
#[derive(Debug, Clone, Default)]
pub struct EntityType {
    name: String,
    supertype: Option<String>,
    properties: Vec<Property>,
    identifier: Option<String>,
    natural_key: Option<Vec<String>>,
    open: bool,
    embedded: bool,
}

impl EntityType {
    /// Empty type
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declare the supertype
    #[must_use]
    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.supertype = Some(supertype.into());
        self
    }

    /// Declare a property
    #[must_use]
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Declare the identifier property
    #[must_use]
    pub fn identifier(mut self, name: impl Into<String>) -> Self {
        self.identifier = Some(name.into());
        self
    }

    /// Declare the natural key field paths
    #[must_use]
    pub fn natural_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.natural_key = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Allow undeclared fields (open document)
    #[must_use]
    pub fn open(mut self) -> Self {
        self.open = true;
        self
    }

    /// Value object owned by its holder, without identity
    #[must_use]
    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    /// Type name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct supertype
    #[inline]
    #[must_use]
    pub fn supertype(&self) -> Option<&str> {
        self.supertype.as_deref()
    }

    /// Properties declared on this type (not inherited)
    #[inline]
    #[must_use]
    pub fn declared_properties(&self) -> &[Property] {
        &self.properties
    }

    /// Identifier declared on this type
    #[inline]
    #[must_use]
    pub fn declared_identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// Natural key declared on this type
    #[inline]
    #[must_use]
    pub fn declared_natural_key(&self) -> Option<&[String]> {
        self.natural_key.as_deref()
    }

    /// Open document kind
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Embedded value object
    #[inline]
    #[must_use]
    pub fn is_embedded(&self) -> bool {
        self.embedded
    }
}

/// Metamodel lookups
///
/// Only [`Metamodel::entity_type`] is required; the rest walk supertypes.
pub trait Metamodel: Send + Sync + Debug {
    /// Look up a type by name
    fn entity_type(&self, name: &str) -> Option<Arc<EntityType>>;

    /// Type and its ancestors, most specific first
    fn ancestry(&self, name: &str) -> Vec<Arc<EntityType>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.entity_type(name);
        while let Some(ty) = current {
            if !seen.insert(ty.name().to_string()) {
                break;
            }
            current = ty.supertype().and_then(|s| self.entity_type(s));
            chain.push(ty);
        }
        chain
    }

    /// Broadest ancestor
    fn root_type(&self, name: &str) -> Option<Arc<EntityType>> {
        self.ancestry(name).pop()
    }

    /// `sub` equals `sup` or inherits from it
    fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        self.ancestry(sub).iter().any(|t| t.name() == sup)
    }

    /// Effective properties, inherited ones first, in declaration order
    fn properties(&self, name: &str) -> Vec<Property> {
        self.ancestry(name)
            .iter()
            .rev()
            .flat_map(|t| t.declared_properties().iter().cloned())
            .collect()
    }

    /// Find a property by name or alias, most specific declaration wins
    fn find_property(&self, type_name: &str, name: &str) -> Option<Property> {
        self.ancestry(type_name).iter().find_map(|t| {
            t.declared_properties()
                .iter()
                .find(|p| p.answers_to(name))
                .cloned()
        })
    }

    /// Identifier property name, nearest declaration wins
    fn identifier(&self, name: &str) -> Option<String> {
        self.ancestry(name)
            .iter()
            .find_map(|t| t.declared_identifier().map(str::to_string))
    }

    /// Open document kind anywhere in the chain
    fn is_open(&self, name: &str) -> bool {
        self.ancestry(name).iter().any(|t| t.is_open())
    }
}

/// In-memory metamodel
///
/// Supertypes must be registered before their subtypes, which keeps the
/// inheritance graph acyclic. Reference targets may be registered later;
/// [`TypeRegistry::validate`] checks them once the registry is complete.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    types: IndexMap<String, Arc<EntityType>>,
}

impl TypeRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration
    pub fn with(mut self, ty: EntityType) -> Result<Self, ModelError> {
        self.register(ty)?;
        Ok(self)
    }

    /// Register a type
    ///
    /// # Errors
    /// - [`ModelError::DuplicateType`] if the name is taken
    /// - [`ModelError::UnknownSupertype`] if the supertype is not registered
    /// - [`ModelError::DuplicateProperty`] if a property name or alias clashes
    ///   within the inheritance chain
    /// - [`ModelError::UnknownIdentifier`] if the identifier is not a scalar
    ///   property of the chain
    pub fn register(&mut self, ty: EntityType) -> Result<(), ModelError> {
        if self.types.contains_key(ty.name()) {
            return Err(ModelError::DuplicateType(ty.name().to_string()));
        }
        if let Some(sup) = ty.supertype() {
            if !self.types.contains_key(sup) {
                return Err(ModelError::UnknownSupertype {
                    type_name: ty.name().to_string(),
                    supertype: sup.to_string(),
                });
            }
        }

        let mut names: HashSet<String> = HashSet::new();
        let inherited = ty.supertype().map(|s| self.properties(s)).unwrap_or_default();
        for property in inherited.iter().chain(ty.declared_properties()) {
            for name in std::iter::once(property.name()).chain(property.aliases().iter().map(String::as_str)) {
                if !names.insert(name.to_string()) {
                    return Err(ModelError::DuplicateProperty {
                        type_name: ty.name().to_string(),
                        property: name.to_string(),
                    });
                }
            }
        }

        if let Some(id) = ty.declared_identifier() {
            let declared = inherited
                .iter()
                .chain(ty.declared_properties())
                .any(|p| p.answers_to(id) && p.is_scalar());
            if !declared {
                return Err(ModelError::UnknownIdentifier {
                    type_name: ty.name().to_string(),
                    identifier: id.to_string(),
                });
            }
        }

        self.types.insert(ty.name().to_string(), Arc::new(ty));
        Ok(())
    }

    /// Check that every reference target and natural-key head is known
    ///
    /// # Errors
    /// Returns the first dangling name found.
    pub fn validate(&self) -> Result<(), ModelError> {
        for ty in self.types.values() {
            for property in ty.declared_properties() {
                if let Some(target) = property.target_type() {
                    if !self.types.contains_key(target) {
                        return Err(ModelError::UnknownType(target.to_string()));
                    }
                }
            }
            for field in ty.declared_natural_key().unwrap_or_default() {
                let head = field.split('.').next().unwrap_or(field);
                if self.find_property(ty.name(), head).is_none() {
                    return Err(ModelError::UnknownNaturalKeyField {
                        type_name: ty.name().to_string(),
                        field: field.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Registered type names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Number of registered types
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// No types registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Metamodel for TypeRegistry {
    fn entity_type(&self, name: &str) -> Option<Arc<EntityType>> {
        self.types.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
            .with(
                EntityType::new("Party")
                    .identifier("id")
                    .property(Property::scalar("id", ScalarType::Int))
                    .property(Property::scalar("name", ScalarType::Text).alias("label")),
            )
            .and_then(|r| {
                r.with(
                    EntityType::new("Customer")
                        .extends("Party")
                        .property(Property::list_of("orders", "Order")),
                )
            })
            .and_then(|r| {
                r.with(
                    EntityType::new("Order")
                        .identifier("id")
                        .property(Property::scalar("id", ScalarType::Int)),
                )
            })
            .unwrap()
    }

    #[test]
    fn ancestry_and_root() {
        let reg = registry();
        let chain: Vec<_> = reg.ancestry("Customer").iter().map(|t| t.name().to_string()).collect();
        assert_eq!(chain, vec!["Customer", "Party"]);
        assert_eq!(reg.root_type("Customer").unwrap().name(), "Party");
        assert!(reg.is_subtype("Customer", "Party"));
        assert!(!reg.is_subtype("Party", "Customer"));
    }

    #[test]
    fn inherited_properties_come_first() {
        let reg = registry();
        let names: Vec<_> = reg
            .properties("Customer")
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["id", "name", "orders"]);
        assert_eq!(reg.identifier("Customer").as_deref(), Some("id"));
    }

    #[test]
    fn alias_lookup() {
        let reg = registry();
        let p = reg.find_property("Customer", "label").unwrap();
        assert_eq!(p.name(), "name");
    }

    #[test]
    fn rejects_unknown_supertype() {
        let err = TypeRegistry::new()
            .with(EntityType::new("A").extends("Missing"))
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownSupertype { .. }));
    }

    #[test]
    fn rejects_shadowed_property() {
        let err = registry()
            .with(
                EntityType::new("Vip")
                    .extends("Customer")
                    .property(Property::scalar("label", ScalarType::Text)),
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateProperty { .. }));
    }

    #[test]
    fn rejects_non_scalar_identifier() {
        let err = TypeRegistry::new()
            .with(
                EntityType::new("A")
                    .identifier("b")
                    .property(Property::reference("b", "B")),
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownIdentifier { .. }));
    }

    #[test]
    fn validate_reports_dangling_target() {
        let reg = TypeRegistry::new()
            .with(EntityType::new("A").property(Property::reference("b", "B")))
            .unwrap();
        assert!(matches!(reg.validate(), Err(ModelError::UnknownType(t)) if t == "B"));
    }

    #[test]
    fn scalar_type_acceptance() {
        assert!(ScalarType::Float.accepts(&Value::Int(1)));
        assert!(!ScalarType::Int.accepts(&Value::Float(1.0)));
        assert!(ScalarType::Text.accepts(&Value::Null));
        assert!(ScalarType::Any.accepts(&Value::Bool(true)));
    }

    #[test]
    fn stored_as_redirects_field() {
        let p = Property::scalar("name", ScalarType::Text).stored_as("legacy_name");
        let mut record = Record::new();
        p.accessor().set(&mut record, Slot::Value(Value::from("x")));
        assert!(record.contains("legacy_name"));
        assert_eq!(p.accessor().get(&record).and_then(Slot::value), Some(&Value::from("x")));
    }
}
