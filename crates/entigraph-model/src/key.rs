//! Entity identity keys
//!
//! Provides [`EntityKey`], the immutable value an identity map is keyed by.
//! Equality is structural: two keys built from the same type, anchor and
//! field values are equal no matter which record they were derived from.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Kind of identity a key expresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// Generated identifier
    Surrogate,
    /// Business-meaningful field values
    Natural,
}

/// One component of a key value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyPart {
    /// Scalar field value
    Value(Value),
    /// Identity of a referenced entity (composite natural keys)
    Key(Box<EntityKey>),
}

impl Display for KeyPart {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Key(k) => write!(f, "{k}"),
        }
    }
}

impl From<Value> for KeyPart {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<EntityKey> for KeyPart {
    fn from(k: EntityKey) -> Self {
        Self::Key(Box::new(k))
    }
}

/// Key payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyValue {
    /// Single identifier
    Surrogate(KeyPart),
    /// Ordered `(field path, part)` pairs
    Natural(Vec<(String, KeyPart)>),
}

/// Identity of one logical entity
///
/// # Structure
/// - `root_type`: broadest type under which identity is shared (surrogate
///   keys) or the type declaring the natural key
/// - `anchor`: optional traversal fingerprint; equal keys with different
///   anchors are distinct identities
/// - `value`: the identifier or the natural-key field values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    root_type: String,
    anchor: Option<String>,
    value: KeyValue,
}

impl EntityKey {
    /// Build a surrogate key
    #[inline]
    #[must_use]
    pub fn surrogate(
        root_type: impl Into<String>,
        id: impl Into<KeyPart>,
        anchor: Option<String>,
    ) -> Self {
        Self {
            root_type: root_type.into(),
            anchor,
            value: KeyValue::Surrogate(id.into()),
        }
    }

    /// Build a natural key from ordered field parts
    #[inline]
    #[must_use]
    pub fn natural(
        root_type: impl Into<String>,
        fields: Vec<(String, KeyPart)>,
        anchor: Option<String>,
    ) -> Self {
        Self {
            root_type: root_type.into(),
            anchor,
            value: KeyValue::Natural(fields),
        }
    }

    /// Surrogate or natural
    #[inline]
    #[must_use]
    pub fn kind(&self) -> KeyKind {
        match self.value {
            KeyValue::Surrogate(_) => KeyKind::Surrogate,
            KeyValue::Natural(_) => KeyKind::Natural,
        }
    }

    /// Type under which identity is shared
    #[inline]
    #[must_use]
    pub fn root_type(&self) -> &str {
        &self.root_type
    }

    /// Traversal anchor
    #[inline]
    #[must_use]
    pub fn anchor(&self) -> Option<&str> {
        self.anchor.as_deref()
    }

    /// Key payload
    #[inline]
    #[must_use]
    pub fn value(&self) -> &KeyValue {
        &self.value
    }

    /// Same identity re-anchored
    #[must_use]
    pub fn with_anchor(&self, anchor: Option<String>) -> Self {
        Self {
            root_type: self.root_type.clone(),
            anchor,
            value: self.value.clone(),
        }
    }

    /// Identifier part of a surrogate key
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<&KeyPart> {
        match &self.value {
            KeyValue::Surrogate(part) => Some(part),
            KeyValue::Natural(_) => None,
        }
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root_type)?;
        match &self.value {
            KeyValue::Surrogate(id) => write!(f, "#{id}")?,
            KeyValue::Natural(fields) => {
                write!(f, "{{")?;
                for (i, (name, part)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {part}")?;
                }
                write!(f, "}}")?;
            }
        }
        if let Some(anchor) = &self.anchor {
            write!(f, "@{anchor}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(country: &str, code: &str) -> EntityKey {
        EntityKey::natural(
            "State",
            vec![
                ("countryCode".into(), Value::from(country).into()),
                ("code".into(), Value::from(code).into()),
            ],
            None,
        )
    }

    #[test]
    fn surrogate_kind_and_id() {
        let key = EntityKey::surrogate("Order", Value::Int(1), None);
        assert_eq!(key.kind(), KeyKind::Surrogate);
        assert_eq!(key.id(), Some(&KeyPart::Value(Value::Int(1))));
    }

    #[test]
    fn natural_keys_compare_by_fields() {
        assert_eq!(state("US", "NY"), state("US", "NY"));
        assert_ne!(state("US", "NY"), state("US", "CA"));
        assert_eq!(state("US", "NY").kind(), KeyKind::Natural);
    }

    #[test]
    fn anchors_separate_identities() {
        let plain = EntityKey::surrogate("Order", Value::Int(1), None);
        let anchored = plain.with_anchor(Some("@3.items".into()));
        assert_ne!(plain, anchored);
        assert_eq!(anchored.anchor(), Some("@3.items"));
    }

    #[test]
    fn surrogate_and_natural_never_equal() {
        let s = EntityKey::surrogate("State", Value::from("NY"), None);
        let n = EntityKey::natural("State", vec![("code".into(), Value::from("NY").into())], None);
        assert_ne!(s, n);
    }

    #[test]
    fn nested_keys_display() {
        let country = EntityKey::surrogate("Country", Value::from("US"), None);
        let key = EntityKey::natural(
            "State",
            vec![
                ("country".into(), country.into()),
                ("code".into(), Value::from("NY").into()),
            ],
            Some("v1".into()),
        );
        assert_eq!(key.to_string(), "State{country: Country#\"US\", code: \"NY\"}@v1");
    }
}
