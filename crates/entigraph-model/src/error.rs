//! Metamodel errors

/// Errors raised while building a metamodel or a traversal mask
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Type name not registered
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// Type registered twice
    #[error("duplicate type: {0}")]
    DuplicateType(String),

    /// Supertype not registered before its subtype
    #[error("type '{type_name}' extends unknown type '{supertype}'")]
    UnknownSupertype { type_name: String, supertype: String },

    /// Property name or alias clashes within an inheritance chain
    #[error("type '{type_name}' declares '{property}' more than once")]
    DuplicateProperty { type_name: String, property: String },

    /// Identifier is not a scalar property of the chain
    #[error("type '{type_name}' has no scalar identifier property '{identifier}'")]
    UnknownIdentifier { type_name: String, identifier: String },

    /// Natural-key field does not name a property
    #[error("type '{type_name}' natural key names unknown field '{field}'")]
    UnknownNaturalKeyField { type_name: String, field: String },

    /// Traversal mask text could not be parsed
    #[error("invalid traversal mask at {position}: {reason}")]
    InvalidMask { position: usize, reason: String },
}
