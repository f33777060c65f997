//! Error types for the graph engine
//!
//! Covers:
//! - Malformed paths and wrongly shaped values
//! - Properties missing from a statically typed node
//! - Containment cycles
//! - Conflicting identity claims
//! - Incompatible downcasts and assignments

use entigraph_identity::IdentityError;
use entigraph_model::{EntityKey, ModelError, NodeId, PathError};

/// Result alias used throughout the crate
pub type Result<T, E = GraphError> = std::result::Result<T, E>;

/// Main graph error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// Empty or malformed input, wrongly shaped value
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Path names a property the (non-open) type does not have
    #[error("type '{type_name}' has no property '{property}'")]
    UnresolvedProperty { type_name: String, property: String },

    /// A containment walk revisited a node
    #[error("containment cycle through {node}")]
    StructuralCycle { node: NodeId },

    /// Two live nodes claim the same identity
    #[error("identity conflict on {key}: held by {existing}, claimed by {incoming}")]
    IdentityConflict {
        key: EntityKey,
        existing: String,
        incoming: String,
    },

    /// Downcast or assignment incompatible with the declared type
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// Handle does not name a live node
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// Type name unknown to the metamodel
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// Path expression failed to parse
    #[error("path error: {0}")]
    Path(#[from] PathError),

    /// Metamodel or mask error
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl GraphError {
    /// Shorthand for [`GraphError::InvalidArgument`]
    #[inline]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Shorthand for [`GraphError::TypeMismatch`]
    #[inline]
    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Caller supplied bad input (paths included)
    #[inline]
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::Path(_))
    }

    /// Graph shape is broken; retrying the same call cannot succeed
    #[inline]
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::StructuralCycle { .. } | Self::NodeNotFound(_))
    }

    /// Caller may fix the input or resolve the conflict and try again
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::InvalidArgument(_)
            | Self::UnresolvedProperty { .. }
            | Self::IdentityConflict { .. }
            | Self::TypeMismatch { .. }
            | Self::Path(_) => true,
            Self::StructuralCycle { .. }
            | Self::NodeNotFound(_)
            | Self::UnknownType(_)
            | Self::Model(_)
            | Self::Config(_) => false,
        }
    }
}

impl From<IdentityError> for GraphError {
    fn from(value: IdentityError) -> Self {
        match value {
            IdentityError::Conflict {
                key,
                existing,
                incoming,
            } => Self::IdentityConflict {
                key,
                existing,
                incoming,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigraph_model::Value;

    #[test]
    fn identity_error_converts() {
        let key = EntityKey::surrogate("Order", Value::Int(1), None);
        let err: GraphError = IdentityError::Conflict {
            key: key.clone(),
            existing: "n0".into(),
            incoming: "n1".into(),
        }
        .into();
        assert!(matches!(err, GraphError::IdentityConflict { key: ref k, .. } if *k == key));
        assert!(err.is_recoverable());
    }

    #[test]
    fn classification() {
        assert!(GraphError::StructuralCycle { node: NodeId::new(0) }.is_structural());
        assert!(!GraphError::StructuralCycle { node: NodeId::new(0) }.is_recoverable());
        assert!(GraphError::from(PathError::Empty).is_invalid_argument());
        assert!(GraphError::invalid("x").is_invalid_argument());
    }

    #[test]
    fn display() {
        let err = GraphError::UnresolvedProperty {
            type_name: "Order".into(),
            property: "nope".into(),
        };
        assert_eq!(err.to_string(), "type 'Order' has no property 'nope'");
    }
}
