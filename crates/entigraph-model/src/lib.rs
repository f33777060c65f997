//! entigraph data model
//!
//! Leaf values, identity keys, record storage, the metamodel capability and
//! the path-expression language shared by the identity map and the graph
//! engine.
//!
//! # Core Concepts
//!
//! - [`Value`]: scalar leaf with total equality
//! - [`EntityKey`]: surrogate or natural identity, optionally anchored
//! - [`Record`] / [`Slot`]: field storage referring to other nodes by [`NodeId`]
//! - [`Metamodel`] / [`TypeRegistry`]: entity shapes and property accessors
//! - [`PathExpr`]: parsed path expression
//! - [`TraversalMask`]: which properties a traversal may enter
//!
//! # Example
//!
//! ```rust
//! use entigraph_model::{EntityType, Metamodel, PathExpr, Property, ScalarType, TypeRegistry};
//!
//! let registry = TypeRegistry::new()
//!     .with(
//!         EntityType::new("Order")
//!             .identifier("id")
//!             .property(Property::scalar("id", ScalarType::Int))
//!             .property(Property::list_of("items", "Item")),
//!     )
//!     .unwrap();
//! assert_eq!(registry.identifier("Order").as_deref(), Some("id"));
//!
//! let path: PathExpr = "items[2]/sku".parse().unwrap();
//! assert_eq!(path.len(), 2);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod key;
mod mask;
mod metamodel;
mod path;
mod record;
mod value;

pub use error::ModelError;
pub use key::{EntityKey, KeyKind, KeyPart, KeyValue};
pub use mask::TraversalMask;
pub use metamodel::{
    ElementType, EntityType, FieldAccessor, Metamodel, Property, PropertyAccessor, PropertyKind,
    ScalarType, TypeRegistry,
};
pub use path::{Index, PathError, PathExpr, Selector, Step};
pub use record::{CollectionKind, Element, NodeId, Record, Slot};
pub use value::{strip_quotes, Value};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
