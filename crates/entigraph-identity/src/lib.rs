//! entigraph identity map
//!
//! Unit-of-work scoped table from [`EntityKey`](entigraph_model::EntityKey)
//! to node handle.
//!
//! # Overview
//!
//! - **IdentityMap**: key → node with a node → keys reverse index
//! - **IdentityStats**: hit/miss/eviction counters
//! - **IdentityError**: conflicting claims on one key
//!
//! # Example
//!
//! ```rust
//! use entigraph_identity::IdentityMap;
//! use entigraph_model::{EntityKey, NodeId, Value};
//!
//! let mut map = IdentityMap::new();
//! let key = EntityKey::surrogate("Order", Value::Int(1), None);
//! map.insert(key.clone(), NodeId::new(0)).unwrap();
//!
//! assert_eq!(map.lookup(&key), Some(NodeId::new(0)));
//! assert!(map.insert(key, NodeId::new(1)).is_err());
//! ```

#![warn(missing_docs)]

pub mod index;

pub use index::{IdentityError, IdentityMap, IdentityStats};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
