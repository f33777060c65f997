//! entigraph core
//!
//! The graph engine of a data-mapping runtime:
//! - A session-scoped [`UnitOfWork`] owning nodes, containment links and
//!   the identity map
//! - Path-addressed reads and writes over the graph
//! - Aggregate assembly with identity canonicalization
//! - Reconstitution of object graphs from flat query rows
//!
//! # Example
//!
//! ```rust
//! use entigraph_core::{Reconstituter, Row, UnitOfWork};
//! use entigraph_model::{EntityType, Property, ScalarType, TypeRegistry, Value};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let meta = TypeRegistry::new()
//!     .with(
//!         EntityType::new("Order")
//!             .identifier("id")
//!             .property(Property::scalar("id", ScalarType::Int))
//!             .property(Property::list_of("items", "Item")),
//!     )?
//!     .with(
//!         EntityType::new("Item")
//!             .natural_key(["sku"])
//!             .property(Property::scalar("sku", ScalarType::Text)),
//!     )?;
//! let mut uow = UnitOfWork::new(Arc::new(meta));
//!
//! let row = Row::new().with("order.id", 1).with("order.items.0.sku", "A");
//! let mut rows = Reconstituter::new("order", "Order");
//! let roots = rows.apply_rows(&mut uow, [&row, &row])?;
//!
//! assert_eq!(roots.len(), 1);
//! assert_eq!(uow.get_value(roots[0], "items.0/sku")?, Some(Value::from("A")));
//! assert_eq!(uow.get_value(roots[0], "items.1/sku")?, None);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod aggregate;
pub mod config;
pub mod error;
pub mod graph;
mod identity;
mod interpreter;
pub mod reconstitute;
pub mod row;
pub mod shared;
pub mod uow;

pub use aggregate::{Aggregate, AggregateBuilder, Classification, Examine, Link, StubExaminer};
pub use config::MapperConfig;
pub use error::{GraphError, Result};
pub use graph::{Graph, GraphNode};
pub use reconstitute::Reconstituter;
pub use row::Row;
pub use shared::SharedUnitOfWork;
pub use uow::UnitOfWork;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with entigraph
    pub use crate::{
        AggregateBuilder, GraphError, MapperConfig, Reconstituter, Row, SharedUnitOfWork,
        UnitOfWork,
    };
    pub use entigraph_model::{
        EntityKey, Metamodel, NodeId, PathExpr, Record, Slot, TraversalMask, TypeRegistry, Value,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
