//! Testing utilities for the entigraph workspace
//!
//! Shared schemas, row helpers and tracing setup.

#![allow(missing_docs)]

use entigraph_model::{
    CollectionKind, ElementType, EntityType, Metamodel, Property, ScalarType, TypeRegistry,
};
use std::sync::{Arc, Once};

/// Orders with contained items, a shared customer and an embedded address
///
/// - `Order`: identifier `id`; `customer` → `Customer`; `shipping`
///   embeds `Address`; `items` (alias `item`) contains `Item` (list); `lines` contains
///   `Item` (map); `attrs` text map; `tags` text set; `notes` text list
/// - `Item`: natural key `sku`
/// - `Customer`: identifier `id`, subtype `VipCustomer`
pub fn order_schema() -> Arc<dyn Metamodel> {
    let registry = TypeRegistry::new()
        .with(
            EntityType::new("Order")
                .identifier("id")
                .property(Property::scalar("id", ScalarType::Int))
                .property(Property::scalar("status", ScalarType::Text))
                .property(Property::reference("customer", "Customer"))
                .property(Property::contains("shipping", "Address"))
                .property(Property::list_of("items", "Item").alias("item"))
                .property(
                    Property::collection(
                        "lines",
                        CollectionKind::Map,
                        ElementType::Entity("Item".into()),
                    )
                    .contained(),
                )
                .property(Property::collection(
                    "attrs",
                    CollectionKind::Map,
                    ElementType::Scalar(ScalarType::Text),
                ))
                .property(Property::collection(
                    "tags",
                    CollectionKind::Set,
                    ElementType::Scalar(ScalarType::Text),
                ))
                .property(Property::collection(
                    "notes",
                    CollectionKind::List,
                    ElementType::Scalar(ScalarType::Text),
                )),
        )
        .and_then(|r| {
            r.with(
                EntityType::new("Item")
                    .natural_key(["sku"])
                    .property(Property::scalar("sku", ScalarType::Text))
                    .property(Property::scalar("qty", ScalarType::Int)),
            )
        })
        .and_then(|r| {
            r.with(
                EntityType::new("Customer")
                    .identifier("id")
                    .property(Property::scalar("id", ScalarType::Int))
                    .property(Property::scalar("name", ScalarType::Text)),
            )
        })
        .and_then(|r| {
            r.with(
                EntityType::new("VipCustomer")
                    .extends("Customer")
                    .property(Property::scalar("tier", ScalarType::Text)),
            )
        })
        .and_then(|r| {
            r.with(
                EntityType::new("Address")
                    .embedded()
                    .property(Property::scalar("street", ScalarType::Text))
                    .property(Property::scalar("city", ScalarType::Text)),
            )
        })
        .unwrap();
    Arc::new(registry)
}

/// Countries, states and cities keyed by composite natural keys
///
/// - `Country`: natural key `code`
/// - `State`: natural key (`country`, `code`)
/// - `City`: natural key (`state`, `name`)
pub fn geography_schema() -> Arc<dyn Metamodel> {
    let registry = TypeRegistry::new()
        .with(
            EntityType::new("Country")
                .natural_key(["code"])
                .property(Property::scalar("code", ScalarType::Text))
                .property(Property::scalar("name", ScalarType::Text)),
        )
        .and_then(|r| {
            r.with(
                EntityType::new("State")
                    .natural_key(["country", "code"])
                    .property(Property::reference("country", "Country"))
                    .property(Property::scalar("code", ScalarType::Text))
                    .property(Property::scalar("name", ScalarType::Text)),
            )
        })
        .and_then(|r| {
            r.with(
                EntityType::new("City")
                    .natural_key(["state", "name"])
                    .property(Property::reference("state", "State"))
                    .property(Property::scalar("name", ScalarType::Text)),
            )
        })
        .unwrap();
    Arc::new(registry)
}

/// Open `Document` type with identifier `id`
pub fn document_schema() -> Arc<dyn Metamodel> {
    let registry = TypeRegistry::new()
        .with(
            EntityType::new("Document")
                .open()
                .identifier("id")
                .property(Property::scalar("id", ScalarType::Int)),
        )
        .unwrap();
    Arc::new(registry)
}

static TRACING: Once = Once::new();

/// Install a test-friendly subscriber once per process
///
/// Honours `RUST_LOG`; defaults to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
