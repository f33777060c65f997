use entigraph_core::{AggregateBuilder, GraphError, Reconstituter, Row, UnitOfWork};
use entigraph_model::{
    EntityType, Metamodel, NodeId, Property, Record, ScalarType, TraversalMask, TypeRegistry,
    Value,
};
use entigraph_test_utils::{geography_schema, init_tracing, order_schema};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

fn folders() -> Arc<dyn Metamodel> {
    Arc::new(
        TypeRegistry::new()
            .with(
                EntityType::new("Folder")
                    .property(Property::scalar("name", ScalarType::Text))
                    .property(Property::list_of("children", "Folder"))
                    .property(Property::reference("link", "Folder")),
            )
            .unwrap(),
    )
}

/// Chain of `depth` nested folders, outermost first
fn chain(uow: &mut UnitOfWork, depth: usize) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = Vec::new();
    for i in 0..depth {
        let node = uow
            .create("Folder", Record::new().with("name", Value::from(format!("f{i}"))))
            .unwrap();
        if let Some(parent) = nodes.last() {
            uow.set(*parent, "children[<<]", node).unwrap();
        }
        nodes.push(node);
    }
    nodes
}

proptest! {
    /// Walking up from any depth ends at the outermost folder, and closing
    /// the chain into a loop is refused.
    #[test]
    fn prop_root_walk_terminates(depth in 1usize..24) {
        let mut uow = UnitOfWork::new(folders());
        let nodes = chain(&mut uow, depth);
        let head = nodes[0];
        let leaf = nodes[depth - 1];

        prop_assert_eq!(uow.root_of(leaf).unwrap(), head);
        let up = format!("{}name", "../".repeat(depth - 1));
        prop_assert_eq!(uow.get_value(leaf, &up).unwrap(), Some(Value::from("f0")));

        let err = uow.set_container(head, leaf, "children").unwrap_err();
        let is_cycle = matches!(err, GraphError::StructuralCycle { .. });
        prop_assert!(is_cycle);
        prop_assert_eq!(uow.container(head).unwrap(), None);
    }

    /// Values written through a path read back through the same path.
    #[test]
    fn prop_path_writes_read_back(notes in proptest::collection::vec("[a-z]{0,8}", 0..12)) {
        let mut uow = UnitOfWork::new(order_schema());
        let order = uow.create("Order", Record::new().with("id", Value::Int(1))).unwrap();
        for note in &notes {
            uow.set(order, "notes[<<]", Value::from(note.as_str())).unwrap();
        }
        for (i, note) in notes.iter().enumerate() {
            prop_assert_eq!(
                uow.get_value(order, &format!("notes.{i}")).unwrap(),
                Some(Value::from(note.as_str()))
            );
            prop_assert_eq!(
                uow.get_value(order, &format!("notes[{}]", i + 1)).unwrap(),
                Some(Value::from(note.as_str()))
            );
        }
        prop_assert_eq!(uow.get_value(order, &format!("notes.{}", notes.len())).unwrap(), None);
    }

    /// A node's derived keys resolve back to the node once registered.
    #[test]
    fn prop_identity_round_trip(ids in proptest::collection::hash_set(0i64..1000, 1..16)) {
        let mut uow = UnitOfWork::new(order_schema());
        let mut created = Vec::new();
        for id in &ids {
            let node = uow
                .attach("Customer", Record::new().with("id", Value::Int(*id)), None)
                .unwrap();
            created.push(node);
        }
        for node in created {
            let key = uow.derive_surrogate_key(node, None).unwrap().unwrap();
            prop_assert_eq!(uow.lookup(&key).unwrap(), Some(node));
        }
    }
}

#[test]
fn reparenting_moves_the_child() {
    let mut uow = UnitOfWork::new(folders());
    let nodes = chain(&mut uow, 3);
    let other = uow.create("Folder", Record::new()).unwrap();

    uow.set(other, "children[<<]", nodes[2]).unwrap();
    assert_eq!(uow.container(nodes[2]).unwrap(), Some(other));
    assert_eq!(uow.get_node(nodes[1], "children.0").unwrap(), None);
    assert_eq!(uow.root_of(nodes[2]).unwrap(), other);
}

#[test]
fn deleting_cascades_over_contained_nodes_only() {
    let mut uow = UnitOfWork::new(folders());
    let nodes = chain(&mut uow, 3);
    let outsider = uow.create("Folder", Record::new()).unwrap();
    uow.set(outsider, "link", nodes[1]).unwrap();

    let deleted = uow.delete(nodes[1]).unwrap();
    assert_eq!(deleted, vec![nodes[1], nodes[2]]);
    assert!(uow.graph().contains(outsider));
    assert_eq!(uow.get_node(outsider, "link").unwrap(), None);
    assert_eq!(uow.get_node(nodes[0], "children.0").unwrap(), None);
}

#[test]
fn changed_natural_key_evicts_the_stale_one() {
    init_tracing();
    let mut uow = UnitOfWork::new(geography_schema());
    let mut rec = Reconstituter::new("state", "State");
    let rows = [
        Row::new().with("state.country.code", "US").with("state.code", "NY"),
        Row::new().with("state.country.code", "US").with("state.code", "CA"),
    ];
    let roots = rec.apply_rows(&mut uow, &rows).unwrap();
    let (ny, ca) = (roots[0], roots[1]);

    let ny_key = uow.derive_natural_keys(ny, None).unwrap().remove(0);
    let ca_key = uow.derive_natural_keys(ca, None).unwrap().remove(0);
    assert_ne!(ny_key, ca_key);
    assert_eq!(ny_key.to_string(), r#"State{country: Country{code: "US"}, code: "NY"}"#);

    uow.set(ny, "code", Value::from("TX")).unwrap();
    assert_eq!(uow.lookup(&ny_key).unwrap(), None);
    let tx_key = uow.derive_natural_keys(ny, None).unwrap().remove(0);
    assert_eq!(uow.lookup(&tx_key).unwrap(), Some(ny));
    assert_eq!(uow.lookup(&ca_key).unwrap(), Some(ca));
}

#[test]
fn stale_keys_are_not_resolvable_after_identify() {
    let mut uow = UnitOfWork::new(geography_schema());
    let us = uow
        .attach("Country", Record::new().with("code", Value::from("US")), None)
        .unwrap();
    let old = uow.identify(us, None).unwrap().remove(0);

    uow.set(us, "code", Value::from("USA")).unwrap();
    uow.identify(us, None).unwrap();
    assert!(!uow.identities().contains(&old));
    assert_eq!(uow.lookup(&old).unwrap(), None);
}

#[test]
fn aggregate_over_reconstituted_rows() {
    init_tracing();
    let mut uow = UnitOfWork::new(order_schema());
    let mut rec = Reconstituter::new("order", "Order");
    let rows = [
        Row::new()
            .with("order.id", 1)
            .with("order.customer.id", 7)
            .with("order.items.sku", "A"),
        Row::new().with("order.id", 1).with("order.items.sku", "B"),
    ];
    let order = rec.apply_rows(&mut uow, &rows).unwrap()[0];
    let customer = uow.get_node(order, "customer").unwrap().unwrap();

    let aggregate = AggregateBuilder::new().build(&mut uow, order).unwrap();
    assert_eq!(aggregate.root(), order);
    // order, two items; the customer is linked, not owned
    assert!(!aggregate.contains(customer));
    assert_eq!(aggregate.len(), 3);
    assert!(aggregate
        .links()
        .iter()
        .any(|l| l.to == customer && !l.containment));

    let masked = AggregateBuilder::new()
        .with_mask(TraversalMask::new().include("customer"))
        .build(&mut uow, order)
        .unwrap();
    assert_eq!(masked.len(), 1);
    assert_eq!(masked.links().len(), 1);
}
