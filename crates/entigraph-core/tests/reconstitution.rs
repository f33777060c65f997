use entigraph_core::{GraphError, Reconstituter, Row, UnitOfWork};
use entigraph_model::{Slot, Value};
use entigraph_test_utils::{document_schema, geography_schema, init_tracing, order_schema};
use pretty_assertions::assert_eq;

fn orders() -> (UnitOfWork, Reconstituter) {
    init_tracing();
    (UnitOfWork::new(order_schema()), Reconstituter::new("order", "Order"))
}

fn len_of(uow: &mut UnitOfWork, node: entigraph_model::NodeId, path: &str) -> usize {
    uow.get(node, path)
        .unwrap()
        .map(|s| s.elements().len())
        .unwrap_or_default()
}

#[test]
fn repeated_rows_do_not_duplicate_elements() {
    let (mut uow, mut rec) = orders();
    let row = Row::new()
        .with("order.id", 1)
        .with("order.items.sku", "A")
        .with("order.items.qty", 2);

    let roots = rec.apply_rows(&mut uow, [&row, &row, &row]).unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(len_of(&mut uow, roots[0], "items"), 1);
    assert_eq!(
        uow.get_value(roots[0], "items[sku=A]/qty").unwrap(),
        Some(Value::Int(2))
    );
    assert_eq!(rec.rows_applied(), 3);
}

#[test]
fn elements_keep_arrival_order() {
    let (mut uow, mut rec) = orders();
    let rows = ["A", "B", "C"]
        .map(|sku| Row::new().with("order.id", 1).with("order.items.sku", sku));
    let roots = rec.apply_rows(&mut uow, &rows).unwrap();

    let skus: Vec<_> = (0..3)
        .map(|i| uow.get_value(roots[0], &format!("items.{i}/sku")).unwrap())
        .collect();
    assert_eq!(
        skus,
        vec![Some(Value::from("A")), Some(Value::from("B")), Some(Value::from("C"))]
    );
}

#[test]
fn index_column_positions_identity_less_values() {
    let (mut uow, mut rec) = orders();
    let rows: Vec<Row> = ["a", "b"]
        .iter()
        .enumerate()
        .map(|(i, note)| {
            Row::new()
                .with("order.id", 1)
                .with("order.notes.$index", i64::try_from(i).unwrap())
                .with("order.notes", *note)
        })
        .collect();
    let roots = rec.apply_rows(&mut uow, &rows).unwrap();
    assert_eq!(len_of(&mut uow, roots[0], "notes"), 2);

    // index 2 of a two-element list appends, once
    let third = Row::new().with("order.id", 1).with("order.notes.2", "c");
    rec.apply_row(&mut uow, &third).unwrap();
    rec.apply_row(&mut uow, &third).unwrap();
    assert_eq!(len_of(&mut uow, roots[0], "notes"), 3);
    assert_eq!(
        uow.get_value(roots[0], "notes[3]").unwrap(),
        Some(Value::from("c"))
    );
}

#[test]
fn positional_elements_without_identity_are_reused() {
    init_tracing();
    let mut uow = UnitOfWork::new(order_schema());
    let mut rec = Reconstituter::new("order", "Order");
    let row = Row::new()
        .with("order.id", 1)
        .with("order.items.0.qty", 5);
    rec.apply_rows(&mut uow, [&row, &row]).unwrap();
    let root = rec.roots()[0];
    assert_eq!(len_of(&mut uow, root, "items"), 1);
}

#[test]
fn duplicate_rows_through_an_alias_yield_one_item() {
    let (mut uow, mut rec) = orders();
    let rows = [
        Row::new().with("order.id", 1).with("order.item.0.sku", "A"),
        Row::new().with("order.id", 1).with("order.item.0.sku", "A"),
    ];
    let roots = rec.apply_rows(&mut uow, &rows).unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(len_of(&mut uow, roots[0], "items"), 1);
    assert_eq!(
        uow.get_value(roots[0], "items.0/sku").unwrap(),
        Some(Value::from("A"))
    );
    // order, item
    assert_eq!(uow.graph().len(), 2);
}

#[test]
fn keyless_unindexed_elements_are_reused() {
    let (mut uow, mut rec) = orders();
    let row = Row::new().with("order.id", 1).with("order.items.qty", 5);
    let roots = rec.apply_rows(&mut uow, [&row, &row]).unwrap();
    assert_eq!(len_of(&mut uow, roots[0], "items"), 1);
    assert_eq!(
        uow.get_value(roots[0], "items.0/qty").unwrap(),
        Some(Value::Int(5))
    );
}

#[test]
fn repeated_scalars_at_distinct_indices_are_kept() {
    let (mut uow, mut rec) = orders();
    let row = Row::new()
        .with("order.id", 1)
        .with("order.notes.0", "a")
        .with("order.notes.1", "a");
    let roots = rec.apply_rows(&mut uow, [&row, &row]).unwrap();
    assert_eq!(len_of(&mut uow, roots[0], "notes"), 2);

    let (mut uow, mut rec) = orders();
    let row = Row::from_json(&serde_json::json!({
        "order": { "id": 1, "notes": ["x", "x", "y"] }
    }))
    .unwrap();
    let root = rec.apply_row(&mut uow, &row).unwrap().unwrap();
    assert_eq!(len_of(&mut uow, root, "notes"), 3);
    assert_eq!(uow.get_value(root, "notes.1").unwrap(), Some(Value::from("x")));
}

#[test]
fn map_and_set_columns() {
    let (mut uow, mut rec) = orders();
    let rows = [
        Row::new()
            .with("order.id", 1)
            .with("order.attrs.$key", "color")
            .with("order.attrs", "red")
            .with("order.tags", "x"),
        Row::new()
            .with("order.id", 1)
            .with("order.attrs.$key", "size")
            .with("order.attrs", "L")
            .with("order.tags", "x"),
        Row::new()
            .with("order.id", 1)
            .with("order.lines.$key", "first")
            .with("order.lines.sku", "A")
            .with("order.tags", "y"),
    ];
    let roots = rec.apply_rows(&mut uow, &rows).unwrap();
    let order = roots[0];

    assert_eq!(
        uow.get_value(order, "attrs[size]").unwrap(),
        Some(Value::from("L"))
    );
    assert_eq!(len_of(&mut uow, order, "attrs"), 2);
    assert_eq!(len_of(&mut uow, order, "tags"), 2);
    let line = uow.get_node(order, "lines[first]").unwrap().unwrap();
    assert_eq!(uow.container(line).unwrap(), Some(order));
    assert_eq!(
        uow.get_value(line, "sku").unwrap(),
        Some(Value::from("A"))
    );
}

#[test]
fn map_element_without_key_is_rejected() {
    let (mut uow, mut rec) = orders();
    let row = Row::new().with("order.id", 1).with("order.attrs", "red");
    let err = rec.apply_row(&mut uow, &row).unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(uow.graph().is_empty());
}

#[test]
fn shared_references_resolve_to_one_node() {
    let (mut uow, mut rec) = orders();
    let rows = [
        Row::new()
            .with("order.id", 1)
            .with("order.customer.id", 7)
            .with("order.customer.name", "Ada"),
        Row::new().with("order.id", 2).with("order.customer.id", 7),
    ];
    let roots = rec.apply_rows(&mut uow, &rows).unwrap();
    assert_eq!(roots.len(), 2);

    let first = uow.get_node(roots[0], "customer").unwrap();
    let second = uow.get_node(roots[1], "customer").unwrap();
    assert!(first.is_some());
    assert_eq!(first, second);
    assert_eq!(
        uow.get_value(roots[1], "customer/name").unwrap(),
        Some(Value::from("Ada"))
    );
    // not contained
    assert_eq!(uow.container(first.unwrap()).unwrap(), None);
}

#[test]
fn contained_elements_are_scoped_to_their_owner() {
    let (mut uow, mut rec) = orders();
    let rows = [
        Row::new().with("order.id", 1).with("order.items.sku", "A"),
        Row::new().with("order.id", 2).with("order.items.sku", "A"),
    ];
    let roots = rec.apply_rows(&mut uow, &rows).unwrap();
    let a1 = uow.get_node(roots[0], "items.0").unwrap().unwrap();
    let a2 = uow.get_node(roots[1], "items.0").unwrap().unwrap();
    assert_ne!(a1, a2);
    assert_eq!(uow.container(a2).unwrap(), Some(roots[1]));
}

#[test]
fn type_column_narrows_and_downcasts() {
    let (mut uow, mut rec) = orders();
    let rows = [
        Row::new().with("order.id", 1).with("order.customer.id", 7),
        Row::new()
            .with("order.id", 1)
            .with("order.customer.id", 7)
            .with("order.customer.$type", "VipCustomer")
            .with("order.customer.tier", "gold"),
    ];
    let roots = rec.apply_rows(&mut uow, &rows).unwrap();
    let customer = uow.get_node(roots[0], "customer").unwrap().unwrap();
    assert_eq!(uow.node(customer).unwrap().type_name(), "VipCustomer");
    assert_eq!(
        uow.get_value(customer, "tier").unwrap(),
        Some(Value::from("gold"))
    );
}

#[test]
fn type_column_must_name_a_subtype() {
    let (mut uow, mut rec) = orders();
    let row = Row::new()
        .with("order.id", 1)
        .with("order.customer.$type", "Item")
        .with("order.customer.id", 7);
    let err = rec.apply_row(&mut uow, &row).unwrap_err();
    assert!(matches!(err, GraphError::TypeMismatch { .. }));
}

#[test]
fn embedded_values_are_reused() {
    let (mut uow, mut rec) = orders();
    let rows = [
        Row::new().with("order.id", 1).with("order.shipping.city", "Oslo"),
        Row::new().with("order.id", 1).with("order.shipping.street", "Main"),
    ];
    let roots = rec.apply_rows(&mut uow, &rows).unwrap();
    assert_eq!(
        uow.get_value(roots[0], "shipping/city").unwrap(),
        Some(Value::from("Oslo"))
    );
    assert_eq!(
        uow.get_value(roots[0], "shipping/street").unwrap(),
        Some(Value::from("Main"))
    );
    // order, address
    assert_eq!(uow.graph().len(), 2);
}

#[test]
fn malformed_rows_leave_the_graph_untouched() {
    let (mut uow, mut rec) = orders();
    let cases = [
        Row::new().with("other.id", 1),
        Row::new().with("order.id", 1).with("order.nope", 1),
        Row::new().with("order.id", "one"),
        Row::new().with("order.id", 1).with("order.id.extra", 1),
        Row::new().with("order.id", 1).with("order.customer", 7),
    ];
    for row in &cases {
        assert!(rec.apply_row(&mut uow, row).is_err(), "{row:?}");
    }
    assert!(uow.graph().is_empty());
    assert!(rec.roots().is_empty());
}

#[test]
fn unknown_property_names_the_type() {
    let (mut uow, mut rec) = orders();
    let row = Row::new().with("order.id", 1).with("order.nope", 1);
    assert_eq!(
        rec.apply_row(&mut uow, &row).unwrap_err(),
        GraphError::UnresolvedProperty {
            type_name: "Order".into(),
            property: "nope".into(),
        }
    );
}

#[test]
fn null_rows_are_no_ops() {
    let (mut uow, mut rec) = orders();
    let row = Row::new()
        .with("order.id", Value::Null)
        .with("order.items.$index", 0);
    assert_eq!(rec.apply_row(&mut uow, &row).unwrap(), None);
    assert!(uow.graph().is_empty());
}

#[test]
fn reconstituted_nodes_are_persistent_and_clean() {
    let (mut uow, mut rec) = orders();
    let row = Row::new().with("order.id", 1).with("order.items.sku", "A");
    rec.apply_row(&mut uow, &row).unwrap();
    assert!(uow.graph().iter().all(|n| n.is_persistent() && !n.is_modified()));
    assert_eq!(uow.modified_nodes().count(), 0);
}

#[test]
fn open_types_take_any_column() {
    init_tracing();
    let mut uow = UnitOfWork::new(document_schema());
    let mut rec = Reconstituter::new("doc", "Document");
    let row = Row::new()
        .with("doc.id", 1)
        .with("doc.title", "Notes")
        .with("doc.labels[]", "a");
    let roots = rec.apply_rows(&mut uow, [&row, &row]).unwrap();

    assert_eq!(
        uow.get_value(roots[0], "title").unwrap(),
        Some(Value::from("Notes"))
    );
    // appends are not deduplicated
    assert_eq!(len_of(&mut uow, roots[0], "labels"), 2);
}

#[test]
fn rows_from_json() {
    let (mut uow, mut rec) = orders();
    let row = Row::from_json(&serde_json::json!({
        "order.id": 1,
        "order.items": [{ "sku": "A" }, { "sku": "B" }]
    }))
    .unwrap();
    let root = rec.apply_row(&mut uow, &row).unwrap().unwrap();
    assert_eq!(len_of(&mut uow, root, "items"), 2);
}

#[test]
fn composite_keys_separate_states_and_share_countries() {
    init_tracing();
    let mut uow = UnitOfWork::new(geography_schema());
    let mut rec = Reconstituter::new("state", "State");
    let rows = [
        Row::new().with("state.country.code", "US").with("state.code", "NY"),
        Row::new().with("state.country.code", "US").with("state.code", "CA"),
        Row::new().with("state.country.code", "US").with("state.code", "NY"),
    ];
    let roots = rec.apply_rows(&mut uow, &rows).unwrap();
    assert_eq!(roots.len(), 2);

    let ny = uow.get_node(roots[0], "country").unwrap();
    let ca = uow.get_node(roots[1], "country").unwrap();
    assert_eq!(ny, ca);
    // two states, one country
    assert_eq!(uow.graph().len(), 3);
}

#[test]
fn roots_without_identity_extend_the_last_root() {
    let (mut uow, mut rec) = orders();
    let rows = [
        Row::new().with("order.status", "open"),
        Row::new().with("order.tags", "x"),
    ];
    let roots = rec.apply_rows(&mut uow, &rows).unwrap();
    assert_eq!(roots.len(), 1);
    assert!(matches!(uow.get(roots[0], "tags").unwrap(), Some(Slot::Set(_))));
}
