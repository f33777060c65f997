//! Property tests for keys and path expressions.

use entigraph_model::{EntityKey, KeyPart, PathExpr, Value};
use proptest::prelude::*;

fn natural(country: &str, code: &str, anchor: Option<String>) -> EntityKey {
    EntityKey::natural(
        "State",
        vec![
            ("countryCode".to_string(), KeyPart::Value(Value::from(country))),
            ("code".to_string(), KeyPart::Value(Value::from(code))),
        ],
        anchor,
    )
}

proptest! {
    #[test]
    fn prop_natural_keys_equal_iff_fields_equal(
        a in "[A-Z]{2}", b in "[A-Z]{2}", c in "[A-Z]{2}", d in "[A-Z]{2}"
    ) {
        let left = natural(&a, &b, None);
        let right = natural(&c, &d, None);
        prop_assert_eq!(left == right, a == c && b == d);
    }

    #[test]
    fn prop_anchor_participates_in_equality(code in "[A-Z]{2}", anchor in "[a-z]{1,8}") {
        let plain = natural("US", &code, None);
        let anchored = natural("US", &code, Some(anchor.clone()));
        prop_assert_ne!(&plain, &anchored);
        prop_assert_eq!(anchored, natural("US", &code, Some(anchor)));
    }

    #[test]
    fn prop_indexed_paths_display_as_parsed(
        names in proptest::collection::vec("[a-z][a-z0-9_]{0,6}", 1..5),
        index in 0usize..50,
        one_based in any::<bool>(),
    ) {
        let mut text = names.join("/");
        if one_based {
            text.push_str(&format!("/items[{}]", index + 1));
        } else {
            text.push_str(&format!("/items.{index}"));
        }
        let parsed: PathExpr = text.parse().unwrap();
        prop_assert_eq!(parsed.len(), names.len() + 1);
        prop_assert_eq!(parsed.to_string(), text);
    }
}
