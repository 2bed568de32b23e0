//! # Property-Based Tests
//!
//! Determinism and correctness invariants of the value store and the
//! query engine, checked with proptest.

#![allow(clippy::unwrap_used, clippy::panic)]

use partsbin_core::primitives::ROOT_NODE;
use partsbin_core::{
    Catalog, CatalogStore, Expr, ItemId, MemoryStore, Number, Query, Scalar, ScalarKind, Term,
    ValueStore, WireValue, validate_attributes,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Escape every character the filter language treats specially.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if matches!(c, '\\' | '&' | '|' | '(' | ')' | '<' | '>' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// A catalog with one item per value, each holding `v` (and `w` on every
/// second item).
fn stocked(values: &[i32]) -> (Catalog, Vec<(ItemId, i32)>) {
    let mut catalog = Catalog::new();
    let mut items = Vec::new();
    for (i, v) in values.iter().enumerate() {
        let mut attributes = BTreeMap::from([(
            "v".to_string(),
            Scalar::number(f64::from(*v)).expect("finite"),
        )]);
        if i % 2 == 0 {
            attributes.insert("w".to_string(), Scalar::string("even"));
        }
        let record = catalog
            .create_item(ROOT_NODE, ROOT_NODE, attributes)
            .expect("create");
        items.push((record.id(), *v));
    }
    (catalog, items)
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// The storage encoding of numbers sorts like the numbers themselves.
    #[test]
    fn ordered_bits_preserve_order(a in -1.0e12f64..1.0e12, b in -1.0e12f64..1.0e12) {
        let na = Number::new(a).expect("finite");
        let nb = Number::new(b).expect("finite");
        prop_assert_eq!(na.cmp(&nb), na.ordered_bits().cmp(&nb.ordered_bits()));
        prop_assert_eq!(Number::from_ordered_bits(na.ordered_bits()), na);
    }

    /// Displayed numbers and units convert back to the same scalar.
    #[test]
    fn wire_form_converts_back(x in -1.0e9f64..1.0e9, label in "[a-zA-Z%]{1,6}") {
        let number = Scalar::number(x).expect("finite");
        let unit = Scalar::unit(x, label.as_str()).expect("finite");
        let payload = BTreeMap::from([
            ("n".to_string(), WireValue::from_scalar(&number)),
            ("u".to_string(), WireValue::from_scalar(&unit)),
        ]);
        let converted = validate_attributes(&payload).expect("valid");
        prop_assert_eq!(&converted["n"], &number);
        prop_assert_eq!(&converted["u"], &unit);
    }

    /// Bulk find-or-create stores exactly one row per distinct value and is
    /// idempotent.
    #[test]
    fn bulk_get_or_create_deduplicates(values in vec(-50i32..50, 0..40)) {
        let scalars: Vec<Scalar> = values
            .iter()
            .map(|v| Scalar::number(f64::from(*v)).expect("finite"))
            .collect();
        let mut store = MemoryStore::new();

        let first = ValueStore::bulk_get_or_create(&mut store, scalars.iter()).expect("bulk");
        let second = ValueStore::bulk_get_or_create(&mut store, scalars.iter()).expect("bulk");

        let distinct = values.iter().collect::<BTreeSet<_>>().len();
        prop_assert_eq!(first.len(), distinct);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(store.value_count(ScalarKind::Number).expect("count"), distinct);
    }

    /// Escaped keys parse back to the original text.
    #[test]
    fn escaped_keys_round_trip(key in "[a-z&|()<>=\\\\]{1,12}") {
        let query = Query::parse(&format!("{}=1", escape(&key))).expect("parse");
        let Some(Expr { first: Term::Lookup(lookup), rest }) = query.expr() else {
            panic!("expected a single lookup");
        };
        prop_assert!(rest.is_empty());
        prop_assert_eq!(&lookup.key, &key);
    }

    /// A range filter matches exactly the items a linear scan selects.
    #[test]
    fn range_filter_matches_scan(values in vec(-20i32..20, 1..25), bound in -25i32..25) {
        let (catalog, items) = stocked(&values);

        for (token, keep) in [
            (">", (|v: i32, b: i32| v > b) as fn(i32, i32) -> bool),
            ("<", |v, b| v < b),
            (">=", |v, b| v >= b),
            ("<=", |v, b| v <= b),
            ("=", |v, b| v == b),
        ] {
            let expected: BTreeSet<ItemId> = items
                .iter()
                .filter(|(_, v)| keep(*v, bound))
                .map(|(id, _)| *id)
                .collect();
            let result = catalog
                .filter_items(&format!("v{}{}", token, bound))
                .expect("filter");
            prop_assert_eq!(result.items, expected);
        }
    }

    /// Operators fold left: `A | B & C` is `(A | B) & C`.
    #[test]
    fn operators_fold_left(values in vec(-5i32..5, 1..25), a in -5i32..5, b in -5i32..5) {
        let (catalog, _) = stocked(&values);
        let set = |query: &str| catalog.filter_items(query).expect("filter").items;

        let lhs = set(&format!("v={} | v={} & w=even", a, b));
        let union: BTreeSet<ItemId> = set(&format!("v={}", a))
            .union(&set(&format!("v={}", b)))
            .copied()
            .collect();
        let expected: BTreeSet<ItemId> = union.intersection(&set("w=even")).copied().collect();
        prop_assert_eq!(lhs, expected);
    }
}
