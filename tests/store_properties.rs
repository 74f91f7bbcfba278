//! Property-based tests for the fact store's set semantics.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use pactgraph::{var, FactStore, Partition, Query, Term, Triple};

fn triple_strategy() -> impl Strategy<Value = Triple> {
    let subject = (0u8..8).prop_map(|i| format!("sys:s{i}"));
    let predicate = prop::sample::select(vec!["pact:owner", "pact:port", "pact:partOf"]);
    let object = prop_oneof![
        (0u8..8).prop_map(|i| Term::entity(format!("sys:s{i}"))),
        "[a-z]{1,6}".prop_map(Term::string),
        (0i64..1024).prop_map(Term::int),
    ];
    (subject, predicate, object).prop_map(|(s, p, o)| Triple::fact(&s, p, o))
}

fn everything() -> Query {
    Query::new().pattern(var("s"), var("p"), var("o"))
}

proptest! {
    /// Asserting a batch twice changes nothing the second time.
    #[test]
    fn prop_assertion_is_idempotent(triples in prop::collection::vec(triple_strategy(), 0..40)) {
        let store = FactStore::in_memory();
        let first = store.assert_all(triples.clone()).unwrap();
        let len = store.current_len().unwrap();
        let second = store.assert_all(triples.clone()).unwrap();

        prop_assert_eq!(second, 0);
        prop_assert_eq!(store.current_len().unwrap(), len);
        prop_assert!(first <= triples.len());
    }

    /// A snapshot answers every later query exactly as it did when frozen.
    #[test]
    fn prop_snapshot_is_immutable(
        before in prop::collection::vec(triple_strategy(), 1..30),
        after in prop::collection::vec(triple_strategy(), 1..30),
    ) {
        let store = FactStore::in_memory();
        store.assert_all(before).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let id = store.freeze("assessment-1", t0).unwrap();
        let frozen = store.query(&everything(), Partition::Snapshot(id)).unwrap();

        store.assert_all(after).unwrap();
        store.freeze("assessment-2", t0 + Duration::hours(1)).unwrap();

        prop_assert_eq!(store.query(&everything(), Partition::Snapshot(id)).unwrap(), frozen);
    }
}
