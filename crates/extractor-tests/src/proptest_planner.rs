//! Property-based tests for restore planning and row encoding

use extractor_mgmt::capacity::CapacitySnapshot;
use extractor_mgmt::format::csv_cell;
use extractor_mgmt::planner::{capacity_score, plan, IndexSnapshotMeta};
use proptest::prelude::*;
use serde_json::Value;
use std::collections::HashSet;

/// Index names drawn from a small alphabet so duplicates show up.
pub fn arb_requested() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-e]{1,2}", 0..12)
}

pub fn arb_free() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-1_000i64..1_000_000, 0..6)
}

pub fn arb_meta(names: Vec<String>) -> impl Strategy<Value = Vec<IndexSnapshotMeta>> {
    let count = names.len();
    prop::collection::vec(prop::collection::vec(0i64..500_000, 0..4), count).prop_map(move |shards| {
        names
            .iter()
            .zip(shards)
            .map(|(name, shard_bytes)| IndexSnapshotMeta {
                name: name.clone(),
                total_bytes: shard_bytes.iter().sum(),
                shard_bytes,
            })
            .collect()
    })
}

fn unique(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names.iter().filter(|n| seen.insert(n.as_str())).cloned().collect()
}

proptest! {
    #[test]
    fn prop_plan_partitions_requested_set(
        (requested, meta) in arb_requested().prop_flat_map(|r| {
            let names = unique(&r);
            (Just(r), arb_meta(names))
        }),
        free in arb_free(),
        object_store in any::<bool>(),
    ) {
        let capacity = CapacitySnapshot::from_free(free);
        let result = plan(&requested, &meta, &capacity, object_store);

        let now: HashSet<&String> = result.restore_now.iter().collect();
        let deferred: HashSet<&String> = result.deferred.iter().collect();
        prop_assert!(now.is_disjoint(&deferred));
        prop_assert_eq!(now.len() + deferred.len(), result.restore_now.len() + result.deferred.len());

        let union: HashSet<&String> = now.union(&deferred).copied().collect();
        let expected: HashSet<&String> = requested.iter().collect();
        prop_assert_eq!(union, expected);
    }

    #[test]
    fn prop_identical_indices_identical_placement(
        shards in prop::collection::vec(1i64..100_000, 1..4),
        free in arb_free(),
        copies in 2usize..6,
    ) {
        let names: Vec<String> = (0..copies).map(|i| format!("idx-{i}")).collect();
        let meta: Vec<IndexSnapshotMeta> = names
            .iter()
            .map(|n| IndexSnapshotMeta { name: n.clone(), total_bytes: shards.iter().sum(), shard_bytes: shards.clone() })
            .collect();
        let result = plan(&names, &meta, &CapacitySnapshot::from_free(free), false);
        prop_assert!(result.restore_now.is_empty() || result.deferred.is_empty());
    }

    #[test]
    fn prop_object_store_restores_everything(
        requested in arb_requested(),
        free in prop::collection::vec(i64::MIN / 2..=0, 0..4),
    ) {
        let result = plan(&requested, &[], &CapacitySnapshot::from_free(free), true);
        prop_assert!(result.deferred.is_empty());
        prop_assert_eq!(result.restore_now, unique(&requested));
    }

    #[test]
    fn prop_capacity_score_never_credits_negative_free(
        free in prop::collection::vec(i64::MIN..=0, 0..6),
        shards in prop::collection::vec(any::<i64>(), 0..6),
    ) {
        prop_assert_eq!(capacity_score(&free, &shards), 0);
    }

    #[test]
    fn prop_snapshot_aggregates_match_list(free in prop::collection::vec(-1_000_000i64..1_000_000_000, 0..16)) {
        let snapshot = CapacitySnapshot::from_free(free.clone());
        prop_assert_eq!(snapshot.sum(), free.iter().sum::<i64>());
        prop_assert_eq!(snapshot.max(), free.iter().copied().max().unwrap_or(0));
    }

    #[test]
    fn prop_csv_string_cell_is_single_quoted_field(text in ".{0,40}") {
        let cell = csv_cell(Some(&Value::String(text)));
        prop_assert!(cell.starts_with('"') && cell.ends_with('"') && cell.len() >= 2);
        let inner = &cell[1..cell.len() - 1];
        prop_assert!(!inner.contains('\n') && !inner.contains('\r'));
        // every quote inside is part of a doubled pair
        prop_assert_eq!(inner.replace("\"\"", "").matches('"').count(), 0);
    }
}
