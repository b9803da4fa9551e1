use placementd::core::cluster::topology::store_topo_weight;
use placementd::core::store::limit::StoreLimits;
use placementd::core::store::{StoreInfo, StoreMeta};
use proptest::prelude::*;
use std::sync::Arc;

fn stores_from(assignments: &[(u8, u8)]) -> Vec<Arc<StoreInfo>> {
    assignments
        .iter()
        .enumerate()
        .map(|(i, (zone, rack))| {
            let mut meta = StoreMeta::new(i as u64 + 1, format!("s:{i}"));
            meta.labels
                .insert("zone".to_string(), format!("z{zone}"));
            meta.labels
                .insert("rack".to_string(), format!("r{rack}"));
            Arc::new(StoreInfo::new(meta, StoreLimits::new("v1", 15.0, 15.0)))
        })
        .collect()
}

proptest! {
    /// The topology weight is a fraction of the candidate placement and must
    /// always land in (0, 1].
    #[test]
    fn weight_is_in_unit_interval(
        assignments in proptest::collection::vec((0u8..4, 0u8..3), 1..8),
        count in 1u64..6,
    ) {
        let labels = vec!["zone".to_string(), "rack".to_string()];
        let stores = stores_from(&assignments);
        for store in &stores {
            let w = store_topo_weight(store, &stores, &labels, count);
            prop_assert!(w > 0.0, "weight must be positive, got {w}");
            prop_assert!(w <= 1.0, "weight must not exceed 1, got {w}");
        }
    }

    /// The weight of a store does not depend on the order the store list is
    /// presented in.
    #[test]
    fn weight_is_order_invariant(
        assignments in proptest::collection::vec((0u8..4, 0u8..3), 2..8),
    ) {
        let labels = vec!["zone".to_string(), "rack".to_string()];
        let stores = stores_from(&assignments);
        let mut reversed = stores.clone();
        reversed.reverse();
        for store in &stores {
            let forward = store_topo_weight(store, &stores, &labels, 3);
            let backward = store_topo_weight(store, &reversed, &labels, 3);
            prop_assert!((forward - backward).abs() < 1e-12);
        }
    }

    /// Bucket versions accepted by the region are strictly increasing no
    /// matter what order reports arrive in.
    #[test]
    fn bucket_versions_never_regress(versions in proptest::collection::vec(1u64..20, 1..32)) {
        use bytes::Bytes;
        use placementd::core::region::buckets::BucketStat;
        use placementd::core::region::{RegionEpoch, RegionInfo, RegionMeta};

        let region = RegionInfo::new(RegionMeta {
            id: 1,
            start_key: Bytes::from_static(b"a"),
            end_key: Bytes::from_static(b"b"),
            epoch: RegionEpoch { conf_ver: 1, version: 1 },
            peers: Vec::new(),
        });

        let mut accepted = 0u64;
        for version in versions {
            let current = region.buckets();
            let stale = current.as_ref().is_some_and(|c| version <= c.version);
            if !stale {
                let swapped = region.compare_and_set_buckets(
                    current.as_ref(),
                    Arc::new(BucketStat::new(1, version, Vec::new())),
                );
                prop_assert!(swapped, "single-threaded CAS must succeed");
            }
            let now = region.buckets().map(|b| b.version).unwrap_or(0);
            prop_assert!(now >= accepted, "versions must never regress");
            accepted = now;
        }
    }
}
