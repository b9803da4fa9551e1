// src/core/basic/mod.rs

//! The in-memory cluster cache: authoritative store and region views, the
//! ordered root tree of region key ranges, the per-store subtrees, and the
//! hot-peer statistics fed by store heartbeats.
//!
//! Entities are held behind `Arc` and replaced wholesale (clone-and-swap), so
//! readers never observe a partially applied update.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::core::PlacementdError;
use crate::core::region::RegionInfo;
use crate::core::store::{NodeState, PeerStat, StoreInfo};

/// A remembered observation of a region's statistics, used to decide whether
/// a heartbeat that changes nothing else still needs a stats pass.
#[derive(Debug, Clone, Copy, Default)]
struct RegionStatRecord {
    approximate_size: i64,
    approximate_keys: i64,
}

/// The in-memory store/region caches shared by the whole control plane.
#[derive(Debug, Default)]
pub struct BasicCluster {
    stores: DashMap<u64, Arc<StoreInfo>>,
    regions: DashMap<u64, Arc<RegionInfo>>,
    /// Root tree: region start key to region id, ordered for overlap scans.
    root_tree: RwLock<BTreeMap<Bytes, u64>>,
    /// Per-store subtree: region id to approximate size, in MiB.
    subtrees: DashMap<u64, HashMap<u64, i64>>,
    /// Hot peers last reported per (store, region).
    hot_peers: DashMap<(u64, u64), PeerStat>,
    /// Last observed region statistics, keyed by region id.
    region_stats: DashMap<u64, RegionStatRecord>,
}

impl BasicCluster {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Store accessors ---

    pub fn get_store(&self, store_id: u64) -> Option<Arc<StoreInfo>> {
        self.stores.get(&store_id).map(|s| s.value().clone())
    }

    pub fn stores(&self) -> Vec<Arc<StoreInfo>> {
        self.stores.iter().map(|s| s.value().clone()).collect()
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    /// Swaps in a new store snapshot.
    pub fn put_store(&self, store: Arc<StoreInfo>) {
        self.stores.insert(store.id(), store);
    }

    /// Drops a store record entirely (tombstone GC).
    pub fn delete_store(&self, store_id: u64) {
        self.stores.remove(&store_id);
        self.subtrees.remove(&store_id);
        self.hot_peers.retain(|(sid, _), _| *sid != store_id);
    }

    /// The store currently registered at `addr`, ignoring tombstones and
    /// physically destroyed stores.
    pub fn store_by_address(&self, addr: &str) -> Option<Arc<StoreInfo>> {
        self.stores.iter().find_map(|s| {
            let store = s.value();
            if store.meta.address == addr
                && !store.is_removed()
                && !store.meta.physically_destroyed
            {
                Some(store.clone())
            } else {
                None
            }
        })
    }

    /// Stores that are up, i.e. Preparing or Serving.
    pub fn up_stores(&self) -> Vec<Arc<StoreInfo>> {
        self.stores
            .iter()
            .filter(|s| s.is_up())
            .map(|s| s.value().clone())
            .collect()
    }

    /// The ids of stores currently flagged slow.
    pub fn slow_store_ids(&self) -> Vec<u64> {
        self.stores
            .iter()
            .filter(|s| s.slow && !s.is_removed())
            .map(|s| s.id())
            .collect()
    }

    /// Counts stores per node state, for the metrics job.
    pub fn store_state_counts(&self) -> HashMap<NodeState, usize> {
        let mut counts = HashMap::new();
        for s in self.stores.iter() {
            *counts.entry(s.meta.node_state).or_insert(0) += 1;
        }
        counts
    }

    // --- Region accessors ---

    pub fn get_region(&self, region_id: u64) -> Option<Arc<RegionInfo>> {
        self.regions.get(&region_id).map(|r| r.value().clone())
    }

    pub fn regions(&self) -> Vec<Arc<RegionInfo>> {
        self.regions.iter().map(|r| r.value().clone()).collect()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Validates an incoming region against the cache and returns the cached
    /// origin. A heartbeat carrying an epoch older than the cached one on
    /// either component is rejected.
    pub fn pre_check_put_region(
        &self,
        region: &RegionInfo,
    ) -> Result<Option<Arc<RegionInfo>>, PlacementdError> {
        let origin = self.get_region(region.id());
        if let Some(origin) = &origin
            && region.epoch().is_stale_compared_to(&origin.epoch())
        {
            return Err(PlacementdError::RegionStaleEpoch {
                region_id: region.id(),
            });
        }
        Ok(origin)
    }

    /// Inserts `region` into the root tree, superseding the regions whose key
    /// ranges it overlaps. Re-validates the epoch under the tree lock so a
    /// concurrent heartbeat of the same region cannot be applied out of order.
    /// Returns the superseded regions.
    pub fn check_and_put_root_tree(
        &self,
        region: Arc<RegionInfo>,
    ) -> Result<Vec<Arc<RegionInfo>>, PlacementdError> {
        let mut tree = self.root_tree.write();

        // A racing update may have replaced the cache since the pre-check.
        if let Some(current) = self.get_region(region.id())
            && region.epoch().is_stale_compared_to(&current.epoch())
        {
            return Err(PlacementdError::RegionStaleEpoch {
                region_id: region.id(),
            });
        }

        let mut overlaps = Vec::new();
        let mut stale_keys = Vec::new();
        for (start_key, region_id) in tree.iter() {
            if *region_id == region.id() {
                stale_keys.push(start_key.clone());
                continue;
            }
            if let Some(other) = self.get_region(*region_id)
                && other.overlaps(&region)
            {
                overlaps.push(other);
                stale_keys.push(start_key.clone());
            }
        }
        for key in stale_keys {
            tree.remove(&key);
        }
        for overlap in &overlaps {
            self.regions.remove(&overlap.id());
            self.region_stats.remove(&overlap.id());
        }

        region.reset_ref();
        region.incr_ref();
        tree.insert(region.meta.start_key.clone(), region.id());
        if let Some(prev) = self.regions.insert(region.id(), region.clone())
            && !Arc::ptr_eq(&prev, &region)
        {
            prev.reset_ref();
        }
        Ok(overlaps)
    }

    /// Brings the per-store subtrees in line with `region`'s current peer set.
    /// The region must still be the cached value; a superseded `Arc` is not
    /// re-indexed.
    pub fn check_and_put_subtree(&self, region: Arc<RegionInfo>) {
        match self.get_region(region.id()) {
            Some(current) if Arc::ptr_eq(&current, &region) => {}
            _ => return,
        }

        let peer_stores: HashSet<u64> = region.store_ids().into_iter().collect();
        for store_id in &peer_stores {
            self.subtrees
                .entry(*store_id)
                .or_default()
                .insert(region.id(), region.approximate_size);
        }
        for mut subtree in self.subtrees.iter_mut() {
            if !peer_stores.contains(subtree.key()) {
                subtree.value_mut().remove(&region.id());
            }
        }
        if region.refs() < 2 {
            region.incr_ref();
        }
    }

    /// Removes superseded regions from every subtree.
    pub fn handle_overlaps(&self, overlaps: &[Arc<RegionInfo>]) {
        for overlap in overlaps {
            overlap.reset_ref();
            for mut subtree in self.subtrees.iter_mut() {
                subtree.value_mut().remove(&overlap.id());
            }
        }
    }

    /// The aggregate (region count, region size in MiB) a store carries.
    pub fn store_region_totals(&self, store_id: u64) -> (u64, i64) {
        self.subtrees
            .get(&store_id)
            .map(|t| (t.len() as u64, t.values().sum()))
            .unwrap_or((0, 0))
    }

    /// The aggregate region size over the whole cluster, in MiB.
    pub fn total_region_size(&self) -> i64 {
        self.regions.iter().map(|r| r.approximate_size).sum()
    }

    /// The aggregate region size within `[start_key, end_key)`, in MiB.
    pub fn region_size_in_range(&self, start_key: &Bytes, end_key: &Bytes) -> i64 {
        self.regions
            .iter()
            .filter(|r| {
                let r_end_open = r.meta.end_key.is_empty();
                let range_end_open = end_key.is_empty();
                (range_end_open || r.meta.start_key < *end_key)
                    && (r_end_open || *start_key < r.meta.end_key)
            })
            .map(|r| r.approximate_size)
            .sum()
    }

    // --- Hot/cold peer statistics ---

    /// Records one reported hot peer.
    pub fn observe_hot_peer(&self, store_id: u64, stat: PeerStat) {
        self.hot_peers.insert((store_id, stat.region_id), stat);
    }

    /// Drops hot-peer records of `store_id` whose regions were not present in
    /// the latest report, and returns how many went cold.
    pub fn reconcile_cold_peers(&self, store_id: u64, reported: &HashSet<u64>) -> usize {
        let before = self.hot_peers.len();
        self.hot_peers
            .retain(|(sid, rid), _| *sid != store_id || reported.contains(rid));
        before - self.hot_peers.len()
    }

    pub fn hot_peer_count(&self) -> usize {
        self.hot_peers.len()
    }

    // --- Region statistics bookkeeping ---

    /// Whether the stats observer should run for this heartbeat.
    pub fn region_stats_need_update(&self, region: &RegionInfo) -> bool {
        match self.region_stats.get(&region.id()) {
            None => true,
            Some(rec) => {
                rec.approximate_size != region.approximate_size
                    || rec.approximate_keys != region.approximate_keys
            }
        }
    }

    /// Records the observed statistics of a region.
    pub fn observe_region_stats(&self, region: &RegionInfo) {
        self.region_stats.insert(
            region.id(),
            RegionStatRecord {
                approximate_size: region.approximate_size,
                approximate_keys: region.approximate_keys,
            },
        );
    }
}
