// src/core/cluster/heartbeat.rs

//! Heartbeat application: store heartbeats mutate the store snapshot and fan
//! out async statistics work; region heartbeats run the dedup/coalescing
//! pipeline that keeps the root tree, subtrees, storage, and the downstream
//! syncer consistent.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::RaftCluster;
use crate::core::PlacementdError;
use crate::core::metrics::{
    BUCKET_REPORT_FAILED_TOTAL, BUCKET_REPORT_STALE_TOTAL, REGION_CACHE_UPDATED_TOTAL,
    REGION_HEARTBEAT_TOTAL, STORE_HEARTBEAT_TOTAL,
};
use crate::core::region::buckets::BucketStat;
use crate::core::region::{RegionInfo, region_guide};
use crate::core::runner::TaskKind;
use crate::core::store::limit::StoreLimits;
use crate::core::store::{NodeState, StoreStats};

/// Store metadata is rewritten at most this often when nothing else forces it.
const STORE_PERSIST_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// The floor applied to the executing term of the snapshot feedback signal.
const SNAPSHOT_EXECUTING_FLOOR: Duration = Duration::from_secs(5);

/// The bucket update loop gives up after this many compare-and-swap attempts.
const BUCKET_CAS_MAX_RETRY: usize = 3;

/// What a store heartbeat gets back: its current lifecycle state and,
/// when this store is healthy while others are slow, the stores whose
/// regions it should awaken.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHeartbeatResponse {
    pub node_state: NodeState,
    pub awaken_regions: Option<Vec<u64>>,
}

impl RaftCluster {
    /// Applies a store heartbeat. Unknown stores are rejected; everything else
    /// is clone-and-swap on the store snapshot plus async statistics work.
    pub async fn handle_store_heartbeat(
        &self,
        stats: StoreStats,
    ) -> Result<StoreHeartbeatResponse, PlacementdError> {
        STORE_HEARTBEAT_TOTAL.inc();
        let store_id = stats.store_id;
        let store = self.get_store(store_id)?;
        let config = self.config.read().clone();

        let mut new_store = store.with_stats(stats.clone());

        // The limiter shape follows the configured version.
        if new_store.limits.version != config.schedule.store_limit_version {
            new_store = new_store.with_limits(StoreLimits::new(
                &config.schedule.store_limit_version,
                config.schedule.add_peer_rate,
                config.schedule.remove_peer_rate,
            ));
        }

        // Snapshot-duration feedback: e = 2·executing − total, with a floor on
        // the executing term so one fast snapshot cannot whipsaw the limiter.
        for snap in &stats.snapshot_stats {
            let executing = snap.executing_duration.max(SNAPSHOT_EXECUTING_FLOOR);
            let signal = 2.0 * executing.as_secs_f64() - snap.total_duration.as_secs_f64();
            new_store.feedback = signal;
            new_store.limits.feedback(signal);
        }

        let low_space = stats.capacity > 0
            && (stats.available as f64) < (stats.capacity as f64) * (1.0 - config.replication.low_space_ratio);
        if low_space {
            warn!(
                store_id,
                available = stats.available,
                capacity = stats.capacity,
                "Store is running low on disk space."
            );
        }

        // A healthy store is asked to awaken the regions of its slow peers.
        let slow_others: Vec<u64> = self
            .basic
            .slow_store_ids()
            .into_iter()
            .filter(|id| *id != store_id)
            .collect();
        let awaken_regions = if !new_store.slow && !slow_others.is_empty() {
            new_store.last_awaken = Some(Instant::now());
            Some(slow_others)
        } else {
            None
        };

        if new_store.needs_persist(STORE_PERSIST_INTERVAL) {
            self.put_and_persist(new_store).await;
        } else {
            self.basic.put_store(Arc::new(new_store));
        }

        // Hot-peer checks, one task per reported peer.
        for peer in stats.peer_stats.clone() {
            let basic = self.basic.clone();
            let region_id = peer.region_id;
            self.runners
                .heartbeat
                .submit(region_id, TaskKind::CheckHotPeer, false, async move {
                    basic.observe_hot_peer(store_id, peer);
                });
        }

        // Cold-peer reconciliation against the previous hot set.
        let reported: HashSet<u64> = stats.peer_stats.iter().map(|p| p.region_id).collect();
        let basic = self.basic.clone();
        self.runners
            .misc
            .submit(store_id, TaskKind::ReconcileColdPeers, false, async move {
                let cooled = basic.reconcile_cold_peers(store_id, &reported);
                if cooled > 0 {
                    debug!(store_id, cooled, "Cold peers reconciled.");
                }
            });

        Ok(StoreHeartbeatResponse {
            node_state: store.meta.node_state,
            awaken_regions,
        })
    }

    /// Applies a region heartbeat through the dedup/coalescing pipeline.
    pub async fn process_region_heartbeat(
        &self,
        mut region: RegionInfo,
    ) -> Result<(), PlacementdError> {
        let Some(leader) = region.leader else {
            return Err(PlacementdError::InvalidRequest(format!(
                "region {} heartbeat carries no leader",
                region.id()
            )));
        };
        if self.basic.get_store(leader.store_id).is_none() {
            return Err(PlacementdError::NoStoreForRegionLeader(region.id()));
        }

        let origin = self.basic.pre_check_put_region(&region).inspect_err(|_| {
            REGION_HEARTBEAT_TOTAL.with_label_values(&["stale"]).inc();
        })?;
        debug!(
            region_id = region.id(),
            has_origin = origin.is_some(),
            "Region heartbeat pre-check passed."
        );

        let buckets_enabled = self.store_config.read().enable_region_bucket;
        if let Some(origin) = &origin {
            region.inherit(origin, buckets_enabled);
        }

        let directive = region_guide(origin.as_deref(), &region);
        let region = Arc::new(region);

        // Fast path: the cache holds an equivalent region already.
        if !directive.save_kv && !directive.save_cache {
            REGION_HEARTBEAT_TOTAL.with_label_values(&["fast"]).inc();
            if self.basic.region_stats_need_update(&region) {
                let basic = self.basic.clone();
                let observed = region.clone();
                self.runners.misc.submit(
                    region.id(),
                    TaskKind::ObserveRegionStats,
                    false,
                    async move {
                        basic.observe_region_stats(&observed);
                    },
                );
            }
            if let Some(origin) = origin
                && origin.refs() < 2
            {
                let basic = self.basic.clone();
                self.runners.heartbeat.submit(
                    origin.id(),
                    TaskKind::UpdateSubTree,
                    true,
                    async move {
                        basic.check_and_put_subtree(origin);
                    },
                );
            }
            return Ok(());
        }

        let mut overlaps = Vec::new();
        if directive.save_cache {
            overlaps = self.basic.check_and_put_root_tree(region.clone())?;
            REGION_CACHE_UPDATED_TOTAL.inc();
            REGION_HEARTBEAT_TOTAL.with_label_values(&["cache"]).inc();

            let basic = self.basic.clone();
            let for_subtree = region.clone();
            self.runners.heartbeat.submit(
                region.id(),
                TaskKind::UpdateSubTree,
                directive.retained,
                async move {
                    basic.check_and_put_subtree(for_subtree);
                },
            );

            if !overlaps.is_empty() {
                let basic = self.basic.clone();
                let overlapped = overlaps.clone();
                self.runners.misc.submit(
                    region.id(),
                    TaskKind::HandleOverlaps,
                    false,
                    async move {
                        basic.handle_overlaps(&overlapped);
                    },
                );
            }

            // Logging happens off the heartbeat hot path.
            let region_id = region.id();
            let epoch = region.epoch();
            let superseded: Vec<u64> = overlaps.iter().map(|r| r.id()).collect();
            self.runners
                .log
                .submit(region_id, TaskKind::LogRegionUpdate, false, async move {
                    debug!(
                        region_id,
                        conf_ver = epoch.conf_ver,
                        version = epoch.version,
                        ?superseded,
                        "Region cache updated."
                    );
                });
        }

        if self.basic.region_stats_need_update(&region) {
            let basic = self.basic.clone();
            let observed = region.clone();
            self.runners.misc.submit(
                region.id(),
                TaskKind::CollectRegionStats,
                false,
                async move {
                    basic.observe_region_stats(&observed);
                },
            );
        }

        if directive.save_kv && self.is_initialized() {
            let storage = self.storage.clone();
            let cluster_id = self.cluster_id();
            let meta = region.meta.clone();
            let overlapped: Vec<u64> = overlaps.iter().map(|r| r.id()).collect();
            self.runners.misc.submit(
                region.id(),
                TaskKind::SaveRegionToKv,
                directive.retained,
                async move {
                    for region_id in overlapped {
                        if let Err(e) = storage.delete_region(cluster_id, region_id).await {
                            warn!(region_id, error = %e, "Failed to delete a superseded region from storage.");
                        }
                    }
                    if let Err(e) = storage.save_region(cluster_id, &meta).await {
                        warn!(region_id = meta.id, error = %e, "Failed to save region to storage.");
                    }
                },
            );
        }

        if (directive.save_kv || directive.need_sync)
            && let Some(tx) = self.changed_regions_sender()
        {
            let meta = region.meta.clone();
            self.runners.sync_region.submit(
                region.id(),
                TaskKind::SyncRegion,
                true,
                async move {
                    if tx.send(meta).await.is_err() {
                        debug!("Changed-regions channel closed; sync task dropped its payload.");
                    }
                },
            );
        }
        Ok(())
    }

    /// Applies a bucket report through the optimistic version check. Stale and
    /// no-op reports return without mutation; a report that keeps losing the
    /// compare-and-swap gives up after a fixed number of attempts.
    pub fn process_report_buckets(&self, report: BucketStat) -> Result<(), PlacementdError> {
        let region = self.get_region(report.region_id)?;

        for _ in 0..BUCKET_CAS_MAX_RETRY {
            let current = region.buckets();
            if let Some(current) = &current
                && report.version <= current.version
            {
                BUCKET_REPORT_STALE_TOTAL.inc();
                return Ok(());
            }
            if region.compare_and_set_buckets(current.as_ref(), Arc::new(report.clone())) {
                return Ok(());
            }
        }
        BUCKET_REPORT_FAILED_TOTAL.inc();
        warn!(
            region_id = report.region_id,
            version = report.version,
            "Bucket update abandoned after losing every compare-and-swap attempt."
        );
        Ok(())
    }
}
