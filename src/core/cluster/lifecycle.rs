// src/core/cluster/lifecycle.rs

//! The store lifecycle engine: Preparing, Serving, Removing, Removed, and the
//! transitions between them. Every transition of a single store runs under
//! that store's state lock; different stores progress concurrently.

use semver::Version;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::RaftCluster;
use super::progress::{preparing_action, removing_action};
use super::topology::store_topo_weight;
use super::version::is_version_compatible;
use crate::core::PlacementdError;
use crate::core::store::limit::{StoreLimit, StoreLimitType, StoreLimits};
use crate::core::store::{NodeState, StoreInfo, StoreMeta};

/// Below this many regions in the whole cluster a preparing store serves
/// immediately; balancing that little data is not worth the wait.
const PREPARING_REGION_THRESHOLD: usize = 100;

/// Hysteresis applied to the preparing threshold.
const PREPARING_HYSTERESIS: f64 = 0.9;

/// Label keys always accepted even under strict matching.
const RESERVED_LABEL_KEYS: [&str; 2] = ["engine", "exclusive"];

impl RaftCluster {
    /// Registers a new store or updates the metadata of an existing one.
    /// Labels of an existing store are merged, not replaced.
    pub async fn put_meta_store(&self, meta: StoreMeta) -> Result<(), PlacementdError> {
        let config = self.config.read().clone();

        let store_version = Version::parse(&meta.version)
            .map_err(|e| PlacementdError::InvalidSemver(e.to_string()))?;
        let cluster_version = self.version.get();
        if !is_version_compatible(&cluster_version, &store_version) {
            return Err(PlacementdError::InvalidStoreVersion {
                store_id: meta.id,
                version: meta.version.clone(),
                cluster_version: cluster_version.to_string(),
            });
        }

        if config.replication.strictly_match_label {
            for key in meta.labels.keys() {
                let known = config.replication.location_labels.iter().any(|l| l == key)
                    || RESERVED_LABEL_KEYS.contains(&key.as_str());
                if !known {
                    return Err(PlacementdError::UnknownStoreLabel(key.clone()));
                }
            }
        }

        let _guard = self.store_locks.lock(meta.id).await;

        if let Some(dup) = self.basic.store_by_address(&meta.address)
            && dup.id() != meta.id
        {
            return Err(PlacementdError::DuplicatedStoreAddress {
                addr: meta.address.clone(),
                existing: dup.id(),
            });
        }

        let new_store = match self.basic.get_store(meta.id) {
            Some(existing) if existing.is_removed() => {
                return Err(PlacementdError::StoreRemoved(meta.id));
            }
            Some(existing) if existing.meta.physically_destroyed => {
                return Err(PlacementdError::StoreDestroyed(meta.id));
            }
            Some(existing) => {
                let mut merged = meta;
                for (key, value) in &existing.meta.labels {
                    merged.labels.entry(key.clone()).or_insert(value.clone());
                }
                // Node state and the destroyed flag never change through here.
                merged.node_state = existing.meta.node_state;
                merged.physically_destroyed = existing.meta.physically_destroyed;
                existing.with_meta(merged)
            }
            None => {
                let limits = StoreLimits::new(
                    &config.schedule.store_limit_version,
                    config.schedule.add_peer_rate,
                    config.schedule.remove_peer_rate,
                );
                info!(store_id = meta.id, address = %meta.address, "New store joined; preparing.");
                self.progress.add(&preparing_action(meta.id), 1.0, 1.0);
                StoreInfo::new(meta, limits)
            }
        };
        self.put_and_persist(new_store).await;
        Ok(())
    }

    /// Moves an up store to Removing (operator-facing "Offline"). Refused when
    /// too few up stores would remain to satisfy the replication factor.
    /// Calling it again with the same flag is a no-op.
    pub async fn remove_store(
        &self,
        store_id: u64,
        physically_destroyed: bool,
    ) -> Result<(), PlacementdError> {
        let _guard = self.store_locks.lock(store_id).await;
        let store = self.get_store(store_id)?;

        if store.is_removed() {
            return Err(PlacementdError::StoreRemoved(store_id));
        }
        if store.is_removing() {
            if store.meta.physically_destroyed == physically_destroyed {
                return Ok(());
            }
            return Err(PlacementdError::InvalidRequest(format!(
                "store {store_id} is already going offline with physically-destroyed={}",
                store.meta.physically_destroyed
            )));
        }

        let max_replicas = self.config.read().replication.max_replicas;
        let up_count = self.basic.up_stores().len();
        if (up_count as u64) < max_replicas {
            return Err(PlacementdError::StoresNotEnough {
                up: up_count,
                max_replicas,
            });
        }

        // Remember the configured rates so a later UpStore can restore them,
        // then stop feeding the store new work.
        self.prev_store_limits
            .insert(store_id, store.limits.rates());
        let zeroed = StoreLimits::new(&store.limits.version, 0.0, 0.0);

        let new_store = self
            .transition(&store, NodeState::Removing)?
            .with_physically_destroyed(physically_destroyed)
            .with_limits(zeroed);

        let (_, region_size) = self.basic.store_region_totals(store_id);
        self.progress.remove(&preparing_action(store_id));
        self.progress.add(
            &removing_action(store_id),
            region_size as f64,
            region_size as f64,
        );

        info!(
            store_id,
            physically_destroyed, "Store is going offline."
        );
        self.put_and_persist(new_store).await;
        Ok(())
    }

    /// Brings a store back to Serving, restoring the limits captured when it
    /// went offline.
    pub async fn up_store(&self, store_id: u64) -> Result<(), PlacementdError> {
        let _guard = self.store_locks.lock(store_id).await;
        let store = self.get_store(store_id)?;

        if store.is_removed() {
            return Err(PlacementdError::StoreRemoved(store_id));
        }
        if store.meta.physically_destroyed {
            return Err(PlacementdError::StoreDestroyed(store_id));
        }
        if store.is_serving() {
            return Err(PlacementdError::StoreIsUp(store_id));
        }

        let mut new_store = self.transition(&store, NodeState::Serving)?;
        if store.is_removing() {
            let config = self.config.read().clone();
            let rates = self
                .prev_store_limits
                .remove(&store_id)
                .map(|(_, v)| v)
                .map(|prev| (prev.add_peer, prev.remove_peer))
                .unwrap_or((
                    config.schedule.add_peer_rate,
                    config.schedule.remove_peer_rate,
                ));
            new_store = new_store.with_limits(StoreLimits::new(
                &config.schedule.store_limit_version,
                rates.0,
                rates.1,
            ));
            self.progress.remove(&removing_action(store_id));
        }
        self.progress.remove(&preparing_action(store_id));

        info!(store_id, "Store is up and serving.");
        self.put_and_persist(new_store).await;
        Ok(())
    }

    /// Turns a store into a tombstone. Without `force` the store must be
    /// Removing and empty; with `force` an up-but-disconnected store is
    /// accepted. Burying a tombstone again is a no-op.
    pub async fn bury_store(&self, store_id: u64, force: bool) -> Result<(), PlacementdError> {
        let _guard = self.store_locks.lock(store_id).await;
        let store = self.get_store(store_id)?;

        if store.is_removed() {
            return Ok(());
        }
        let mut current = (*store).clone();
        if current.is_up() {
            if !(force && current.is_disconnected()) {
                return Err(PlacementdError::StoreIsUp(store_id));
            }
            warn!(
                store_id,
                "Force-burying an up but disconnected store."
            );
            current = self.transition(&current, NodeState::Removing)?;
            // Publish the intermediate state: readers must only ever observe
            // a path of the lifecycle graph, never a direct jump to Removed.
            self.put_and_persist(current.clone()).await;
        }
        let (_, region_size) = self.basic.store_region_totals(store_id);
        if region_size > 0 && !force {
            return Err(PlacementdError::StoreServing(store_id));
        }

        let zeroed = StoreLimits::new(&current.limits.version, 0.0, 0.0);
        let new_store = self
            .transition(&current, NodeState::Removed)?
            .with_limits(zeroed);
        self.prev_store_limits.remove(&store_id);
        self.progress.remove(&removing_action(store_id));

        info!(store_id, "Store buried; now a tombstone.");
        self.put_and_persist(new_store).await;

        // The tombstone no longer pins the minimum store version.
        self.on_store_version_change().await;
        Ok(())
    }

    /// Deletes a tombstone record from storage and the cache. The storage
    /// delete is the primary operation; its failure fails the call.
    pub async fn delete_store(&self, store_id: u64) -> Result<(), PlacementdError> {
        let _guard = self.store_locks.lock(store_id).await;
        let store = self.get_store(store_id)?;
        if !store.is_removed() {
            return Err(PlacementdError::StoreServing(store_id));
        }
        if self.is_initialized() {
            self.storage
                .delete_store_meta(self.cluster_id(), store_id)
                .await?;
        }
        self.basic.delete_store(store_id);
        info!(store_id, "Tombstone store record deleted.");
        Ok(())
    }

    /// One pass of the node-state reconciliation: serve preparing stores that
    /// are full enough, bury empty offline stores, delete expired tombstones,
    /// and refresh per-store region totals and progress.
    pub async fn check_stores(&self) {
        let gc_interval = self.config.read().schedule.tombstone_gc_interval;
        for store in self.basic.stores() {
            let store_id = store.id();
            let (region_count, region_size) = self.basic.store_region_totals(store_id);

            match store.meta.node_state {
                NodeState::Preparing => {
                    if self.ready_to_serve(&store, region_size) {
                        if let Err(e) = self.serve_preparing_store(store_id).await {
                            warn!(store_id, error = %e, "Failed to serve a preparing store.");
                        }
                    } else {
                        let threshold = self.preparing_threshold(&store).max(1.0);
                        self.progress.add(
                            &preparing_action(store_id),
                            threshold,
                            (threshold - region_size as f64).max(0.0),
                        );
                    }
                }
                NodeState::Serving => {}
                NodeState::Removing => {
                    if region_size == 0 && region_count == 0 {
                        if let Err(e) = self.bury_store(store_id, false).await {
                            warn!(store_id, error = %e, "Failed to bury an emptied store.");
                        }
                    } else {
                        self.progress
                            .update(&removing_action(store_id), region_size as f64);
                    }
                }
                NodeState::Removed => {
                    if store.down_time() > gc_interval
                        && let Err(e) = self.delete_store(store_id).await
                    {
                        warn!(store_id, error = %e, "Failed to delete an expired tombstone.");
                    }
                }
            }

            if store.region_count != region_count || store.region_size != region_size {
                self.basic.put_store(Arc::new(
                    store.with_region_totals(region_count, region_size),
                ));
            }
        }
    }

    /// Whether a preparing store has seen enough uptime or data to serve.
    fn ready_to_serve(&self, store: &StoreInfo, region_size: i64) -> bool {
        let config = self.config.read().clone();
        if store.uptime() >= config.schedule.max_store_preparing_time {
            return true;
        }
        if self.basic.region_count() < PREPARING_REGION_THRESHOLD {
            return true;
        }
        region_size as f64 >= self.preparing_threshold(store)
    }

    /// The region size (MiB) a preparing store should reach before serving:
    /// its expected share of the candidate placement, with hysteresis.
    pub fn preparing_threshold(&self, store: &StoreInfo) -> f64 {
        let config = self.config.read().clone();
        let stores = self.basic.stores();
        let rules = self.placement_rules.read().clone();

        let expected = if config.replication.enable_placement_rules && !rules.is_empty() {
            rules
                .iter()
                .map(|rule| {
                    let size = self
                        .basic
                        .region_size_in_range(&rule.start_key, &rule.end_key)
                        as f64;
                    size * store_topo_weight(store, &stores, &rule.location_labels, rule.count)
                })
                .sum()
        } else {
            self.basic.total_region_size() as f64
                * store_topo_weight(
                    store,
                    &stores,
                    &config.replication.location_labels,
                    config.replication.max_replicas,
                )
        };
        expected * PREPARING_HYSTERESIS
    }

    async fn serve_preparing_store(&self, store_id: u64) -> Result<(), PlacementdError> {
        let _guard = self.store_locks.lock(store_id).await;
        let store = self.get_store(store_id)?;
        if !store.is_preparing() {
            return Ok(());
        }
        let new_store = self.transition(&store, NodeState::Serving)?;
        self.progress.remove(&preparing_action(store_id));
        info!(store_id, "Preparing store is full enough; now serving.");
        self.put_and_persist(new_store).await;
        Ok(())
    }

    /// Reconfigures one of a store's limiters and persists the configured
    /// rates. Persistence retries a few times with back-off; ultimate failure
    /// is logged and ignored, the in-memory limiter stays reconfigured.
    pub async fn set_store_limit(
        &self,
        store_id: u64,
        kind: StoreLimitType,
        rate_per_min: f64,
    ) -> Result<(), PlacementdError> {
        const PERSIST_RETRIES: usize = 5;
        const PERSIST_BACKOFF: Duration = Duration::from_millis(100);

        let _guard = self.store_locks.lock(store_id).await;
        let store = self.get_store(store_id)?;

        let mut limits = store.limits.clone();
        *limits.limit_mut(kind) = StoreLimit::new(&limits.version, rate_per_min);
        let rates = limits.rates();
        self.basic.put_store(Arc::new(store.with_limits(limits)));

        if !self.is_initialized() {
            return Ok(());
        }
        let key = crate::core::storage::store_limit_path(self.cluster_id(), store_id);
        let raw = serde_json::to_string(&rates)?;
        for attempt in 1..=PERSIST_RETRIES {
            match self.storage.save(&key, &raw).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt == PERSIST_RETRIES => {
                    error!(store_id, error = %e, "Store limit persistence failed after every retry.");
                }
                Err(_) => tokio::time::sleep(PERSIST_BACKOFF).await,
            }
        }
        Ok(())
    }

    /// Applies a lifecycle transition after validating it against the graph.
    fn transition(
        &self,
        store: &StoreInfo,
        to: NodeState,
    ) -> Result<StoreInfo, PlacementdError> {
        let from = store.meta.node_state;
        if !from.can_transition_to(to) {
            return Err(PlacementdError::InvalidState(format!(
                "store {} cannot move from {from} to {to}",
                store.id()
            )));
        }
        Ok(store.with_state(to))
    }

    /// Swaps the new store snapshot into the cache and writes its metadata
    /// through. The cache is the source of truth: a persistence failure is
    /// logged and the in-memory transition is retained.
    pub(crate) async fn put_and_persist(&self, store: StoreInfo) {
        let mut store = store;
        if self.is_initialized() {
            store.last_persist = Some(Instant::now());
        }
        let store = Arc::new(store);
        self.basic.put_store(store.clone());
        if self.is_initialized()
            && let Err(e) = self
                .storage
                .save_store_meta(self.cluster_id(), &store.meta)
                .await
        {
            error!(
                store_id = store.id(),
                error = %e,
                "Store metadata persistence failed; in-memory transition retained."
            );
        }
    }
}
