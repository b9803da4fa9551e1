// src/core/cluster/mod.rs

//! The raft-cluster controller: the long-lived object that mediates heartbeat
//! traffic, runs the store lifecycle engine, spawns the background
//! reconciliation jobs, and coordinates the scheduling and TSO subsystems.

pub mod heartbeat;
pub mod lifecycle;
pub mod locks;
pub mod orchestrator;
pub mod progress;
pub mod topology;
pub mod version;

use dashmap::DashMap;
use parking_lot::RwLock;
use semver::Version;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use sysinfo::System;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::core::PlacementdError;
use crate::core::basic::BasicCluster;
use crate::core::id::IdAllocator;
use crate::core::metrics::MIN_RESOLVED_TS_GAUGE;
use crate::core::region::{RegionInfo, RegionMeta};
use crate::core::services::{
    Discovery, RegionSyncSink, ReplicationModeManager, SchedulingJobs, TsoAllocator,
};
use crate::core::storage::{CLUSTER_BOOTSTRAP_TIME_PATH, ClusterMeta, Storage, StoreWeight};
use crate::core::store::limit::{PrevStoreLimit, StoreLimits};
use crate::core::store::{StoreConfig, StoreInfo, unix_now};
use crate::core::runner::TaskRunners;
use crate::core::tasks;

use locks::StoreStateLocks;
use progress::ProgressTracker;
use topology::PlacementRule;
use version::ClusterVersion;

/// How long `stop` waits for the runners to drain.
const RUNNER_STOP_DEADLINE: Duration = Duration::from_secs(5);

/// Timeout applied to every outbound HTTP poll.
pub(crate) const HTTP_POLL_TIMEOUT: Duration = Duration::from_secs(3);

/// Process-wide runtime facts and tunables shared by the GC tuner.
#[derive(Debug)]
pub struct RuntimeEnv {
    /// Total physical memory, in bytes.
    pub total_memory: u64,
    /// The soft memory limit currently enforced; 0 when disabled.
    pub memory_limit: AtomicU64,
    /// The GC threshold currently enforced; 0 when disabled.
    pub gc_threshold: AtomicU64,
}

impl RuntimeEnv {
    /// Reads the machine's memory facts. Failing to learn the total memory is
    /// fatal: the GC tuner cannot run safely without it.
    pub fn detect() -> Result<Self, PlacementdError> {
        let mut sys = System::new();
        sys.refresh_memory();
        let total_memory = sys.total_memory();
        if total_memory == 0 {
            return Err(PlacementdError::Internal(
                "unable to determine total physical memory".to_string(),
            ));
        }
        Ok(Self {
            total_memory,
            memory_limit: AtomicU64::new(0),
            gc_threshold: AtomicU64::new(0),
        })
    }
}

/// Controller state guarded by the facade lock.
struct ControllerState {
    running: bool,
    shutdown_tx: Option<broadcast::Sender<()>>,
    jobs: JoinSet<()>,
}

/// The raft-cluster controller. Constructed once, wrapped in an `Arc`, and
/// shared with every background job and request handler.
pub struct RaftCluster {
    pub(crate) config: RwLock<Config>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) basic: Arc<BasicCluster>,
    pub(crate) discovery: Arc<dyn Discovery>,
    pub(crate) tso: Arc<dyn TsoAllocator>,
    pub(crate) scheduling: Arc<dyn SchedulingJobs>,
    pub(crate) sync_sink: Arc<dyn RegionSyncSink>,
    pub(crate) replication_mode: Arc<dyn ReplicationModeManager>,
    pub(crate) runners: TaskRunners,
    pub(crate) store_locks: StoreStateLocks,
    pub(crate) progress: ProgressTracker,
    pub(crate) id_alloc: IdAllocator,
    pub(crate) runtime_env: RuntimeEnv,
    pub(crate) http_client: reqwest::Client,

    state: tokio::sync::RwLock<ControllerState>,
    running: AtomicBool,
    initialized: AtomicBool,
    cluster_id: AtomicU64,
    min_resolved_ts: AtomicU64,
    external_ts: AtomicU64,
    pub(crate) version: ClusterVersion,
    pub(crate) independent_services: DashMap<String, ()>,
    pub(crate) prev_store_limits: DashMap<u64, PrevStoreLimit>,
    pub(crate) placement_rules: RwLock<Vec<PlacementRule>>,
    pub(crate) store_config: RwLock<StoreConfig>,
    pub(crate) changed_regions_tx: RwLock<Option<mpsc::Sender<RegionMeta>>>,
}

impl RaftCluster {
    /// Builds the controller over its collaborators. Does not touch storage;
    /// that happens in `start`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        discovery: Arc<dyn Discovery>,
        tso: Arc<dyn TsoAllocator>,
        scheduling: Arc<dyn SchedulingJobs>,
        sync_sink: Arc<dyn RegionSyncSink>,
        replication_mode: Arc<dyn ReplicationModeManager>,
    ) -> Result<Self, PlacementdError> {
        let runtime_env = RuntimeEnv::detect()?;
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| PlacementdError::HttpClientError(e.to_string()))?;
        Ok(Self {
            config: RwLock::new(config),
            storage,
            basic: Arc::new(BasicCluster::new()),
            discovery,
            tso,
            scheduling,
            sync_sink,
            replication_mode,
            runners: TaskRunners::new(),
            store_locks: StoreStateLocks::new(),
            progress: ProgressTracker::new(),
            id_alloc: IdAllocator::new(0),
            runtime_env,
            http_client,
            state: tokio::sync::RwLock::new(ControllerState {
                running: false,
                shutdown_tx: None,
                jobs: JoinSet::new(),
            }),
            running: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            cluster_id: AtomicU64::new(0),
            min_resolved_ts: AtomicU64::new(u64::MAX),
            external_ts: AtomicU64::new(0),
            version: ClusterVersion::new(Version::new(0, 0, 0)),
            independent_services: DashMap::new(),
            prev_store_limits: DashMap::new(),
            placement_rules: RwLock::new(Vec::new()),
            store_config: RwLock::new(StoreConfig::default()),
            changed_regions_tx: RwLock::new(None),
        })
    }

    // --- Lifecycle ---

    /// Starts the controller: loads cluster info, spawns the background jobs,
    /// and opens the task runners. Idempotent; a second call logs and
    /// succeeds. A cluster without persisted metadata is *not bootstrapped*,
    /// which is not an error: the controller runs and waits for bootstrap.
    pub async fn start(self: &Arc<Self>, bootstrap: bool) -> Result<(), PlacementdError> {
        let mut state = self.state.write().await;
        if state.running {
            warn!("Raft cluster controller is already running; ignoring duplicate start.");
            return Ok(());
        }

        self.init_cluster();

        // During bootstrap the leader-election path drives TSO itself.
        if !bootstrap
            && let Err(e) = self.check_tso_service().await
        {
            self.stop_tso_jobs_if_needed();
            return Err(e);
        }

        if let Err(e) = self.load_cluster_info().await {
            self.stop_tso_jobs_if_needed();
            return Err(e);
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let (changed_tx, changed_rx) = mpsc::channel::<RegionMeta>(tasks::CHANGED_REGIONS_BOUND);
        *self.changed_regions_tx.write() = Some(changed_tx);

        tasks::spawn_all(self, &mut state.jobs, &shutdown_tx, changed_rx);
        state
            .jobs
            .spawn(self.replication_mode.clone().run(shutdown_tx.subscribe()));

        self.runners.start_all();
        state.shutdown_tx = Some(shutdown_tx);
        state.running = true;
        self.running.store(true, Ordering::Release);
        info!(
            cluster_id = self.cluster_id(),
            initialized = self.is_initialized(),
            "Raft cluster controller started."
        );
        Ok(())
    }

    /// Stops the controller: cancels the background jobs, drains the runners,
    /// and joins everything. Idempotent. The TSO teardown runs even when the
    /// controller never reached the running state, to defend against a start
    /// failure that left the allocator initialized.
    pub async fn stop(&self) -> Result<(), PlacementdError> {
        let mut state = self.state.write().await;
        self.stop_tso_jobs_if_needed();
        if !state.running {
            return Ok(());
        }
        state.running = false;
        self.running.store(false, Ordering::Release);

        if let Some(tx) = state.shutdown_tx.take() {
            let _ = tx.send(());
        }
        *self.changed_regions_tx.write() = None;

        if !self.is_service_independent(crate::core::services::SCHEDULING_SERVICE) {
            self.scheduling.stop();
        }
        self.runners.stop_all(RUNNER_STOP_DEADLINE).await;

        let mut jobs = std::mem::take(&mut state.jobs);
        drop(state);
        while jobs.join_next().await.is_some() {}
        info!("Raft cluster controller stopped.");
        Ok(())
    }

    /// Resets derived state to its pre-load defaults.
    fn init_cluster(&self) {
        self.min_resolved_ts.store(u64::MAX, Ordering::Release);
        self.external_ts.store(0, Ordering::Release);
        self.initialized.store(false, Ordering::Release);
        self.independent_services.clear();
    }

    /// Loads the persisted cluster view into the caches. Absent metadata
    /// leaves the controller un-initialized.
    async fn load_cluster_info(&self) -> Result<(), PlacementdError> {
        let Some(meta) = self.storage.load_meta().await? else {
            info!("No cluster metadata in storage; the cluster is not bootstrapped yet.");
            return Ok(());
        };

        let version = ClusterVersion::parse(&meta.version)?;
        self.cluster_id.store(meta.cluster_id, Ordering::Release);
        let current = self.version.get();
        self.version.compare_and_swap(&current, version);

        let config = self.config.read().clone();
        for store_meta in self.storage.load_stores(meta.cluster_id).await? {
            let limits = StoreLimits::new(
                &config.schedule.store_limit_version,
                config.schedule.add_peer_rate,
                config.schedule.remove_peer_rate,
            );
            self.basic
                .put_store(Arc::new(StoreInfo::new(store_meta, limits)));
        }
        for region_meta in self.storage.try_load_regions_once(meta.cluster_id).await? {
            let region = Arc::new(RegionInfo::new(region_meta));
            // Loaded regions cannot conflict: the tree starts empty.
            if let Err(e) = self.basic.check_and_put_root_tree(region.clone()) {
                warn!(region_id = region.id(), error = %e, "Skipped persisted region during load.");
                continue;
            }
            self.basic.check_and_put_subtree(region);
        }

        if let Some(ts) = self.storage.load_min_resolved_ts(meta.cluster_id).await? {
            self.min_resolved_ts.store(ts, Ordering::Release);
            MIN_RESOLVED_TS_GAUGE.set(ts as f64);
        }
        if let Some(ts) = self.storage.load_external_ts(meta.cluster_id).await? {
            self.external_ts.store(ts, Ordering::Release);
        }

        self.initialized.store(true, Ordering::Release);
        info!(
            cluster_id = meta.cluster_id,
            stores = self.basic.store_count(),
            regions = self.basic.region_count(),
            "Cluster info loaded."
        );
        Ok(())
    }

    /// Writes the bootstrap record for a brand-new cluster and initializes the
    /// in-memory view. Fails when the cluster is already bootstrapped.
    pub async fn bootstrap_cluster(&self) -> Result<u64, PlacementdError> {
        if self.is_initialized() {
            return Err(PlacementdError::InvalidState(
                "cluster is already bootstrapped".to_string(),
            ));
        }
        let cluster_id = self.id_alloc.alloc_one();
        let config = self.config.read().clone();
        let meta = ClusterMeta {
            cluster_id,
            max_replicas: config.replication.max_replicas,
            version: self.version.get().to_string(),
        };
        self.storage.save_meta(&meta).await?;
        self.storage
            .save(CLUSTER_BOOTSTRAP_TIME_PATH, &unix_now().to_string())
            .await?;
        self.cluster_id.store(cluster_id, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
        info!(cluster_id, "Cluster bootstrapped.");
        Ok(cluster_id)
    }

    // --- Observations ---

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn cluster_id(&self) -> u64 {
        self.cluster_id.load(Ordering::Acquire)
    }

    pub fn basic(&self) -> &Arc<BasicCluster> {
        &self.basic
    }

    pub fn get_store(&self, store_id: u64) -> Result<Arc<StoreInfo>, PlacementdError> {
        self.basic
            .get_store(store_id)
            .ok_or(PlacementdError::StoreNotFound(store_id))
    }

    pub fn get_region(&self, region_id: u64) -> Result<Arc<RegionInfo>, PlacementdError> {
        self.basic
            .get_region(region_id)
            .ok_or(PlacementdError::RegionNotFound(region_id))
    }

    pub fn is_service_independent(&self, name: &str) -> bool {
        self.independent_services.contains_key(name)
    }

    /// Allocates `n` consecutive cluster-wide IDs, returning `(first, count)`.
    pub fn alloc_id(&self, n: u64) -> (u64, u64) {
        self.id_alloc.alloc(n)
    }

    /// Progress of emptying an offline store.
    pub fn get_removing_progress(
        &self,
        store_id: u64,
    ) -> Result<progress::ProgressStatus, PlacementdError> {
        self.progress.status(&progress::removing_action(store_id))
    }

    /// Progress of filling a preparing store towards its serving threshold.
    pub fn get_preparing_progress(
        &self,
        store_id: u64,
    ) -> Result<progress::ProgressStatus, PlacementdError> {
        self.progress.status(&progress::preparing_action(store_id))
    }

    pub fn set_placement_rules(&self, rules: Vec<PlacementRule>) {
        *self.placement_rules.write() = rules;
    }

    /// Replaces the learned store configuration; the config-sync job does the
    /// same when a polled store reports a change.
    pub fn set_store_config(&self, config: StoreConfig) {
        *self.store_config.write() = config;
    }

    pub fn get_store_config(&self) -> StoreConfig {
        self.store_config.read().clone()
    }

    // --- Timestamps ---

    /// The cluster-wide minimum resolved timestamp; `u64::MAX` until a value
    /// has been computed or loaded.
    pub fn get_min_resolved_ts(&self) -> u64 {
        self.min_resolved_ts.load(Ordering::Acquire)
    }

    /// Raises the cached min-resolved-ts. Returns the previous value when the
    /// new one is strictly greater, `None` otherwise.
    pub(crate) fn advance_min_resolved_ts(&self, ts: u64) -> Option<u64> {
        let prev = self.min_resolved_ts.load(Ordering::Acquire);
        let advanced = (prev == u64::MAX && ts != u64::MAX) || (prev != u64::MAX && ts > prev);
        if advanced
            && self
                .min_resolved_ts
                .compare_exchange(prev, ts, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            MIN_RESOLVED_TS_GAUGE.set(ts as f64);
            return Some(prev);
        }
        None
    }

    pub fn get_external_ts(&self) -> u64 {
        self.external_ts.load(Ordering::Acquire)
    }

    /// Advances the external timestamp; a regression is an invalid request.
    pub async fn set_external_ts(&self, ts: u64) -> Result<(), PlacementdError> {
        let current = self.external_ts.load(Ordering::Acquire);
        if ts < current {
            return Err(PlacementdError::InvalidRequest(format!(
                "external timestamp {ts} is smaller than the current {current}"
            )));
        }
        self.external_ts.fetch_max(ts, Ordering::AcqRel);
        self.storage.save_external_ts(self.cluster_id(), ts).await?;
        Ok(())
    }

    // --- Cluster version ---

    pub fn get_cluster_version(&self) -> Version {
        self.version.get()
    }

    /// Re-derives the cluster version from the minimum non-tombstone store
    /// version and publishes it via compare-and-swap. A lost race means
    /// another path already applied the same observation; it is logged and
    /// swallowed.
    pub async fn on_store_version_change(&self) {
        let stores = self.basic.stores();
        let Some(min_version) = version::min_store_version(&stores) else {
            return;
        };
        let current = self.version.get();
        if min_version == current {
            return;
        }
        if !self.version.compare_and_swap(&current, min_version.clone()) {
            warn!(
                %current,
                %min_version,
                "Cluster version CAS lost a race; another updater already applied it."
            );
            return;
        }
        info!(%current, new_version = %min_version, "Cluster version changed.");
        if self.is_initialized() {
            let meta = ClusterMeta {
                cluster_id: self.cluster_id(),
                max_replicas: self.config.read().replication.max_replicas,
                version: min_version.to_string(),
            };
            if let Err(e) = self.storage.save_meta(&meta).await {
                error!(error = %e, "Failed to persist the new cluster version.");
            }
        }
    }

    // --- Store weights ---

    /// Persists and applies a store's scheduling weights. Persistence is the
    /// primary operation here: a storage failure fails the call and leaves
    /// the cache untouched.
    pub async fn set_store_weight(
        &self,
        store_id: u64,
        leader_weight: f64,
        region_weight: f64,
    ) -> Result<(), PlacementdError> {
        let store = self.get_store(store_id)?;
        self.storage
            .save_store_weight(
                self.cluster_id(),
                store_id,
                StoreWeight {
                    leader_weight,
                    region_weight,
                },
            )
            .await?;
        self.basic
            .put_store(Arc::new(store.with_weights(leader_weight, region_weight)));
        Ok(())
    }

    // --- TSO coordination ---

    /// Ensures the local TSO allocator is up unless a discovered TSO
    /// microservice owns the duty; the 100 ms orchestrator tick keeps this
    /// current afterwards.
    pub(crate) async fn check_tso_service(&self) -> Result<(), PlacementdError> {
        let config = self.config.read().clone();
        if config.microservice.enable_keyspace_groups
            && config.microservice.tso_dynamic_switching_enabled
        {
            // The orchestrator decides based on discovery.
            return Ok(());
        }
        self.start_tso_jobs().await
    }

    pub(crate) async fn start_tso_jobs(&self) -> Result<(), PlacementdError> {
        if !self.tso.is_initialized() {
            self.tso.initialize().await?;
        }
        Ok(())
    }

    /// Resets the allocator if anything left it initialized.
    pub(crate) fn stop_tso_jobs_if_needed(&self) {
        if self.tso.is_initialized() {
            self.tso.reset(true);
        }
    }

    // --- Changed-regions channel ---

    /// The current producer handle, if the controller is running.
    pub(crate) fn changed_regions_sender(&self) -> Option<mpsc::Sender<RegionMeta>> {
        self.changed_regions_tx.read().clone()
    }
}
