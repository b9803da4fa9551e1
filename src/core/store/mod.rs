// src/core/store/mod.rs

//! The store entity: metadata, runtime statistics, and the node lifecycle states.
//!
//! Stores are treated as immutable values. Every mutation clones the current
//! snapshot, applies the change, and swaps the new `Arc` into the cluster
//! cache, so readers always observe a consistent store.

pub mod limit;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use strum_macros::{Display, EnumString};

use limit::StoreLimits;

/// A store with no heartbeat for this long is considered disconnected.
pub const STORE_DISCONNECT_DURATION: Duration = Duration::from_secs(20);

/// The lifecycle state of a storage node.
///
/// `Removing` is surfaced as "Offline" and `Removed` as "Tombstone" in
/// operator-facing output.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum NodeState {
    Preparing,
    Serving,
    Removing,
    Removed,
}

impl NodeState {
    /// Whether the store still accepts data (Preparing or Serving).
    pub fn is_up(self) -> bool {
        matches!(self, NodeState::Preparing | NodeState::Serving)
    }

    /// Whether `self -> to` is an edge of the lifecycle graph. Staying in
    /// place is allowed everywhere but on a tombstone.
    pub fn can_transition_to(self, to: NodeState) -> bool {
        match (self, to) {
            (NodeState::Preparing, NodeState::Serving | NodeState::Removing) => true,
            (NodeState::Serving, NodeState::Removing) => true,
            (NodeState::Removing, NodeState::Serving | NodeState::Removed) => true,
            (a, b) => a == b && a != NodeState::Removed,
        }
    }
}

/// The persisted metadata of a store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreMeta {
    pub id: u64,
    pub address: String,
    pub status_address: String,
    pub version: String,
    /// Ordered key/value topology labels.
    pub labels: IndexMap<String, String>,
    pub node_state: NodeState,
    pub physically_destroyed: bool,
    /// Unix seconds at which the store process started.
    pub start_timestamp: u64,
}

impl StoreMeta {
    pub fn new(id: u64, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            status_address: String::new(),
            version: "0.0.0".to_string(),
            labels: IndexMap::new(),
            node_state: NodeState::Preparing,
            physically_destroyed: false,
            start_timestamp: unix_now(),
        }
    }
}

/// A report interval attached to store statistics, in unix seconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReportInterval {
    pub start: u64,
    pub end: u64,
}

/// Per-peer read statistics reported by a store heartbeat, used to feed the
/// hot-peer cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerStat {
    pub region_id: u64,
    pub read_bytes: u64,
    pub read_keys: u64,
}

/// Durations of one snapshot operation observed by the store.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SnapshotStat {
    pub executing_duration: Duration,
    pub total_duration: Duration,
}

/// The statistics payload of a store heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub store_id: u64,
    pub capacity: u64,
    pub available: u64,
    pub used_size: u64,
    pub region_count: u64,
    pub sending_snap_count: u64,
    pub receiving_snap_count: u64,
    pub is_busy: bool,
    pub is_slow: bool,
    /// The store's minimum resolved timestamp; `0` means not reported.
    pub min_resolved_ts: u64,
    pub peer_stats: Vec<PeerStat>,
    pub snapshot_stats: Vec<SnapshotStat>,
    pub interval: ReportInterval,
}

/// The storage node's own configuration, polled from its `/config` endpoint
/// by the config-sync job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default)]
    pub enable_region_bucket: bool,
    #[serde(default = "default_region_bucket_size_mb")]
    pub region_bucket_size_mb: u64,
}

fn default_engine() -> String {
    "raftstore".to_string()
}
fn default_region_bucket_size_mb() -> u64 {
    96
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            enable_region_bucket: false,
            region_bucket_size_mb: default_region_bucket_size_mb(),
        }
    }
}

/// The full runtime view of a store: persisted metadata plus volatile state.
///
/// Cloning is the mutation primitive; see the module documentation.
#[derive(Debug, Clone)]
pub struct StoreInfo {
    pub meta: StoreMeta,
    pub stats: StoreStats,
    pub leader_weight: f64,
    pub region_weight: f64,
    /// Aggregate region count maintained by the region subtree, not the store report.
    pub region_count: u64,
    /// Aggregate region size (MiB) maintained by the region subtree.
    pub region_size: i64,
    pub min_resolved_ts: u64,
    pub slow: bool,
    /// Snapshot feedback signal last fed to the limiter.
    pub feedback: f64,
    pub limits: StoreLimits,
    pub last_heartbeat: Option<Instant>,
    pub last_persist: Option<Instant>,
    pub last_awaken: Option<Instant>,
}

impl StoreInfo {
    pub fn new(meta: StoreMeta, limits: StoreLimits) -> Self {
        Self {
            meta,
            stats: StoreStats::default(),
            leader_weight: 1.0,
            region_weight: 1.0,
            region_count: 0,
            region_size: 0,
            min_resolved_ts: u64::MAX,
            slow: false,
            feedback: 0.0,
            limits,
            last_heartbeat: None,
            last_persist: None,
            last_awaken: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    pub fn is_up(&self) -> bool {
        self.meta.node_state.is_up()
    }

    pub fn is_removing(&self) -> bool {
        self.meta.node_state == NodeState::Removing
    }

    pub fn is_removed(&self) -> bool {
        self.meta.node_state == NodeState::Removed
    }

    pub fn is_preparing(&self) -> bool {
        self.meta.node_state == NodeState::Preparing
    }

    pub fn is_serving(&self) -> bool {
        self.meta.node_state == NodeState::Serving
    }

    /// Whether this store participates in placement (up and not destroyed).
    pub fn is_available(&self) -> bool {
        self.is_up() && !self.meta.physically_destroyed
    }

    /// How long the store process has been alive, from its reported start timestamp.
    pub fn uptime(&self) -> Duration {
        Duration::from_secs(unix_now().saturating_sub(self.meta.start_timestamp))
    }

    /// Time since the last heartbeat, or `Duration::MAX` if none was ever seen.
    pub fn down_time(&self) -> Duration {
        self.last_heartbeat
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX)
    }

    pub fn is_disconnected(&self) -> bool {
        self.down_time() >= STORE_DISCONNECT_DURATION
    }

    /// Whether the store metadata should be written back to storage.
    ///
    /// Metadata is persisted when it has never been written or when the last
    /// write is older than `interval`; volatile statistics never force a write.
    pub fn needs_persist(&self, interval: Duration) -> bool {
        match self.last_persist {
            None => true,
            Some(t) => t.elapsed() >= interval,
        }
    }

    /// The label value for `key`, or the empty string when the label is missing.
    pub fn label_value(&self, key: &str) -> &str {
        self.meta
            .labels
            .get(key)
            .map(String::as_str)
            .unwrap_or("")
    }

    // --- Clone-and-swap builders ---

    pub fn with_state(&self, state: NodeState) -> Self {
        let mut s = self.clone();
        s.meta.node_state = state;
        s
    }

    pub fn with_physically_destroyed(&self, destroyed: bool) -> Self {
        let mut s = self.clone();
        s.meta.physically_destroyed = destroyed;
        s
    }

    pub fn with_meta(&self, meta: StoreMeta) -> Self {
        let mut s = self.clone();
        s.meta = meta;
        s
    }

    pub fn with_stats(&self, stats: StoreStats) -> Self {
        let mut s = self.clone();
        if stats.min_resolved_ts > 0 {
            s.min_resolved_ts = stats.min_resolved_ts;
        }
        s.slow = stats.is_slow;
        s.stats = stats;
        s.last_heartbeat = Some(Instant::now());
        s
    }

    pub fn with_weights(&self, leader_weight: f64, region_weight: f64) -> Self {
        let mut s = self.clone();
        s.leader_weight = leader_weight;
        s.region_weight = region_weight;
        s
    }

    pub fn with_region_totals(&self, region_count: u64, region_size: i64) -> Self {
        let mut s = self.clone();
        s.region_count = region_count;
        s.region_size = region_size;
        s
    }

    pub fn with_min_resolved_ts(&self, ts: u64) -> Self {
        let mut s = self.clone();
        s.min_resolved_ts = ts;
        s
    }

    pub fn with_slow(&self, slow: bool) -> Self {
        let mut s = self.clone();
        s.slow = slow;
        s
    }

    pub fn with_limits(&self, limits: StoreLimits) -> Self {
        let mut s = self.clone();
        s.limits = limits;
        s
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
