// src/core/storage/mod.rs

//! The persistence seam of the control plane.
//!
//! The cache is the source of truth; storage is a warm-restart optimization
//! with a small, flat key space of opaque string values.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::PlacementdError;
use crate::core::region::RegionMeta;
use crate::core::store::StoreMeta;

/// The key under which the cluster bootstrap time is recorded.
pub const CLUSTER_BOOTSTRAP_TIME_PATH: &str = "raft/status/cluster_bootstrap_time";

/// The key holding the serialized store configuration learned from config sync.
pub const STORE_CONFIG_PATH: &str = "raft/status/store_config";

pub fn cluster_meta_path(cluster_id: u64) -> String {
    format!("{cluster_id}/raft")
}

pub fn store_meta_path(cluster_id: u64, store_id: u64) -> String {
    format!("{cluster_id}/raft/s/{store_id:020}")
}

pub fn region_meta_path(cluster_id: u64, region_id: u64) -> String {
    format!("{cluster_id}/raft/r/{region_id:020}")
}

pub fn store_weight_path(cluster_id: u64, store_id: u64) -> String {
    format!("{cluster_id}/raft/w/{store_id:020}")
}

pub fn store_limit_path(cluster_id: u64, store_id: u64) -> String {
    format!("{cluster_id}/raft/l/{store_id:020}")
}

pub fn min_resolved_ts_path(cluster_id: u64) -> String {
    format!("{cluster_id}/raft/min_resolved_ts")
}

pub fn external_ts_path(cluster_id: u64) -> String {
    format!("{cluster_id}/raft/external_timestamp")
}

/// The single persisted record describing the cluster itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMeta {
    pub cluster_id: u64,
    pub max_replicas: u64,
    /// Current cluster version as a semver string.
    pub version: String,
}

/// Persisted leader/region weights of one store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoreWeight {
    pub leader_weight: f64,
    pub region_weight: f64,
}

/// The persistent backend consumed by the cluster controller. Implementations
/// must be safe for concurrent use; the controller never assumes ordering
/// across keys.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load_meta(&self) -> Result<Option<ClusterMeta>, PlacementdError>;
    async fn save_meta(&self, meta: &ClusterMeta) -> Result<(), PlacementdError>;

    async fn load_stores(&self, cluster_id: u64) -> Result<Vec<StoreMeta>, PlacementdError>;
    async fn save_store_meta(
        &self,
        cluster_id: u64,
        store: &StoreMeta,
    ) -> Result<(), PlacementdError>;
    async fn delete_store_meta(
        &self,
        cluster_id: u64,
        store_id: u64,
    ) -> Result<(), PlacementdError>;

    /// Loads every persisted region. Called at most once per controller start.
    async fn try_load_regions_once(
        &self,
        cluster_id: u64,
    ) -> Result<Vec<RegionMeta>, PlacementdError>;
    async fn save_region(
        &self,
        cluster_id: u64,
        region: &RegionMeta,
    ) -> Result<(), PlacementdError>;
    async fn delete_region(
        &self,
        cluster_id: u64,
        region_id: u64,
    ) -> Result<(), PlacementdError>;

    async fn save_store_weight(
        &self,
        cluster_id: u64,
        store_id: u64,
        weight: StoreWeight,
    ) -> Result<(), PlacementdError>;

    async fn save_min_resolved_ts(&self, cluster_id: u64, ts: u64)
    -> Result<(), PlacementdError>;
    async fn load_min_resolved_ts(&self, cluster_id: u64)
    -> Result<Option<u64>, PlacementdError>;

    async fn save_external_ts(&self, cluster_id: u64, ts: u64) -> Result<(), PlacementdError>;
    async fn load_external_ts(&self, cluster_id: u64) -> Result<Option<u64>, PlacementdError>;

    /// Reads an opaque value by its full key.
    async fn load(&self, key: &str) -> Result<Option<String>, PlacementdError>;
    /// Writes an opaque value under its full key.
    async fn save(&self, key: &str, value: &str) -> Result<(), PlacementdError>;
}
