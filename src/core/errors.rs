// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the placement driver.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum PlacementdError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("Storage Error: {0}")]
    StorageError(String),

    // --- Not-found errors, surfaced to the caller and never retried internally ---
    #[error("store {0} not found")]
    StoreNotFound(u64),

    #[error("region {0} not found")]
    RegionNotFound(u64),

    #[error("no progress found for {0}")]
    ProgressNotFound(String),

    // --- Invalid-argument errors ---
    #[error("invalid store version '{version}' for store {store_id}, cluster version is {cluster_version}")]
    InvalidStoreVersion {
        store_id: u64,
        version: String,
        cluster_version: String,
    },

    #[error("duplicated store address: {addr}, already registered by store {existing}")]
    DuplicatedStoreAddress { addr: String, existing: u64 },

    #[error("label key '{0}' is not configured in location-labels")]
    UnknownStoreLabel(String),

    #[error("invalid semantic version: {0}")]
    InvalidSemver(String),

    // --- Illegal-state errors, operator action required ---
    #[error("store {0} has been removed (tombstone)")]
    StoreRemoved(u64),

    #[error("store {0} has been physically destroyed")]
    StoreDestroyed(u64),

    #[error("store {0} is still up, please remove it first")]
    StoreIsUp(u64),

    #[error("store {0} is serving and not empty")]
    StoreServing(u64),

    #[error("remaining up stores ({up}) would fall below max-replicas ({max_replicas})")]
    StoresNotEnough { up: usize, max_replicas: u64 },

    #[error("no store available for the leader of region {0}")]
    NoStoreForRegionLeader(u64),

    // --- Region epoch / concurrency errors ---
    #[error("region {region_id} epoch is stale")]
    RegionStaleEpoch { region_id: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation not allowed in the current state: {0}")]
    InvalidState(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for PlacementdError {
    fn clone(&self) -> Self {
        use PlacementdError::*;
        match self {
            Io(e) => Io(Arc::clone(e)),
            HttpClientError(s) => HttpClientError(s.clone()),
            StorageError(s) => StorageError(s.clone()),
            StoreNotFound(id) => StoreNotFound(*id),
            RegionNotFound(id) => RegionNotFound(*id),
            ProgressNotFound(s) => ProgressNotFound(s.clone()),
            InvalidStoreVersion {
                store_id,
                version,
                cluster_version,
            } => InvalidStoreVersion {
                store_id: *store_id,
                version: version.clone(),
                cluster_version: cluster_version.clone(),
            },
            DuplicatedStoreAddress { addr, existing } => DuplicatedStoreAddress {
                addr: addr.clone(),
                existing: *existing,
            },
            UnknownStoreLabel(s) => UnknownStoreLabel(s.clone()),
            InvalidSemver(s) => InvalidSemver(s.clone()),
            StoreRemoved(id) => StoreRemoved(*id),
            StoreDestroyed(id) => StoreDestroyed(*id),
            StoreIsUp(id) => StoreIsUp(*id),
            StoreServing(id) => StoreServing(*id),
            StoresNotEnough { up, max_replicas } => StoresNotEnough {
                up: *up,
                max_replicas: *max_replicas,
            },
            NoStoreForRegionLeader(id) => NoStoreForRegionLeader(*id),
            RegionStaleEpoch { region_id } => RegionStaleEpoch {
                region_id: *region_id,
            },
            InvalidRequest(s) => InvalidRequest(s.clone()),
            InvalidState(s) => InvalidState(s.clone()),
            Internal(s) => Internal(s.clone()),
        }
    }
}

impl PartialEq for PlacementdError {
    fn eq(&self, other: &Self) -> bool {
        use PlacementdError::*;
        match (self, other) {
            (Io(e1), Io(e2)) => e1.to_string() == e2.to_string(),
            (HttpClientError(s1), HttpClientError(s2)) => s1 == s2,
            (StorageError(s1), StorageError(s2)) => s1 == s2,
            (StoreNotFound(a), StoreNotFound(b)) => a == b,
            (RegionNotFound(a), RegionNotFound(b)) => a == b,
            (ProgressNotFound(a), ProgressNotFound(b)) => a == b,
            (DuplicatedStoreAddress { addr: a1, existing: e1 }, DuplicatedStoreAddress { addr: a2, existing: e2 }) => {
                a1 == a2 && e1 == e2
            }
            (StoreRemoved(a), StoreRemoved(b)) => a == b,
            (StoreDestroyed(a), StoreDestroyed(b)) => a == b,
            (StoreIsUp(a), StoreIsUp(b)) => a == b,
            (StoreServing(a), StoreServing(b)) => a == b,
            (
                StoresNotEnough { up: u1, max_replicas: m1 },
                StoresNotEnough { up: u2, max_replicas: m2 },
            ) => u1 == u2 && m1 == m2,
            (NoStoreForRegionLeader(a), NoStoreForRegionLeader(b)) => a == b,
            (RegionStaleEpoch { region_id: a }, RegionStaleEpoch { region_id: b }) => a == b,
            (InvalidRequest(s1), InvalidRequest(s2)) => s1 == s2,
            (InvalidState(s1), InvalidState(s2)) => s1 == s2,
            (Internal(s1), Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for PlacementdError {
    fn from(e: std::io::Error) -> Self {
        PlacementdError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for PlacementdError {
    fn from(e: reqwest::Error) -> Self {
        PlacementdError::HttpClientError(e.to_string())
    }
}

impl From<serde_json::Error> for PlacementdError {
    fn from(e: serde_json::Error) -> Self {
        PlacementdError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<semver::Error> for PlacementdError {
    fn from(e: semver::Error) -> Self {
        PlacementdError::InvalidSemver(e.to_string())
    }
}
