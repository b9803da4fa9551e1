// src/core/cluster/version.rs

//! The cluster semver version, advanced by compare-and-swap only.

use parking_lot::RwLock;
use semver::Version;
use std::sync::Arc;

use crate::core::PlacementdError;
use crate::core::store::StoreInfo;

/// The shared cluster version cell.
#[derive(Debug)]
pub struct ClusterVersion {
    inner: RwLock<Version>,
}

impl ClusterVersion {
    pub fn new(initial: Version) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    pub fn parse(raw: &str) -> Result<Version, PlacementdError> {
        Ok(Version::parse(raw)?)
    }

    pub fn get(&self) -> Version {
        self.inner.read().clone()
    }

    /// Replaces the version only if it still equals `expected`. Returns false
    /// when another writer got there first.
    pub fn compare_and_swap(&self, expected: &Version, new: Version) -> bool {
        let mut guard = self.inner.write();
        if *guard == *expected {
            *guard = new;
            true
        } else {
            false
        }
    }
}

/// The minimum version across all stores that are not tombstones, or `None`
/// when no such store exists or a version fails to parse.
pub fn min_store_version(stores: &[Arc<StoreInfo>]) -> Option<Version> {
    let mut min: Option<Version> = None;
    for store in stores {
        if store.is_removed() {
            continue;
        }
        let v = Version::parse(&store.meta.version).ok()?;
        min = match min {
            None => Some(v),
            Some(cur) if v < cur => Some(v),
            Some(cur) => Some(cur),
        };
    }
    min
}

/// Whether a joining store's version is compatible with the cluster version:
/// it must not be older than the cluster on (major, minor).
pub fn is_version_compatible(cluster: &Version, store: &Version) -> bool {
    (store.major, store.minor) >= (cluster.major, cluster.minor)
}
