// src/core/region/mod.rs

//! The region entity: metadata, epoch ordering, and the heartbeat guide that
//! decides which downstream effects a region heartbeat must trigger.

pub mod buckets;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use buckets::BucketStat;

/// The replication role of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PeerRole {
    #[default]
    Voter,
    Learner,
}

/// A replica of a region on a specific store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Peer {
    pub id: u64,
    pub store_id: u64,
    pub role: PeerRole,
}

/// The (conf_ver, version) pair; monotone per region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegionEpoch {
    pub conf_ver: u64,
    pub version: u64,
}

impl RegionEpoch {
    /// Whether `self` is older than `other` on either component.
    pub fn is_stale_compared_to(&self, other: &RegionEpoch) -> bool {
        self.version < other.version || self.conf_ver < other.conf_ver
    }

    /// Whether `self` supersedes `other` on at least one component.
    pub fn is_newer_than(&self, other: &RegionEpoch) -> bool {
        self.version > other.version || self.conf_ver > other.conf_ver
    }
}

/// The persisted metadata of a region.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegionMeta {
    pub id: u64,
    pub start_key: Bytes,
    pub end_key: Bytes,
    pub epoch: RegionEpoch,
    pub peers: Vec<Peer>,
}

/// The full runtime view of a region, replaced wholesale on heartbeat.
#[derive(Debug)]
pub struct RegionInfo {
    pub meta: RegionMeta,
    pub leader: Option<Peer>,
    pub pending_peers: Vec<Peer>,
    pub down_peers: Vec<Peer>,
    /// Approximate data size in MiB.
    pub approximate_size: i64,
    pub approximate_keys: i64,
    /// The bucket metadata slot, updated by the optimistic report loop.
    buckets: RwLock<Option<Arc<BucketStat>>>,
    /// How many cluster indexes hold this value: 1 after the root tree insert,
    /// 2 once the per-store subtree caught up.
    refs: AtomicU32,
}

impl Clone for RegionInfo {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            leader: self.leader,
            pending_peers: self.pending_peers.clone(),
            down_peers: self.down_peers.clone(),
            approximate_size: self.approximate_size,
            approximate_keys: self.approximate_keys,
            buckets: RwLock::new(self.buckets.read().clone()),
            refs: AtomicU32::new(0),
        }
    }
}

impl RegionInfo {
    pub fn new(meta: RegionMeta) -> Self {
        Self {
            meta,
            leader: None,
            pending_peers: Vec::new(),
            down_peers: Vec::new(),
            approximate_size: 0,
            approximate_keys: 0,
            buckets: RwLock::new(None),
            refs: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    pub fn epoch(&self) -> RegionEpoch {
        self.meta.epoch
    }

    /// The store IDs carrying a peer of this region.
    pub fn store_ids(&self) -> Vec<u64> {
        self.meta.peers.iter().map(|p| p.store_id).collect()
    }

    /// Whether the key ranges of the two regions overlap. An empty end key
    /// reads as "to the end of the keyspace".
    pub fn overlaps(&self, other: &RegionInfo) -> bool {
        let self_end_open = self.meta.end_key.is_empty();
        let other_end_open = other.meta.end_key.is_empty();
        (self_end_open || other.meta.start_key < self.meta.end_key)
            && (other_end_open || self.meta.start_key < other.meta.end_key)
    }

    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn incr_ref(&self) -> u32 {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn reset_ref(&self) {
        self.refs.store(0, Ordering::Release);
    }

    /// A consistent snapshot of the current bucket metadata.
    pub fn buckets(&self) -> Option<Arc<BucketStat>> {
        self.buckets.read().clone()
    }

    /// Atomically replaces the buckets if the slot still holds `expected`.
    /// Returns false when another writer won the race.
    pub fn compare_and_set_buckets(
        &self,
        expected: Option<&Arc<BucketStat>>,
        new: Arc<BucketStat>,
    ) -> bool {
        let mut slot = self.buckets.write();
        let unchanged = match (&*slot, expected) {
            (None, None) => true,
            (Some(cur), Some(exp)) => Arc::ptr_eq(cur, exp),
            _ => false,
        };
        if unchanged {
            *slot = Some(new);
        }
        unchanged
    }

    /// Copies forward the fields a heartbeat may omit. Buckets are carried
    /// over only while the bucket feature is enabled.
    pub fn inherit(&mut self, origin: &RegionInfo, buckets_enabled: bool) {
        if self.approximate_size == 0 {
            self.approximate_size = origin.approximate_size;
        }
        if self.approximate_keys == 0 {
            self.approximate_keys = origin.approximate_keys;
        }
        if buckets_enabled {
            *self.buckets.write() = origin.buckets();
        }
    }
}

/// What a region heartbeat must do downstream, derived by [`region_guide`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveDirective {
    /// Write the region metadata through to storage.
    pub save_kv: bool,
    /// Replace the cached region in the root tree and subtree.
    pub save_cache: bool,
    /// Publish the region on the changed-regions channel.
    pub need_sync: bool,
    /// Mark the resulting async tasks as must-not-drop.
    pub retained: bool,
}

/// Compares an incoming region against the cached origin and derives the
/// save/sync directive. Stale epochs are rejected before this is called.
pub fn region_guide(origin: Option<&RegionInfo>, region: &RegionInfo) -> SaveDirective {
    let Some(origin) = origin else {
        return SaveDirective {
            save_kv: true,
            save_cache: true,
            need_sync: true,
            retained: true,
        };
    };

    let mut d = SaveDirective::default();

    if region.epoch().is_newer_than(&origin.epoch()) {
        d.save_kv = true;
        d.save_cache = true;
        d.need_sync = true;
        d.retained = true;
        return d;
    }

    if region.leader != origin.leader {
        d.save_cache = true;
        d.need_sync = true;
    }
    if region.down_peers != origin.down_peers {
        d.save_cache = true;
        d.need_sync = true;
    }
    if region.pending_peers != origin.pending_peers {
        d.save_cache = true;
    }
    if region.approximate_size != origin.approximate_size
        || region.approximate_keys != origin.approximate_keys
    {
        d.save_cache = true;
    }
    d
}
