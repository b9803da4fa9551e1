// src/core/region/buckets.rs

//! Bucket metadata: sub-ranges of a region with their own statistics and a
//! monotonic version. Reports carrying an older or equal version are no-ops.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Aggregate traffic statistics over one bucket report interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketStats {
    pub read_bytes: Vec<u64>,
    pub write_bytes: Vec<u64>,
    pub read_keys: Vec<u64>,
    pub write_keys: Vec<u64>,
}

/// The bucket layout of a region, as reported by its leader store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketStat {
    pub region_id: u64,
    /// Monotonic: accepted reports strictly increase this.
    pub version: u64,
    /// Bucket boundary keys, `keys.len() - 1` buckets.
    pub keys: Vec<Bytes>,
    pub stats: BucketStats,
}

impl BucketStat {
    pub fn new(region_id: u64, version: u64, keys: Vec<Bytes>) -> Self {
        Self {
            region_id,
            version,
            keys,
            stats: BucketStats::default(),
        }
    }

    /// The number of buckets described by the boundary keys.
    pub fn bucket_count(&self) -> usize {
        self.keys.len().saturating_sub(1)
    }
}
