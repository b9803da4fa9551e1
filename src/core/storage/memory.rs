// src/core/storage/memory.rs

//! An in-memory `Storage` backend. Used by the binary until an embedded
//! consensus store is wired in, and by every test fixture.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{
    ClusterMeta, Storage, StoreWeight, cluster_meta_path, external_ts_path, min_resolved_ts_path,
    region_meta_path, store_meta_path, store_weight_path,
};
use crate::core::PlacementdError;
use crate::core::region::RegionMeta;
use crate::core::store::StoreMeta;

/// A flat map of opaque string values keyed by the same paths a real backend
/// would use.
#[derive(Debug, Default)]
pub struct MemStorage {
    entries: DashMap<String, String>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn put_json<T: serde::Serialize>(&self, key: String, value: &T) -> Result<(), PlacementdError> {
        let raw = serde_json::to_string(value)?;
        self.entries.insert(key, raw);
        Ok(())
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, PlacementdError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(raw.value())?)),
        }
    }

    /// Keys currently present with the given prefix, in lexical order.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Storage for MemStorage {
    async fn load_meta(&self) -> Result<Option<ClusterMeta>, PlacementdError> {
        // The meta key embeds the cluster id, which a fresh process does not
        // know yet; scan for the record instead.
        for entry in self.entries.iter() {
            if entry.key().ends_with("/raft")
                && let Ok(meta) = serde_json::from_str::<ClusterMeta>(entry.value())
            {
                return Ok(Some(meta));
            }
        }
        Ok(None)
    }

    async fn save_meta(&self, meta: &ClusterMeta) -> Result<(), PlacementdError> {
        self.put_json(cluster_meta_path(meta.cluster_id), meta)
    }

    async fn load_stores(&self, cluster_id: u64) -> Result<Vec<StoreMeta>, PlacementdError> {
        let prefix = format!("{cluster_id}/raft/s/");
        let mut stores = Vec::new();
        for key in self.keys_with_prefix(&prefix) {
            if let Some(store) = self.get_json::<StoreMeta>(&key)? {
                stores.push(store);
            }
        }
        Ok(stores)
    }

    async fn save_store_meta(
        &self,
        cluster_id: u64,
        store: &StoreMeta,
    ) -> Result<(), PlacementdError> {
        self.put_json(store_meta_path(cluster_id, store.id), store)
    }

    async fn delete_store_meta(
        &self,
        cluster_id: u64,
        store_id: u64,
    ) -> Result<(), PlacementdError> {
        self.entries.remove(&store_meta_path(cluster_id, store_id));
        Ok(())
    }

    async fn try_load_regions_once(
        &self,
        cluster_id: u64,
    ) -> Result<Vec<RegionMeta>, PlacementdError> {
        let prefix = format!("{cluster_id}/raft/r/");
        let mut regions = Vec::new();
        for key in self.keys_with_prefix(&prefix) {
            if let Some(region) = self.get_json::<RegionMeta>(&key)? {
                regions.push(region);
            }
        }
        Ok(regions)
    }

    async fn save_region(
        &self,
        cluster_id: u64,
        region: &RegionMeta,
    ) -> Result<(), PlacementdError> {
        self.put_json(region_meta_path(cluster_id, region.id), region)
    }

    async fn delete_region(
        &self,
        cluster_id: u64,
        region_id: u64,
    ) -> Result<(), PlacementdError> {
        self.entries
            .remove(&region_meta_path(cluster_id, region_id));
        Ok(())
    }

    async fn save_store_weight(
        &self,
        cluster_id: u64,
        store_id: u64,
        weight: StoreWeight,
    ) -> Result<(), PlacementdError> {
        self.put_json(store_weight_path(cluster_id, store_id), &weight)
    }

    async fn save_min_resolved_ts(
        &self,
        cluster_id: u64,
        ts: u64,
    ) -> Result<(), PlacementdError> {
        self.put_json(min_resolved_ts_path(cluster_id), &ts)
    }

    async fn load_min_resolved_ts(
        &self,
        cluster_id: u64,
    ) -> Result<Option<u64>, PlacementdError> {
        self.get_json(&min_resolved_ts_path(cluster_id))
    }

    async fn save_external_ts(&self, cluster_id: u64, ts: u64) -> Result<(), PlacementdError> {
        self.put_json(external_ts_path(cluster_id), &ts)
    }

    async fn load_external_ts(&self, cluster_id: u64) -> Result<Option<u64>, PlacementdError> {
        self.get_json(&external_ts_path(cluster_id))
    }

    async fn load(&self, key: &str) -> Result<Option<String>, PlacementdError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), PlacementdError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
