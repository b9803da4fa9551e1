// src/core/tasks/config_sync.rs

//! Polls one up store's `/config` endpoint and keeps the learned store
//! configuration current, persisting it when it changes.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{info, warn};

use crate::core::cluster::{HTTP_POLL_TIMEOUT, RaftCluster};
use crate::core::storage::STORE_CONFIG_PATH;
use crate::core::store::StoreConfig;

const CONFIG_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// The engine generation that flips the cluster onto the partitioned raft KV.
const RAFTSTORE_V2: &str = "raftstore-v2";

pub struct ConfigSyncTask {
    cluster: Arc<RaftCluster>,
}

impl ConfigSyncTask {
    pub fn new(cluster: Arc<RaftCluster>) -> Self {
        Self { cluster }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut timer = time::interval(CONFIG_SYNC_INTERVAL);
        let mut rng = SmallRng::from_entropy();
        info!("Store config sync task started.");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if self.cluster.is_running() {
                        self.sync_once(&mut rng).await;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Store config sync task shutting down.");
                    return;
                }
            }
        }
    }

    async fn sync_once(&self, rng: &mut SmallRng) {
        // Compute-only engines do not speak the raftstore config surface.
        let candidates: Vec<_> = self
            .cluster
            .basic()
            .up_stores()
            .into_iter()
            .filter(|s| s.label_value("engine") != "tiflash" && !s.meta.status_address.is_empty())
            .collect();
        let Some(store) = candidates.choose(rng) else {
            return;
        };

        let tls = self.cluster.config.read().enable_tls_polls;
        let scheme = if tls { "https" } else { "http" };
        let url = format!("{scheme}://{}/config", store.meta.status_address);

        let fetched = async {
            let resp = self
                .cluster
                .http_client
                .get(&url)
                .timeout(HTTP_POLL_TIMEOUT)
                .send()
                .await?;
            resp.json::<StoreConfig>().await
        }
        .await;

        let fetched = match fetched {
            Ok(c) => c,
            Err(e) => {
                warn!(store_id = store.id(), url = %url, error = %e, "Store config poll failed.");
                return;
            }
        };

        let current = self.cluster.store_config.read().clone();
        if fetched == current {
            return;
        }
        if fetched.engine == RAFTSTORE_V2 && current.engine != RAFTSTORE_V2 {
            info!(store_id = store.id(), "Store engine switched to {RAFTSTORE_V2}.");
        }
        info!(store_id = store.id(), config = ?fetched, "Store configuration changed.");
        *self.cluster.store_config.write() = fetched.clone();

        if self.cluster.is_initialized() {
            match serde_json::to_string(&fetched) {
                Ok(raw) => {
                    if let Err(e) = self.cluster.storage.save(STORE_CONFIG_PATH, &raw).await {
                        warn!(error = %e, "Failed to persist the synced store configuration.");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize the synced store configuration."),
            }
        }
    }
}
