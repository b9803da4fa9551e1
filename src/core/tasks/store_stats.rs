// src/core/tasks/store_stats.rs

//! High-frequency recomputation of aggregate store statistics.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::info;

use crate::core::cluster::RaftCluster;
use crate::core::metrics::{CLUSTER_REGION_SIZE_GAUGE, CLUSTER_USED_BYTES_GAUGE};

const STORE_STATS_INTERVAL: Duration = Duration::from_millis(9);

pub struct StoreStatsTask {
    cluster: Arc<RaftCluster>,
}

impl StoreStatsTask {
    pub fn new(cluster: Arc<RaftCluster>) -> Self {
        Self { cluster }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut timer = time::interval(STORE_STATS_INTERVAL);
        info!("Store statistics task started.");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let mut used_bytes = 0u64;
                    let mut region_size = 0i64;
                    for store in self.cluster.basic().stores() {
                        if store.is_removed() {
                            continue;
                        }
                        used_bytes += store.stats.used_size;
                        region_size += store.region_size;
                    }
                    CLUSTER_USED_BYTES_GAUGE.set(used_bytes as f64);
                    CLUSTER_REGION_SIZE_GAUGE.set(region_size as f64);
                }
                _ = shutdown_rx.recv() => {
                    info!("Store statistics task shutting down.");
                    return;
                }
            }
        }
    }
}
