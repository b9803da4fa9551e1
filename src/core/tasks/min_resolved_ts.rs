// src/core/tasks/min_resolved_ts.rs

//! Maintains the cluster-wide minimum resolved timestamp: the minimum over
//! every available store, persisted only when it strictly advances. The tick
//! interval follows the configuration and is re-armed when it changes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, info, warn};

use crate::core::cluster::RaftCluster;

pub struct MinResolvedTsTask {
    cluster: Arc<RaftCluster>,
}

impl MinResolvedTsTask {
    pub fn new(cluster: Arc<RaftCluster>) -> Self {
        Self { cluster }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut period = self.current_interval();
        let mut timer = time::interval(period);
        info!(interval = ?period, "Min-resolved-ts task started.");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    // Re-arm without leaking the previous period.
                    let configured = self.current_interval();
                    if configured != period {
                        period = configured;
                        timer = time::interval(period);
                        timer.reset();
                        debug!(interval = ?period, "Min-resolved-ts interval re-armed.");
                    }
                    self.advance().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Min-resolved-ts task shutting down.");
                    return;
                }
            }
        }
    }

    fn current_interval(&self) -> Duration {
        self.cluster
            .config
            .read()
            .effective_min_resolved_ts_interval()
    }

    async fn advance(&self) {
        if !self.cluster.is_running() || !self.cluster.is_initialized() {
            return;
        }
        let min = self
            .cluster
            .basic()
            .stores()
            .iter()
            .filter(|s| s.is_available())
            .map(|s| s.min_resolved_ts)
            .min()
            .unwrap_or(u64::MAX);
        if min == u64::MAX {
            return;
        }
        if let Some(prev) = self.cluster.advance_min_resolved_ts(min) {
            debug!(prev, new = min, "Min resolved timestamp advanced.");
            if let Err(e) = self
                .cluster
                .storage
                .save_min_resolved_ts(self.cluster.cluster_id(), min)
                .await
            {
                warn!(error = %e, "Failed to persist the min resolved timestamp.");
            }
        }
    }
}
