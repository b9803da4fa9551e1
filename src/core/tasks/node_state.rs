// src/core/tasks/node_state.rs

//! Periodic store lifecycle reconciliation, plus garbage collection of stale
//! progress entries.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::info;

use crate::core::cluster::RaftCluster;

const NODE_STATE_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const PROGRESS_GC_INTERVAL: Duration = Duration::from_secs(60);
/// A progress entry untouched for this long is considered abandoned.
const PROGRESS_TTL: Duration = Duration::from_secs(2 * 60 * 60);

pub struct NodeStateTask {
    cluster: Arc<RaftCluster>,
}

impl NodeStateTask {
    pub fn new(cluster: Arc<RaftCluster>) -> Self {
        Self { cluster }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut timer = time::interval(NODE_STATE_CHECK_INTERVAL);
        info!("Node state check task started.");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if self.cluster.is_running() {
                        self.cluster.check_stores().await;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Node state check task shutting down.");
                    return;
                }
            }
        }
    }
}

pub struct ProgressGcTask {
    cluster: Arc<RaftCluster>,
}

impl ProgressGcTask {
    pub fn new(cluster: Arc<RaftCluster>) -> Self {
        Self { cluster }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut timer = time::interval(PROGRESS_GC_INTERVAL);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let removed = self.cluster.progress.gc(PROGRESS_TTL);
                    if removed > 0 {
                        info!(removed, "Collected stale progress entries.");
                    }
                }
                _ = shutdown_rx.recv() => return,
            }
        }
    }
}
