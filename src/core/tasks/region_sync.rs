// src/core/tasks/region_sync.rs

//! The single consumer of the changed-regions channel: forwards every changed
//! region to the region-sync downstream.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::core::cluster::RaftCluster;
use crate::core::region::RegionMeta;

pub struct RegionSyncTask {
    cluster: Arc<RaftCluster>,
    rx: mpsc::Receiver<RegionMeta>,
}

impl RegionSyncTask {
    pub fn new(cluster: Arc<RaftCluster>, rx: mpsc::Receiver<RegionMeta>) -> Self {
        Self { cluster, rx }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Region sync task started.");
        loop {
            tokio::select! {
                region = self.rx.recv() => {
                    match region {
                        Some(region) => {
                            let region_id = region.id;
                            if let Err(e) = self.cluster.sync_sink.sync(region).await {
                                warn!(region_id, error = %e, "Region sync delivery failed.");
                            }
                        }
                        // All senders dropped: the controller is stopping.
                        None => break,
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("Region sync task shutting down.");
    }
}
