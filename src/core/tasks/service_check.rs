// src/core/tasks/service_check.rs

//! Drives the microservice orchestrator: the scheduling check on a slow tick,
//! the TSO check on a fast one.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::info;

use crate::core::cluster::RaftCluster;

const SCHEDULING_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const TSO_CHECK_INTERVAL: Duration = Duration::from_millis(100);

pub struct ServiceCheckTask {
    cluster: Arc<RaftCluster>,
}

impl ServiceCheckTask {
    pub fn new(cluster: Arc<RaftCluster>) -> Self {
        Self { cluster }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut scheduling_timer = time::interval(SCHEDULING_CHECK_INTERVAL);
        let mut tso_timer = time::interval(TSO_CHECK_INTERVAL);
        info!("Service check task started.");

        loop {
            tokio::select! {
                _ = scheduling_timer.tick() => {
                    self.cluster.check_scheduling_service().await;
                }
                _ = tso_timer.tick() => {
                    self.cluster.check_tso_service_tick().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Service check task shutting down.");
                    return;
                }
            }
        }
    }
}
