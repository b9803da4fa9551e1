// src/core/tasks/metrics_collector.rs

//! Collects member health and store state gauges; resets them on shutdown so
//! a restarted leader does not export stale values.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, info};

use crate::core::cluster::{HTTP_POLL_TIMEOUT, RaftCluster};
use crate::core::metrics::{MEMBER_HEALTH_GAUGE, STORE_STATE_GAUGE, reset_cluster_metrics};
use crate::core::store::NodeState;

const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// The health endpoint of a placement driver member; followers answer it too.
const PING_PATH: &str = "/pd/api/v1/ping";
const ALLOW_FOLLOWER_HEADER: &str = "PD-Allow-Follower-Handle";

pub struct MetricsCollectorTask {
    cluster: Arc<RaftCluster>,
}

impl MetricsCollectorTask {
    pub fn new(cluster: Arc<RaftCluster>) -> Self {
        Self { cluster }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut timer = time::interval(METRICS_INTERVAL);
        info!("Metrics collection task started.");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.collect().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Metrics collection task shutting down; resetting gauges.");
                    reset_cluster_metrics();
                    return;
                }
            }
        }
    }

    async fn collect(&self) {
        let counts = self.cluster.basic().store_state_counts();
        for state in [
            NodeState::Preparing,
            NodeState::Serving,
            NodeState::Removing,
            NodeState::Removed,
        ] {
            let count = counts.get(&state).copied().unwrap_or(0);
            STORE_STATE_GAUGE
                .with_label_values(&[&state.to_string()])
                .set(count as f64);
        }

        let (members, tls) = {
            let config = self.cluster.config.read();
            (config.initial_members.clone(), config.enable_tls_polls)
        };
        let scheme = if tls { "https" } else { "http" };
        for member in members {
            let url = format!("{scheme}://{member}{PING_PATH}");
            let healthy = self
                .cluster
                .http_client
                .get(&url)
                .header(ALLOW_FOLLOWER_HEADER, "true")
                .timeout(HTTP_POLL_TIMEOUT)
                .send()
                .await
                .map(|resp| resp.status().is_success())
                .unwrap_or(false);
            if !healthy {
                debug!(member = %member, "Member failed the health poll.");
            }
            MEMBER_HEALTH_GAUGE
                .with_label_values(&[&member])
                .set(if healthy { 1.0 } else { 0.0 });
        }
    }
}
