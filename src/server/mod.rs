// src/server/mod.rs

//! Process bootstrap: wires the controller to its in-process collaborators,
//! starts it, and waits for the shutdown signal.

use crate::config::Config;
use crate::core::RaftCluster;
use crate::core::services::{
    CountingSyncSink, LocalSchedulingJobs, LocalTsoAllocator, NoopReplicationMode, StaticDiscovery,
};
use crate::core::storage::memory::MemStorage;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

mod metrics_server;

/// The main startup function: builds the controller, starts it, and runs
/// until interrupted.
pub async fn run(config: Config) -> Result<()> {
    let metrics_enabled = config.metrics.enabled;
    let metrics_port = config.metrics.port;
    info!(name = %config.name, "Starting the placement driver control plane.");

    let cluster = Arc::new(RaftCluster::new(
        config,
        Arc::new(MemStorage::new()),
        Arc::new(StaticDiscovery::new()),
        Arc::new(LocalTsoAllocator::new()),
        Arc::new(LocalSchedulingJobs::new()),
        Arc::new(CountingSyncSink::new()),
        Arc::new(NoopReplicationMode),
    )?);

    cluster.start(false).await?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    if metrics_enabled {
        tokio::spawn(metrics_server::run_metrics_server(
            cluster.clone(),
            metrics_port,
            shutdown_tx.subscribe(),
        ));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    let _ = shutdown_tx.send(());
    cluster.stop().await?;
    Ok(())
}
