// src/core/tasks/mod.rs

//! Long-running background jobs of the cluster controller. Every job is a
//! ticker loop selecting on the shutdown channel, spawned here with a guard
//! that logs a panic instead of silently losing the job.

pub mod config_sync;
pub mod gc_tuner;
pub mod metrics_collector;
pub mod min_resolved_ts;
pub mod node_state;
pub mod region_sync;
pub mod service_check;
pub mod store_stats;

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::error;

use crate::core::cluster::RaftCluster;
use crate::core::region::RegionMeta;

/// Capacity of the changed-regions channel feeding the region syncer.
pub const CHANGED_REGIONS_BOUND: usize = 10_000;

/// Spawns a job with a panic logger: a panicking loop is reported, never
/// silently gone.
fn spawn_job<F>(jobs: &mut JoinSet<()>, name: &'static str, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    jobs.spawn(async move {
        let handle = tokio::spawn(fut);
        if let Err(e) = handle.await
            && e.is_panic()
        {
            error!(job = name, "Background job panicked: {e}");
        }
    });
}

/// Spawns every background job of the controller.
pub fn spawn_all(
    cluster: &Arc<RaftCluster>,
    jobs: &mut JoinSet<()>,
    shutdown_tx: &broadcast::Sender<()>,
    changed_rx: mpsc::Receiver<RegionMeta>,
) {
    spawn_job(
        jobs,
        "service-check",
        service_check::ServiceCheckTask::new(cluster.clone()).run(shutdown_tx.subscribe()),
    );
    spawn_job(
        jobs,
        "node-state",
        node_state::NodeStateTask::new(cluster.clone()).run(shutdown_tx.subscribe()),
    );
    spawn_job(
        jobs,
        "progress-gc",
        node_state::ProgressGcTask::new(cluster.clone()).run(shutdown_tx.subscribe()),
    );
    spawn_job(
        jobs,
        "metrics",
        metrics_collector::MetricsCollectorTask::new(cluster.clone())
            .run(shutdown_tx.subscribe()),
    );
    spawn_job(
        jobs,
        "store-stats",
        store_stats::StoreStatsTask::new(cluster.clone()).run(shutdown_tx.subscribe()),
    );
    spawn_job(
        jobs,
        "config-sync",
        config_sync::ConfigSyncTask::new(cluster.clone()).run(shutdown_tx.subscribe()),
    );
    spawn_job(
        jobs,
        "gc-tuner",
        gc_tuner::GcTunerTask::new(cluster.clone()).run(shutdown_tx.subscribe()),
    );
    spawn_job(
        jobs,
        "min-resolved-ts",
        min_resolved_ts::MinResolvedTsTask::new(cluster.clone()).run(shutdown_tx.subscribe()),
    );
    spawn_job(
        jobs,
        "region-sync",
        region_sync::RegionSyncTask::new(cluster.clone(), changed_rx)
            .run(shutdown_tx.subscribe()),
    );
}
