// src/core/tasks/gc_tuner.rs

//! Adjusts the runtime GC threshold and soft memory limit from configuration.
//! The configuration is re-read every tick so operators can retune a live
//! process.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, info};

use crate::core::cluster::RaftCluster;
use crate::core::metrics::{GC_THRESHOLD_GAUGE, MEMORY_LIMIT_GAUGE};

const GC_TUNER_INTERVAL: Duration = Duration::from_secs(10);

pub struct GcTunerTask {
    cluster: Arc<RaftCluster>,
}

impl GcTunerTask {
    pub fn new(cluster: Arc<RaftCluster>) -> Self {
        Self { cluster }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut timer = time::interval(GC_TUNER_INTERVAL);
        info!(
            total_memory = self.cluster.runtime_env.total_memory,
            "GC tuner task started."
        );

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.tune();
                }
                _ = shutdown_rx.recv() => {
                    info!("GC tuner task shutting down.");
                    return;
                }
            }
        }
    }

    fn tune(&self) {
        let gc = self.cluster.config.read().gc_tuner.clone();
        let env = &self.cluster.runtime_env;

        if !gc.enable_gc_tuner {
            env.memory_limit.store(0, Ordering::Release);
            env.gc_threshold.store(0, Ordering::Release);
            MEMORY_LIMIT_GAUGE.set(0.0);
            GC_THRESHOLD_GAUGE.set(0.0);
            return;
        }

        let memory_limit = (env.total_memory as f64 * gc.server_memory_limit) as u64;
        let gc_threshold = (memory_limit as f64 * gc.gc_tuner_threshold) as u64;
        let force_gc_at = (memory_limit as f64 * gc.server_memory_limit_gc_trigger) as u64;

        let prev_limit = env.memory_limit.swap(memory_limit, Ordering::AcqRel);
        env.gc_threshold.store(gc_threshold, Ordering::Release);
        MEMORY_LIMIT_GAUGE.set(memory_limit as f64);
        GC_THRESHOLD_GAUGE.set(gc_threshold as f64);

        if prev_limit != memory_limit {
            debug!(
                memory_limit,
                gc_threshold, force_gc_at, "GC tuner applied new thresholds."
            );
        }
    }
}
