// src/core/metrics.rs

//! Defines and registers Prometheus metrics for control-plane monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_gauge_vec,
};

lazy_static! {
    // --- Heartbeat counters ---
    /// The total number of store heartbeats processed.
    pub static ref STORE_HEARTBEAT_TOTAL: Counter =
        register_counter!("placementd_store_heartbeat_total", "Total number of store heartbeats processed.").unwrap();
    /// The total number of region heartbeats processed, labeled by the path taken.
    pub static ref REGION_HEARTBEAT_TOTAL: CounterVec =
        register_counter_vec!("placementd_region_heartbeat_total", "Total number of region heartbeats processed, labeled by outcome.", &["outcome"]).unwrap();
    /// The total number of region cache updates caused by heartbeats.
    pub static ref REGION_CACHE_UPDATED_TOTAL: Counter =
        register_counter!("placementd_region_cache_updated_total", "Total number of region cache updates.").unwrap();

    // --- Bucket report counters ---
    /// Bucket reports dropped because the reported version was older than the cached one.
    pub static ref BUCKET_REPORT_STALE_TOTAL: Counter =
        register_counter!("placementd_bucket_report_stale_total", "Bucket reports dropped as stale (version not newer).").unwrap();
    /// Bucket updates abandoned after exhausting the compare-and-swap retry budget.
    pub static ref BUCKET_REPORT_FAILED_TOTAL: Counter =
        register_counter!("placementd_bucket_report_failed_total", "Bucket updates that failed all CAS retries.").unwrap();

    // --- Task runner counters ---
    /// Tasks dropped by a runner, labeled by runner name.
    pub static ref RUNNER_TASK_DROPPED_TOTAL: CounterVec =
        register_counter_vec!("placementd_runner_task_dropped_total", "Async tasks dropped by a runner, labeled by runner name.", &["runner"]).unwrap();
    /// Tasks superseded by a newer submission for the same key, labeled by runner name.
    pub static ref RUNNER_TASK_SUPERSEDED_TOTAL: CounterVec =
        register_counter_vec!("placementd_runner_task_superseded_total", "Async tasks superseded by a newer submission, labeled by runner name.", &["runner"]).unwrap();

    // --- Cluster gauges ---
    /// The number of stores in each node state.
    pub static ref STORE_STATE_GAUGE: GaugeVec =
        register_gauge_vec!("placementd_store_state", "Number of stores in each node state.", &["state"]).unwrap();
    /// The cluster-wide minimum resolved timestamp.
    pub static ref MIN_RESOLVED_TS_GAUGE: Gauge =
        register_gauge!("placementd_min_resolved_ts", "Cluster-wide minimum resolved timestamp.").unwrap();
    /// Aggregate region size in MiB across all stores.
    pub static ref CLUSTER_REGION_SIZE_GAUGE: Gauge =
        register_gauge!("placementd_cluster_region_size_mib", "Aggregate region size across all stores in MiB.").unwrap();
    /// Aggregate used capacity across all stores in bytes.
    pub static ref CLUSTER_USED_BYTES_GAUGE: Gauge =
        register_gauge!("placementd_cluster_used_bytes", "Aggregate used capacity across all stores in bytes.").unwrap();
    /// Health of each known cluster member (1 healthy, 0 unhealthy).
    pub static ref MEMBER_HEALTH_GAUGE: GaugeVec =
        register_gauge_vec!("placementd_member_health", "Health of each known cluster member (1 healthy, 0 unhealthy).", &["member"]).unwrap();

    // --- GC tuner gauges ---
    /// The soft memory limit currently enforced by the tuner, in bytes.
    pub static ref MEMORY_LIMIT_GAUGE: Gauge =
        register_gauge!("placementd_memory_limit_bytes", "Soft memory limit enforced by the GC tuner in bytes.").unwrap();
    /// The GC threshold currently enforced by the tuner, in bytes.
    pub static ref GC_THRESHOLD_GAUGE: Gauge =
        register_gauge!("placementd_gc_threshold_bytes", "GC threshold enforced by the GC tuner in bytes.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}

/// Resets the gauges that describe live cluster state. Called when the
/// metrics job shuts down so a restarted leader does not export stale values.
pub fn reset_cluster_metrics() {
    STORE_STATE_GAUGE.reset();
    MEMBER_HEALTH_GAUGE.reset();
    CLUSTER_REGION_SIZE_GAUGE.set(0.0);
    CLUSTER_USED_BYTES_GAUGE.set(0.0);
}
