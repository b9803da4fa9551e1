// src/config.rs

//! Manages control-plane configuration: loading, defaults, and validation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Replication and placement settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReplicationConfig {
    /// The number of replicas each region should keep.
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u64,
    /// Ordered topology label keys (e.g. `["zone", "rack", "host"]`).
    #[serde(default)]
    pub location_labels: Vec<String>,
    /// The label key on which replicas must be isolated from each other.
    #[serde(default)]
    pub isolation_level: String,
    /// If true, reject store labels whose keys are not in `location_labels`.
    #[serde(default)]
    pub strictly_match_label: bool,
    /// If true, the preparing threshold is computed per placement rule.
    #[serde(default)]
    pub enable_placement_rules: bool,
    /// The ratio of used space at which a store is considered low on disk.
    #[serde(default = "default_low_space_ratio")]
    pub low_space_ratio: f64,
}

fn default_max_replicas() -> u64 {
    3
}
fn default_low_space_ratio() -> f64 {
    0.8
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_replicas: default_max_replicas(),
            location_labels: Vec::new(),
            isolation_level: String::new(),
            strictly_match_label: false,
            enable_placement_rules: false,
            low_space_ratio: default_low_space_ratio(),
        }
    }
}

/// Scheduling-related settings consumed by the lifecycle engine and store limits.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScheduleConfig {
    /// Freezes the scheduler entirely when set.
    #[serde(default)]
    pub halt_scheduling: bool,
    /// A preparing store becomes serving after this much uptime regardless of fill.
    #[serde(with = "humantime_serde", default = "default_max_store_preparing_time")]
    pub max_store_preparing_time: Duration,
    /// A store with no heartbeat for this long is considered down.
    #[serde(with = "humantime_serde", default = "default_max_store_down_time")]
    pub max_store_down_time: Duration,
    /// How long a tombstone store record is kept before it is deleted from storage.
    #[serde(with = "humantime_serde", default = "default_tombstone_gc_interval")]
    pub tombstone_gc_interval: Duration,
    /// The versioned shape of per-store limiters ("v1" rate-based, "v2" sliding-window).
    #[serde(default = "default_store_limit_version")]
    pub store_limit_version: String,
    /// Default AddPeer operations per minute for a new store.
    #[serde(default = "default_peer_rate")]
    pub add_peer_rate: f64,
    /// Default RemovePeer operations per minute for a new store.
    #[serde(default = "default_peer_rate")]
    pub remove_peer_rate: f64,
}

fn default_max_store_preparing_time() -> Duration {
    Duration::from_secs(48 * 60 * 60)
}
fn default_max_store_down_time() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_tombstone_gc_interval() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}
fn default_store_limit_version() -> String {
    "v1".to_string()
}
fn default_peer_rate() -> f64 {
    15.0
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            halt_scheduling: false,
            max_store_preparing_time: default_max_store_preparing_time(),
            max_store_down_time: default_max_store_down_time(),
            tombstone_gc_interval: default_tombstone_gc_interval(),
            store_limit_version: default_store_limit_version(),
            add_peer_rate: default_peer_rate(),
            remove_peer_rate: default_peer_rate(),
        }
    }
}

/// Settings for the runtime GC tuner and soft memory limit.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GcTunerConfig {
    /// Toggles GC-threshold tuning.
    #[serde(default)]
    pub enable_gc_tuner: bool,
    /// Fraction of physical RAM used as the soft memory limit. `0` disables the limit.
    #[serde(default = "default_server_memory_limit")]
    pub server_memory_limit: f64,
    /// Fraction of the memory limit at which the GC threshold tightens.
    #[serde(default = "default_gc_tuner_threshold")]
    pub gc_tuner_threshold: f64,
    /// Ratio of the memory limit at which memory pressure forces a GC cycle.
    #[serde(default = "default_memory_limit_gc_trigger")]
    pub server_memory_limit_gc_trigger: f64,
}

fn default_server_memory_limit() -> f64 {
    0.0
}
fn default_gc_tuner_threshold() -> f64 {
    0.6
}
fn default_memory_limit_gc_trigger() -> f64 {
    0.7
}

impl Default for GcTunerConfig {
    fn default() -> Self {
        Self {
            enable_gc_tuner: false,
            server_memory_limit: default_server_memory_limit(),
            gc_tuner_threshold: default_gc_tuner_threshold(),
            server_memory_limit_gc_trigger: default_memory_limit_gc_trigger(),
        }
    }
}

/// Settings governing hand-off of subsystems to external microservices.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MicroserviceConfig {
    /// Enables keyspace groups, the precondition for any microservice hand-off.
    #[serde(default)]
    pub enable_keyspace_groups: bool,
    /// Allows falling back to local scheduling when no scheduling service is discovered.
    #[serde(default = "default_true")]
    pub scheduling_fallback_enabled: bool,
    /// Allows dynamically handing the TSO allocator over to a discovered TSO service.
    #[serde(default)]
    pub tso_dynamic_switching_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MicroserviceConfig {
    fn default() -> Self {
        Self {
            enable_keyspace_groups: false,
            scheduling_fallback_enabled: default_true(),
            tso_dynamic_switching_enabled: false,
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    2379
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            port: default_metrics_port(),
        }
    }
}

/// Represents the final, validated control-plane configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Human-readable name of this placement driver instance.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// HTTP addresses of the other members of the placement driver group,
    /// polled by the metrics job for health.
    #[serde(default)]
    pub initial_members: Vec<String>,
    /// If true, member and store polls use https.
    #[serde(default)]
    pub enable_tls_polls: bool,
    /// How often the minimum resolved timestamp is persisted. `0` means the default.
    #[serde(with = "humantime_serde", default = "default_min_resolved_ts_interval")]
    pub min_resolved_ts_persistence_interval: Duration,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub gc_tuner: GcTunerConfig,
    #[serde(default)]
    pub microservice: MicroserviceConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_name() -> String {
    "pd".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_min_resolved_ts_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            host: default_host(),
            log_level: default_log_level(),
            initial_members: Vec::new(),
            enable_tls_polls: false,
            min_resolved_ts_persistence_interval: default_min_resolved_ts_interval(),
            replication: ReplicationConfig::default(),
            schedule: ScheduleConfig::default(),
            gc_tuner: GcTunerConfig::default(),
            microservice: MicroserviceConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the control plane cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.replication.max_replicas == 0 {
            anyhow::bail!("replication.max_replicas must be at least 1");
        }
        if !(0.0..1.0).contains(&self.replication.low_space_ratio) {
            anyhow::bail!("replication.low_space_ratio must be in [0, 1)");
        }
        if self.replication.strictly_match_label && self.replication.location_labels.is_empty() {
            anyhow::bail!(
                "replication.strictly_match_label requires a non-empty replication.location_labels"
            );
        }
        if !self.replication.isolation_level.is_empty()
            && !self
                .replication
                .location_labels
                .contains(&self.replication.isolation_level)
        {
            anyhow::bail!(
                "replication.isolation_level '{}' must be one of replication.location_labels",
                self.replication.isolation_level
            );
        }
        if self.gc_tuner.enable_gc_tuner {
            if !(0.0..=1.0).contains(&self.gc_tuner.gc_tuner_threshold)
                || self.gc_tuner.gc_tuner_threshold == 0.0
            {
                anyhow::bail!("gc_tuner.gc_tuner_threshold must be in (0, 1]");
            }
            if !(0.0..=1.0).contains(&self.gc_tuner.server_memory_limit) {
                anyhow::bail!("gc_tuner.server_memory_limit must be in [0, 1]");
            }
            if !(0.0..=1.0).contains(&self.gc_tuner.server_memory_limit_gc_trigger)
                || self.gc_tuner.server_memory_limit_gc_trigger == 0.0
            {
                anyhow::bail!("gc_tuner.server_memory_limit_gc_trigger must be in (0, 1]");
            }
        }
        match self.schedule.store_limit_version.as_str() {
            "v1" | "v2" => {}
            other => anyhow::bail!("schedule.store_limit_version must be \"v1\" or \"v2\", got \"{other}\""),
        }
        Ok(())
    }

    /// The effective min-resolved-ts persistence interval, substituting the
    /// default when the configured value is zero.
    pub fn effective_min_resolved_ts_interval(&self) -> Duration {
        if self.min_resolved_ts_persistence_interval.is_zero() {
            default_min_resolved_ts_interval()
        } else {
            self.min_resolved_ts_persistence_interval
        }
    }
}
