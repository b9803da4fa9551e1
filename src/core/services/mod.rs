// src/core/services/mod.rs

//! Seams to the collaborators the controller coordinates but does not own:
//! microservice discovery, the TSO allocator, the local scheduling jobs, the
//! region-sync downstream, and the replication-mode manager.
//!
//! Each trait ships with a simple in-process implementation used by the
//! binary and by tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::info;

use crate::core::PlacementdError;
use crate::core::region::RegionMeta;

/// The discovery name of the scheduling microservice.
pub const SCHEDULING_SERVICE: &str = "scheduling";
/// The discovery name of the TSO microservice.
pub const TSO_SERVICE: &str = "tso";

/// Microservice discovery: which endpoints currently announce a service.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self, service: &str) -> Result<Vec<String>, PlacementdError>;
}

/// A discovery backed by a settable map, standing in for an etcd lookup.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    endpoints: DashMap<String, Vec<String>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, service: &str, endpoints: Vec<String>) {
        self.endpoints.insert(service.to_string(), endpoints);
    }

    pub fn clear(&self, service: &str) {
        self.endpoints.remove(service);
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self, service: &str) -> Result<Vec<String>, PlacementdError> {
        Ok(self
            .endpoints
            .get(service)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}

/// The contract of the timestamp-oracle allocator.
#[async_trait]
pub trait TsoAllocator: Send + Sync {
    fn is_initialized(&self) -> bool;
    async fn initialize(&self) -> Result<(), PlacementdError>;
    /// Tears the allocator down. `skip_upstream` suppresses the upstream
    /// notification when the reset happens during shutdown.
    fn reset(&self, skip_upstream: bool);
    async fn update_tso(&self) -> Result<(), PlacementdError>;
}

/// A process-local allocator good enough for a single-member group.
#[derive(Debug, Default)]
pub struct LocalTsoAllocator {
    initialized: AtomicBool,
    physical: AtomicU64,
}

impl LocalTsoAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TsoAllocator for LocalTsoAllocator {
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    async fn initialize(&self) -> Result<(), PlacementdError> {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            info!("Local TSO allocator initialized.");
        }
        Ok(())
    }

    fn reset(&self, skip_upstream: bool) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            info!(skip_upstream, "Local TSO allocator reset.");
        }
    }

    async fn update_tso(&self) -> Result<(), PlacementdError> {
        if !self.is_initialized() {
            return Err(PlacementdError::InvalidState(
                "TSO allocator is not initialized".to_string(),
            ));
        }
        self.physical.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// The local scheduling subsystem, started and stopped by the orchestrator.
pub trait SchedulingJobs: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn is_running(&self) -> bool;
}

/// An in-process scheduling handle that records start/stop cycles.
#[derive(Debug, Default)]
pub struct LocalSchedulingJobs {
    running: AtomicBool,
    start_count: AtomicUsize,
}

impl LocalSchedulingJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_count(&self) -> usize {
        self.start_count.load(Ordering::Acquire)
    }
}

impl SchedulingJobs for LocalSchedulingJobs {
    fn start(&self) {
        if !self.running.swap(true, Ordering::AcqRel) {
            self.start_count.fetch_add(1, Ordering::AcqRel);
            info!("Local scheduling jobs started.");
        }
    }

    fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("Local scheduling jobs stopped.");
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Where the region-sync job delivers changed regions.
#[async_trait]
pub trait RegionSyncSink: Send + Sync {
    async fn sync(&self, region: RegionMeta) -> Result<(), PlacementdError>;
}

/// A sink that counts deliveries and keeps the most recent one, for tests and
/// for running without a downstream follower.
#[derive(Debug, Default)]
pub struct CountingSyncSink {
    delivered: AtomicUsize,
    last: parking_lot::Mutex<Option<RegionMeta>>,
}

impl CountingSyncSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Acquire)
    }

    pub fn last(&self) -> Option<RegionMeta> {
        self.last.lock().clone()
    }
}

#[async_trait]
impl RegionSyncSink for CountingSyncSink {
    async fn sync(&self, region: RegionMeta) -> Result<(), PlacementdError> {
        self.delivered.fetch_add(1, Ordering::AcqRel);
        *self.last.lock() = Some(region);
        Ok(())
    }
}

/// The replication-mode manager, consumed as a black box: the controller only
/// drives its long-running loop.
#[async_trait]
pub trait ReplicationModeManager: Send + Sync {
    async fn run(self: Arc<Self>, shutdown_rx: broadcast::Receiver<()>);
}

/// A replication-mode manager that has nothing to manage.
#[derive(Debug, Default)]
pub struct NoopReplicationMode;

#[async_trait]
impl ReplicationModeManager for NoopReplicationMode {
    async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let _ = shutdown_rx.recv().await;
    }
}
