// src/core/runner/mod.rs

//! Named bounded-concurrency executors for the asynchronous side effects of
//! heartbeat processing.
//!
//! Tasks are keyed by `(region_id, kind)`. Per key, at most one task is in
//! flight; a submission arriving while another is queued supersedes the queued
//! one unless that one is retained. Tasks that waited longer than the pending
//! age ceiling are dropped on dequeue, again unless retained. Across different
//! keys there is no ordering.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use strum_macros::Display;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::core::metrics::{RUNNER_TASK_DROPPED_TOTAL, RUNNER_TASK_SUPERSEDED_TOTAL};

/// A queued task older than this is dropped instead of run.
pub const MAX_TASK_PENDING_AGE: Duration = Duration::from_secs(60);

/// The kinds of async work published by the heartbeat handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum TaskKind {
    ObserveRegionStats,
    UpdateSubTree,
    HandleOverlaps,
    CollectRegionStats,
    SaveRegionToKv,
    SyncRegion,
    CheckHotPeer,
    ReconcileColdPeers,
    LogRegionUpdate,
}

type TaskKey = (u64, TaskKind);

/// Wrapper asserting `Sync` for the boxed future so `PendingTask` (and thus
/// `Slot`) satisfies `dashmap`'s `V: Sync` bound. Sound because a given
/// `PendingTask`'s `fut` is only ever touched by the single driver task that
/// owns it, under the exclusive access `DashMap`'s per-shard lock already
/// grants during mutation; it is never polled or read concurrently.
struct SyncFuture(BoxFuture<'static, ()>);
unsafe impl Sync for SyncFuture {}

struct PendingTask {
    fut: SyncFuture,
    retained: bool,
    submitted: Instant,
}

#[derive(Default)]
struct Slot {
    queue: VecDeque<PendingTask>,
}

/// One named executor with a fixed concurrency ceiling.
pub struct TaskRunner {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    slots: Arc<DashMap<TaskKey, Slot>>,
    accepting: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl TaskRunner {
    pub fn new(name: &'static str, concurrency: usize) -> Self {
        Self {
            name,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            slots: Arc::new(DashMap::new()),
            accepting: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Opens the runner for submissions.
    pub fn start(&self) {
        self.accepting.store(true, Ordering::Release);
    }

    /// Whether any key currently has running or queued work.
    pub fn is_idle(&self) -> bool {
        self.slots.is_empty() && self.active.load(Ordering::Acquire) == 0
    }

    /// Submits a task. Returns false when the task was rejected because the
    /// runner is stopped or it superseded nothing and was itself superseded
    /// later; the caller does not distinguish these.
    pub fn submit<F>(&self, region_id: u64, kind: TaskKind, retained: bool, fut: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if !self.accepting.load(Ordering::Acquire) {
            RUNNER_TASK_DROPPED_TOTAL
                .with_label_values(&[self.name])
                .inc();
            return false;
        }

        let key = (region_id, kind);
        let pending = PendingTask {
            fut: SyncFuture(Box::pin(fut)),
            retained,
            submitted: Instant::now(),
        };

        match self.slots.entry(key) {
            Entry::Occupied(mut e) => {
                let slot = e.get_mut();
                if let Some(last) = slot.queue.back_mut()
                    && !last.retained
                {
                    *last = pending;
                    RUNNER_TASK_SUPERSEDED_TOTAL
                        .with_label_values(&[self.name])
                        .inc();
                } else {
                    slot.queue.push_back(pending);
                }
                true
            }
            Entry::Vacant(e) => {
                e.insert(Slot::default());
                self.spawn_driver(key, pending);
                true
            }
        }
    }

    /// Runs `pending`, then keeps draining the key's queue until it is empty,
    /// at which point the slot is evicted.
    fn spawn_driver(&self, key: TaskKey, pending: PendingTask) {
        let name = self.name;
        let semaphore = self.semaphore.clone();
        let slots = self.slots.clone();
        let active = self.active.clone();

        active.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            let mut current = pending;
            loop {
                let expired = current.submitted.elapsed() > MAX_TASK_PENDING_AGE;
                if expired && !current.retained {
                    RUNNER_TASK_DROPPED_TOTAL.with_label_values(&[name]).inc();
                    debug!(runner = name, region_id = key.0, kind = %key.1, "Dropped task past its pending age.");
                } else {
                    match semaphore.acquire().await {
                        Ok(_permit) => current.fut.0.await,
                        Err(_) => {
                            // Semaphore closed: the runner is tearing down.
                            warn!(runner = name, "Task abandoned during runner teardown.");
                            break;
                        }
                    }
                }

                match slots.entry(key) {
                    Entry::Occupied(mut e) => match e.get_mut().queue.pop_front() {
                        Some(next) => current = next,
                        None => {
                            e.remove();
                            break;
                        }
                    },
                    Entry::Vacant(_) => break,
                }
            }
            active.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Closes the runner for submissions and drains queued and in-flight work
    /// within `deadline`. Work still pending at the deadline keeps running on
    /// the runtime but is no longer waited for.
    pub async fn stop(&self, deadline: Duration) {
        self.accepting.store(false, Ordering::Release);
        let start = Instant::now();
        while !self.is_idle() {
            if start.elapsed() >= deadline {
                warn!(
                    runner = self.name,
                    pending = self.slots.len(),
                    "Runner stop deadline reached with work still pending."
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        debug!(runner = self.name, "Runner drained and stopped.");
    }
}

/// The four runners the controller operates, created together so their names
/// and ceilings stay in one place.
pub struct TaskRunners {
    pub heartbeat: Arc<TaskRunner>,
    pub misc: Arc<TaskRunner>,
    pub log: Arc<TaskRunner>,
    pub sync_region: Arc<TaskRunner>,
}

impl TaskRunners {
    pub fn new() -> Self {
        let wide = 2 * std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            heartbeat: Arc::new(TaskRunner::new("heartbeat-async", wide)),
            misc: Arc::new(TaskRunner::new("misc-async", wide)),
            log: Arc::new(TaskRunner::new("log-async", wide)),
            sync_region: Arc::new(TaskRunner::new("sync-region-async", 1)),
        }
    }

    pub fn start_all(&self) {
        self.heartbeat.start();
        self.misc.start();
        self.log.start();
        self.sync_region.start();
    }

    pub async fn stop_all(&self, deadline: Duration) {
        self.heartbeat.stop(deadline).await;
        self.misc.stop(deadline).await;
        self.log.stop(deadline).await;
        self.sync_region.stop(deadline).await;
    }
}

impl Default for TaskRunners {
    fn default() -> Self {
        Self::new()
    }
}
