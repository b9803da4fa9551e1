// src/core/cluster/progress.rs

//! Progress tracking for long-running placement actions (emptying an offline
//! store, filling a preparing one), exposed to operators.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::core::PlacementdError;

/// One tracked action.
#[derive(Debug, Clone)]
struct Progress {
    total: f64,
    current: f64,
    started: Instant,
    updated: Instant,
}

/// A point-in-time view of an action's progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressStatus {
    /// Completed fraction in `[0, 1]`.
    pub ratio: f64,
    /// Units processed per second since the action started.
    pub speed: f64,
    /// Estimated seconds remaining at the current speed, `f64::INFINITY` when stalled.
    pub left_seconds: f64,
}

/// Tracks named actions; names are `<action>-<store_id>`.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    actions: DashMap<String, Progress>,
}

pub fn removing_action(store_id: u64) -> String {
    format!("removing-{store_id}")
}

pub fn preparing_action(store_id: u64) -> String {
    format!("preparing-{store_id}")
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) tracking an action with `total` units of work.
    pub fn add(&self, name: &str, total: f64, current: f64) {
        let now = Instant::now();
        self.actions.insert(
            name.to_string(),
            Progress {
                total: total.max(current),
                current,
                started: now,
                updated: now,
            },
        );
    }

    /// Records the remaining amount of work for an action, if tracked.
    pub fn update(&self, name: &str, current: f64) {
        if let Some(mut p) = self.actions.get_mut(name) {
            p.current = current.min(p.total);
            p.updated = Instant::now();
        }
    }

    pub fn remove(&self, name: &str) {
        self.actions.remove(name);
    }

    pub fn status(&self, name: &str) -> Result<ProgressStatus, PlacementdError> {
        let p = self
            .actions
            .get(name)
            .ok_or_else(|| PlacementdError::ProgressNotFound(name.to_string()))?;
        let done = p.total - p.current;
        let ratio = if p.total == 0.0 { 1.0 } else { done / p.total };
        let elapsed = p.started.elapsed().as_secs_f64().max(f64::EPSILON);
        let speed = done / elapsed;
        let left_seconds = if speed > 0.0 {
            p.current / speed
        } else {
            f64::INFINITY
        };
        Ok(ProgressStatus {
            ratio: ratio.clamp(0.0, 1.0),
            speed,
            left_seconds,
        })
    }

    /// Drops actions that have seen no update for `ttl`.
    pub fn gc(&self, ttl: Duration) -> usize {
        let before = self.actions.len();
        self.actions.retain(|_, p| p.updated.elapsed() < ttl);
        before - self.actions.len()
    }
}
