// src/core/store/limit.rs

//! Per-store rate limiting of scheduling operations.
//!
//! Two limiter shapes exist. "v1" is a plain token bucket refilled at a
//! configured per-minute rate. "v2" is a sliding window whose capacity is
//! steered by the snapshot-duration feedback signal reported in store
//! heartbeats.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// The floor for a sliding-window capacity, in region-size units.
const SLIDING_WINDOW_MIN_CAPACITY: f64 = 1.0;

/// The kind of scheduling operation a limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreLimitType {
    AddPeer,
    RemovePeer,
}

/// A snapshot of the configured rates, captured when a store goes offline and
/// restored when it comes back up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrevStoreLimit {
    pub add_peer: f64,
    pub remove_peer: f64,
}

/// A token bucket refilled at `rate_per_min` operations per minute.
#[derive(Debug, Clone)]
pub struct RateLimit {
    rate_per_min: f64,
    tokens: f64,
    last_refill: Instant,
}

impl RateLimit {
    pub fn new(rate_per_min: f64) -> Self {
        Self {
            rate_per_min,
            tokens: rate_per_min,
            last_refill: Instant::now(),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate_per_min
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_min / 60.0).min(self.rate_per_min);
        self.last_refill = Instant::now();
    }

    /// Takes `cost` tokens if available.
    pub fn try_take(&mut self, cost: f64) -> bool {
        self.refill();
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }
}

/// A sliding window whose capacity follows the snapshot feedback signal:
/// a negative signal (snapshots finishing with slack) grows the window
/// additively, a positive one halves it.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: f64,
    used: f64,
}

impl SlidingWindow {
    pub fn new(capacity: f64) -> Self {
        Self {
            capacity: capacity.max(SLIDING_WINDOW_MIN_CAPACITY),
            used: 0.0,
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn try_take(&mut self, cost: f64) -> bool {
        if self.used + cost <= self.capacity {
            self.used += cost;
            true
        } else {
            false
        }
    }

    pub fn release(&mut self, cost: f64) {
        self.used = (self.used - cost).max(0.0);
    }

    pub fn feedback(&mut self, signal: f64) {
        if signal < 0.0 {
            self.capacity += 1.0;
        } else if signal > 0.0 {
            self.capacity = (self.capacity / 2.0).max(SLIDING_WINDOW_MIN_CAPACITY);
        }
    }
}

/// One limiter, in whichever shape the configured version selects.
#[derive(Debug, Clone)]
pub enum StoreLimit {
    Rate(RateLimit),
    SlidingWindow(SlidingWindow),
}

impl StoreLimit {
    pub fn new(version: &str, rate_per_min: f64) -> Self {
        match version {
            "v2" => StoreLimit::SlidingWindow(SlidingWindow::new(rate_per_min)),
            _ => StoreLimit::Rate(RateLimit::new(rate_per_min)),
        }
    }

    pub fn try_take(&mut self, cost: f64) -> bool {
        match self {
            StoreLimit::Rate(l) => l.try_take(cost),
            StoreLimit::SlidingWindow(w) => w.try_take(cost),
        }
    }

    /// Applies the snapshot feedback signal. Rate-based limits ignore it.
    pub fn feedback(&mut self, signal: f64) {
        if let StoreLimit::SlidingWindow(w) = self {
            w.feedback(signal);
        }
    }

    /// The configured steady-state rate or window capacity.
    pub fn rate(&self) -> f64 {
        match self {
            StoreLimit::Rate(l) => l.rate(),
            StoreLimit::SlidingWindow(w) => w.capacity(),
        }
    }
}

/// The pair of limiters carried by every store, tagged with the version that
/// shaped them so a config change can rebuild them.
#[derive(Debug, Clone)]
pub struct StoreLimits {
    pub version: String,
    pub add_peer: StoreLimit,
    pub remove_peer: StoreLimit,
}

impl StoreLimits {
    pub fn new(version: &str, add_peer_rate: f64, remove_peer_rate: f64) -> Self {
        Self {
            version: version.to_string(),
            add_peer: StoreLimit::new(version, add_peer_rate),
            remove_peer: StoreLimit::new(version, remove_peer_rate),
        }
    }

    pub fn limit_mut(&mut self, kind: StoreLimitType) -> &mut StoreLimit {
        match kind {
            StoreLimitType::AddPeer => &mut self.add_peer,
            StoreLimitType::RemovePeer => &mut self.remove_peer,
        }
    }

    /// The configured rates, used for PrevStoreLimit capture.
    pub fn rates(&self) -> PrevStoreLimit {
        PrevStoreLimit {
            add_peer: self.add_peer.rate(),
            remove_peer: self.remove_peer.rate(),
        }
    }

    /// Applies the snapshot feedback signal to both limiters.
    pub fn feedback(&mut self, signal: f64) {
        self.add_peer.feedback(signal);
        self.remove_peer.feedback(signal);
    }
}
