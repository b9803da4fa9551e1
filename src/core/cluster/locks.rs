// src/core/cluster/locks.rs

//! Keyed mutual exclusion for store state transitions.
//!
//! Acquiring on store ID `k` blocks only other acquirers of `k`. Entries are
//! evicted once the last holder releases, so the table stays bounded by the
//! number of stores currently under transition. No fairness guarantee.
//! Callers must never hold two guards at once.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug)]
struct LockEntry {
    mutex: Arc<Mutex<()>>,
    holders: usize,
}

/// The lock table, keyed by store ID.
#[derive(Debug, Default)]
pub struct StoreStateLocks {
    entries: DashMap<u64, LockEntry>,
}

impl StoreStateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `store_id`, waiting for the current holder if any.
    pub async fn lock(&self, store_id: u64) -> StoreStateGuard<'_> {
        let mutex = match self.entries.entry(store_id) {
            Entry::Occupied(mut e) => {
                e.get_mut().holders += 1;
                e.get().mutex.clone()
            }
            Entry::Vacant(e) => {
                let mutex = Arc::new(Mutex::new(()));
                e.insert(LockEntry {
                    mutex: mutex.clone(),
                    holders: 1,
                });
                mutex
            }
        };
        // The map shard must not be held across this await.
        let guard = mutex.lock_owned().await;
        StoreStateGuard {
            locks: self,
            store_id,
            _guard: guard,
        }
    }

    /// The number of live entries; exposed for tests of the eviction behavior.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn release(&self, store_id: u64) {
        if let Entry::Occupied(mut e) = self.entries.entry(store_id) {
            e.get_mut().holders -= 1;
            if e.get().holders == 0 {
                e.remove();
            }
        }
    }
}

/// Holds the store-state lock for one store; releases on drop.
#[derive(Debug)]
pub struct StoreStateGuard<'a> {
    locks: &'a StoreStateLocks,
    store_id: u64,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for StoreStateGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(self.store_id);
    }
}
