//! Per-key single-flight for cache misses.
//!
//! Locks are created on first use and dropped with the last guard.

use std::{path::PathBuf, sync::Arc};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-artifact locks that let a single request render a missing page while
/// others for the same key wait.
///
/// Only used when `serialize_misses` is enabled; without it concurrent misses
/// all render and the last write wins.
#[derive(Default, Clone)]
pub struct MissLocks {
    inner: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl MissLocks {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Wait until no other request holds the lock for `key`.
    pub async fn acquire(&self, key: PathBuf) -> MissGuard {
        let lock = Arc::clone(
            self.inner
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = lock.lock_owned().await;
        MissGuard {
            key,
            guard: Some(guard),
            locks: Arc::clone(&self.inner),
        }
    }

    /// Number of keys with an outstanding holder or waiter.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

pub struct MissGuard {
    key: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl Drop for MissGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map holds one reference; anything above that is a waiter.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
