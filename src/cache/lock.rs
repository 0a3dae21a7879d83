//! Per-key write serialization.
//!
//! Two connections fetching the same target at once would otherwise race on
//! the same cache file. Each entry path gets its own async mutex; the map
//! slot is dropped again once nobody else holds a reference to it.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of entry path → mutex.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &Path) -> KeyGuard {
        let mutex = self
            .inner
            .entry(key.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            locks: self.clone(),
            key: key.to_path_buf(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Held while a key is being written. Releases and prunes on drop.
#[derive(Debug)]
pub struct KeyGuard {
    locks: KeyedLocks,
    key: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release the mutex first so the strong count below only sees the map
        // slot and any waiters.
        drop(self.guard.take());
        self.locks
            .inner
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
