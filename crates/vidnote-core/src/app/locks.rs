//! Per-key async locks.
//!
//! # Example
//! ```ignore
//! let locks = KeyedLocks::new();
//! let guard = locks.lock(&video_id).await;
//! assert!(locks.try_lock(&video_id).await.is_none());
//! drop(guard);
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per key, created on demand.
///
/// Entries nobody holds or waits on are pruned on the next `lock`.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, key: &K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|k, lock| k == key || Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        self.slot(key).await.lock_owned().await
    }

    /// The guard, if nobody holds the lock right now.
    pub async fn try_lock(&self, key: &K) -> Option<OwnedMutexGuard<()>> {
        self.slot(key).await.try_lock_owned().ok()
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
