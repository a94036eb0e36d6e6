use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A registry of async mutexes, one per key.
///
/// Entries are created on demand and pruned once nobody holds or waits on
/// them, so the map only ever contains keys with work in flight.
pub struct KeyedLocks<K> {
    inner: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        KeyedLocks {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let mutex = {
            // A poisoned registry only means another thread panicked while
            // inserting; the map itself is still consistent.
            let mut map = match self.inner.lock() {
                Ok(map) => map,
                Err(poisoned) => poisoned.into_inner(),
            };
            map.retain(|k, m| *k == key || Arc::strong_count(m) > 1);
            map.entry(key).or_default().clone()
        };
        mutex.lock_owned().await
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
