use std::{collections::HashMap, hash::Hash, sync::Arc};

use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};

/// A set of mutexes, one per key, created on demand.
///
/// Entries are removed again once no guard holds or waits for them, so the table only grows
/// with the number of keys under contention.
#[derive(Debug)]
pub(crate) struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Block until the lock for `key` is held.
    pub(crate) fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let lock = self
            .locks
            .lock()
            .entry(key.clone())
            .or_default()
            .clone();
        let guard = lock.lock_arc();
        KeyGuard {
            table: self,
            key,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Holds the lock of one key of a [`KeyedLocks`] table.
pub(crate) struct KeyGuard<'a, K: Eq + Hash> {
    table: &'a KeyedLocks<K>,
    key: K,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl<K: Eq + Hash> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.table.locks.lock();
        // only the table itself still references the mutex
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}
