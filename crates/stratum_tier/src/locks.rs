// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A table of per-key asynchronous locks.

use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    sync::{Arc, Weak},
};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const INITIAL_SWEEP_THRESHOLD: usize = 64;

struct Table<K> {
    locks: HashMap<K, Weak<AsyncMutex<()>>>,
    sweep_at: usize,
}

impl<K: Hash + Eq> Table<K> {
    fn lock_for(&mut self, key: &K) -> Option<Arc<AsyncMutex<()>>> {
        self.locks.get(key).and_then(Weak::upgrade)
    }

    fn insert(&mut self, key: K) -> Arc<AsyncMutex<()>> {
        // Handles dropped by cancelled waiters can leave dead slots behind.
        if self.locks.len() >= self.sweep_at {
            self.locks.retain(|_, lock| lock.strong_count() > 0);
            self.sweep_at = (self.locks.len() * 2).max(INITIAL_SWEEP_THRESHOLD);
        }

        let lock = Arc::new(AsyncMutex::new(()));
        self.locks.insert(key, Arc::downgrade(&lock));
        lock
    }

    fn get_or_insert(&mut self, key: &K) -> Arc<AsyncMutex<()>>
    where
        K: Clone,
    {
        match self.lock_for(key) {
            Some(lock) => lock,
            None => self.insert(key.clone()),
        }
    }
}

type SharedTable<K> = Arc<SyncMutex<Table<K>>>;

/// Hands out one asynchronous mutex per key.
///
/// Locks are created on first use and the table only keeps weak handles to
/// them, so a key's slot disappears once the last guard or waiter for it is
/// gone. Operations on different keys never contend with each other.
///
/// # Examples
///
/// ```
/// use stratum_tier::KeyedLocks;
///
/// # futures::executor::block_on(async {
/// let locks = KeyedLocks::new();
///
/// let guard = locks.lock(&"a").await;
/// assert!(locks.try_lock(&"a").is_none());
/// assert!(locks.try_lock(&"b").is_some());
///
/// drop(guard);
/// assert!(locks.is_empty());
/// # });
/// ```
pub struct KeyedLocks<K> {
    table: SharedTable<K>,
}

impl<K> KeyedLocks<K>
where
    K: Clone + Hash + Eq,
{
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Arc::new(SyncMutex::new(Table {
                locks: HashMap::new(),
                sweep_at: INITIAL_SWEEP_THRESHOLD,
            })),
        }
    }

    /// Waits until the lock for `key` is available and acquires it.
    ///
    /// Dropping the returned future before it completes gives up the wait
    /// without acquiring anything.
    pub async fn lock(&self, key: &K) -> KeyGuard<K> {
        let lock = self.table.lock().get_or_insert(key);
        let guard = lock.lock_owned().await;
        KeyGuard::new(guard, key.clone(), Arc::clone(&self.table))
    }

    /// Acquires the lock for `key` if nobody else holds or awaits it.
    #[must_use]
    pub fn try_lock(&self, key: &K) -> Option<KeyGuard<K>> {
        let lock = self.table.lock().get_or_insert(key);
        let guard = lock.try_lock_owned().ok()?;
        Some(KeyGuard::new(guard, key.clone(), Arc::clone(&self.table)))
    }

    /// Returns the number of keys that currently have a live lock.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().locks.values().filter(|lock| lock.strong_count() > 0).count()
    }

    /// Returns `true` if no key currently has a live lock.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Clone + Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for KeyedLocks<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("slots", &self.table.lock().locks.len())
            .finish()
    }
}

/// Exclusive access to one key of a [`KeyedLocks`] table.
///
/// The lock is released when the guard is dropped. The key's slot is removed
/// from the table if no other task is waiting for it.
#[must_use = "the key is unlocked as soon as the guard is dropped"]
pub struct KeyGuard<K: Hash + Eq> {
    guard: Option<OwnedMutexGuard<()>>,
    key: K,
    table: SharedTable<K>,
}

impl<K: Hash + Eq> KeyGuard<K> {
    fn new(guard: OwnedMutexGuard<()>, key: K, table: SharedTable<K>) -> Self {
        Self {
            guard: Some(guard),
            key,
            table,
        }
    }

    /// The key this guard protects.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Hash + Eq> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        // The guard owns a strong handle; release it before checking for waiters.
        drop(self.guard.take());

        let mut table = self.table.lock();
        if table.locks.get(&self.key).is_some_and(|lock| lock.strong_count() == 0) {
            table.locks.remove(&self.key);
        }
    }
}

impl<K: Hash + Eq + fmt::Debug> fmt::Debug for KeyGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGuard").field("key", &self.key).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[test]
    fn slot_is_released_with_last_guard() {
        futures::executor::block_on(async {
            let locks = KeyedLocks::new();
            let guard = locks.lock(&1_u32).await;
            assert_eq!(locks.len(), 1);
            assert_eq!(*guard.key(), 1);
            drop(guard);
            assert!(locks.is_empty());
        });
    }

    #[test]
    fn different_keys_do_not_contend() {
        futures::executor::block_on(async {
            let locks = KeyedLocks::new();
            let _a = locks.lock(&"a").await;
            let _b = locks.lock(&"b").await;
            assert_eq!(locks.len(), 2);
        });
    }

    #[test]
    fn try_lock_fails_while_held() {
        let locks = KeyedLocks::new();
        let guard = locks.try_lock(&"key").expect("lock should be free");
        assert!(locks.try_lock(&"key").is_none());
        drop(guard);
        assert!(locks.try_lock(&"key").is_some());
    }

    #[test]
    fn dead_slots_are_swept() {
        let locks = KeyedLocks::new();
        {
            let mut table = locks.table.lock();
            for key in 0..INITIAL_SWEEP_THRESHOLD {
                // Simulates handles abandoned by cancelled waiters.
                drop(table.insert(key));
            }
        }
        assert_eq!(locks.table.lock().locks.len(), INITIAL_SWEEP_THRESHOLD);

        let _guard = locks.try_lock(&usize::MAX).expect("lock should be free");
        assert_eq!(locks.table.lock().locks.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn lock_serializes_same_key() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                tokio::spawn(async move {
                    let _guard = locks.lock(&"shared").await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.expect("task should not panic");
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }
}
