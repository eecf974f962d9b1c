// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The two-level cache.

use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use futures::join;
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use stratum_disk::DiskCacheProvider;
use stratum_memory::MemoryCacheProvider;
use stratum_tier::{
    CacheActivity, CacheEntryOptions, CacheKey, CacheOperation, CacheProvider, CacheTelemetry, Error, KeyedLocks, Result, Tier,
};
use tick::{Clock, FutureExt as _};
use tokio::{sync::Notify, task::JoinHandle};

use crate::{SyncReport, TwoLevelStatistics, builder::TwoLevelCacheBuilder, sync};

/// How long [`TwoLevelCache::dispose`] waits for the background task.
const DISPOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A cache backed by a memory tier (L1) and a disk tier (L2).
///
/// Reads check memory first and fall back to disk. A value found only on
/// disk is copied into memory, with [`CacheEntryOptions::standard`] options,
/// before it is returned. Writes are routed by [`CacheEntryOptions::tier`]:
///
/// | Tier | Memory | Disk |
/// |---|---|---|
/// | [`Tier::MemoryOnly`] | written | stale copy removed |
/// | [`Tier::DiskOnly`] | stale copy removed | written |
/// | [`Tier::Both`] | written | written |
///
/// `Both` writes reach the tiers concurrently, with the same expiration,
/// priority and size settings.
///
/// # Single-flight
///
/// [`get_or_create`](CacheProvider::get_or_create) holds a per-key lock for
/// the whole lookup, factory call and store, so concurrent callers for a cold
/// key run one factory between them, whatever the tier. Writes, removals,
/// disk lookups and reconciliation take the same lock, so none of them can
/// interleave with another operation on the key.
///
/// # Reconciliation
///
/// The cache remembers which memory entries mirror a disk entry: those written
/// with [`Tier::Both`] and those promoted from disk. A reconciliation pass
/// removes every such memory entry whose disk copy is gone, for example
/// because the disk tier evicted it. Passes run periodically on the Tokio
/// runtime the cache was built on, and on demand through
/// [`synchronize`](Self::synchronize).
///
/// # Disposal
///
/// [`dispose`](Self::dispose) stops reconciliation and cleans up the disk
/// tier. Every later operation fails with
/// [`ErrorKind::Disposed`](stratum_tier::ErrorKind::Disposed). Dropping the
/// last handle stops reconciliation as well.
///
/// # Examples
///
/// ```
/// use stratum::TwoLevelCache;
/// use stratum_tier::{CacheEntryOptions, CacheProvider, Tier};
/// use tick::Clock;
///
/// # async fn example(clock: Clock, base: &std::path::Path) -> stratum_tier::Result<()> {
/// let cache = TwoLevelCache::<String, String>::builder(clock).directory(base).build()?;
/// let key = "report".to_string();
///
/// cache
///     .set(&key, "contents".to_string(), &CacheEntryOptions::standard().with_tier(Tier::DiskOnly))
///     .await?;
///
/// // Found on disk and promoted into memory.
/// assert_eq!(cache.get(&key).await?, Some("contents".to_string()));
/// assert!(cache.memory().contains_key(&key).await?);
///
/// cache.dispose().await;
/// # Ok(())
/// # }
/// ```
pub struct TwoLevelCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

pub(crate) struct Inner<K, V> {
    memory: MemoryCacheProvider<K, V>,
    disk: DiskCacheProvider<K, V>,
    pub(crate) clock: Clock,
    pub(crate) telemetry: CacheTelemetry,
    locks: KeyedLocks<K>,
    // Keys whose memory entry mirrors a disk entry.
    mirrored: Mutex<HashSet<K>>,
    disposed: AtomicBool,
    pub(crate) shutdown: Arc<Notify>,
    synchronization: Mutex<Option<JoinHandle<()>>>,
}

fn promotion_options() -> CacheEntryOptions {
    CacheEntryOptions::standard().with_tier(Tier::MemoryOnly)
}

impl<K, V> TwoLevelCache<K, V>
where
    K: CacheKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a builder for a cache that reads time from `clock`.
    #[must_use]
    pub fn builder(clock: Clock) -> TwoLevelCacheBuilder<K, V> {
        TwoLevelCacheBuilder::new(clock)
    }

    pub(crate) fn from_builder(builder: TwoLevelCacheBuilder<K, V>, memory: MemoryCacheProvider<K, V>, disk: DiskCacheProvider<K, V>) -> Self {
        let telemetry = CacheTelemetry::new(builder.name, builder.logs);
        let inner = Arc::new(Inner {
            memory,
            disk,
            clock: builder.clock,
            telemetry,
            locks: KeyedLocks::new(),
            mirrored: Mutex::new(HashSet::new()),
            disposed: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            synchronization: Mutex::new(None),
        });

        if let Some(interval) = builder.synchronization_interval {
            *inner.synchronization.lock() = sync::spawn(&inner, interval);
        }

        telemetry.record(CacheOperation::Start, CacheActivity::Started, None);
        Self { inner }
    }

    /// The memory tier.
    ///
    /// Operations on it bypass the two-level bookkeeping.
    #[must_use]
    pub fn memory(&self) -> &MemoryCacheProvider<K, V> {
        &self.inner.memory
    }

    /// The disk tier.
    ///
    /// Operations on it bypass the two-level bookkeeping.
    #[must_use]
    pub fn disk(&self) -> &DiskCacheProvider<K, V> {
        &self.inner.disk
    }

    /// The name attached to log events.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.telemetry.name()
    }

    /// Returns `true` once [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Returns `true` while background reconciliation is running.
    #[must_use]
    pub fn is_synchronizing(&self) -> bool {
        self.inner
            .synchronization
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Reports the usage of both tiers.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache has been disposed.
    pub async fn statistics(&self) -> Result<TwoLevelStatistics> {
        self.ensure_live()?;
        Ok(TwoLevelStatistics {
            memory: self.inner.memory.statistics(),
            disk: self.inner.disk.statistics().await,
        })
    }

    /// Runs one reconciliation pass now.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache has been disposed.
    pub async fn synchronize(&self) -> Result<SyncReport> {
        self.ensure_live()?;
        Ok(self.inner.synchronize().await)
    }

    /// Stops background reconciliation and releases the disk tier's leftovers.
    ///
    /// Waits up to five seconds for an in-flight reconciliation pass, then
    /// deletes temporary files left by interrupted disk writes. Cached values
    /// stay on disk. Calling this more than once has no further effect.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.shutdown.notify_one();
        let task = self.inner.synchronization.lock().take();
        if let Some(task) = task {
            match task.timeout(&self.inner.clock, DISPOSE_TIMEOUT).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) if error.is_cancelled() => {}
                Ok(Err(error)) => self.inner.telemetry.record_detail(CacheOperation::Dispose, CacheActivity::Error, &error),
                Err(error) => self.inner.telemetry.record_detail(CacheOperation::Dispose, CacheActivity::Error, &error),
            }
        }

        self.inner.disk.purge_temporary_files().await;
        self.inner.telemetry.record(CacheOperation::Dispose, CacheActivity::Disposed, None);
    }

    /// Returns the cached value for `key`, or runs `factory` and caches its result.
    ///
    /// A factory error is returned as an [`ErrorKind::Factory`](stratum_tier::ErrorKind::Factory)
    /// error and nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache has been disposed, the key is invalid or the factory fails.
    pub async fn try_get_or_create<F, Fut, E>(&self, key: &K, factory: F, options: &CacheEntryOptions) -> Result<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<V, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.ensure_live()?;
        key.validate()?;
        if let Some(value) = self.inner.memory.get(key).await? {
            return Ok(value);
        }

        let _guard = self.inner.locks.lock(key).await;
        if options.tier() == Tier::MemoryOnly {
            let created = &AtomicBool::new(false);
            let value = self
                .inner
                .memory
                .try_get_or_create(key, move || mark(created, factory), options)
                .await?;
            return self.inner.settle_memory_only(key, created, value).await;
        }

        if let Some(value) = self.cached(key, options.tier(), CacheOperation::GetOrCreate).await? {
            return Ok(value);
        }

        let value = factory().await.map_err(Error::factory)?;
        self.store(key, value.clone(), options).await?;
        Ok(value)
    }

    /// Returns the cached value for `key`, or runs `factory` and caches its result.
    ///
    /// A factory returning `None` has nothing to cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache has been disposed or the key is invalid.
    pub async fn get_or_create_optional<F, Fut>(&self, key: &K, factory: F, options: &CacheEntryOptions) -> Result<Option<V>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Option<V>> + Send,
    {
        self.ensure_live()?;
        key.validate()?;
        if let Some(value) = self.inner.memory.get(key).await? {
            return Ok(Some(value));
        }

        let _guard = self.inner.locks.lock(key).await;
        if options.tier() == Tier::MemoryOnly {
            let created = &AtomicBool::new(false);
            let value = self
                .inner
                .memory
                .get_or_create_optional(key, move || mark(created, factory), options)
                .await?;
            return self.inner.settle_memory_only(key, created, value).await;
        }

        if let Some(value) = self.cached(key, options.tier(), CacheOperation::GetOrCreate).await? {
            return Ok(Some(value));
        }

        let value = factory().await;
        if let Some(value) = &value {
            self.store(key, value.clone(), options).await?;
        }
        Ok(value)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() { Err(Error::disposed()) } else { Ok(()) }
    }

    /// Looks `key` up in memory, then on disk.
    ///
    /// A disk hit is promoted into memory unless `tier` keeps the value out of it.
    /// The caller holds the key's lock, so a promotion never overwrites a newer write.
    async fn cached(&self, key: &K, tier: Tier, operation: CacheOperation) -> Result<Option<V>> {
        if let Some(value) = self.inner.memory.get(key).await? {
            return Ok(Some(value));
        }

        let Some(value) = self.inner.disk.get(key).await? else {
            return Ok(None);
        };

        if tier != Tier::DiskOnly {
            self.inner.memory.set(key, value.clone(), &promotion_options()).await?;
            self.inner.mirrored.lock().insert(key.clone());
            self.inner.telemetry.record(operation, CacheActivity::Promoted, None);
        }
        Ok(Some(value))
    }

    /// Writes `value` to the tiers `options` selects. The caller holds the key's lock.
    async fn store(&self, key: &K, value: V, options: &CacheEntryOptions) -> Result<()> {
        let start = self.inner.clock.instant();
        let inner = &self.inner;

        match options.tier() {
            Tier::MemoryOnly => {
                inner.forget(key);
                let (memory, disk) = join!(inner.memory.set(key, value, options), inner.disk.remove(key));
                memory.and(disk.map(drop))?;
            }
            Tier::DiskOnly => {
                inner.forget(key);
                let (memory, disk) = join!(inner.memory.remove(key), inner.disk.set(key, value, options));
                memory.map(drop).and(disk)?;
            }
            Tier::Both => {
                let memory_options = options.clone().with_tier(Tier::MemoryOnly);
                let disk_options = options.clone().with_tier(Tier::DiskOnly);
                let (memory, disk) = join!(
                    inner.memory.set(key, value.clone(), &memory_options),
                    inner.disk.set(key, value, &disk_options)
                );
                memory.and(disk)?;
                inner.mirrored.lock().insert(key.clone());
            }
        }

        inner
            .telemetry
            .record(CacheOperation::Set, CacheActivity::Inserted, Some(inner.elapsed(start)));
        Ok(())
    }
}

impl<K, V> Inner<K, V>
where
    K: CacheKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Removes memory entries whose disk copy has disappeared.
    pub(crate) async fn synchronize(&self) -> SyncReport {
        let start = self.clock.instant();
        let keys: Vec<K> = self.mirrored.lock().iter().cloned().collect();
        let mut report = SyncReport::default();

        for key in keys {
            let _guard = self.locks.lock(&key).await;
            // Rewritten or removed since the snapshot.
            if !self.mirrored.lock().contains(&key) {
                continue;
            }
            report.examined += 1;

            if !matches!(self.memory.contains_key(&key).await, Ok(true)) {
                self.forget(&key);
                continue;
            }

            if matches!(self.disk.contains_key(&key).await, Ok(false)) {
                // Only an invalid key can fail, and stored keys are valid.
                let _ = self.memory.remove(&key).await;
                self.forget(&key);
                report.evicted += 1;
                self.telemetry.record(CacheOperation::Synchronize, CacheActivity::Removed, None);
            }
        }

        self.telemetry.record_detail(
            CacheOperation::Synchronize,
            CacheActivity::Synchronized,
            &format_args!(
                "examined {} entries, evicted {} in {:?}",
                report.examined,
                report.evicted,
                self.elapsed(start)
            ),
        );
        report
    }

    /// Finishes a memory-only `get_or_create`: a freshly created value replaces
    /// any disk copy, like any other memory-only write.
    async fn settle_memory_only<T>(&self, key: &K, created: &AtomicBool, value: T) -> Result<T> {
        if created.load(Ordering::Relaxed) {
            self.forget(key);
            self.disk.remove(key).await?;
        }
        Ok(value)
    }
}

/// Runs `factory`, noting that it ran.
fn mark<F: FnOnce() -> Fut, Fut>(created: &AtomicBool, factory: F) -> Fut {
    created.store(true, Ordering::Relaxed);
    factory()
}

impl<K: CacheKey, V> Inner<K, V> {
    fn forget(&self, key: &K) {
        self.mirrored.lock().remove(key);
    }

    fn elapsed(&self, start: Instant) -> Duration {
        self.clock.instant().saturating_duration_since(start)
    }
}

impl<K, V> Drop for Inner<K, V> {
    fn drop(&mut self) {
        self.shutdown.notify_one();
        if let Some(task) = self.synchronization.get_mut().take() {
            task.abort();
        }
    }
}

impl<K, V> CacheProvider<K, V> for TwoLevelCache<K, V>
where
    K: CacheKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>> {
        self.ensure_live()?;
        key.validate()?;
        let start = self.inner.clock.instant();

        let value = match self.inner.memory.get(key).await? {
            Some(value) => Some(value),
            None => {
                let _guard = self.inner.locks.lock(key).await;
                self.cached(key, Tier::Both, CacheOperation::Get).await?
            }
        };

        let activity = if value.is_some() { CacheActivity::Hit } else { CacheActivity::Miss };
        self.inner
            .telemetry
            .record(CacheOperation::Get, activity, Some(self.inner.elapsed(start)));
        Ok(value)
    }

    async fn set(&self, key: &K, value: V, options: &CacheEntryOptions) -> Result<()> {
        self.ensure_live()?;
        key.validate()?;
        let _guard = self.inner.locks.lock(key).await;
        self.store(key, value, options).await
    }

    async fn remove(&self, key: &K) -> Result<bool> {
        self.ensure_live()?;
        key.validate()?;

        let removed = {
            let _guard = self.inner.locks.lock(key).await;
            self.inner.forget(key);
            let (memory, disk) = join!(self.inner.memory.remove(key), self.inner.disk.remove(key));
            memory? | disk?
        };

        let activity = if removed { CacheActivity::Removed } else { CacheActivity::Miss };
        self.inner.telemetry.record(CacheOperation::Remove, activity, None);
        Ok(removed)
    }

    async fn contains_key(&self, key: &K) -> Result<bool> {
        self.ensure_live()?;
        key.validate()?;

        if self.inner.memory.contains_key(key).await? {
            return Ok(true);
        }
        self.inner.disk.contains_key(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_live()?;

        let (memory, disk) = join!(self.inner.memory.clear(), self.inner.disk.clear());
        self.inner.mirrored.lock().clear();
        memory.and(disk)?;

        self.inner.telemetry.record(CacheOperation::Clear, CacheActivity::Cleared, None);
        Ok(())
    }

    async fn get_or_create<F, Fut>(&self, key: &K, factory: F, options: &CacheEntryOptions) -> Result<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = V> + Send,
    {
        self.ensure_live()?;
        key.validate()?;
        if let Some(value) = self.inner.memory.get(key).await? {
            return Ok(value);
        }

        let _guard = self.inner.locks.lock(key).await;
        if options.tier() == Tier::MemoryOnly {
            let created = &AtomicBool::new(false);
            let value = self
                .inner
                .memory
                .get_or_create(key, move || mark(created, factory), options)
                .await?;
            return self.inner.settle_memory_only(key, created, value).await;
        }

        if let Some(value) = self.cached(key, options.tier(), CacheOperation::GetOrCreate).await? {
            return Ok(value);
        }

        let value = factory().await;
        self.store(key, value.clone(), options).await?;
        Ok(value)
    }
}

impl<K, V> Clone for TwoLevelCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for TwoLevelCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwoLevelCache")
            .field("name", &self.inner.telemetry.name())
            .field("memory", &self.inner.memory)
            .field("disk", &self.inner.disk)
            .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
