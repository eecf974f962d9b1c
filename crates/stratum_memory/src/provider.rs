// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The in-process cache provider.

use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use stratum_tier::{
    CacheActivity, CacheEntry, CacheEntryOptions, CacheKey, CacheOperation, CacheProvider, CacheTelemetry, Error, KeyGuard,
    KeyedLocks, Priority, Result,
};
use tick::Clock;

use crate::{MemoryStatistics, builder::MemoryCacheProviderBuilder};

/// A bounded, thread-safe, in-process cache.
///
/// Every entry written with a size hint counts against a byte budget. When a
/// write would exceed the budget, entries are evicted lowest priority first
/// and least recently used first within a priority. Entries with
/// [`Priority::NeverRemove`] are never evicted. A write that cannot fit even
/// after evicting everything evictable is dropped and a warning is logged, so
/// tracked usage never exceeds the budget. The key's previous entry is removed
/// either way, so a read never returns a value older than the last write.
///
/// All entries live behind one reader/writer lock. Reads take the write side
/// briefly because they refresh the sliding window and the LRU position. The
/// lock is never held across an `.await`.
///
/// Cloning the provider is cheap and yields a handle to the same entries.
///
/// # Examples
///
/// ```
/// use stratum_memory::MemoryCacheProvider;
/// use stratum_tier::{CacheEntryOptions, CacheProvider};
/// use tick::Clock;
///
/// # fn example(clock: Clock) -> stratum_tier::Result<()> {
/// # futures::executor::block_on(async {
/// let cache = MemoryCacheProvider::<String, i32>::builder(clock).build()?;
///
/// cache.set(&"answer".to_string(), 42, &CacheEntryOptions::standard()).await?;
/// assert_eq!(cache.get(&"answer".to_string()).await?, Some(42));
/// # Ok(())
/// # })
/// # }
/// ```
pub struct MemoryCacheProvider<K, V> {
    inner: Arc<Inner<K, V>>,
}

struct Inner<K, V> {
    state: RwLock<State<K, V>>,
    sequence: AtomicU64,
    locks: KeyedLocks<K>,
    clock: Clock,
    telemetry: CacheTelemetry,
    memory_limit_bytes: u64,
}

struct State<K, V> {
    entries: HashMap<K, Slot<V>>,
    used_bytes: u64,
}

struct Slot<V> {
    entry: CacheEntry<V>,
    // Position in the provider-wide access order; larger is more recent.
    last_used: u64,
}

impl<V> Slot<V> {
    fn size(&self) -> u64 {
        self.entry.metadata().size_bytes().unwrap_or(0)
    }

    fn priority(&self) -> Priority {
        self.entry.metadata().priority()
    }
}

impl<K: Hash + Eq + Clone, V> State<K, V> {
    fn remove(&mut self, key: &K) -> Option<Slot<V>> {
        let slot = self.entries.remove(key)?;
        self.used_bytes -= slot.size();
        Some(slot)
    }

    // The caller has already made room, so the sum stays within the budget.
    fn insert(&mut self, key: K, slot: Slot<V>) {
        self.remove(&key);
        self.used_bytes += slot.size();
        self.entries.insert(key, slot);
    }

    /// Picks the entries to drop so that at least `needed` bytes are released.
    ///
    /// Returns `None` when even evicting every candidate would not be enough.
    fn eviction_victims(&self, incoming: &K, needed: u64) -> Option<Vec<K>> {
        let mut candidates: Vec<_> = self
            .entries
            .iter()
            .filter(|(key, slot)| *key != incoming && slot.priority().is_evictable() && slot.size() > 0)
            .map(|(key, slot)| (slot.priority(), slot.last_used, slot.size(), key))
            .collect();
        candidates.sort_unstable_by_key(|&(priority, last_used, _, _)| (priority, last_used));

        let mut freed = 0_u64;
        let mut victims = Vec::new();
        for (_, _, size, key) in candidates {
            if freed >= needed {
                break;
            }
            freed += size;
            victims.push(key.clone());
        }

        (freed >= needed).then_some(victims)
    }
}

enum Lookup<V> {
    Hit(V),
    Miss,
    Expired,
}

enum Claim<K: Hash + Eq, V> {
    Hit(V),
    Cold(KeyGuard<K>),
}

impl<K, V> MemoryCacheProvider<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a builder for a provider that reads time from `clock`.
    #[must_use]
    pub fn builder(clock: Clock) -> MemoryCacheProviderBuilder<K, V> {
        MemoryCacheProviderBuilder::new(clock)
    }

    pub(crate) fn from_builder(builder: MemoryCacheProviderBuilder<K, V>) -> Self {
        let telemetry = CacheTelemetry::new(builder.name, builder.logs);
        telemetry.record(CacheOperation::Start, CacheActivity::Started, None);

        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State {
                    entries: HashMap::new(),
                    used_bytes: 0,
                }),
                sequence: AtomicU64::new(0),
                locks: KeyedLocks::new(),
                clock: builder.clock,
                telemetry,
                memory_limit_bytes: builder.memory_limit_bytes,
            }),
        }
    }

    /// The name attached to log events.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.telemetry.name()
    }

    /// Returns the number of stored entries, including expired ones not yet detected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.read().entries.len()
    }

    /// Returns `true` if no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of the provider's usage.
    #[must_use]
    pub fn statistics(&self) -> MemoryStatistics {
        let state = self.inner.state.read();
        MemoryStatistics::new(state.entries.len(), state.used_bytes, self.inner.memory_limit_bytes)
    }

    /// Returns the cached value for `key`, or runs `factory` and caches its result.
    ///
    /// A factory error is returned as an [`ErrorKind::Factory`](stratum_tier::ErrorKind::Factory)
    /// error and nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the factory fails.
    pub async fn try_get_or_create<F, Fut, E>(&self, key: &K, factory: F, options: &CacheEntryOptions) -> Result<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<V, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        key.validate()?;
        match self.claim(key).await {
            Claim::Hit(value) => Ok(value),
            Claim::Cold(_guard) => {
                let value = factory().await.map_err(Error::factory)?;
                self.store(key, value.clone(), options);
                Ok(value)
            }
        }
    }

    /// Returns the cached value for `key`, or runs `factory` and caches its result.
    ///
    /// A factory returning `None` has nothing to cache; `None` is returned and the
    /// next caller runs its own factory.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid.
    pub async fn get_or_create_optional<F, Fut>(&self, key: &K, factory: F, options: &CacheEntryOptions) -> Result<Option<V>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Option<V>> + Send,
    {
        key.validate()?;
        match self.claim(key).await {
            Claim::Hit(value) => Ok(Some(value)),
            Claim::Cold(_guard) => {
                let value = factory().await;
                if let Some(value) = &value {
                    self.store(key, value.clone(), options);
                }
                Ok(value)
            }
        }
    }

    /// Looks `key` up and, on a miss, takes its lock and looks again.
    async fn claim(&self, key: &K) -> Claim<K, V> {
        if let Lookup::Hit(value) = self.lookup(key) {
            self.record(CacheOperation::GetOrCreate, CacheActivity::Hit, None);
            return Claim::Hit(value);
        }

        let guard = self.inner.locks.lock(key).await;
        if let Lookup::Hit(value) = self.lookup(key) {
            self.record(CacheOperation::GetOrCreate, CacheActivity::Hit, None);
            return Claim::Hit(value);
        }

        self.record(CacheOperation::GetOrCreate, CacheActivity::Miss, None);
        Claim::Cold(guard)
    }

    fn lookup(&self, key: &K) -> Lookup<V> {
        let now = self.inner.clock.system_time();
        let sequence = self.next_sequence();

        let mut state = self.inner.state.write();
        let Some(slot) = state.entries.get_mut(key) else {
            return Lookup::Miss;
        };

        if slot.entry.metadata().is_expired(now) {
            state.remove(key);
            return Lookup::Expired;
        }

        slot.entry.metadata_mut().touch(now);
        slot.last_used = sequence;
        Lookup::Hit(slot.entry.value().clone())
    }

    fn store(&self, key: &K, value: V, options: &CacheEntryOptions) {
        if !options.tier().includes_memory() {
            self.record(CacheOperation::Set, CacheActivity::Rejected, None);
            return;
        }

        let start = self.inner.clock.instant();
        let limit = self.inner.memory_limit_bytes;
        let entry = CacheEntry::from_options(value, options, self.inner.clock.system_time());
        let size = entry.metadata().size_bytes().unwrap_or(0);
        let slot = Slot {
            entry,
            last_used: self.next_sequence(),
        };

        // The previous value goes first: a refused write must not leave it readable.
        let mut state = self.inner.state.write();
        state.remove(key);

        if size > limit {
            drop(state);
            self.inner.telemetry.record_detail(
                CacheOperation::Set,
                CacheActivity::OverBudget,
                &format_args!("entry of {size} bytes exceeds the {limit} byte budget"),
            );
            return;
        }

        // Usage never exceeds the budget, so the subtraction cannot underflow.
        let available = limit - state.used_bytes;
        let mut evicted = 0_usize;
        if size > available {
            let Some(victims) = state.eviction_victims(key, size - available) else {
                drop(state);
                self.inner.telemetry.record_detail(
                    CacheOperation::Set,
                    CacheActivity::OverBudget,
                    &format_args!("cannot free enough space for {size} bytes"),
                );
                return;
            };

            for victim in &victims {
                state.remove(victim);
            }
            evicted = victims.len();
        }

        state.insert(key.clone(), slot);
        drop(state);

        for _ in 0..evicted {
            self.record(CacheOperation::Evict, CacheActivity::Evicted, None);
        }
        self.record(CacheOperation::Set, CacheActivity::Inserted, Some(self.elapsed(start)));
    }

    fn next_sequence(&self) -> u64 {
        self.inner.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn elapsed(&self, start: Instant) -> Duration {
        self.inner.clock.instant().saturating_duration_since(start)
    }

    fn record(&self, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>) {
        self.inner.telemetry.record(operation, activity, duration);
    }
}

impl<K, V> CacheProvider<K, V> for MemoryCacheProvider<K, V>
where
    K: CacheKey,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>> {
        key.validate()?;
        let start = self.inner.clock.instant();

        let (value, activity) = match self.lookup(key) {
            Lookup::Hit(value) => (Some(value), CacheActivity::Hit),
            Lookup::Miss => (None, CacheActivity::Miss),
            Lookup::Expired => (None, CacheActivity::Expired),
        };

        self.record(CacheOperation::Get, activity, Some(self.elapsed(start)));
        Ok(value)
    }

    async fn set(&self, key: &K, value: V, options: &CacheEntryOptions) -> Result<()> {
        key.validate()?;
        self.store(key, value, options);
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<bool> {
        key.validate()?;
        let removed = self.inner.state.write().remove(key).is_some();

        let activity = if removed { CacheActivity::Removed } else { CacheActivity::Miss };
        self.record(CacheOperation::Remove, activity, None);
        Ok(removed)
    }

    async fn contains_key(&self, key: &K) -> Result<bool> {
        key.validate()?;
        let now = self.inner.clock.system_time();

        {
            let state = self.inner.state.read();
            match state.entries.get(key) {
                None => return Ok(false),
                Some(slot) if !slot.entry.metadata().is_expired(now) => return Ok(true),
                Some(_) => {}
            }
        }

        // Expired: take the write side to drop it, unless it was replaced meanwhile.
        let mut state = self.inner.state.write();
        match state.entries.get(key).map(|slot| slot.entry.metadata().is_expired(now)) {
            Some(true) => {
                state.remove(key);
                drop(state);
                self.record(CacheOperation::ContainsKey, CacheActivity::Expired, None);
                Ok(false)
            }
            Some(false) => Ok(true),
            None => Ok(false),
        }
    }

    async fn clear(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            state.entries.clear();
            state.used_bytes = 0;
        }

        self.record(CacheOperation::Clear, CacheActivity::Cleared, None);
        Ok(())
    }

    async fn get_or_create<F, Fut>(&self, key: &K, factory: F, options: &CacheEntryOptions) -> Result<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = V> + Send,
    {
        key.validate()?;
        match self.claim(key).await {
            Claim::Hit(value) => Ok(value),
            Claim::Cold(_guard) => {
                let value = factory().await;
                self.store(key, value.clone(), options);
                Ok(value)
            }
        }
    }
}

impl<K, V> Clone for MemoryCacheProvider<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for MemoryCacheProvider<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("MemoryCacheProvider")
            .field("name", &self.inner.telemetry.name())
            .field("item_count", &state.entries.len())
            .field("memory_used_bytes", &state.used_bytes)
            .field("memory_limit_bytes", &self.inner.memory_limit_bytes)
            .finish_non_exhaustive()
    }
}
