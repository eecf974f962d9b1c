// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The contract shared by every cache provider.

use crate::{CacheEntryOptions, CacheKey, Result};

/// An asynchronous key/value cache.
///
/// Implemented by the memory, disk and two-level caches so callers can depend
/// on the contract instead of a concrete store. Storage failures never surface
/// as errors: a provider that cannot read reports a miss and a provider that
/// cannot write silently skips the write. Errors are reserved for invalid
/// arguments, use after disposal and failing value factories.
///
/// Every operation is cancelled by dropping its future.
pub trait CacheProvider<K: CacheKey, V>: Send + Sync {
    /// Returns the live value for `key`, refreshing its sliding window.
    fn get(&self, key: &K) -> impl Future<Output = Result<Option<V>>> + Send;

    /// Stores `value` under `key`, replacing any previous entry.
    fn set(&self, key: &K, value: V, options: &CacheEntryOptions) -> impl Future<Output = Result<()>> + Send;

    /// Removes `key`, returning `true` if an entry existed.
    fn remove(&self, key: &K) -> impl Future<Output = Result<bool>> + Send;

    /// Returns `true` if a live entry exists for `key`.
    ///
    /// Unlike [`get`](Self::get) this never extends the entry's lifetime.
    fn contains_key(&self, key: &K) -> impl Future<Output = Result<bool>> + Send;

    /// Removes every entry.
    fn clear(&self) -> impl Future<Output = Result<()>> + Send;

    /// Returns the cached value for `key`, or creates, stores and returns it.
    ///
    /// Concurrent callers for the same cold key share one invocation of `factory`.
    fn get_or_create<F, Fut>(&self, key: &K, factory: F, options: &CacheEntryOptions) -> impl Future<Output = Result<V>> + Send
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = V> + Send;
}
