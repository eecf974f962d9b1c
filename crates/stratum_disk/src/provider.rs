// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The persistent cache provider.

use std::{
    fmt,
    io::{self, ErrorKind as IoErrorKind},
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{Serialize, de::DeserializeOwned};
use stratum_tier::{
    CacheActivity, CacheEntryOptions, CacheKey, CacheOperation, CacheProvider, CacheTelemetry, EntryMetadata, Error, KeyedLocks, Result,
};
use tick::Clock;
use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::{Mutex, RwLock},
};

use crate::{
    DiskStatistics,
    builder::DiskCacheProviderBuilder,
    codec::{self, CorruptRecord},
    path::{self, file_name},
    scan,
};

/// A bounded, persistent cache storing one file per key.
///
/// Each record holds the value, its timestamps, expiration settings and
/// priority, protected by a checksum. Records are written to a temporary file
/// and renamed into place, so readers never observe a partial write. A record
/// that cannot be decoded is treated as a miss and deleted.
///
/// I/O failures never reach the caller: they are logged, reads report a miss
/// and writes are skipped.
///
/// # Concurrency
///
/// Operations on the same key are serialized through a per-file lock;
/// operations on different keys proceed independently. A directory-wide
/// reader/writer lock lets [`clear`](CacheProvider::clear) and
/// [`purge_temporary_files`](Self::purge_temporary_files) wait for in-flight
/// operations. Quota evictions are serialized with each other and skip files
/// that are in use.
///
/// The directory is assumed to be owned by a single process.
pub struct DiskCacheProvider<K, V> {
    inner: Arc<Inner>,
    _phantom: PhantomData<fn() -> (K, V)>,
}

struct Inner {
    directory: PathBuf,
    disk_limit_bytes: u64,
    clock: Clock,
    telemetry: CacheTelemetry,
    directory_lock: RwLock<()>,
    file_locks: KeyedLocks<PathBuf>,
    loading: KeyedLocks<PathBuf>,
    eviction: Mutex<()>,
}

/// Outcome of reading one record file.
enum Read<T> {
    Live(T),
    Missing,
    Expired,
    Corrupt,
    Failed,
}

impl<K, V> DiskCacheProvider<K, V>
where
    K: CacheKey,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a builder for a provider that reads time from `clock`.
    #[must_use]
    pub fn builder(clock: Clock) -> DiskCacheProviderBuilder<K, V> {
        DiskCacheProviderBuilder::new(clock)
    }

    pub(crate) fn from_builder(builder: DiskCacheProviderBuilder<K, V>, directory: PathBuf) -> Self {
        let telemetry = CacheTelemetry::new(builder.name, builder.logs);
        telemetry.record_detail(CacheOperation::Start, CacheActivity::Started, &directory.display());

        Self {
            inner: Arc::new(Inner {
                directory,
                disk_limit_bytes: builder.disk_limit_bytes,
                clock: builder.clock,
                telemetry,
                directory_lock: RwLock::new(()),
                file_locks: KeyedLocks::new(),
                loading: KeyedLocks::new(),
                eviction: Mutex::new(()),
            }),
            _phantom: PhantomData,
        }
    }

    /// The directory holding this cache's records.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    /// The name attached to log events.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.telemetry.name()
    }

    /// The file that holds, or would hold, the record for `key`.
    #[must_use]
    pub fn path_for(&self, key: &K) -> PathBuf {
        self.inner.directory.join(file_name(&key.key_str()))
    }

    /// Scans the directory and reports its usage.
    pub async fn statistics(&self) -> DiskStatistics {
        let _directory = self.inner.directory_lock.read().await;
        match scan::records(&self.inner.directory).await {
            Ok(records) => DiskStatistics::new(records.len(), records.iter().map(|r| r.len).sum(), self.inner.disk_limit_bytes),
            Err(error) => {
                self.inner.log_failure(CacheOperation::Statistics, &error);
                DiskStatistics::new(0, 0, self.inner.disk_limit_bytes)
            }
        }
    }

    /// Deletes temporary files left behind by interrupted writes.
    ///
    /// Waits for in-flight operations to finish first.
    pub async fn purge_temporary_files(&self) {
        let _directory = self.inner.directory_lock.write().await;
        self.inner.delete_files(path::is_temporary, CacheOperation::Dispose).await;
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
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let _loading = self.inner.loading.lock(&self.path_for(key)).await;
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let value = factory().await.map_err(Error::factory)?;
        self.set_ref(key, &value, options).await;
        Ok(value)
    }

    /// Returns the cached value for `key`, or runs `factory` and caches its result.
    ///
    /// A factory returning `None` has nothing to cache.
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
        if let Some(value) = self.get(key).await? {
            return Ok(Some(value));
        }

        let _loading = self.inner.loading.lock(&self.path_for(key)).await;
        if let Some(value) = self.get(key).await? {
            return Ok(Some(value));
        }

        let value = factory().await;
        if let Some(value) = &value {
            self.set_ref(key, value, options).await;
        }
        Ok(value)
    }

    async fn set_ref(&self, key: &K, value: &V, options: &CacheEntryOptions) {
        if !options.tier().includes_disk() {
            self.inner.telemetry.record(CacheOperation::Set, CacheActivity::Rejected, None);
            return;
        }

        let start = self.inner.clock.instant();
        let mut metadata = EntryMetadata::from_options(options, self.inner.clock.system_time());

        let payload = match codec::encode_payload(value) {
            Ok(payload) => payload,
            Err(error) => return self.inner.log_failure(CacheOperation::Set, &error),
        };
        if metadata.size_bytes().is_none() {
            metadata.set_size_bytes(payload.len() as u64);
        }
        let key = key.key_str();
        let record = match codec::encode(&metadata, &key, &payload) {
            Ok(record) => record,
            Err(error) => return self.inner.log_failure(CacheOperation::Set, &error),
        };

        let path = self.inner.directory.join(file_name(&key));
        let _directory = self.inner.directory_lock.read().await;
        let _file = self.inner.file_locks.lock(&path).await;

        let existing = fs::metadata(&path).await.map_or(0, |existing| existing.len());
        self.inner
            .ensure_disk_space((record.len() as u64).saturating_sub(existing), &path)
            .await;

        match self.inner.write_atomic(&path, &record).await {
            Ok(()) => self
                .inner
                .telemetry
                .record(CacheOperation::Set, CacheActivity::Inserted, Some(self.inner.elapsed(start))),
            Err(error) => self.inner.log_failure(CacheOperation::Set, &error),
        }
    }

    /// Reads, verifies and, on a live hit, refreshes the record for `key` at `path`.
    ///
    /// A record written for another key that maps to the same file is a miss.
    async fn read_value(&self, key: &str, path: &Path, operation: CacheOperation) -> Read<V> {
        let bytes = match self.inner.read_record(path, operation).await {
            Read::Live(bytes) => bytes,
            Read::Missing => return Read::Missing,
            Read::Expired => return Read::Expired,
            Read::Corrupt => return Read::Corrupt,
            Read::Failed => return Read::Failed,
        };

        let codec::Record {
            mut metadata,
            key: stored_key,
            payload,
        } = match codec::decode(&bytes) {
            Ok(record) => record,
            Err(error) => return self.inner.discard_corrupt(path, operation, &error).await,
        };
        if stored_key != key {
            return Read::Missing;
        }

        let now = self.inner.clock.system_time();
        if metadata.is_expired(now) {
            self.inner.delete(path, operation).await;
            return Read::Expired;
        }

        let value = match codec::decode_payload(payload) {
            Ok(value) => value,
            Err(error) => return self.inner.discard_corrupt(path, operation, &error).await,
        };

        // Only the metadata changes; the payload bytes are reused as they are.
        metadata.touch(now);
        match codec::encode(&metadata, key, payload) {
            Ok(record) => {
                if let Err(error) = self.inner.write_atomic(path, &record).await {
                    self.inner.log_failure(operation, &error);
                }
            }
            Err(error) => self.inner.log_failure(operation, &error),
        }

        Read::Live(value)
    }
}

impl Inner {
    fn elapsed(&self, start: Instant) -> Duration {
        self.clock.instant().saturating_duration_since(start)
    }

    fn log_failure(&self, operation: CacheOperation, error: &dyn fmt::Display) {
        self.telemetry.record_detail(operation, CacheActivity::Error, error);
    }

    /// Reads the raw bytes of a record, or classifies why there are none.
    async fn read_record(&self, path: &Path, operation: CacheOperation) -> Read<Vec<u8>> {
        match fs::read(path).await {
            Ok(bytes) => Read::Live(bytes),
            Err(error) if error.kind() == IoErrorKind::NotFound => Read::Missing,
            Err(error) => {
                self.log_failure(operation, &error);
                Read::Failed
            }
        }
    }

    /// Returns `true` if the file at `path` holds a valid record for a key other than `key`.
    async fn holds_other_key(&self, path: &Path, key: &str) -> bool {
        match self.read_record(path, CacheOperation::Remove).await {
            Read::Live(bytes) => codec::decode(&bytes).is_ok_and(|record| record.key != key),
            _ => false,
        }
    }

    async fn discard_corrupt<T>(&self, path: &Path, operation: CacheOperation, error: &CorruptRecord) -> Read<T> {
        self.telemetry.record_detail(operation, CacheActivity::Corrupted, error);
        self.delete(path, operation).await;
        Read::Corrupt
    }

    /// Deletes a file, returning `true` if it existed.
    async fn delete(&self, path: &Path, operation: CacheOperation) -> bool {
        match fs::remove_file(path).await {
            Ok(()) => true,
            Err(error) if error.kind() == IoErrorKind::NotFound => false,
            Err(error) => {
                self.log_failure(operation, &error);
                false
            }
        }
    }

    async fn delete_files(&self, select: fn(&Path) -> bool, operation: CacheOperation) {
        let paths = match scan::paths(&self.directory, select).await {
            Ok(paths) => paths,
            Err(error) => return self.log_failure(operation, &error),
        };

        for path in paths {
            self.delete(&path, operation).await;
        }
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.directory).await?;

        let temp = path::temp_path_for(path);
        let written = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(bytes).await?;
            file.sync_data().await
        }
        .await;

        match written {
            Ok(()) => fs::rename(&temp, path).await,
            Err(error) => {
                // The temp file is garbage either way.
                let _ = fs::remove_file(&temp).await;
                Err(error)
            }
        }
    }

    /// Makes room for `required` more bytes, evicting records if needed.
    ///
    /// The record at `target` is never evicted. If enough space cannot be
    /// freed, a warning is logged and the caller writes anyway.
    async fn ensure_disk_space(&self, required: u64, target: &Path) {
        let _eviction = self.eviction.lock().await;

        let records = match scan::records(&self.directory).await {
            Ok(records) => records,
            Err(error) => return self.log_failure(CacheOperation::Evict, &error),
        };

        let used: u64 = records.iter().map(|r| r.len).sum();
        let Some(mut needed) = (used + required).checked_sub(self.disk_limit_bytes).filter(|&n| n > 0) else {
            return;
        };

        let candidates = scan::eviction_candidates(records, target).await;

        for corrupt in &candidates.corrupt {
            if needed == 0 {
                break;
            }
            let Some(_file) = self.file_locks.try_lock(&corrupt.path) else {
                continue;
            };
            self.telemetry
                .record_detail(CacheOperation::Evict, CacheActivity::Corrupted, &corrupt.path.display());
            if self.delete(&corrupt.path, CacheOperation::Evict).await {
                needed = needed.saturating_sub(corrupt.len);
            }
        }

        needed = self.evict_in_order(candidates.regular.iter(), needed).await;

        if needed > 0 && candidates.total() > scan::HIGH_PRIORITY_THRESHOLD {
            needed = self.evict_in_order(candidates.high.iter(), needed).await;
        }

        if needed > 0 {
            self.telemetry.record_detail(
                CacheOperation::Evict,
                CacheActivity::OverBudget,
                &format_args!("{needed} bytes over the {} byte quota", self.disk_limit_bytes),
            );
        }
    }

    async fn evict_in_order(&self, candidates: impl Iterator<Item = &scan::Candidate>, mut needed: u64) -> u64 {
        for candidate in candidates {
            if needed == 0 {
                break;
            }

            // Files locked by another operation are in use.
            let Some(_file) = self.file_locks.try_lock(&candidate.path) else {
                continue;
            };

            if self.delete(&candidate.path, CacheOperation::Evict).await {
                needed = needed.saturating_sub(candidate.len);
                self.telemetry.record(CacheOperation::Evict, CacheActivity::Evicted, None);
            }
        }

        needed
    }
}

impl<K, V> CacheProvider<K, V> for DiskCacheProvider<K, V>
where
    K: CacheKey,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>> {
        key.validate()?;
        let start = self.inner.clock.instant();
        let path = self.path_for(key);

        let read = {
            let _directory = self.inner.directory_lock.read().await;
            let _file = self.inner.file_locks.lock(&path).await;
            self.read_value(&key.key_str(), &path, CacheOperation::Get).await
        };

        let (value, activity) = match read {
            Read::Live(value) => (Some(value), CacheActivity::Hit),
            Read::Expired => (None, CacheActivity::Expired),
            Read::Missing | Read::Corrupt | Read::Failed => (None, CacheActivity::Miss),
        };

        self.inner
            .telemetry
            .record(CacheOperation::Get, activity, Some(self.inner.elapsed(start)));
        Ok(value)
    }

    async fn set(&self, key: &K, value: V, options: &CacheEntryOptions) -> Result<()> {
        key.validate()?;
        self.set_ref(key, &value, options).await;
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<bool> {
        key.validate()?;
        let path = self.path_for(key);

        let removed = {
            let _directory = self.inner.directory_lock.read().await;
            let _file = self.inner.file_locks.lock(&path).await;
            !self.inner.holds_other_key(&path, &key.key_str()).await && self.inner.delete(&path, CacheOperation::Remove).await
        };

        let activity = if removed { CacheActivity::Removed } else { CacheActivity::Miss };
        self.inner.telemetry.record(CacheOperation::Remove, activity, None);
        Ok(removed)
    }

    async fn contains_key(&self, key: &K) -> Result<bool> {
        key.validate()?;
        let path = self.path_for(key);

        let _directory = self.inner.directory_lock.read().await;
        let _file = self.inner.file_locks.lock(&path).await;

        let bytes = match self.inner.read_record(&path, CacheOperation::ContainsKey).await {
            Read::Live(bytes) => bytes,
            _ => return Ok(false),
        };

        match codec::decode(&bytes) {
            Ok(record) if record.key != key.key_str() => Ok(false),
            Ok(record) if record.metadata.is_expired(self.inner.clock.system_time()) => {
                self.inner.delete(&path, CacheOperation::ContainsKey).await;
                self.inner
                    .telemetry
                    .record(CacheOperation::ContainsKey, CacheActivity::Expired, None);
                Ok(false)
            }
            Ok(_) => Ok(true),
            Err(error) => {
                self.inner.discard_corrupt::<()>(&path, CacheOperation::ContainsKey, &error).await;
                Ok(false)
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        {
            let _directory = self.inner.directory_lock.write().await;
            self.inner
                .delete_files(|path| path::is_record(path) || path::is_temporary(path), CacheOperation::Clear)
                .await;
        }

        self.inner.telemetry.record(CacheOperation::Clear, CacheActivity::Cleared, None);
        Ok(())
    }

    async fn get_or_create<F, Fut>(&self, key: &K, factory: F, options: &CacheEntryOptions) -> Result<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = V> + Send,
    {
        key.validate()?;
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let _loading = self.inner.loading.lock(&self.path_for(key)).await;
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let value = factory().await;
        self.set_ref(key, &value, options).await;
        Ok(value)
    }
}

impl<K, V> Clone for DiskCacheProvider<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _phantom: PhantomData,
        }
    }
}

impl<K, V> fmt::Debug for DiskCacheProvider<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskCacheProvider")
            .field("name", &self.inner.telemetry.name())
            .field("directory", &self.inner.directory)
            .field("disk_limit_bytes", &self.inner.disk_limit_bytes)
            .finish_non_exhaustive()
    }
}
