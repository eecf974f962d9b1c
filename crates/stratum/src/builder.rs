// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for configuring two-level caches.

use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Serialize, de::DeserializeOwned};
use stratum_disk::{DiskCacheProvider, builder::DEFAULT_DISK_LIMIT_BYTES};
use stratum_memory::{MemoryCacheProvider, builder::DEFAULT_MEMORY_LIMIT_BYTES};
use stratum_tier::{CacheKey, Error, Result};
use tick::Clock;

use crate::TwoLevelCache;

/// Default interval between background reconciliation passes: 5 minutes.
pub const DEFAULT_SYNCHRONIZATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default name attached to log events.
pub const DEFAULT_NAME: &str = "two_level";

/// Builder for configuring a [`TwoLevelCache`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use stratum::TwoLevelCache;
/// use tick::Clock;
///
/// # fn build(clock: Clock, base: &std::path::Path) -> stratum_tier::Result<()> {
/// let cache = TwoLevelCache::<String, String>::builder(clock)
///     .memory_limit_bytes(32 * 1024 * 1024)
///     .disk_limit_bytes(512 * 1024 * 1024)
///     .directory(base)
///     .synchronization_interval(Duration::from_secs(60))
///     .name("profiles")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TwoLevelCacheBuilder<K, V> {
    pub(crate) clock: Clock,
    memory_limit_bytes: u64,
    disk_limit_bytes: u64,
    directory: Option<PathBuf>,
    pub(crate) synchronization_interval: Option<Duration>,
    pub(crate) name: &'static str,
    memory_name: Option<&'static str>,
    disk_name: Option<&'static str>,
    pub(crate) logs: bool,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<K, V> TwoLevelCacheBuilder<K, V> {
    /// Creates a builder with the default settings.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            disk_limit_bytes: DEFAULT_DISK_LIMIT_BYTES,
            directory: None,
            synchronization_interval: Some(DEFAULT_SYNCHRONIZATION_INTERVAL),
            name: DEFAULT_NAME,
            memory_name: None,
            disk_name: None,
            logs: true,
            _phantom: PhantomData,
        }
    }

    /// Sets the byte budget of the memory tier.
    #[must_use]
    pub fn memory_limit_bytes(mut self, limit: u64) -> Self {
        self.memory_limit_bytes = limit;
        self
    }

    /// Sets the quota of the disk tier.
    #[must_use]
    pub fn disk_limit_bytes(mut self, limit: u64) -> Self {
        self.disk_limit_bytes = limit;
        self
    }

    /// Sets the base directory of the disk tier.
    ///
    /// See [`DiskCacheProviderBuilder`](stratum_disk::DiskCacheProviderBuilder) for the default.
    #[must_use]
    pub fn directory(mut self, base: impl AsRef<Path>) -> Self {
        self.directory = Some(base.as_ref().to_path_buf());
        self
    }

    /// Sets the interval between background reconciliation passes.
    #[must_use]
    pub fn synchronization_interval(mut self, interval: Duration) -> Self {
        self.synchronization_interval = Some(interval);
        self
    }

    /// Disables background reconciliation. [`TwoLevelCache::synchronize`] still works.
    #[must_use]
    pub fn without_synchronization(mut self) -> Self {
        self.synchronization_interval = None;
        self
    }

    /// Sets the name attached to log events.
    ///
    /// Both tiers log under this name too, unless they are given their own
    /// through [`memory_name`](Self::memory_name) and [`disk_name`](Self::disk_name).
    #[must_use]
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Sets the name attached to the memory tier's log events.
    #[must_use]
    pub fn memory_name(mut self, name: &'static str) -> Self {
        self.memory_name = Some(name);
        self
    }

    /// Sets the name attached to the disk tier's log events.
    #[must_use]
    pub fn disk_name(mut self, name: &'static str) -> Self {
        self.disk_name = Some(name);
        self
    }

    /// Enables or disables log events for the cache and both tiers. Enabled by default.
    #[must_use]
    pub fn logs(mut self, enabled: bool) -> Self {
        self.logs = enabled;
        self
    }

    /// Builds the configured cache.
    ///
    /// Background reconciliation runs on the Tokio runtime this is called
    /// from. Outside a runtime it is skipped and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::InvalidArgument`](stratum_tier::ErrorKind::InvalidArgument)
    /// error if a limit or the synchronization interval is zero.
    pub fn build(self) -> Result<TwoLevelCache<K, V>>
    where
        K: CacheKey,
        V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        if self.synchronization_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(Error::invalid_argument("synchronization interval must be greater than zero"));
        }

        let memory = MemoryCacheProvider::builder(self.clock.clone())
            .memory_limit_bytes(self.memory_limit_bytes)
            .name(self.memory_name.unwrap_or(self.name))
            .logs(self.logs)
            .build()?;

        let mut disk = DiskCacheProvider::builder(self.clock.clone())
            .disk_limit_bytes(self.disk_limit_bytes)
            .name(self.disk_name.unwrap_or(self.name))
            .logs(self.logs);
        if let Some(base) = &self.directory {
            disk = disk.directory(base);
        }
        let disk = disk.build()?;

        Ok(TwoLevelCache::from_builder(self, memory, disk))
    }
}
