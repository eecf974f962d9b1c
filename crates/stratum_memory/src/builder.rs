// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for configuring memory cache providers.

use std::marker::PhantomData;

use stratum_tier::{CacheKey, Error, Result};
use tick::Clock;

use crate::provider::MemoryCacheProvider;

/// Default memory budget: 100 MiB.
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 100 * 1024 * 1024;

/// Default name attached to log events.
pub const DEFAULT_NAME: &str = "memory";

/// Builder for configuring a [`MemoryCacheProvider`].
///
/// # Examples
///
/// ```
/// use stratum_memory::MemoryCacheProvider;
/// use tick::Clock;
///
/// # fn build(clock: Clock) -> stratum_tier::Result<()> {
/// let cache = MemoryCacheProvider::<String, Vec<u8>>::builder(clock)
///     .memory_limit_bytes(16 * 1024 * 1024)
///     .name("thumbnails")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryCacheProviderBuilder<K, V> {
    pub(crate) clock: Clock,
    pub(crate) memory_limit_bytes: u64,
    pub(crate) name: &'static str,
    pub(crate) logs: bool,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<K, V> MemoryCacheProviderBuilder<K, V> {
    /// Creates a builder with the default settings.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            name: DEFAULT_NAME,
            logs: true,
            _phantom: PhantomData,
        }
    }

    /// Sets the byte budget.
    ///
    /// Only entries written with a size hint count against the budget.
    #[must_use]
    pub fn memory_limit_bytes(mut self, limit: u64) -> Self {
        self.memory_limit_bytes = limit;
        self
    }

    /// Sets the name attached to log events.
    #[must_use]
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Enables or disables log events. Enabled by default.
    #[must_use]
    pub fn logs(mut self, enabled: bool) -> Self {
        self.logs = enabled;
        self
    }

    /// Builds the configured provider.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::InvalidArgument`](stratum_tier::ErrorKind::InvalidArgument)
    /// error if the memory budget is zero.
    pub fn build(self) -> Result<MemoryCacheProvider<K, V>>
    where
        K: CacheKey,
        V: Clone + Send + Sync + 'static,
    {
        if self.memory_limit_bytes == 0 {
            return Err(Error::invalid_argument("memory limit must be greater than zero"));
        }

        Ok(MemoryCacheProvider::from_builder(self))
    }
}
