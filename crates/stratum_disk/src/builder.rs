// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for configuring disk cache providers.

use std::{
    env,
    ffi::OsString,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};
use stratum_tier::{CacheKey, Error, Result};
use tick::Clock;

use crate::{path::type_directory_name, provider::DiskCacheProvider};

/// Default disk quota: 1 GiB.
pub const DEFAULT_DISK_LIMIT_BYTES: u64 = 1024 * 1024 * 1024;

/// Default name attached to log events.
pub const DEFAULT_NAME: &str = "disk";

const APPLICATION_DIRECTORY: &str = "stratum";

/// Builder for configuring a [`DiskCacheProvider`].
///
/// Records are stored under `<base>/<ValueTypeName>`, where the value type
/// name is the unqualified name of `V`. Without an explicit base the first
/// available of `$LOCALAPPDATA`, `$XDG_CACHE_HOME`, `$HOME/.cache` and the
/// temporary directory is used, joined with `stratum`.
///
/// # Examples
///
/// ```
/// use stratum_disk::DiskCacheProvider;
/// use tick::Clock;
///
/// # fn build(clock: Clock, base: &std::path::Path) -> stratum_tier::Result<()> {
/// let cache = DiskCacheProvider::<String, Vec<u8>>::builder(clock)
///     .directory(base)
///     .disk_limit_bytes(256 * 1024 * 1024)
///     .build()?;
///
/// assert_eq!(cache.directory(), base.join("Vec"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DiskCacheProviderBuilder<K, V> {
    pub(crate) clock: Clock,
    pub(crate) base_directory: Option<PathBuf>,
    pub(crate) disk_limit_bytes: u64,
    pub(crate) name: &'static str,
    pub(crate) logs: bool,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<K, V> DiskCacheProviderBuilder<K, V> {
    /// Creates a builder with the default settings.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            base_directory: None,
            disk_limit_bytes: DEFAULT_DISK_LIMIT_BYTES,
            name: DEFAULT_NAME,
            logs: true,
            _phantom: PhantomData,
        }
    }

    /// Sets the base directory. The cache creates a per-value-type directory below it.
    #[must_use]
    pub fn directory(mut self, base: impl AsRef<Path>) -> Self {
        self.base_directory = Some(base.as_ref().to_path_buf());
        self
    }

    /// Sets the disk quota in bytes.
    #[must_use]
    pub fn disk_limit_bytes(mut self, limit: u64) -> Self {
        self.disk_limit_bytes = limit;
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
    /// No I/O happens here; the directory is created by the first write.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::InvalidArgument`](stratum_tier::ErrorKind::InvalidArgument)
    /// error if the disk quota is zero.
    pub fn build(self) -> Result<DiskCacheProvider<K, V>>
    where
        K: CacheKey,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        if self.disk_limit_bytes == 0 {
            return Err(Error::invalid_argument("disk limit must be greater than zero"));
        }

        let base = self.base_directory.clone().unwrap_or_else(default_base_directory);
        let directory = base.join(type_directory_name::<V>());
        Ok(DiskCacheProvider::from_builder(self, directory))
    }
}

/// The per-user base directory used when none is configured.
#[must_use]
pub fn default_base_directory() -> PathBuf {
    resolve_base_directory(|name| env::var_os(name))
}

fn resolve_base_directory(var: impl Fn(&str) -> Option<OsString>) -> PathBuf {
    let non_empty = |name: &str| var(name).filter(|value| !value.is_empty()).map(PathBuf::from);

    non_empty("LOCALAPPDATA")
        .or_else(|| non_empty("XDG_CACHE_HOME"))
        .or_else(|| non_empty("HOME").map(|home| home.join(".cache")))
        .unwrap_or_else(env::temp_dir)
        .join(APPLICATION_DIRECTORY)
}
