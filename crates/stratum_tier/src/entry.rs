// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    ops::Deref,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};

use crate::{CacheEntryOptions, Priority};

/// Bookkeeping stored alongside every cached value.
///
/// The disk provider persists this record next to the serialized value, so its
/// fields must stay serializable.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, SystemTime};
///
/// use stratum_tier::{CacheEntryOptions, EntryMetadata};
///
/// let written = SystemTime::UNIX_EPOCH;
/// let options = CacheEntryOptions::new().with_sliding_expiration(Duration::from_secs(10));
/// let metadata = EntryMetadata::from_options(&options, written);
///
/// assert!(!metadata.is_expired(written + Duration::from_secs(9)));
/// assert!(metadata.is_expired(written + Duration::from_secs(10)));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    created_at: SystemTime,
    last_accessed_at: SystemTime,
    absolute_expiration: Option<SystemTime>,
    sliding_expiration: Option<Duration>,
    size_bytes: Option<u64>,
    priority: Priority,
}

impl EntryMetadata {
    /// Creates metadata for an entry written at `now` with the given options.
    #[must_use]
    pub fn from_options(options: &CacheEntryOptions, now: SystemTime) -> Self {
        Self {
            created_at: now,
            last_accessed_at: now,
            absolute_expiration: options.resolve_absolute_expiration(now),
            sliding_expiration: options.sliding_expiration(),
            size_bytes: options.size_bytes(),
            priority: options.priority(),
        }
    }

    /// When the entry was written.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// When the entry was last written or successfully read.
    #[must_use]
    pub fn last_accessed_at(&self) -> SystemTime {
        self.last_accessed_at
    }

    /// The resolved hard deadline, if any.
    #[must_use]
    pub fn absolute_expiration(&self) -> Option<SystemTime> {
        self.absolute_expiration
    }

    /// The sliding window, if any.
    #[must_use]
    pub fn sliding_expiration(&self) -> Option<Duration> {
        self.sliding_expiration
    }

    /// The size used for capacity accounting, if known.
    #[must_use]
    pub fn size_bytes(&self) -> Option<u64> {
        self.size_bytes
    }

    /// Replaces the size used for capacity accounting.
    pub fn set_size_bytes(&mut self, size_bytes: u64) {
        self.size_bytes = Some(size_bytes);
    }

    /// The eviction priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Records a successful read at `now`, restarting the sliding window.
    pub fn touch(&mut self, now: SystemTime) {
        self.last_accessed_at = now;
    }

    /// Returns `true` if the entry is no longer live at `now`.
    ///
    /// An entry expires once its hard deadline is reached or once a full sliding
    /// window has passed since the last access, whichever happens first.
    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        if self.absolute_expiration.is_some_and(|deadline| now >= deadline) {
            return true;
        }

        match self.sliding_expiration {
            Some(window) => match now.duration_since(self.last_accessed_at) {
                Ok(idle) => idle >= window,
                // The clock went backwards; we cannot tell how long the entry was idle.
                Err(_) => true,
            },
            None => false,
        }
    }
}

/// A cached value together with its [`EntryMetadata`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry<V> {
    value: V,
    metadata: EntryMetadata,
}

impl<V> CacheEntry<V> {
    /// Creates an entry from a value and its metadata.
    pub fn new(value: V, metadata: EntryMetadata) -> Self {
        Self { value, metadata }
    }

    /// Creates an entry for `value` written at `now` with the given options.
    pub fn from_options(value: V, options: &CacheEntryOptions, now: SystemTime) -> Self {
        Self::new(value, EntryMetadata::from_options(options, now))
    }

    /// Returns a reference to the cached value.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Returns the entry metadata.
    #[must_use]
    pub fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }

    /// Returns the entry metadata mutably.
    pub fn metadata_mut(&mut self) -> &mut EntryMetadata {
        &mut self.metadata
    }

    /// Consumes the entry and returns the inner value.
    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }

    /// Splits the entry into its value and metadata.
    #[must_use]
    pub fn into_parts(self) -> (V, EntryMetadata) {
        (self.value, self.metadata)
    }
}

impl<V> Deref for CacheEntry<V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}
