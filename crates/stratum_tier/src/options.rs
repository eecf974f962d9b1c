// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-write cache entry configuration.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Selects which backing stores a write targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Only the in-process memory store.
    MemoryOnly,
    /// Only the persistent disk store.
    DiskOnly,
    /// Both stores.
    #[default]
    Both,
}

impl Tier {
    /// Returns `true` if writes with this tier reach the memory store.
    #[must_use]
    pub const fn includes_memory(self) -> bool {
        matches!(self, Self::MemoryOnly | Self::Both)
    }

    /// Returns `true` if writes with this tier reach the disk store.
    #[must_use]
    pub const fn includes_disk(self) -> bool {
        matches!(self, Self::DiskOnly | Self::Both)
    }
}

/// Eviction class of an entry.
///
/// Priorities are ordered `Low < Normal < High < NeverRemove`. Entries with
/// [`Priority::NeverRemove`] are never evicted to reclaim space, although
/// they still expire and can still be removed explicitly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// First to go under pressure.
    Low,
    /// The default.
    #[default]
    Normal,
    /// Evicted only as a last resort.
    High,
    /// Exempt from capacity-driven eviction.
    NeverRemove,
}

impl Priority {
    /// Returns `true` if capacity-driven eviction may remove entries of this priority.
    #[must_use]
    pub const fn is_evictable(self) -> bool {
        !matches!(self, Self::NeverRemove)
    }
}

/// Options describing how a single value is stored.
///
/// The type is a plain value: each `with_*` method returns a modified copy,
/// leaving the original untouched.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use stratum_tier::{CacheEntryOptions, Priority, Tier};
///
/// let options = CacheEntryOptions::standard()
///     .with_priority(Priority::High)
///     .with_size_bytes(4096);
///
/// assert_eq!(options.sliding_expiration(), Some(Duration::from_secs(600)));
/// assert_eq!(options.tier(), Tier::Both);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheEntryOptions {
    tier: Tier,
    absolute_expiration: Option<SystemTime>,
    absolute_expiration_relative_to_now: Option<Duration>,
    sliding_expiration: Option<Duration>,
    priority: Priority,
    size_bytes: Option<u64>,
}

impl CacheEntryOptions {
    /// Options with no expiration, `Normal` priority and the `Both` tier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A 10 minute sliding window with `Normal` priority.
    #[must_use]
    pub fn standard() -> Self {
        Self::new().with_sliding_expiration(Duration::from_secs(10 * 60))
    }

    /// Expires one minute after the write, `Low` priority, memory only.
    #[must_use]
    pub fn short_lived() -> Self {
        Self::new()
            .with_absolute_expiration_relative_to_now(Duration::from_secs(60))
            .with_priority(Priority::Low)
            .with_tier(Tier::MemoryOnly)
    }

    /// A one hour sliding window with `High` priority.
    #[must_use]
    pub fn long_lived() -> Self {
        Self::new()
            .with_sliding_expiration(Duration::from_secs(60 * 60))
            .with_priority(Priority::High)
    }

    /// No expiration and `High` priority.
    ///
    /// This does not imply [`Priority::NeverRemove`]; such entries can still be
    /// evicted under sustained pressure. Combine with
    /// [`with_priority`](Self::with_priority) to pin an entry.
    #[must_use]
    pub fn never_expire() -> Self {
        Self::new().with_priority(Priority::High)
    }

    /// Sets the target tier.
    #[must_use]
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Sets a fixed wall-clock deadline.
    #[must_use]
    pub fn with_absolute_expiration(mut self, deadline: SystemTime) -> Self {
        self.absolute_expiration = Some(deadline);
        self
    }

    /// Sets a deadline measured from the moment the entry is written.
    #[must_use]
    pub fn with_absolute_expiration_relative_to_now(mut self, ttl: Duration) -> Self {
        self.absolute_expiration_relative_to_now = Some(ttl);
        self
    }

    /// Sets a time-to-live measured from the most recent read.
    #[must_use]
    pub fn with_sliding_expiration(mut self, window: Duration) -> Self {
        self.sliding_expiration = Some(window);
        self
    }

    /// Sets the eviction priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the size hint used for capacity accounting.
    #[must_use]
    pub fn with_size_bytes(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }

    /// The target tier.
    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// The fixed deadline, if any.
    #[must_use]
    pub fn absolute_expiration(&self) -> Option<SystemTime> {
        self.absolute_expiration
    }

    /// The deadline relative to the write, if any.
    #[must_use]
    pub fn absolute_expiration_relative_to_now(&self) -> Option<Duration> {
        self.absolute_expiration_relative_to_now
    }

    /// The sliding window, if any.
    #[must_use]
    pub fn sliding_expiration(&self) -> Option<Duration> {
        self.sliding_expiration
    }

    /// The eviction priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// The size hint, if any.
    #[must_use]
    pub fn size_bytes(&self) -> Option<u64> {
        self.size_bytes
    }

    /// Resolves the effective deadline for an entry written at `now`.
    ///
    /// When both a fixed and a relative deadline are configured the earlier one wins.
    #[must_use]
    pub fn resolve_absolute_expiration(&self, now: SystemTime) -> Option<SystemTime> {
        let relative = self.absolute_expiration_relative_to_now.and_then(|ttl| now.checked_add(ttl));

        match (self.absolute_expiration, relative) {
            (Some(fixed), Some(relative)) => Some(fixed.min(relative)),
            (fixed, relative) => fixed.or(relative),
        }
    }
}
