// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A two-level cache: a byte-budgeted memory tier in front of a persistent disk tier.
//!
//! [`TwoLevelCache`] combines a [`MemoryCacheProvider`] (L1) and a
//! [`DiskCacheProvider`] (L2) behind the [`CacheProvider`] trait they all
//! implement. Each write chooses its tier through [`CacheEntryOptions`]; reads
//! check memory first and promote disk hits into memory.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use stratum::{CacheEntryOptions, CacheProvider, Priority, TwoLevelCache};
//! use tick::Clock;
//!
//! # async fn example(clock: Clock) -> stratum::Result<()> {
//! let cache = TwoLevelCache::<String, Vec<u8>>::builder(clock)
//!     .memory_limit_bytes(64 * 1024 * 1024)
//!     .disk_limit_bytes(1024 * 1024 * 1024)
//!     .build()?;
//!
//! let options = CacheEntryOptions::new()
//!     .with_sliding_expiration(Duration::from_secs(600))
//!     .with_priority(Priority::High)
//!     .with_size_bytes(3);
//!
//! let key = "thumbnail:42".to_string();
//! let bytes = cache.get_or_create(&key, || async { vec![1, 2, 3] }, &options).await?;
//! assert_eq!(bytes, vec![1, 2, 3]);
//!
//! cache.dispose().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Tier routing**: `MemoryOnly`, `DiskOnly` or `Both` per write
//! - **Promotion**: disk hits are copied into memory
//! - **Single-flight**: concurrent `get_or_create` calls for a cold key run one factory
//! - **Expiration**: absolute and sliding deadlines, checked lazily on read
//! - **Bounded**: priority-aware LRU eviction in both tiers
//! - **Crash-safe**: checksummed disk records written through a temporary file
//! - **Reconciliation**: memory copies of values the disk tier lost are dropped periodically
//! - **Logging**: every operation emits structured `tracing` events
//!
//! # Errors
//!
//! Storage failures are logged and turn into misses or skipped writes. Only
//! invalid arguments, failed factories and use after
//! [`dispose`](TwoLevelCache::dispose) surface as an [`Error`].

pub mod builder;
mod cache;
mod statistics;
mod sync;

#[doc(inline)]
pub use builder::TwoLevelCacheBuilder;
#[doc(inline)]
pub use cache::TwoLevelCache;
#[doc(inline)]
pub use statistics::{SyncReport, TwoLevelStatistics};
#[doc(inline)]
pub use stratum_disk::{DiskCacheProvider, DiskCacheProviderBuilder, DiskStatistics};
#[doc(inline)]
pub use stratum_memory::{MemoryCacheProvider, MemoryCacheProviderBuilder, MemoryStatistics};
#[doc(inline)]
pub use stratum_tier::{
    CacheEntry, CacheEntryOptions, CacheKey, CacheProvider, EntryMetadata, Error, ErrorKind, Priority, Result, Tier,
};
