// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A byte-budgeted in-process cache provider.
//!
//! [`MemoryCacheProvider`] implements [`CacheProvider`](stratum_tier::CacheProvider)
//! on top of a hash map guarded by a single reader/writer lock. Use
//! [`MemoryCacheProviderBuilder`] to configure the byte budget.
//!
//! # Quick Start
//!
//! ```
//! use stratum_memory::MemoryCacheProvider;
//! use stratum_tier::{CacheEntryOptions, CacheProvider};
//! use tick::Clock;
//!
//! # fn example(clock: Clock) -> stratum_tier::Result<()> {
//! # futures::executor::block_on(async {
//! let cache = MemoryCacheProvider::<String, String>::builder(clock)
//!     .memory_limit_bytes(1024 * 1024)
//!     .build()?;
//!
//! let greeting = cache
//!     .get_or_create(&"greeting".to_string(), || async { "hello".to_string() }, &CacheEntryOptions::standard())
//!     .await?;
//! assert_eq!(greeting, "hello");
//! # Ok(())
//! # })
//! # }
//! ```
//!
//! # Features
//!
//! - **Byte budget**: entries written with a size hint count against a configurable limit
//! - **Priority-aware LRU**: low priority entries go first, `NeverRemove` entries never do
//! - **Lazy expiration**: absolute and sliding deadlines are checked on every read
//! - **Single-flight**: concurrent `get_or_create` calls for a cold key run one factory
//! - **Tier-aware**: `DiskOnly` writes are rejected as no-ops

pub mod builder;
mod provider;
mod statistics;

#[doc(inline)]
pub use builder::MemoryCacheProviderBuilder;
#[doc(inline)]
pub use provider::MemoryCacheProvider;
#[doc(inline)]
pub use statistics::MemoryStatistics;
