// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A quota-bounded persistent cache provider.
//!
//! [`DiskCacheProvider`] implements [`CacheProvider`](stratum_tier::CacheProvider)
//! by storing one file per key under a per-value-type directory. Use
//! [`DiskCacheProviderBuilder`] to configure the location and the quota.
//!
//! # Quick Start
//!
//! ```no_run
//! use stratum_disk::DiskCacheProvider;
//! use stratum_tier::{CacheEntryOptions, CacheProvider};
//! use tick::Clock;
//!
//! # async fn example(clock: Clock) -> stratum_tier::Result<()> {
//! let cache = DiskCacheProvider::<String, Vec<u32>>::builder(clock)
//!     .disk_limit_bytes(64 * 1024 * 1024)
//!     .build()?;
//!
//! cache.set(&"primes".to_string(), vec![2, 3, 5, 7], &CacheEntryOptions::long_lived()).await?;
//! assert_eq!(cache.get(&"primes".to_string()).await?, Some(vec![2, 3, 5, 7]));
//! # Ok(())
//! # }
//! ```
//!
//! # Storage
//!
//! - **File names**: the key with unportable characters replaced, plus an 8 digit hash of the key
//! - **Records**: a versioned header, an xxh3 checksum, then bincode-encoded metadata and value
//! - **Atomic writes**: records are written to a temporary file and renamed into place
//! - **Corruption**: an undecodable record reads as a miss and is deleted
//! - **Quota**: writes evict least recently used records, keeping `High` ones as a last resort

pub mod builder;
mod codec;
mod path;
mod provider;
mod scan;
mod statistics;

#[doc(inline)]
pub use builder::DiskCacheProviderBuilder;
#[doc(inline)]
pub use provider::DiskCacheProvider;
#[doc(inline)]
pub use statistics::DiskStatistics;
