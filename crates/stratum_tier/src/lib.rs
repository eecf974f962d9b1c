// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Core abstractions shared by the stratum cache providers.
//!
//! This crate defines the [`CacheProvider`] trait implemented by the memory,
//! disk and two-level caches, together with the pieces they have in common:
//!
//! - [`CacheEntryOptions`], [`Tier`] and [`Priority`] describe how a single
//!   value is stored.
//! - [`EntryMetadata`] and [`CacheEntry`] hold the bookkeeping for a stored
//!   value and implement the expiration rules.
//! - [`CacheKey`] is the bound on keys.
//! - [`KeyedLocks`] hands out per-key asynchronous locks.
//! - [`CacheTelemetry`] turns cache events into `tracing` events.
//! - [`Error`] is the error type of every fallible operation.
//!
//! # Expiration
//!
//! An entry is live until its absolute deadline is reached or until a full
//! sliding window passes without a successful read, whichever comes first.
//! Expired entries are detected lazily when they are read.
//!
//! ```
//! use std::time::{Duration, SystemTime};
//!
//! use stratum_tier::{CacheEntry, CacheEntryOptions};
//!
//! let written = SystemTime::UNIX_EPOCH;
//! let options = CacheEntryOptions::new().with_absolute_expiration_relative_to_now(Duration::from_secs(60));
//! let entry = CacheEntry::from_options("value", &options, written);
//!
//! assert!(!entry.metadata().is_expired(written + Duration::from_secs(59)));
//! assert!(entry.metadata().is_expired(written + Duration::from_secs(60)));
//! ```

mod entry;
pub mod error;
mod key;
mod locks;
mod options;
mod provider;
pub mod telemetry;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use entry::{CacheEntry, EntryMetadata};
#[doc(inline)]
pub use error::{Error, ErrorKind, Result};
#[doc(inline)]
pub use key::CacheKey;
#[doc(inline)]
pub use locks::{KeyGuard, KeyedLocks};
#[doc(inline)]
pub use options::{CacheEntryOptions, Priority, Tier};
#[doc(inline)]
pub use provider::CacheProvider;
#[doc(inline)]
pub use telemetry::{CacheActivity, CacheOperation, CacheTelemetry};
