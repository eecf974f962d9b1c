// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Key requirements shared by all cache providers.

use std::{borrow::Cow, hash::Hash, sync::Arc};

use crate::{Error, Result};

/// A type that can be used as a cache key.
///
/// Besides the usual map requirements, a key exposes a textual view. The disk
/// provider derives file names from it and every provider rejects keys whose
/// textual view is empty.
///
/// # Examples
///
/// ```
/// use stratum_tier::CacheKey;
///
/// assert_eq!("user:42".to_string().key_str(), "user:42");
/// assert_eq!(42_u64.key_str(), "42");
/// assert!("".to_string().validate().is_err());
/// ```
pub trait CacheKey: Clone + Eq + Hash + Send + Sync + 'static {
    /// Returns the textual view of this key.
    fn key_str(&self) -> Cow<'_, str>;

    /// Checks that the key can be used for a cache operation.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::InvalidArgument`](crate::ErrorKind::InvalidArgument)
    /// error when the key is empty.
    fn validate(&self) -> Result<()> {
        if self.key_str().is_empty() {
            Err(Error::invalid_argument("cache key must not be empty"))
        } else {
            Ok(())
        }
    }
}

impl CacheKey for String {
    fn key_str(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl CacheKey for &'static str {
    fn key_str(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl CacheKey for Arc<str> {
    fn key_str(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl CacheKey for Box<str> {
    fn key_str(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

macro_rules! integer_keys {
    ($($ty:ty),* $(,)?) => {
        $(
            impl CacheKey for $ty {
                fn key_str(&self) -> Cow<'_, str> {
                    Cow::Owned(self.to_string())
                }
            }
        )*
    };
}

integer_keys!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);
