// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache operations.

use std::fmt;

/// Classifies an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The caller passed an unusable argument, such as an empty key.
    InvalidArgument,
    /// The cache was disposed and no longer accepts operations.
    Disposed,
    /// A value factory failed. The cause carries the factory's own error.
    Factory,
}

impl ErrorKind {
    /// Returns a short, stable name for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::Disposed => "disposed",
            Self::Factory => "factory",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a cache operation.
///
/// Storage failures are never surfaced through this type: providers log them
/// and degrade to a miss or a no-op. Callers only see argument errors, use
/// after disposal and failures of their own value factories.
///
/// # Example
///
/// ```
/// use stratum_tier::{Error, ErrorKind};
///
/// let error = Error::invalid_argument("cache key must not be empty");
/// assert_eq!(error.kind(), ErrorKind::InvalidArgument);
/// ```
#[ohno::error]
#[display("cache operation failed: {kind}")]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Creates an [`ErrorKind::InvalidArgument`] error with the given message.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::caused_by(ErrorKind::InvalidArgument, message.into())
    }

    /// Creates an [`ErrorKind::Disposed`] error.
    #[must_use]
    pub fn disposed() -> Self {
        Self::caused_by(ErrorKind::Disposed, "the cache has been disposed")
    }

    /// Wraps the failure of a value factory.
    pub fn factory(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Factory, cause)
    }

    /// Returns the kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// A specialized [`Result`] type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_contains_kind_and_cause() {
        let error = Error::invalid_argument("key is empty");
        let display = format!("{error}");
        assert!(display.contains("invalid_argument"), "got: {display}");
        assert!(display.contains("key is empty"), "got: {display}");
    }

    #[test]
    fn factory_error_keeps_source() {
        let io = std::io::Error::other("backend unreachable");
        let error = Error::factory(io);
        assert_eq!(error.kind(), ErrorKind::Factory);
        assert!(format!("{error:?}").contains("backend unreachable"));
    }

    #[test]
    fn disposed_error_has_disposed_kind() {
        fn returns_err() -> Result<i32> {
            Err(Error::disposed())
        }

        let err = returns_err().expect_err("should return an error");
        assert_eq!(err.kind(), ErrorKind::Disposed);
    }
}
