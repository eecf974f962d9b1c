// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logging of cache events.

use std::{fmt::Display, time::Duration};

use tracing::Level;

/// The cache operation an event belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CacheOperation {
    /// Construction of a cache.
    Start,
    /// A lookup.
    Get,
    /// A write.
    Set,
    /// An explicit removal.
    Remove,
    /// An existence check.
    ContainsKey,
    /// Removal of every entry.
    Clear,
    /// A lookup that falls back to a value factory.
    GetOrCreate,
    /// Capacity-driven removal.
    Evict,
    /// Reconciliation between cache tiers.
    Synchronize,
    /// A usage report.
    Statistics,
    /// Teardown of a cache.
    Dispose,
}

impl CacheOperation {
    /// Returns the name used in the `cache.operation` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "cache.start",
            Self::Get => "cache.get",
            Self::Set => "cache.set",
            Self::Remove => "cache.remove",
            Self::ContainsKey => "cache.contains_key",
            Self::Clear => "cache.clear",
            Self::GetOrCreate => "cache.get_or_create",
            Self::Evict => "cache.evict",
            Self::Synchronize => "cache.synchronize",
            Self::Statistics => "cache.statistics",
            Self::Dispose => "cache.dispose",
        }
    }
}

/// What happened during a cache operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CacheActivity {
    /// A live entry was found.
    Hit,
    /// No entry was found.
    Miss,
    /// An entry was found but had expired and was removed.
    Expired,
    /// An entry was stored.
    Inserted,
    /// An entry was removed on request.
    Removed,
    /// An entry was copied into a faster tier.
    Promoted,
    /// A write was not applied to this tier.
    Rejected,
    /// The cache was constructed.
    Started,
    /// All entries were removed.
    Cleared,
    /// The cache was torn down.
    Disposed,
    /// A reconciliation pass completed.
    Synchronized,
    /// An entry was removed to reclaim space.
    Evicted,
    /// A persisted entry could not be decoded and was discarded.
    Corrupted,
    /// A write proceeded although the size budget could not be satisfied.
    OverBudget,
    /// Background work could not be scheduled.
    Unscheduled,
    /// A storage failure was absorbed.
    Error,
}

impl CacheActivity {
    /// Returns the name used in the `cache.activity` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::Miss => "cache.miss",
            Self::Expired => "cache.expired",
            Self::Inserted => "cache.inserted",
            Self::Removed => "cache.removed",
            Self::Promoted => "cache.promoted",
            Self::Rejected => "cache.rejected",
            Self::Started => "cache.started",
            Self::Cleared => "cache.cleared",
            Self::Disposed => "cache.disposed",
            Self::Synchronized => "cache.synchronized",
            Self::Evicted => "cache.evicted",
            Self::Corrupted => "cache.corrupted",
            Self::OverBudget => "cache.over_budget",
            Self::Unscheduled => "cache.unscheduled",
            Self::Error => "cache.error",
        }
    }

    /// Returns the level events with this activity are logged at.
    #[must_use]
    pub const fn level(self) -> Level {
        match self {
            Self::Hit | Self::Miss | Self::Expired | Self::Inserted | Self::Removed | Self::Promoted | Self::Rejected => Level::DEBUG,
            Self::Started | Self::Cleared | Self::Disposed | Self::Synchronized => Level::INFO,
            Self::Evicted | Self::Corrupted | Self::OverBudget | Self::Unscheduled => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

/// Emits cache events as `tracing` events.
///
/// Every event carries the `cache.name`, `cache.operation` and `cache.activity`
/// fields, plus `cache.duration_ns` when a duration was measured. Which
/// subscriber receives them is up to the host application.
#[derive(Clone, Copy, Debug)]
pub struct CacheTelemetry {
    name: &'static str,
    logging_enabled: bool,
}

impl CacheTelemetry {
    /// Creates a telemetry handle for the cache called `name`.
    #[must_use]
    pub const fn new(name: &'static str, logging_enabled: bool) -> Self {
        Self { name, logging_enabled }
    }

    /// The cache name attached to every event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if events are emitted.
    #[must_use]
    pub const fn logging_enabled(&self) -> bool {
        self.logging_enabled
    }

    /// Records a cache event.
    #[inline]
    pub fn record(&self, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>) {
        if self.logging_enabled {
            emit(self.name, operation, activity, duration, None);
        }
    }

    /// Records a cache event with a human-readable detail, such as the error that was absorbed.
    #[inline]
    pub fn record_detail(&self, operation: CacheOperation, activity: CacheActivity, detail: &dyn Display) {
        if self.logging_enabled {
            emit(self.name, operation, activity, None, Some(detail));
        }
    }
}

fn emit(name: &'static str, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>, detail: Option<&dyn Display>) {
    let op = operation.as_str();
    let ev = activity.as_str();
    let duration_ns = duration.map(|d| d.as_nanos());

    // Tracing levels must be constant, so each one gets its own expansion.
    macro_rules! emit_event {
        ($level:ident) => {
            match detail {
                Some(detail) => tracing::$level!(
                    cache.name = name,
                    cache.operation = op,
                    cache.activity = ev,
                    cache.duration_ns = ?duration_ns,
                    cache.detail = %detail,
                    "cache.event"
                ),
                None => tracing::$level!(
                    cache.name = name,
                    cache.operation = op,
                    cache.activity = ev,
                    cache.duration_ns = ?duration_ns,
                    "cache.event"
                ),
            }
        };
    }

    match activity.level() {
        Level::ERROR => emit_event!(error),
        Level::WARN => emit_event!(warn),
        Level::INFO => emit_event!(info),
        _ => emit_event!(debug),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LogCapture;

    #[test]
    fn record_emits_fields() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        let telemetry = CacheTelemetry::new("orders", true);
        telemetry.record(CacheOperation::Get, CacheActivity::Hit, Some(Duration::from_nanos(42)));

        capture.assert_contains("cache.event");
        capture.assert_contains("orders");
        capture.assert_contains("cache.get");
        capture.assert_contains("cache.hit");
        capture.assert_contains("42");
        capture.assert_contains("DEBUG");
    }

    #[test]
    fn record_detail_uses_activity_level() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        let telemetry = CacheTelemetry::new("files", true);
        telemetry.record_detail(CacheOperation::Set, CacheActivity::Error, &"permission denied");
        telemetry.record(CacheOperation::Evict, CacheActivity::Evicted, None);

        capture.assert_contains("ERROR");
        capture.assert_contains("permission denied");
        capture.assert_contains("WARN");
        capture.assert_contains("cache.evicted");
    }

    #[test]
    fn disabled_logging_emits_nothing() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        let telemetry = CacheTelemetry::new("quiet", false);
        telemetry.record(CacheOperation::Clear, CacheActivity::Cleared, None);

        assert!(capture.output().is_empty());
        assert!(!telemetry.logging_enabled());
    }

    #[test]
    fn operation_names() {
        assert_eq!(CacheOperation::GetOrCreate.as_str(), "cache.get_or_create");
        assert_eq!(CacheOperation::Statistics.as_str(), "cache.statistics");
    }

    #[test]
    fn activity_levels() {
        assert_eq!(CacheActivity::Promoted.level(), Level::DEBUG);
        assert_eq!(CacheActivity::Synchronized.level(), Level::INFO);
        assert_eq!(CacheActivity::Corrupted.level(), Level::WARN);
        assert_eq!(CacheActivity::Unscheduled.level(), Level::WARN);
        assert_eq!(CacheActivity::Error.level(), Level::ERROR);
    }
}
