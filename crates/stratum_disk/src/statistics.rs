// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// A point-in-time view of a [`DiskCacheProvider`](crate::DiskCacheProvider)'s usage.
///
/// Computed by scanning the cache directory, so it reflects every completed
/// write and delete.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DiskStatistics {
    /// Number of record files.
    pub file_count: usize,
    /// Sum of the lengths of the record files.
    pub disk_used_bytes: u64,
    /// The configured quota.
    pub disk_limit_bytes: u64,
    /// `disk_used_bytes` as a percentage of `disk_limit_bytes`.
    pub usage_percentage: f64,
}

impl DiskStatistics {
    #[expect(clippy::cast_precision_loss, reason = "a percentage does not need full precision")]
    pub(crate) fn new(file_count: usize, disk_used_bytes: u64, disk_limit_bytes: u64) -> Self {
        let usage_percentage = if disk_limit_bytes == 0 {
            0.0
        } else {
            disk_used_bytes as f64 / disk_limit_bytes as f64 * 100.0
        };

        Self {
            file_count,
            disk_used_bytes,
            disk_limit_bytes,
            usage_percentage,
        }
    }
}
