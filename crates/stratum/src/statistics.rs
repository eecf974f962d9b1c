// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use stratum_disk::DiskStatistics;
use stratum_memory::MemoryStatistics;

/// A point-in-time view of both tiers of a [`TwoLevelCache`](crate::TwoLevelCache).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TwoLevelStatistics {
    /// Usage of the memory tier.
    pub memory: MemoryStatistics,
    /// Usage of the disk tier.
    pub disk: DiskStatistics,
}

/// The outcome of one reconciliation pass between the tiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Memory entries that were checked against the disk tier.
    pub examined: usize,
    /// Memory entries removed because their disk copy was gone.
    pub evicted: usize,
}
