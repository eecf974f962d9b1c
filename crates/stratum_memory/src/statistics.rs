// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// A point-in-time view of a [`MemoryCacheProvider`](crate::MemoryCacheProvider)'s usage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemoryStatistics {
    /// Number of stored entries.
    pub item_count: usize,
    /// Sum of the size hints of the stored entries.
    pub memory_used_bytes: u64,
    /// The configured byte budget.
    pub memory_limit_bytes: u64,
    /// `memory_used_bytes` as a percentage of `memory_limit_bytes`.
    pub usage_percentage: f64,
}

impl MemoryStatistics {
    #[expect(clippy::cast_precision_loss, reason = "a percentage does not need full precision")]
    pub(crate) fn new(item_count: usize, memory_used_bytes: u64, memory_limit_bytes: u64) -> Self {
        let usage_percentage = if memory_limit_bytes == 0 {
            0.0
        } else {
            memory_used_bytes as f64 / memory_limit_bytes as f64 * 100.0
        };

        Self {
            item_count,
            memory_used_bytes,
            memory_limit_bytes,
            usage_percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_percentage() {
        let stats = MemoryStatistics::new(3, 25, 100);
        assert!((stats.usage_percentage - 25.0).abs() < f64::EPSILON);
        assert!(MemoryStatistics::new(0, 0, 0).usage_percentage.abs() < f64::EPSILON);
    }
}
