//! Policy statistics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one policy.
///
/// Monotonic for the lifetime of the policy; never reset.
#[derive(Debug, Default)]
pub struct PolicyStats {
    /// Successful writes, explicit or after generation.
    sets: AtomicU64,

    /// Calls to `get`.
    gets: AtomicU64,

    /// Reads that found a record, fresh or stale.
    hits: AtomicU64,

    /// Generation bursts triggered by a stale record.
    stales: AtomicU64,

    /// Generator invocations.
    generates: AtomicU64,

    /// Backend, generator and timeout failures.
    errors: AtomicU64,
}

impl PolicyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self) {
        self.stales.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_generate(&self) {
        self.generates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sets: self.sets.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            stales: self.stales.load(Ordering::Relaxed),
            generates: self.generates.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PolicyStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub sets: u64,
    pub gets: u64,
    pub hits: u64,
    pub stales: u64,
    pub generates: u64,
    pub errors: u64,
}

impl StatsSnapshot {
    /// Fraction of gets that found a record. Zero before the first get.
    pub fn hit_rate(&self) -> f64 {
        if self.gets == 0 {
            return 0.0;
        }
        self.hits as f64 / self.gets as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = PolicyStats::new();
        stats.record_get();
        stats.record_get();
        stats.record_hit();
        stats.record_error();
        stats.record_set();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.gets, 2);
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.sets, 1);
        assert_eq!(snapshot.generates, 0);
        assert!((snapshot.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hit_rate_without_gets() {
        assert_eq!(StatsSnapshot::default().hit_rate(), 0.0);
    }
}
