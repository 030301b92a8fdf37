//! Hit/miss accounting for one cache instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Counters owned by a single [`TenantCache`](crate::TenantCache).
///
/// Every counter only grows; they reset when the process restarts.
#[derive(Debug, Default)]
pub struct StatsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
    latency_samples: AtomicU64,
    latency_total_micros: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.latency_total_micros
            .fetch_add(micros, Ordering::Relaxed);
    }

    /// Read the counters. `total_keys` is supplied by the caller since the
    /// collector does not see the store.
    pub fn snapshot(&self, total_keys: u64) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let total_micros = self.latency_total_micros.load(Ordering::Relaxed);

        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };
        let average_latency_ms = if samples == 0 {
            0.0
        } else {
            total_micros as f64 / samples as f64 / 1000.0
        };

        CacheStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate,
            average_latency_ms,
            total_keys,
        }
    }
}

/// Point-in-time view of cache usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
    /// `hits / (hits + misses)`, 0.0 before the first lookup.
    pub hit_rate: f64,
    pub average_latency_ms: f64,
    pub total_keys: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let stats = StatsCollector::new().snapshot(0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hit_rate, 0.0);
        assert_eq!(stats.average_latency_ms, 0.0);
    }

    #[test]
    fn test_hit_rate() {
        let collector = StatsCollector::new();
        for _ in 0..3 {
            collector.record_miss();
        }
        for _ in 0..7 {
            collector.record_hit();
        }

        let stats = collector.snapshot(5);
        assert_eq!(stats.hits, 7);
        assert_eq!(stats.misses, 3);
        assert!((stats.hit_rate - 0.7).abs() < f64::EPSILON);
        assert_eq!(stats.total_keys, 5);
    }

    #[test]
    fn test_average_latency() {
        let collector = StatsCollector::new();
        collector.record_latency(Duration::from_millis(2));
        collector.record_latency(Duration::from_millis(4));

        let stats = collector.snapshot(0);
        assert!((stats.average_latency_ms - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let collector = StatsCollector::new();
        collector.record_set();
        collector.record_error();

        assert_eq!(collector.snapshot(0), collector.snapshot(0));
        assert_eq!(collector.snapshot(0).sets, 1);
        assert_eq!(collector.snapshot(0).errors, 1);
    }
}
