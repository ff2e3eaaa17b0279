//! Cache statistics and metrics tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters describing cache behavior since construction.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Current number of stored entries, including any awaiting lazy expiry.
    pub size: usize,

    /// Lookups answered from a live entry.
    pub hits: u64,

    /// Lookups that found no live entry.
    pub misses: u64,

    /// Entries written (fresh loads and manual inserts).
    pub inserts: u64,

    /// Entries dropped because their TTL had passed.
    pub expirations: u64,

    /// Entries removed by explicit invalidation.
    pub invalidations: u64,

    /// Loader invocations that failed (and therefore cached nothing).
    pub load_failures: u64,
}

impl CacheStats {
    /// Hit rate over all accesses, 0.0 when nothing has been looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Miss rate over all accesses.
    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }

    /// Total lookups (hits + misses).
    pub fn total_accesses(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Lock-free collector shared by cache clones.
#[derive(Debug)]
pub(crate) struct StatsCollector {
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    inserts: Arc<AtomicU64>,
    expirations: Arc<AtomicU64>,
    invalidations: Arc<AtomicU64>,
    load_failures: Arc<AtomicU64>,
}

impl Clone for StatsCollector {
    fn clone(&self) -> Self {
        Self {
            hits: Arc::clone(&self.hits),
            misses: Arc::clone(&self.misses),
            inserts: Arc::clone(&self.inserts),
            expirations: Arc::clone(&self.expirations),
            invalidations: Arc::clone(&self.invalidations),
            load_failures: Arc::clone(&self.load_failures),
        }
    }
}

impl StatsCollector {
    pub(crate) fn new() -> Self {
        Self {
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            inserts: Arc::new(AtomicU64::new(0)),
            expirations: Arc::new(AtomicU64::new(0)),
            invalidations: Arc::new(AtomicU64::new(0)),
            load_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, size: usize) -> CacheStats {
        CacheStats {
            size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_over_mixed_accesses() {
        let stats = CacheStats { hits: 80, misses: 20, ..Default::default() };

        assert!((stats.hit_rate() - 0.8).abs() < 1e-10);
        assert!((stats.miss_rate() - 0.2).abs() < 1e-10);
        assert_eq!(stats.total_accesses(), 100);
    }

    #[test]
    fn hit_rate_with_no_accesses_is_zero() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 1.0);
    }

    #[test]
    fn collector_snapshot_reflects_recorded_events() {
        let collector = StatsCollector::new();

        collector.record_hit();
        collector.record_miss();
        collector.record_insert();
        collector.record_expirations(2);
        collector.record_invalidations(3);
        collector.record_load_failure();

        let stats = collector.snapshot(7);
        assert_eq!(stats.size, 7);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.inserts, 1);
        assert_eq!(stats.expirations, 2);
        assert_eq!(stats.invalidations, 3);
        assert_eq!(stats.load_failures, 1);
    }

    #[test]
    fn collector_clones_share_counters() {
        let collector = StatsCollector::new();
        let clone = collector.clone();

        collector.record_hit();
        clone.record_hit();

        assert_eq!(collector.snapshot(0).hits, 2);
        assert_eq!(clone.snapshot(0).hits, 2);
    }
}
