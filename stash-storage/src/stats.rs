//! Lookup and load counters for the orchestrator.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fresh hits served from memory.
    pub memory_hits: u64,
    /// Fresh hits served from persistence (and promoted).
    pub persistence_hits: u64,
    /// Expired records served once before eviction.
    pub stale_hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Records evicted because they expired.
    pub expired_evictions: u64,
    /// Successful loader invocations.
    pub loads: u64,
    /// Failed loader invocations.
    pub load_failures: u64,
}

impl CacheStats {
    /// Total hits of any kind.
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.persistence_hits + self.stale_hits
    }

    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    memory_hits: AtomicU64,
    persistence_hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    expired_evictions: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn persistence_hit(&self) {
        self.persistence_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn expired_eviction(&self) {
        self.expired_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            persistence_hits: self.persistence_hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired_evictions: self.expired_evictions.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
        }
    }
}
