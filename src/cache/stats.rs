//! Cache Statistics Module
//!
//! Tracks per-backend metrics: hits, misses, evictions, sweeps and refreshes.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of reads that found a value
    pub hits: u64,
    /// Number of reads that found nothing (absent, expired or null)
    pub misses: u64,
    /// Entries evicted to make room for a write
    pub evictions: u64,
    /// Entries removed by the expired-entry sweep
    pub expirations: u64,
    /// Entries removed by the cold-entry sweep
    pub cold_evictions: u64,
    /// Background refreshes scheduled by ahead-of-expiry reads
    pub refreshes: u64,
    /// Current number of entries (local backend only)
    pub total_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Records the outcome of one read.
    pub fn record_read(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    pub fn record_cold_evictions(&mut self, count: usize) {
        self.cold_evictions += count as u64;
    }

    pub fn record_refresh(&mut self) {
        self.refreshes += 1;
    }

    // == Update Entry Count ==
    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}
