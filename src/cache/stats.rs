//! Cache statistics types
//!
//! - `CacheCounters`: lock-free counters updated on the hot path
//! - `CacheStats`: point-in-time snapshot for `/health` and tests

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub coalesced: AtomicU64,
    pub computations: AtomicU64,
    pub evictions: AtomicU64,
    pub expirations: AtomicU64,
    pub rejected: AtomicU64,
}

impl CacheCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Requests that joined an in-flight computation
    pub coalesced: u64,
    /// Computations started
    pub computations: u64,
    /// Entries evicted to stay under the byte ceiling
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed
    pub expirations: u64,
    /// Results too large for a shard, never stored
    pub rejected: u64,
    pub current_size_bytes: u64,
    pub current_item_count: u64,
    pub max_size_bytes: u64,
}

impl CacheStats {
    /// Calculate hit rate (hits / total lookups)
    /// Returns 0.0 if there are no lookups
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
