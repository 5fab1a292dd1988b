// Result cache module
//
// Stores finished transformations keyed by `CacheKey`:
// - Byte-bounded LRU eviction over independent shards (`store`)
// - TTL expiry checked on lookup; an expired entry is recomputed
// - At most one computation per key at a time (`singleflight`); concurrent
//   callers share the leader's result and failures are never stored

mod entry;
mod singleflight;
mod stats;
mod store;

pub use entry::CacheEntry;
pub use stats::CacheStats;
pub use store::{Inserted, Lookup, ShardedStore};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::request::CacheKey;
use singleflight::{InFlight, Role};
use stats::CacheCounters;

/// How a result was obtained
#[derive(Debug, Clone)]
pub enum CacheOutcome {
    /// Served from the store
    Hit(Arc<CacheEntry>),
    /// This caller led the computation
    Computed(Arc<CacheEntry>),
    /// This caller joined a computation already in flight
    Coalesced(Arc<CacheEntry>),
}

impl CacheOutcome {
    pub fn entry(&self) -> &Arc<CacheEntry> {
        match self {
            CacheOutcome::Hit(entry)
            | CacheOutcome::Computed(entry)
            | CacheOutcome::Coalesced(entry) => entry,
        }
    }

    /// Value for the `X-Cache` response header
    pub fn label(&self) -> &'static str {
        match self {
            CacheOutcome::Hit(_) => "HIT",
            CacheOutcome::Computed(_) => "MISS",
            CacheOutcome::Coalesced(_) => "COALESCED",
        }
    }
}

#[derive(Debug)]
struct Inner {
    store: ShardedStore,
    in_flight: InFlight,
    counters: CacheCounters,
}

impl Inner {
    fn publish(&self, entry: Arc<CacheEntry>, generation: u64) {
        let key = entry.key;
        let size = entry.byte_size();
        let metrics = GatewayMetrics::global();

        match self.store.insert(entry, generation) {
            Inserted::Stored { evicted } if evicted > 0 => {
                CacheCounters::add(&self.counters.evictions, evicted);
                metrics.cache_evictions.inc_by(evicted);
            }
            Inserted::Stored { .. } => {}
            Inserted::TooLarge => {
                CacheCounters::incr(&self.counters.rejected);
                metrics.cache_rejected.inc();
                warn!(
                    key = %key,
                    bytes = size,
                    shard_budget = self.store.shard_budget(),
                    "Result larger than cache shard budget, not cached"
                );
            }
            Inserted::Superseded => {
                debug!(key = %key, "Cache cleared during computation, result not cached");
            }
        }
    }
}

/// Removes the in-flight slot when the computing task ends, even by panic
struct CompletionGuard {
    inner: Arc<Inner>,
    key: CacheKey,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.key);
    }
}

/// Shared handle to the result cache
#[derive(Debug, Clone)]
pub struct ResultCache {
    inner: Arc<Inner>,
}

impl ResultCache {
    pub fn new(max_bytes: u64, shards: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: ShardedStore::new(max_bytes, shards, ttl),
                in_flight: InFlight::default(),
                counters: CacheCounters::default(),
            }),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size_bytes(), config.shards, config.ttl())
    }

    pub fn ttl(&self) -> Duration {
        self.inner.store.ttl()
    }

    /// Look up a finished result. Expired entries are removed and reported
    /// as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let counters = &self.inner.counters;
        let metrics = GatewayMetrics::global();

        match self.inner.store.get(key) {
            Lookup::Hit(entry) => {
                CacheCounters::incr(&counters.hits);
                metrics.record_lookup("hit");
                Some(entry)
            }
            Lookup::Expired => {
                CacheCounters::incr(&counters.expirations);
                CacheCounters::incr(&counters.misses);
                metrics.record_lookup("miss");
                debug!(key = %key, "Cache entry expired");
                None
            }
            Lookup::Miss => {
                CacheCounters::incr(&counters.misses);
                metrics.record_lookup("miss");
                None
            }
        }
    }

    /// Current cache generation, advanced by every `clear`
    pub fn generation(&self) -> u64 {
        self.inner.store.generation()
    }

    /// Return the cached result for `key`, computing it at most once across
    /// all concurrent callers.
    ///
    /// The computation runs on its own task: a caller that goes away only
    /// stops waiting, the result is still published for everyone else.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        compute: F,
    ) -> Result<CacheOutcome, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheEntry, GatewayError>> + Send + 'static,
    {
        self.get_or_compute_at(key, self.generation(), compute).await
    }

    /// Like `get_or_compute`, for a request admitted at `generation`.
    ///
    /// The result is returned to every waiter but only stored if no `clear`
    /// happened since `generation` was read.
    pub async fn get_or_compute_at<F, Fut>(
        &self,
        key: CacheKey,
        generation: u64,
        compute: F,
    ) -> Result<CacheOutcome, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheEntry, GatewayError>> + Send + 'static,
    {
        let role = self.inner.in_flight.join(key, || match self.inner.store.get(&key) {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Miss | Lookup::Expired => None,
        });

        match role {
            Role::Ready(entry) => Ok(CacheOutcome::Hit(entry)),
            Role::Follower(rx) => {
                CacheCounters::incr(&self.inner.counters.coalesced);
                GatewayMetrics::global().record_lookup("coalesced");
                debug!(key = %key, "Joining in-flight computation");
                singleflight::wait(rx).await.map(CacheOutcome::Coalesced)
            }
            Role::Leader(tx, rx) => {
                CacheCounters::incr(&self.inner.counters.computations);
                let inner = self.inner.clone();
                let computation = compute();

                tokio::spawn(async move {
                    let guard = CompletionGuard {
                        inner: inner.clone(),
                        key,
                    };
                    let result = computation.await.map(Arc::new);
                    if let Ok(entry) = &result {
                        inner.publish(entry.clone(), generation);
                    }
                    // Publish, then free the slot, then wake waiters: a caller
                    // arriving in between finds the stored entry.
                    drop(guard);
                    let _ = tx.send(Some(result));
                });

                singleflight::wait(rx).await.map(CacheOutcome::Computed)
            }
        }
    }

    /// Drop every resident entry. Computations already running still answer
    /// their waiters, but their results are not stored.
    pub fn clear(&self) {
        self.inner.store.clear();
    }

    pub fn resident_bytes(&self) -> u64 {
        self.inner.store.resident_bytes()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn stats(&self) -> CacheStats {
        use std::sync::atomic::Ordering::Relaxed;

        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Relaxed),
            misses: c.misses.load(Relaxed),
            coalesced: c.coalesced.load(Relaxed),
            computations: c.computations.load(Relaxed),
            evictions: c.evictions.load(Relaxed),
            expirations: c.expirations.load(Relaxed),
            rejected: c.rejected.load(Relaxed),
            current_size_bytes: self.inner.store.resident_bytes(),
            current_item_count: self.inner.store.len() as u64,
            max_size_bytes: self.inner.store.max_bytes(),
        }
    }

    /// Copy residency figures into the Prometheus gauges
    pub fn export_gauges(&self) {
        let metrics = GatewayMetrics::global();
        metrics
            .cache_resident_bytes
            .set(self.inner.store.resident_bytes() as i64);
        metrics.cache_entries.set(self.inner.store.len() as i64);
    }
}
