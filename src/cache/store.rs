//! Sharded, byte-bounded LRU store
//!
//! Keys are spread over independent shards, each behind its own mutex, so
//! lookups for different keys rarely contend. The byte ceiling is split
//! evenly across shards: every shard evicts its own least recently used
//! entries until a new entry fits, which keeps the total at or below the
//! ceiling at all times.

use lru::LruCache;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::entry::CacheEntry;
use crate::request::CacheKey;

#[derive(Debug)]
struct Shard {
    lru: LruCache<CacheKey, Arc<CacheEntry>>,
    bytes: u64,
}

impl Shard {
    fn remove(&mut self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let removed = self.lru.pop(key)?;
        self.bytes -= removed.byte_size();
        Some(removed)
    }
}

/// Result of a store lookup
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit(Arc<CacheEntry>),
    Miss,
    /// The entry existed but its TTL had elapsed; it has been removed
    Expired,
}

/// Result of a store insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    Stored { evicted: u64 },
    /// Larger than a shard budget
    TooLarge,
    /// Computed before the last `clear`
    Superseded,
}

#[derive(Debug)]
pub struct ShardedStore {
    shards: Vec<Mutex<Shard>>,
    shard_budget: u64,
    ttl: Duration,
    generation: AtomicU64,
}

impl ShardedStore {
    pub fn new(max_bytes: u64, shards: usize, ttl: Duration) -> Self {
        let count = shards.max(1);
        Self {
            shards: (0..count)
                .map(|_| {
                    Mutex::new(Shard {
                        lru: LruCache::unbounded(),
                        bytes: 0,
                    })
                })
                .collect(),
            shard_budget: max_bytes / count as u64,
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<Shard> {
        &self.shards[key.shard_index(self.shards.len())]
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Largest entry that can be stored
    pub fn shard_budget(&self) -> u64 {
        self.shard_budget
    }

    pub fn max_bytes(&self) -> u64 {
        self.shard_budget * self.shards.len() as u64
    }

    /// Incremented by every `clear`
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &CacheKey) -> Lookup {
        let mut shard = self.shard(key).lock();

        match shard.lru.get(key) {
            None => return Lookup::Miss,
            Some(entry) if !entry.is_expired(self.ttl) => return Lookup::Hit(entry.clone()),
            Some(_) => {}
        }

        shard.remove(key);
        Lookup::Expired
    }

    /// Store `entry`, computed when the store was at `generation`.
    ///
    /// The generation is compared under the shard lock, so a result that
    /// started before a `clear` can never become visible after it.
    pub fn insert(&self, entry: Arc<CacheEntry>, generation: u64) -> Inserted {
        let size = entry.byte_size();
        if size > self.shard_budget {
            return Inserted::TooLarge;
        }

        let mut shard = self.shard(&entry.key).lock();
        if generation != self.generation() {
            return Inserted::Superseded;
        }
        shard.remove(&entry.key);

        let mut evicted = 0;
        while shard.bytes + size > self.shard_budget {
            match shard.lru.pop_lru() {
                Some((_, old)) => {
                    shard.bytes -= old.byte_size();
                    evicted += 1;
                }
                None => break,
            }
        }

        shard.bytes += size;
        shard.lru.put(entry.key, entry);

        Inserted::Stored { evicted }
    }

    /// Drop every entry and start a new generation
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        for shard in &self.shards {
            let mut shard = shard.lock();
            shard.lru.clear();
            shard.bytes = 0;
        }
    }

    pub fn resident_bytes(&self) -> u64 {
        self.shards.iter().map(|s| s.lock().bytes).sum()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().lru.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
