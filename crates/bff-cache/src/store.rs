use crate::clock::{Clock, SystemClock};
use crate::entry::{CacheStats, CachedResponse};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Number of shards. Must be a power of two for fast modulo via bitmask.
const NUM_SHARDS: usize = 64;
const SHARD_MASK: u64 = (NUM_SHARDS as u64) - 1;

type Shard = RwLock<HashMap<String, Arc<CachedResponse>>>;

/// Thread-safe, time-bounded response store.
///
/// Keys are spread across 64 shards, each behind its own `RwLock`:
///
/// - **get**: read lock on one shard. A stale hit upgrades to a write lock on
///   that shard only to drop the expired entry.
/// - **put**: write lock on one shard, last writer wins.
/// - **sweep**: walks the shards one at a time, so a sweep never holds more
///   than one shard lock and unrelated keys stay available.
///
/// Shard selection uses `ahash` with fixed seeds.
pub struct ResponseStore {
    shards: Box<[Shard; NUM_SHARDS]>,
    freshness: Duration,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    inserts: AtomicU64,
    swept: AtomicU64,
}

impl ResponseStore {
    /// Store backed by the system clock.
    pub fn new(freshness: Duration) -> Self {
        Self::with_clock(freshness, Arc::new(SystemClock))
    }

    pub fn with_clock(freshness: Duration, clock: Arc<dyn Clock>) -> Self {
        let shards: Vec<Shard> = (0..NUM_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();

        let shards: Box<[Shard; NUM_SHARDS]> = shards
            .into_boxed_slice()
            .try_into()
            .unwrap_or_else(|_| unreachable!());

        Self {
            shards,
            freshness,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            swept: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard_index(key: &str) -> usize {
        let hash = ahash::RandomState::with_seeds(1, 2, 3, 4).hash_one(key);
        (hash & SHARD_MASK) as usize
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> std::time::Instant {
        self.clock.now()
    }

    /// Look up a key. Only fresh entries are returned; a stale entry is
    /// removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<Arc<CachedResponse>> {
        let idx = Self::shard_index(key);
        let now = self.clock.now();

        let found = self.shards[idx].read().get(key).cloned();
        match found {
            Some(entry) if entry.is_fresh(now, self.freshness) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(entry) => {
                self.stale.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                let mut shard = self.shards[idx].write();
                // Another task may have stored a newer response in between.
                if shard.get(key).is_some_and(|cur| Arc::ptr_eq(cur, &entry)) {
                    shard.remove(key);
                }
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace the entry for `key`.
    pub fn put(&self, key: String, value: CachedResponse) {
        let idx = Self::shard_index(&key);
        let value = Arc::new(value);
        self.shards[idx].write().insert(key, value);
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop every entry past the freshness window. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.write();
            let before = shard.len();
            shard.retain(|_, entry| entry.is_fresh(now, self.freshness));
            removed += before - shard.len();
        }
        self.swept.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Total number of entries across all shards, stale ones included.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
            current_size: self.len(),
        }
    }
}
