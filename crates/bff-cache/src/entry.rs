use bytes::Bytes;
use std::time::{Duration, Instant};

/// Upstream response retained for replay.
///
/// Entries are immutable once stored; a newer response for the same key
/// replaces the whole value.
#[derive(Clone, Debug)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub inserted_at: Instant,
}

impl CachedResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Bytes, now: Instant) -> Self {
        Self {
            status,
            headers,
            body,
            inserted_at: now,
        }
    }

    /// Time since insertion. Saturates at zero if `now` is earlier.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at)
    }

    /// Fresh iff strictly younger than `window`.
    pub fn is_fresh(&self, now: Instant, window: Duration) -> bool {
        self.age(now) < window
    }
}

/// Snapshot of store statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Reads that found an entry past its freshness window.
    pub stale: u64,
    pub inserts: u64,
    /// Entries removed by sweeps.
    pub swept: u64,
    pub current_size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
