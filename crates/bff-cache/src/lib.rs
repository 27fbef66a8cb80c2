//! Response cache used by the storefront BFF gateway.
//!
//! Entries are keyed by the exact inbound request target and stay fresh for a
//! fixed window. Stale entries are dropped lazily on read and purged in bulk by
//! a [`Sweeper`] task that lives as long as the store's owner keeps it.

pub mod clock;
pub mod entry;
pub mod store;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{CacheStats, CachedResponse};
pub use store::ResponseStore;
pub use sweeper::Sweeper;

use std::time::Duration;

/// How long a cached response may be served without going upstream again.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(120);

/// Period of the background sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);
