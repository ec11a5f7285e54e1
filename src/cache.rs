//! Generic TTL/expiry cache (C1).
//!
//! `ExpiryCache<V>` is a `dashmap`-backed key→`CacheEntry<V>` map with a
//! background sweeper. The cache itself does not enforce liveness on read —
//! callers compare `entry.exp` against their own notion of "now" and decide,
//! per the documented caching design (see `decision.rs`). The sweeper removes
//! entries with `exp < now` on a fixed interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

/// `{value, exp}` where `exp` is a unix-seconds expiry.
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub exp: i64,
}

#[derive(Default)]
struct Stats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

pub struct ExpiryCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    stats: Stats,
}

impl<V: Clone> ExpiryCache<V> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            stats: Stats::default(),
        })
    }

    /// Returns the raw entry, including its `exp`; does not check liveness.
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        match self.entries.get(key) {
            Some(entry) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Unconditional write. Overwrites any existing entry for `key`.
    pub fn set(&self, key: String, entry: CacheEntry<V>) {
        self.entries.insert(key, entry);
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scan and remove entries with `exp < now`. Does not hold a single lock
    /// across the whole scan — `dashmap`'s sharding means concurrent readers
    /// on other shards are never blocked.
    pub fn sweep(&self, now: i64) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.exp >= now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.stats.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(removed, remaining = self.entries.len(), "cache sweep");
        }
    }

    pub fn hits(&self) -> u64 {
        self.stats.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.stats.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.stats.evictions.load(Ordering::Relaxed)
    }
}

/// Spawns a background thread that calls `cache.sweep(now)` every `interval`
/// until `stop` is set. Grounded on the teacher's memory-monitor thread loop:
/// `std::thread::spawn` + `sleep`, no async runtime involved.
pub fn spawn_sweeper<V: Clone + Send + Sync + 'static>(
    cache: Arc<ExpiryCache<V>>,
    interval: Duration,
    stop: Arc<std::sync::atomic::AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        std::thread::sleep(interval);
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let now = crate::clock::unix_now();
        cache.sweep(now);
    })
}
