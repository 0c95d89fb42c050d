//! Size-bounded in-memory cache with per-entry TTL and LRU eviction.
//!
//! Values are stored as `serde_json::Value` so one cache can back memoized
//! functions of different return types.

use ahash::{HashMap, HashMapExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};

struct MemoryEntry {
    value: serde_json::Value,
    inserted_at: Instant,
    last_access: Instant,
    ttl: Duration,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

struct MemoryInner {
    entries: HashMap<String, MemoryEntry>,
    max_size: usize,
    default_ttl: Duration,
    hits: u64,
    misses: u64,
}

impl MemoryInner {
    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    fn evict_lru(&mut self) {
        let lru = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());

        if let Some(key) = lru {
            self.entries.remove(&key);
            tracing::debug!("Evicted LRU cache entry: {}", key);
        }
    }
}

/// Point-in-time view of the memory cache
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub size: usize,
    pub max_size: usize,
    pub expired_entries: usize,
    pub utilization: f64,
    pub hits: u64,
    pub misses: u64,
}

/// Thread-safe TTL + LRU cache
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
}

impl MemoryCache {
    /// Create a cache holding at most `max_size` entries
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        tracing::debug!(
            "Initialized in-memory cache: max_size={}, ttl={}s",
            max_size,
            default_ttl.as_secs()
        );
        Self {
            inner: Mutex::new(MemoryInner {
                entries: HashMap::with_capacity(max_size.min(4096)),
                max_size: max_size.max(1),
                default_ttl,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Look up a live entry; expired entries are removed on access
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let expired = inner.entries.get(key).map(|e| e.is_expired(now));
        match expired {
            Some(false) => {
                inner.hits += 1;
                let entry = inner.entries.get_mut(key)?;
                entry.last_access = now;
                Some(entry.value.clone())
            }
            Some(true) => {
                inner.entries.remove(key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert or replace an entry. At capacity, expired entries are purged first and
    /// only then is the least recently used live entry evicted.
    pub fn insert(&self, key: String, value: serde_json::Value, ttl: Option<Duration>) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= inner.max_size {
            inner.purge_expired(now);
            while inner.entries.len() >= inner.max_size {
                inner.evict_lru();
            }
        }

        let ttl = ttl.unwrap_or(inner.default_ttl);
        inner.entries.insert(
            key,
            MemoryEntry {
                value,
                inserted_at: now,
                last_access: now,
                ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn stats(&self) -> MemoryStats {
        let inner = self.inner.lock();
        let now = Instant::now();
        let expired_entries = inner.entries.values().filter(|e| e.is_expired(now)).count();

        MemoryStats {
            size: inner.entries.len(),
            max_size: inner.max_size,
            expired_entries,
            utilization: inner.entries.len() as f64 / inner.max_size as f64 * 100.0,
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}
