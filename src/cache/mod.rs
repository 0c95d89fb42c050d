// Memoization layer for the expensive classification tiers
//
// Lookup order: memory -> persistent store (hit promoted into memory) -> compute.
// Memory-only values live in their own LRU so a flood of cheap entries never
// evicts results that were expensive to obtain.
// Map mutations are serialized; the computation being cached is not, so two callers
// missing on the same key may both compute it.

mod memory;
mod persistent;

pub use memory::{MemoryCache, MemoryStats};
pub use persistent::PersistentStore;

use crate::config::CacheConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),
}

/// Fingerprint of a (function, arguments) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    function: String,
    digest: String,
}

impl CacheKey {
    /// Hash the function name together with the JSON encoding of its arguments
    pub fn new<A: Serialize + ?Sized>(function: &str, args: &A) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(function.as_bytes());
        hasher.update(&[0u8]);
        // Serializing plain data into a Vec cannot fail; an empty payload still keys on the name
        let encoded = serde_json::to_vec(args).unwrap_or_default();
        hasher.update(&encoded);

        Self {
            function: function.to_string(),
            digest: hasher.finalize().to_hex().to_string(),
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    /// Hex digest, used as the persistent store address
    pub fn digest(&self) -> &str {
        &self.digest
    }

    fn memory_key(&self) -> String {
        format!("{}:{}", self.function, self.digest)
    }
}

/// How long a memoized value lives and whether it is written to disk
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub persistent: bool,
}

impl CachePolicy {
    pub fn memory(ttl: Duration) -> Self {
        Self {
            ttl,
            persistent: false,
        }
    }

    pub fn persistent(ttl: Duration) -> Self {
        Self {
            ttl,
            persistent: true,
        }
    }
}

/// Cache usage snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    /// Front of the persistent store
    pub memory: MemoryStats,
    /// Memory-only entries
    pub volatile: MemoryStats,
    pub persistent_entries: Option<usize>,
    pub persistent_path: Option<PathBuf>,
}

/// Two-level memoization cache
pub struct CacheLayer {
    memory: MemoryCache,
    volatile: MemoryCache,
    persistent: Option<PersistentStore>,
    enabled: bool,
}

impl CacheLayer {
    /// Build the cache from configuration. A persistent directory that cannot be
    /// created disables only the persistent level.
    pub fn from_config(config: &CacheConfig) -> Self {
        let persistent = if config.enabled {
            config.persistent_dir.as_ref().and_then(|dir| {
                PersistentStore::new(dir.clone(), config.compression_threshold)
                    .map_err(|e| {
                        tracing::warn!("Persistent cache unavailable, using memory only: {}", e)
                    })
                    .ok()
            })
        } else {
            None
        };

        let default_ttl = Duration::from_secs(config.default_ttl_secs);
        Self {
            memory: MemoryCache::new(config.max_entries, default_ttl),
            volatile: MemoryCache::new(config.max_entries, default_ttl),
            persistent,
            enabled: config.enabled,
        }
    }

    /// Memory-only cache
    pub fn in_memory(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            memory: MemoryCache::new(max_entries, default_ttl),
            volatile: MemoryCache::new(max_entries, default_ttl),
            persistent: None,
            enabled: true,
        }
    }

    /// Cache that never stores anything
    pub fn disabled() -> Self {
        Self {
            memory: MemoryCache::new(1, Duration::ZERO),
            volatile: MemoryCache::new(1, Duration::ZERO),
            persistent: None,
            enabled: false,
        }
    }

    pub fn with_persistent(mut self, store: PersistentStore) -> Self {
        self.persistent = Some(store);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn region(&self, policy: CachePolicy) -> &MemoryCache {
        if policy.persistent {
            &self.memory
        } else {
            &self.volatile
        }
    }

    /// Look a key up in memory, then on disk. Values that no longer deserialize
    /// into `T` read as a miss.
    pub fn lookup<T: DeserializeOwned>(&self, key: &CacheKey, policy: CachePolicy) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let memory_key = key.memory_key();
        if let Some(value) = self.region(policy).get(&memory_key) {
            if let Ok(hit) = serde_json::from_value(value) {
                tracing::debug!(function = key.function(), "Memory cache hit");
                return Some(hit);
            }
        }

        if !policy.persistent {
            return None;
        }

        let store = self.persistent.as_ref()?;
        let value = store.get(key.digest())?;
        match serde_json::from_value::<T>(value.clone()) {
            Ok(hit) => {
                tracing::debug!(function = key.function(), "Persistent cache hit");
                self.memory.insert(memory_key, value, Some(policy.ttl));
                Some(hit)
            }
            Err(e) => {
                tracing::warn!("Ignoring undecodable cache entry for {}: {}", key.function(), e);
                None
            }
        }
    }

    /// Store a value in memory and, when the policy asks for it, on disk
    pub fn store<T: Serialize>(&self, key: &CacheKey, value: &T, policy: CachePolicy) {
        if !self.enabled {
            return;
        }

        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Cannot cache result of {}: {}", key.function(), e);
                return;
            }
        };

        if policy.persistent {
            if let Some(store) = &self.persistent {
                if let Err(e) = store.set(key.digest(), &value, policy.ttl.as_secs()) {
                    tracing::warn!("Failed to persist cache entry for {}: {}", key.function(), e);
                }
            }
        }

        self.region(policy)
            .insert(key.memory_key(), value, Some(policy.ttl));
    }

    /// Return the cached value for `key`, computing and storing it on a miss
    pub fn memoize<T, F>(&self, key: &CacheKey, policy: CachePolicy, compute: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(hit) = self.lookup(key, policy) {
            return hit;
        }

        let value = compute();
        self.store(key, &value, policy);
        value
    }

    /// Async variant for fallible computations; only `Ok` values are stored
    pub async fn try_memoize_async<T, E, Fut>(
        &self,
        key: &CacheKey,
        policy: CachePolicy,
        compute: Fut,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.lookup(key, policy) {
            return Ok(hit);
        }

        let value = compute.await?;
        self.store(key, &value, policy);
        Ok(value)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.enabled,
            memory: self.memory.stats(),
            volatile: self.volatile.stats(),
            persistent_entries: self.persistent.as_ref().map(|s| s.count()),
            persistent_path: self.persistent.as_ref().map(|s| s.base_path().to_path_buf()),
        }
    }

    /// Drop every memoized value, in memory and on disk
    pub fn clear(&self) -> Result<(), CacheError> {
        self.memory.clear();
        self.volatile.clear();
        if let Some(store) = &self.persistent {
            store.clear()?;
        }
        tracing::info!("Cache cleared");
        Ok(())
    }
}
