//! Content-addressed persistent cache store
//!
//! Entries survive process restarts. Each entry is a JSON envelope carrying its
//! write time and TTL, optionally zstd-compressed, written atomically under a
//! two-level sharded directory keyed by the entry fingerprint.

use super::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    stored_at: DateTime<Utc>,
    ttl_secs: u64,
    value: serde_json::Value,
}

/// File-backed cache store
pub struct PersistentStore {
    base_path: PathBuf,
    compression_threshold: usize,
}

impl PersistentStore {
    /// Open (creating if needed) a store rooted at `base_path`
    pub fn new(base_path: PathBuf, compression_threshold: usize) -> Result<Self, CacheError> {
        let entries_dir = base_path.join("entries");
        fs::create_dir_all(&entries_dir).map_err(|e| CacheError::Io {
            source: e,
            context: format!(
                "Failed to create cache directory: {}",
                entries_dir.display()
            ),
        })?;

        tracing::info!("Initialized persistent cache: {}", base_path.display());

        Ok(Self {
            base_path,
            compression_threshold,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Read an entry. Missing, expired and corrupted entries all read as a miss;
    /// expired and corrupted files are deleted.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let path = self.entry_path(key)?;
        if !path.exists() {
            return None;
        }

        let envelope = match self.read_envelope(&path) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Removing corrupted cache entry {}: {}", path.display(), e);
                let _ = fs::remove_file(&path);
                return None;
            }
        };

        let age = Utc::now().signed_duration_since(envelope.stored_at);
        if age.num_seconds() < 0 || age.num_seconds() as u64 >= envelope.ttl_secs {
            tracing::debug!("Removing expired cache entry: {}", path.display());
            let _ = fs::remove_file(&path);
            return None;
        }

        Some(envelope.value)
    }

    /// Write an entry atomically (temp file, then rename)
    pub fn set(&self, key: &str, value: &serde_json::Value, ttl_secs: u64) -> Result<(), CacheError> {
        let path = self
            .entry_path(key)
            .ok_or_else(|| CacheError::InvalidKey(key.to_string()))?;
        let temp_path = path.with_extension("tmp");

        let envelope = Envelope {
            stored_at: Utc::now(),
            ttl_secs,
            value: value.clone(),
        };
        let data = serde_json::to_vec(&envelope)?;

        let payload = if data.len() >= self.compression_threshold {
            zstd::encode_all(&data[..], 3).map_err(|e| CacheError::Io {
                source: e,
                context: "Failed to compress cache entry".to_string(),
            })?
        } else {
            data
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::Io {
                source: e,
                context: format!("Failed to create shard directory: {}", parent.display()),
            })?;
        }

        let mut file = fs::File::create(&temp_path).map_err(|e| CacheError::Io {
            source: e,
            context: format!("Failed to create temp cache file: {}", temp_path.display()),
        })?;
        file.write_all(&payload).map_err(|e| CacheError::Io {
            source: e,
            context: format!("Failed to write cache entry: {}", temp_path.display()),
        })?;
        file.sync_all().map_err(|e| CacheError::Io {
            source: e,
            context: format!("Failed to sync cache entry: {}", temp_path.display()),
        })?;
        drop(file);

        fs::rename(&temp_path, &path).map_err(|e| CacheError::Io {
            source: e,
            context: format!(
                "Failed to move cache entry into place: {} -> {}",
                temp_path.display(),
                path.display()
            ),
        })?;

        Ok(())
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<(), CacheError> {
        let entries_dir = self.base_path.join("entries");
        if entries_dir.exists() {
            fs::remove_dir_all(&entries_dir).map_err(|e| CacheError::Io {
                source: e,
                context: format!("Failed to clear cache: {}", entries_dir.display()),
            })?;
        }
        fs::create_dir_all(&entries_dir).map_err(|e| CacheError::Io {
            source: e,
            context: format!("Failed to recreate cache: {}", entries_dir.display()),
        })?;
        tracing::info!("Persistent cache cleared");
        Ok(())
    }

    /// Number of stored entries (temp files excluded)
    pub fn count(&self) -> usize {
        fn walk(dir: &Path, depth: usize) -> usize {
            let Ok(read_dir) = fs::read_dir(dir) else {
                return 0;
            };
            read_dir
                .flatten()
                .map(|entry| {
                    let path = entry.path();
                    if depth > 0 && path.is_dir() {
                        walk(&path, depth - 1)
                    } else if depth == 0
                        && path.is_file()
                        && path.extension().map_or(true, |ext| ext != "tmp")
                    {
                        1
                    } else {
                        0
                    }
                })
                .sum()
        }

        walk(&self.base_path.join("entries"), 2)
    }

    fn read_envelope(&self, path: &Path) -> Result<Envelope, CacheError> {
        let raw = fs::read(path).map_err(|e| CacheError::Io {
            source: e,
            context: format!("Failed to read cache entry: {}", path.display()),
        })?;

        // Small entries are stored uncompressed
        let data = zstd::decode_all(&raw[..]).unwrap_or(raw);
        Ok(serde_json::from_slice(&data)?)
    }

    /// Two-level sharding: entries/ab/cd/abcdef...
    fn entry_path(&self, key: &str) -> Option<PathBuf> {
        if key.len() < 4 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(
            self.base_path
                .join("entries")
                .join(&key[0..2])
                .join(&key[2..4])
                .join(key),
        )
    }
}
