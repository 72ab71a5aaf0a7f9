//! TTL caches for series snapshots.
//!
//! Expiry is checked on every read: an entry whose age has reached its TTL is
//! removed and reported as absent. `purge_expired` offers an eager sweep but
//! nothing runs it in the background.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::interval::Interval;
use super::parquet::{read_series, remove_if_exists, series_path, write_series};
use super::series::PriceSeries;
use super::{CacheBackend, StorageKey};
use crate::error::StorageError;

const META_SUFFIX: &str = ".meta.json";

// ---------------------------------------------------------------------------
// In-process cache
// ---------------------------------------------------------------------------

struct MemoryEntry {
    series: Arc<PriceSeries>,
    inserted: Instant,
    ttl: Duration,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted) >= self.ttl
    }
}

/// Snapshots held in a concurrent map. Lost on restart.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<StorageKey, MemoryEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries currently held, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheBackend for MemoryCache {
    fn put(
        &self,
        key: &StorageKey,
        series: &PriceSeries,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        self.entries.insert(
            key.clone(),
            MemoryEntry {
                series: Arc::new(series.clone()),
                inserted: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    fn get(&self, key: &StorageKey) -> Result<Option<PriceSeries>, StorageError> {
        let now = Instant::now();
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            tracing::debug!(%key, "Dropped stale cache entry");
            return Ok(None);
        }
        Ok(self
            .entries
            .get(key)
            .map(|entry| entry.series.as_ref().clone()))
    }

    fn remove(&self, key: &StorageKey) -> Result<bool, StorageError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn purge_expired(&self) -> Result<usize, StorageError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.entries.clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// On-disk cache
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
    inserted_at: DateTime<Utc>,
    ttl_ms: u64,
}

impl CacheMeta {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::milliseconds(i64::try_from(self.ttl_ms).unwrap_or(i64::MAX));
        now.signed_duration_since(self.inserted_at) >= ttl
    }
}

/// Snapshots persisted under `cache_dir` as
/// `<interval>/<SYMBOL>.parquet` plus a `<SYMBOL>.meta.json` sidecar
/// recording when the entry was written and its TTL.
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn data_path(&self, key: &StorageKey) -> PathBuf {
        series_path(&self.root, key)
    }

    fn meta_path(&self, key: &StorageKey) -> PathBuf {
        self.root
            .join(key.interval().as_str())
            .join(format!("{}{META_SUFFIX}", key.symbol()))
    }

    fn read_meta(path: &Path) -> Result<Option<CacheMeta>, StorageError> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Metadata {
                path: path.to_path_buf(),
                source,
            })
    }

    fn write_meta(path: &Path, meta: &CacheMeta) -> Result<(), StorageError> {
        let json = serde_json::to_vec(meta).map_err(|source| StorageError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| StorageError::io(&tmp_path, e))?;
        std::fs::rename(&tmp_path, path).map_err(|e| StorageError::io(path, e))
    }

    fn remove_entry(&self, key: &StorageKey) -> Result<bool, StorageError> {
        // Metadata first: without it the entry is already invisible.
        let had_meta = remove_if_exists(&self.meta_path(key))?;
        let had_data = remove_if_exists(&self.data_path(key))?;
        Ok(had_meta || had_data)
    }
}

impl CacheBackend for DiskCache {
    fn put(
        &self,
        key: &StorageKey,
        series: &PriceSeries,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        let meta_path = self.meta_path(key);
        // Hide any previous entry while the new snapshot is written.
        remove_if_exists(&meta_path)?;
        write_series(&self.data_path(key), series)?;
        let meta = CacheMeta {
            inserted_at: Utc::now(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };
        Self::write_meta(&meta_path, &meta)
    }

    fn get(&self, key: &StorageKey) -> Result<Option<PriceSeries>, StorageError> {
        let Some(meta) = Self::read_meta(&self.meta_path(key))? else {
            return Ok(None);
        };
        if meta.is_expired(Utc::now()) {
            self.remove_entry(key)?;
            tracing::debug!(%key, "Dropped stale cache entry");
            return Ok(None);
        }
        let path = self.data_path(key);
        if !path.exists() {
            return Ok(None);
        }
        read_series(&path).map(Some)
    }

    fn remove(&self, key: &StorageKey) -> Result<bool, StorageError> {
        self.remove_entry(key)
    }

    fn purge_expired(&self) -> Result<usize, StorageError> {
        let now = Utc::now();
        let mut purged = 0;
        for interval in Interval::ALL {
            let dir = self.root.join(interval.as_str());
            if !dir.exists() {
                continue;
            }
            let entries = std::fs::read_dir(&dir).map_err(|e| StorageError::io(&dir, e))?;
            for entry in entries {
                let path = entry.map_err(|e| StorageError::io(&dir, e))?.path();
                let name = path.file_name().map(|n| n.to_string_lossy().to_string());
                let Some(symbol) = name.as_deref().and_then(|n| n.strip_suffix(META_SUFFIX))
                else {
                    continue;
                };
                let Ok(key) = StorageKey::new(symbol, interval) else {
                    continue;
                };
                let expired = match Self::read_meta(&path) {
                    Ok(Some(meta)) => meta.is_expired(now),
                    Ok(None) => false,
                    // Unreadable metadata can never yield a valid entry.
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "Discarding cache metadata: {e}");
                        true
                    }
                };
                if expired && self.remove_entry(&key)? {
                    purged += 1;
                }
            }
        }
        Ok(purged)
    }

    fn clear(&self) -> Result<(), StorageError> {
        for interval in Interval::ALL {
            let dir = self.root.join(interval.as_str());
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io(&dir, e)),
            }
        }
        Ok(())
    }
}
