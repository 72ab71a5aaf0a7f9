//! The single gateway for reading, writing, merging, caching and
//! gap-analyzing price series.
//!
//! Every operation takes a raw symbol and interval string; unknown intervals
//! and malformed symbols are rejected before anything is read or written.
//! Writes for one key are serialized through a per-key mutex, so a
//! read-modify-write in [`DataManager::update_data`] cannot lose a
//! concurrent update. Keys never contend with each other.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::NaiveDateTime;
use dashmap::DashMap;
use polars::prelude::DataFrame;
use serde::Serialize;

use super::cache::{DiskCache, MemoryCache};
use super::gaps::{find_gaps, Gap};
use super::interval::Interval;
use super::parquet::ParquetStorage;
use super::series::PriceSeries;
use super::{CacheBackend, StorageBackend, StorageKey};
use crate::config::{CacheBackendKind, Config, DataConfig};
use crate::error::{Result, StorageError, ValidationError};

/// Outcome of [`DataManager::update_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub new_rows: usize,
    pub replaced_rows: usize,
    pub total_rows: usize,
}

pub struct DataManager {
    dirs: DataConfig,
    storage: Arc<dyn StorageBackend>,
    cache: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    locks: DashMap<StorageKey, Arc<Mutex<()>>>,
}

impl DataManager {
    /// Build with parquet storage under `processed_data_dir` and the cache
    /// backend selected in `config`.
    pub fn new(config: &Config) -> Result<Self> {
        let storage = Arc::new(ParquetStorage::new(&config.data.processed_data_dir));
        let cache: Arc<dyn CacheBackend> = match config.cache.backend {
            CacheBackendKind::Memory => Arc::new(MemoryCache::new()),
            CacheBackendKind::Disk => Arc::new(DiskCache::new(&config.data.cache_dir)),
        };
        Self::with_backends(config, storage, cache)
    }

    /// Build with caller-supplied backends. The configured directories are
    /// still created so collaborators can rely on them.
    pub fn with_backends(
        config: &Config,
        storage: Arc<dyn StorageBackend>,
        cache: Arc<dyn CacheBackend>,
    ) -> Result<Self> {
        for dir in config.data.dirs() {
            std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }
        tracing::debug!(
            raw = %config.data.raw_data_dir.display(),
            processed = %config.data.processed_data_dir.display(),
            cache = %config.data.cache_dir.display(),
            "Data directories ready"
        );
        Ok(Self {
            dirs: config.data.clone(),
            storage,
            cache,
            default_ttl: Duration::from_secs(config.cache.default_ttl_secs),
            locks: DashMap::new(),
        })
    }

    pub fn dirs(&self) -> &DataConfig {
        &self.dirs
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Run `f` holding the mutex for `key`. The map entry is dropped again
    /// once no other caller holds or waits on it, so the map only tracks
    /// keys with work in flight.
    fn with_key_lock<T>(&self, key: &StorageKey, f: impl FnOnce() -> T) -> T {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let out = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        drop(lock);
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        out
    }

    // -- persistence --------------------------------------------------------

    /// Validate `df` and replace whatever is stored for the key.
    pub fn save_data(&self, df: &DataFrame, symbol: &str, interval: &str) -> Result<()> {
        let key = StorageKey::parse(symbol, interval)?;
        let series = PriceSeries::from_frame(df)?;

        self.with_key_lock(&key, || self.storage.write(&key, &series))?;
        tracing::info!(%key, rows = series.len(), "Saved series");
        Ok(())
    }

    /// The stored series as a frame, or `None` if nothing is stored.
    pub fn load_data(&self, symbol: &str, interval: &str) -> Result<Option<DataFrame>> {
        let Some(series) = self.load_series(symbol, interval)? else {
            return Ok(None);
        };
        Ok(Some(series.to_frame().map_err(StorageError::from)?))
    }

    pub fn load_series(&self, symbol: &str, interval: &str) -> Result<Option<PriceSeries>> {
        let key = StorageKey::parse(symbol, interval)?;
        Ok(self.storage.read(&key)?)
    }

    /// Stored bars with `start <= timestamp <= end`. `None` when the key has
    /// no data at all; an empty frame when it has data outside the range.
    pub fn load_range(
        &self,
        symbol: &str,
        interval: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<DataFrame>> {
        check_range(start, end)?;
        let Some(series) = self.load_series(symbol, interval)? else {
            return Ok(None);
        };
        let frame = series
            .slice_range(start, end)
            .to_frame()
            .map_err(StorageError::from)?;
        Ok(Some(frame))
    }

    /// Merge `df` into the stored series. Bars in `df` win where timestamps
    /// overlap.
    pub fn update_data(
        &self,
        df: &DataFrame,
        symbol: &str,
        interval: &str,
    ) -> Result<UpdateSummary> {
        let key = StorageKey::parse(symbol, interval)?;
        let incoming = PriceSeries::from_frame(df)?;

        let (merged, stats) = self.with_key_lock(&key, || -> Result<_, StorageError> {
            let (merged, stats) = match self.storage.read(&key)? {
                Some(existing) => existing.merge(&incoming),
                None => PriceSeries::default().merge(&incoming),
            };
            self.storage.write(&key, &merged)?;
            Ok((merged, stats))
        })?;

        let summary = UpdateSummary {
            new_rows: stats.new_rows,
            replaced_rows: stats.replaced_rows,
            total_rows: merged.len(),
        };
        tracing::info!(
            %key,
            new_rows = summary.new_rows,
            replaced_rows = summary.replaced_rows,
            total_rows = summary.total_rows,
            "Updated series"
        );
        Ok(summary)
    }

    /// Remove the stored series and any cached snapshot for the key.
    pub fn delete_data(&self, symbol: &str, interval: &str) -> Result<bool> {
        let key = StorageKey::parse(symbol, interval)?;
        let removed = self.with_key_lock(&key, || -> Result<_, StorageError> {
            let removed = self.storage.delete(&key)?;
            self.cache.remove(&key)?;
            Ok(removed)
        })?;
        if removed {
            tracing::info!(%key, "Deleted series");
        }
        Ok(removed)
    }

    /// Symbols with stored data for `interval`.
    pub fn list_symbols(&self, interval: &str) -> Result<Vec<String>> {
        let interval: Interval = interval.parse()?;
        Ok(self.storage.list_symbols(interval)?)
    }

    // -- cache --------------------------------------------------------------

    /// Cache a snapshot of `df` for `ttl`, or the configured default TTL when
    /// `ttl` is `None`. Replaces any earlier entry for the key.
    pub fn cache_data(
        &self,
        df: &DataFrame,
        symbol: &str,
        interval: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let key = StorageKey::parse(symbol, interval)?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return Err(ValidationError::NonPositiveTtl.into());
        }
        let series = PriceSeries::from_frame(df)?;

        self.with_key_lock(&key, || self.cache.put(&key, &series, ttl))?;
        tracing::debug!(%key, rows = series.len(), ttl_secs = ttl.as_secs_f64(), "Cached series");
        Ok(())
    }

    /// The cached snapshot if it is younger than its TTL.
    pub fn get_cached_data(&self, symbol: &str, interval: &str) -> Result<Option<DataFrame>> {
        let key = StorageKey::parse(symbol, interval)?;
        let cached = self.with_key_lock(&key, || self.cache.get(&key))?;
        match cached {
            Some(series) => {
                tracing::debug!(%key, "Cache hit");
                Ok(Some(series.to_frame().map_err(StorageError::from)?))
            }
            None => {
                tracing::debug!(%key, "Cache miss");
                Ok(None)
            }
        }
    }

    pub fn invalidate_cache(&self, symbol: &str, interval: &str) -> Result<bool> {
        let key = StorageKey::parse(symbol, interval)?;
        Ok(self.with_key_lock(&key, || self.cache.remove(&key))?)
    }

    pub fn purge_expired_cache(&self) -> Result<usize> {
        let purged = self.cache.purge_expired()?;
        if purged > 0 {
            tracing::info!(purged, "Purged expired cache entries");
        }
        Ok(purged)
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear()?;
        tracing::info!("Cleared cache");
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    /// Timestamp of the newest stored bar.
    pub fn get_latest_data(&self, symbol: &str, interval: &str) -> Result<Option<NaiveDateTime>> {
        Ok(self
            .load_series(symbol, interval)?
            .and_then(|s| s.last_timestamp()))
    }

    /// First and last stored timestamps.
    pub fn get_date_range(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime)>> {
        Ok(self
            .load_series(symbol, interval)?
            .and_then(|s| s.first_timestamp().zip(s.last_timestamp())))
    }

    /// Maximal runs of missing bars over `[start, end]`, in order.
    ///
    /// Gap bounds are points on the expected grid, so a trailing gap ends at
    /// the last grid point not after `end`. The exception is a key with no
    /// stored data at all, which yields exactly `[start, end]` even when
    /// `end` is off the grid.
    pub fn get_data_gaps(
        &self,
        symbol: &str,
        interval: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Gap>> {
        let key = StorageKey::parse(symbol, interval)?;
        check_range(start, end)?;

        let Some(series) = self.storage.read(&key)? else {
            return Ok(vec![Gap::new(start, end)]);
        };
        let present: Vec<NaiveDateTime> = series.slice_range(start, end).timestamps().collect();
        let gaps = find_gaps(&present, key.interval(), start, end);
        tracing::debug!(%key, %start, %end, gaps = gaps.len(), "Computed gaps");
        Ok(gaps)
    }
}

fn check_range(start: NaiveDateTime, end: NaiveDateTime) -> Result<(), ValidationError> {
    if start > end {
        return Err(ValidationError::InvalidRange { start, end });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::series::Bar;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn frame(days: impl IntoIterator<Item = u32>, close: f64) -> DataFrame {
        PriceSeries::from_bars(
            days.into_iter()
                .map(|d| Bar {
                    timestamp: day(d),
                    open: 100.0,
                    high: 105.0,
                    low: 95.0,
                    close,
                    volume: 1000.0,
                })
                .collect(),
        )
        .unwrap()
        .to_frame()
        .unwrap()
    }

    /// Storage that fails every write and counts attempts.
    #[derive(Default)]
    struct FailingStorage {
        writes: AtomicUsize,
    }

    impl StorageBackend for FailingStorage {
        fn read(&self, _key: &StorageKey) -> Result<Option<PriceSeries>, StorageError> {
            Ok(None)
        }

        fn write(&self, key: &StorageKey, _series: &PriceSeries) -> Result<(), StorageError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::io(
                key.symbol(),
                std::io::Error::other("disk full"),
            ))
        }

        fn delete(&self, _key: &StorageKey) -> Result<bool, StorageError> {
            Ok(false)
        }

        fn list_symbols(&self, _interval: Interval) -> Result<Vec<String>, StorageError> {
            Ok(vec![])
        }
    }

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            data: DataConfig::under(dir),
            ..Config::default()
        }
    }

    #[test]
    fn construction_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("nested");
        let manager = DataManager::new(&config_in(&root)).unwrap();
        for dir in manager.dirs().dirs() {
            assert!(dir.is_dir(), "{} should exist", dir.display());
        }
    }

    #[test]
    fn storage_failures_propagate() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Arc::new(FailingStorage::default());
        let manager = DataManager::with_backends(
            &config_in(tmp.path()),
            storage.clone(),
            Arc::new(MemoryCache::new()),
        )
        .unwrap();

        let err = manager.save_data(&frame(1..=3, 1.0), "AAPL", "1d").unwrap_err();
        assert!(matches!(err, crate::Error::Storage(StorageError::Io { .. })));
        assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn validation_happens_before_any_write() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Arc::new(FailingStorage::default());
        let manager = DataManager::with_backends(
            &config_in(tmp.path()),
            storage.clone(),
            Arc::new(MemoryCache::new()),
        )
        .unwrap();

        assert!(manager
            .update_data(&DataFrame::empty(), "AAPL", "1d")
            .unwrap_err()
            .is_validation());
        assert!(manager
            .save_data(&frame(1..=3, 1.0), "AAPL", "2h")
            .unwrap_err()
            .is_validation());
        assert_eq!(storage.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = DataManager::new(&config_in(tmp.path())).unwrap();
        let err = manager
            .cache_data(&frame(1..=3, 1.0), "AAPL", "1d", Some(Duration::ZERO))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Validation(ValidationError::NonPositiveTtl)
        ));
    }

    #[test]
    fn default_ttl_applies_when_none_given() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = DataManager::new(&config_in(tmp.path())).unwrap();
        assert_eq!(manager.default_ttl(), Duration::from_secs(3600));
        manager
            .cache_data(&frame(1..=3, 1.0), "AAPL", "1d", None)
            .unwrap();
        assert!(manager.get_cached_data("AAPL", "1d").unwrap().is_some());
    }

    #[test]
    fn gaps_reject_inverted_range() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = DataManager::new(&config_in(tmp.path())).unwrap();
        let err = manager
            .get_data_gaps("AAPL", "1d", day(10), day(1))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Validation(ValidationError::InvalidRange { .. })
        ));
    }

    #[test]
    fn key_locks_are_released_after_use() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = DataManager::new(&config_in(tmp.path())).unwrap();
        let df = frame(1..=3, 1.0);

        manager.save_data(&df, "AAPL", "1d").unwrap();
        manager.update_data(&frame(4..=5, 2.0), "AAPL", "1d").unwrap();
        manager.cache_data(&df, "AAPL", "1d", None).unwrap();
        for i in 0..50 {
            let symbol = format!("SYM{i}");
            assert!(manager.get_cached_data(&symbol, "1d").unwrap().is_none());
            assert!(!manager.invalidate_cache(&symbol, "1h").unwrap());
        }
        manager.delete_data("AAPL", "1d").unwrap();
        assert!(manager.locks.is_empty());

        std::thread::scope(|s| {
            for i in 0..8 {
                let manager = &manager;
                s.spawn(move || {
                    manager
                        .update_data(&frame([i + 1], f64::from(i)), "MSFT", "1d")
                        .unwrap();
                });
            }
        });
        assert_eq!(manager.load_series("MSFT", "1d").unwrap().unwrap().len(), 8);
        assert!(manager.locks.is_empty());
    }

    #[test]
    fn delete_removes_storage_and_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = DataManager::new(&config_in(tmp.path())).unwrap();
        let df = frame(1..=3, 1.0);
        manager.save_data(&df, "AAPL", "1d").unwrap();
        manager.cache_data(&df, "AAPL", "1d", None).unwrap();

        assert!(manager.delete_data("AAPL", "1d").unwrap());
        assert!(manager.load_data("AAPL", "1d").unwrap().is_none());
        assert!(manager.get_cached_data("AAPL", "1d").unwrap().is_none());
        assert!(!manager.delete_data("AAPL", "1d").unwrap());
    }
}
