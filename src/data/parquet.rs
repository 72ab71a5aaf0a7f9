use std::path::{Path, PathBuf};

use polars::prelude::*;

use super::interval::Interval;
use super::series::PriceSeries;
use super::{StorageBackend, StorageKey};
use crate::error::StorageError;

/// One parquet file per key under `<root>/<interval>/<SYMBOL>.parquet`.
pub struct ParquetStorage {
    root: PathBuf,
}

impl ParquetStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the file backing `key`.
    pub fn path_for(&self, key: &StorageKey) -> PathBuf {
        series_path(&self.root, key)
    }
}

impl StorageBackend for ParquetStorage {
    fn read(&self, key: &StorageKey) -> Result<Option<PriceSeries>, StorageError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        read_series(&path).map(Some)
    }

    fn write(&self, key: &StorageKey, series: &PriceSeries) -> Result<(), StorageError> {
        let path = self.path_for(key);
        write_series(&path, series)?;
        tracing::debug!(%key, rows = series.len(), path = %path.display(), "Wrote series");
        Ok(())
    }

    fn delete(&self, key: &StorageKey) -> Result<bool, StorageError> {
        remove_if_exists(&self.path_for(key))
    }

    fn list_symbols(&self, interval: Interval) -> Result<Vec<String>, StorageError> {
        list_parquet_stems(&self.root.join(interval.as_str()))
    }
}

pub(crate) fn series_path(root: &Path, key: &StorageKey) -> PathBuf {
    root.join(key.interval().as_str())
        .join(format!("{}.parquet", key.symbol()))
}

pub(crate) fn read_series(path: &Path) -> Result<PriceSeries, StorageError> {
    let path_str = path.to_string_lossy().to_string();
    let df = LazyFrame::scan_parquet(path_str.as_str().into(), ScanArgsParquet::default())
        .and_then(LazyFrame::collect)
        .map_err(|e| StorageError::parquet(path, e))?;
    PriceSeries::from_frame(&df).map_err(|e| StorageError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Write to a temp file then rename over the target, so readers only ever
/// see the previous or the new file.
pub(crate) fn write_series(path: &Path, series: &PriceSeries) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }
    let mut df = series
        .to_frame()
        .map_err(|e| StorageError::parquet(path, e))?;

    let tmp_path = path.with_extension("parquet.tmp");
    let mut file =
        std::fs::File::create(&tmp_path).map_err(|e| StorageError::io(&tmp_path, e))?;
    if let Err(e) = ParquetWriter::new(&mut file).finish(&mut df) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(StorageError::parquet(&tmp_path, e));
    }
    // Flush to disk before the rename makes the file visible.
    if let Err(e) = file.sync_all() {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(StorageError::io(&tmp_path, e));
    }
    drop(file);
    std::fs::rename(&tmp_path, path).map_err(|e| StorageError::io(path, e))
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

pub(crate) fn list_parquet_stems(dir: &Path) -> Result<Vec<String>, StorageError> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut symbols = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| StorageError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| StorageError::io(dir, e))?.path();
        if path.extension().is_some_and(|e| e == "parquet") {
            if let Some(stem) = path.file_stem() {
                symbols.push(stem.to_string_lossy().to_string());
            }
        }
    }
    symbols.sort();
    Ok(symbols)
}
