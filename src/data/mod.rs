pub mod cache;
pub mod gaps;
pub mod interval;
pub mod manager;
pub mod parquet;
pub mod series;

use std::fmt;
use std::time::Duration;

use crate::error::{StorageError, ValidationError};
use interval::Interval;
use series::PriceSeries;

/// Identifies one persisted series and one cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey {
    symbol: String,
    interval: Interval,
}

impl StorageKey {
    /// Build a key from a raw symbol and interval string.
    ///
    /// The symbol is trimmed and uppercased so `aapl` and `AAPL` share a slot.
    pub fn parse(symbol: &str, interval: &str) -> Result<Self, ValidationError> {
        Self::new(symbol, interval.parse()?)
    }

    pub fn new(symbol: &str, interval: Interval) -> Result<Self, ValidationError> {
        let symbol = symbol.trim().to_uppercase();
        validate_path_segment(&symbol)?;
        Ok(Self { symbol, interval })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

/// Durable per-key series storage.
pub trait StorageBackend: Send + Sync {
    /// Read the series for `key`, or `None` if nothing is stored.
    fn read(&self, key: &StorageKey) -> Result<Option<PriceSeries>, StorageError>;

    /// Atomically replace whatever is stored for `key`.
    fn write(&self, key: &StorageKey, series: &PriceSeries) -> Result<(), StorageError>;

    /// Remove the series for `key`. Returns whether anything was removed.
    fn delete(&self, key: &StorageKey) -> Result<bool, StorageError>;

    /// Symbols stored for `interval`, sorted.
    fn list_symbols(&self, interval: Interval) -> Result<Vec<String>, StorageError>;
}

/// Ephemeral snapshots with a time-to-live.
///
/// `get` must never return an entry whose age has reached its TTL; stale
/// entries found on read are dropped.
pub trait CacheBackend: Send + Sync {
    fn put(&self, key: &StorageKey, series: &PriceSeries, ttl: Duration)
        -> Result<(), StorageError>;

    fn get(&self, key: &StorageKey) -> Result<Option<PriceSeries>, StorageError>;

    fn remove(&self, key: &StorageKey) -> Result<bool, StorageError>;

    /// Eagerly drop every expired entry. Returns the number removed.
    fn purge_expired(&self) -> Result<usize, StorageError>;

    fn clear(&self) -> Result<(), StorageError>;
}

/// Ensure a symbol is usable as a single file-name segment.
///
/// Rejects empty strings, absolute paths, and segments with directory
/// separators or `..`.
fn validate_path_segment(segment: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidSymbol(segment.to_string());
    if segment.is_empty() {
        return Err(invalid());
    }
    if std::path::Path::new(segment)
        .components()
        .any(|c| !matches!(c, std::path::Component::Normal(_)))
    {
        return Err(invalid());
    }
    if segment.contains('/') || segment.contains('\\') {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_uppercases_and_trims_symbol() {
        let key = StorageKey::parse(" aapl ", "1d").unwrap();
        assert_eq!(key.symbol(), "AAPL");
        assert_eq!(key.interval(), Interval::OneDay);
        assert_eq!(key.to_string(), "AAPL@1d");
    }

    #[test]
    fn key_accepts_exchange_style_symbols() {
        assert!(StorageKey::parse("BRK.B", "1d").is_ok());
        assert!(StorageKey::parse("^GSPC", "1h").is_ok());
        assert!(StorageKey::parse("EURUSD=X", "5m").is_ok());
    }

    #[test]
    fn key_rejects_path_like_symbols() {
        for bad in ["", "  ", "..", "a/b", "a\\b", "/etc", "."] {
            assert!(
                matches!(
                    StorageKey::parse(bad, "1d"),
                    Err(ValidationError::InvalidSymbol(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn key_rejects_unknown_interval() {
        assert_eq!(
            StorageKey::parse("AAPL", "invalid").unwrap_err(),
            ValidationError::UnknownInterval("invalid".into())
        );
    }
}
