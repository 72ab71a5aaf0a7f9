use std::path::PathBuf;

use chrono::NaiveDateTime;
use thiserror::Error;

/// Library-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl Error {
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

/// Malformed input. Raised before any durable state is touched and never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("series is empty")]
    EmptySeries,
    #[error("required column '{0}' is missing")]
    MissingColumn(String),
    #[error("column '{column}' must be numeric, found {dtype}")]
    NonNumericColumn { column: String, dtype: String },
    #[error("index must be temporal, found {0}")]
    NonTemporalIndex(String),
    #[error("null value in column '{column}' at row {row}")]
    NullValue { column: String, row: usize },
    #[error("duplicate timestamp {0}")]
    DuplicateTimestamp(NaiveDateTime),
    #[error("unrecognized interval '{0}'")]
    UnknownInterval(String),
    #[error("invalid symbol '{0}'")]
    InvalidSymbol(String),
    #[error("ttl must be greater than zero")]
    NonPositiveTtl,
    #[error("start {start} is after end {end}")]
    InvalidRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

/// Failure in the underlying storage or cache. Propagated to the caller as-is.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parquet error on {}: {source}", path.display())]
    Parquet {
        path: PathBuf,
        #[source]
        source: polars::error::PolarsError,
    },
    #[error("cache metadata error on {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("corrupt data in {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to build frame: {0}")]
    Frame(#[from] polars::error::PolarsError),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parquet(path: impl Into<PathBuf>, source: polars::error::PolarsError) -> Self {
        StorageError::Parquet {
            path: path.into(),
            source,
        }
    }
}
