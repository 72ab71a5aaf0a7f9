//! Typed OHLCV series and its conversion to and from polars frames.
//!
//! Frames handed in by callers are validated and normalized here: the
//! timestamp column becomes naive UTC, the five price/volume columns become
//! `Float64`, rows are sorted and duplicate timestamps are rejected. Frames
//! handed back always use the canonical schema
//! `timestamp: Datetime(us), open, high, low, close, volume: Float64`.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound};
use polars::prelude::*;

use crate::error::ValidationError;

pub const TIMESTAMP_COL: &str = "timestamp";
pub const OPEN_COL: &str = "open";
pub const HIGH_COL: &str = "high";
pub const LOW_COL: &str = "low";
pub const CLOSE_COL: &str = "close";
pub const VOLUME_COL: &str = "volume";

/// Columns every stored series carries besides the timestamp.
pub const REQUIRED_COLUMNS: [&str; 5] = [OPEN_COL, HIGH_COL, LOW_COL, CLOSE_COL, VOLUME_COL];

/// Accepted names for the timestamp column, in lookup order.
const INDEX_COLUMNS: [&str; 3] = [TIMESTAMP_COL, "datetime", "date"];

/// Stored timestamps keep microsecond precision.
const STORED_SUBSEC_DIGITS: u16 = 6;

/// Days from 0001-01-01 (CE) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// One price bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Counts produced by [`PriceSeries::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub new_rows: usize,
    pub replaced_rows: usize,
}

/// Chronologically sorted bars with unique timestamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    bars: Vec<Bar>,
}

impl PriceSeries {
    /// Build a series from bars in any order. Timestamps are truncated to
    /// microseconds first, and bars that collide after truncation count as
    /// duplicates and are rejected.
    pub fn from_bars(mut bars: Vec<Bar>) -> Result<Self, ValidationError> {
        for bar in &mut bars {
            bar.timestamp = bar.timestamp.trunc_subsecs(STORED_SUBSEC_DIGITS);
        }
        bars.sort_by_key(|b| b.timestamp);
        if let Some(pair) = bars.windows(2).find(|w| w[0].timestamp == w[1].timestamp) {
            return Err(ValidationError::DuplicateTimestamp(pair[0].timestamp));
        }
        Ok(Self { bars })
    }

    /// Validate a caller-supplied frame and convert it.
    ///
    /// Fails when the frame is empty, lacks one of [`REQUIRED_COLUMNS`], has
    /// no temporal timestamp column, contains nulls or NaN, or repeats a
    /// timestamp.
    /// Columns outside the canonical schema are ignored.
    pub fn from_frame(df: &DataFrame) -> Result<Self, ValidationError> {
        if df.height() == 0 {
            return Err(ValidationError::EmptySeries);
        }

        let mut values: Vec<Vec<f64>> = Vec::with_capacity(REQUIRED_COLUMNS.len());
        for name in REQUIRED_COLUMNS {
            let column = df
                .column(name)
                .map_err(|_| ValidationError::MissingColumn(name.to_string()))?;
            values.push(numeric_values(column)?);
        }

        let index = INDEX_COLUMNS
            .iter()
            .find_map(|name| df.column(name).ok())
            .ok_or_else(|| ValidationError::NonTemporalIndex("no timestamp column".into()))?;
        let timestamps = temporal_values(index)?;

        let bars = timestamps
            .into_iter()
            .enumerate()
            .map(|(i, timestamp)| Bar {
                timestamp,
                open: values[0][i],
                high: values[1][i],
                low: values[2][i],
                close: values[3][i],
                volume: values[4][i],
            })
            .collect();
        Self::from_bars(bars)
    }

    /// Render the series with the canonical schema.
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let mut df = df! {
            OPEN_COL => self.field(|b| b.open),
            HIGH_COL => self.field(|b| b.high),
            LOW_COL => self.field(|b| b.low),
            CLOSE_COL => self.field(|b| b.close),
            VOLUME_COL => self.field(|b| b.volume),
        }?;
        df.with_column(
            DatetimeChunked::from_naive_datetime(
                PlSmallStr::from(TIMESTAMP_COL),
                self.bars.iter().map(|b| b.timestamp),
                TimeUnit::Microseconds,
            )
            .into_column(),
        )?;
        df.select([TIMESTAMP_COL, OPEN_COL, HIGH_COL, LOW_COL, CLOSE_COL, VOLUME_COL])
    }

    fn field(&self, f: impl Fn(&Bar) -> f64) -> Vec<f64> {
        self.bars.iter().map(f).collect()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.bars.first().map(|b| b.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.bars.last().map(|b| b.timestamp)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        self.bars.iter().map(|b| b.timestamp)
    }

    /// Bars with `start <= timestamp <= end`.
    pub fn slice_range(&self, start: NaiveDateTime, end: NaiveDateTime) -> PriceSeries {
        let lo = self.bars.partition_point(|b| b.timestamp < start);
        let hi = self.bars.partition_point(|b| b.timestamp <= end);
        let bars = if lo < hi {
            self.bars[lo..hi].to_vec()
        } else {
            Vec::new()
        };
        PriceSeries { bars }
    }

    /// Union of `self` and `newer`. Where both hold a bar for the same
    /// timestamp, the bar from `newer` is kept.
    pub fn merge(&self, newer: &PriceSeries) -> (PriceSeries, MergeStats) {
        let mut by_ts: BTreeMap<NaiveDateTime, Bar> =
            self.bars.iter().map(|b| (b.timestamp, *b)).collect();
        let mut stats = MergeStats::default();
        for bar in &newer.bars {
            if by_ts.insert(bar.timestamp, *bar).is_some() {
                stats.replaced_rows += 1;
            } else {
                stats.new_rows += 1;
            }
        }
        let merged = PriceSeries {
            bars: by_ts.into_values().collect(),
        };
        (merged, stats)
    }
}

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Float32
            | DataType::Float64
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

fn numeric_values(column: &Column) -> Result<Vec<f64>, ValidationError> {
    let name = column.name().to_string();
    let non_numeric = || ValidationError::NonNumericColumn {
        column: name.clone(),
        dtype: column.dtype().to_string(),
    };
    if !is_numeric(column.dtype()) {
        return Err(non_numeric());
    }
    let cast = column
        .cast(&DataType::Float64)
        .map_err(|_| non_numeric())?;
    let ca = cast.f64().map_err(|_| non_numeric())?;
    (0..ca.len())
        .map(|row| {
            ca.get(row)
                .filter(|v| !v.is_nan())
                .ok_or_else(|| ValidationError::NullValue {
                    column: name.clone(),
                    row,
                })
        })
        .collect()
}

/// Extract naive UTC timestamps from a `Date` or `Datetime` column.
/// Timezone-aware datetimes are stored as UTC instants, so the physical
/// value is used directly.
fn temporal_values(column: &Column) -> Result<Vec<NaiveDateTime>, ValidationError> {
    let name = column.name().to_string();
    let null_at = |row: usize| ValidationError::NullValue {
        column: name.clone(),
        row,
    };
    let corrupt = |row: usize| {
        ValidationError::NonTemporalIndex(format!("timestamp out of range at row {row}"))
    };

    match column.dtype() {
        DataType::Date => {
            let ca = column
                .date()
                .map_err(|e| ValidationError::NonTemporalIndex(e.to_string()))?;
            (0..ca.phys.len())
                .map(|row| {
                    let days = ca.phys.get(row).ok_or_else(|| null_at(row))?;
                    NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
                        .map(|d| d.and_time(NaiveTime::MIN))
                        .ok_or_else(|| corrupt(row))
                })
                .collect()
        }
        DataType::Datetime(tu, _) => {
            let tu = *tu;
            let ca = column
                .datetime()
                .map_err(|e| ValidationError::NonTemporalIndex(e.to_string()))?;
            (0..ca.phys.len())
                .map(|row| {
                    let v = ca.phys.get(row).ok_or_else(|| null_at(row))?;
                    from_physical(v, tu).ok_or_else(|| corrupt(row))
                })
                .collect()
        }
        other => Err(ValidationError::NonTemporalIndex(other.to_string())),
    }
}

fn from_physical(v: i64, tu: TimeUnit) -> Option<NaiveDateTime> {
    let dt = match tu {
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(v),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(v),
        TimeUnit::Nanoseconds => {
            let secs = v.div_euclid(1_000_000_000);
            let nsecs = v.rem_euclid(1_000_000_000) as u32;
            DateTime::from_timestamp(secs, nsecs)
        }
    };
    dt.map(|dt| dt.naive_utc())
}
