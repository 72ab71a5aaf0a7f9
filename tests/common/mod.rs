#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use tempfile::TempDir;

use ohlcv_store::config::{CacheBackendKind, Config, DataConfig};
use ohlcv_store::DataManager;

pub fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Daily bars for every date in `dates` with constant prices.
///
///   | open  | high  | low  | close | volume |
///   |-------|-------|------|-------|--------|
///   | `open`| +5    | -5   | +2    | `volume` |
pub fn daily_df(dates: &[NaiveDateTime], open: f64, volume: i64) -> DataFrame {
    let n = dates.len();
    let mut df = df! {
        "open" => vec![open; n],
        "high" => vec![open + 5.0; n],
        "low" => vec![open - 5.0; n],
        "close" => vec![open + 2.0; n],
        "volume" => vec![volume; n],
    }
    .unwrap();
    df.with_column(
        DatetimeChunked::from_naive_datetime(
            PlSmallStr::from("timestamp"),
            dates.iter().copied(),
            TimeUnit::Microseconds,
        )
        .into_column(),
    )
    .unwrap();
    df
}

/// Consecutive days from `start` through `end` inclusive.
pub fn date_range(start: NaiveDateTime, end: NaiveDateTime) -> Vec<NaiveDateTime> {
    std::iter::successors(Some(start), |d| Some(*d + chrono::Duration::days(1)))
        .take_while(|d| *d <= end)
        .collect()
}

/// The fixture used throughout: 2024-01-01..=2024-01-10 at 100/105/95/102, volume 1000.
pub fn sample_df() -> DataFrame {
    daily_df(&date_range(day(2024, 1, 1), day(2024, 1, 10)), 100.0, 1000)
}

pub fn make_manager(backend: CacheBackendKind) -> (DataManager, TempDir) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.data = DataConfig::under(tmp.path());
    config.cache.backend = backend;
    let manager = DataManager::new(&config).unwrap();
    (manager, tmp)
}

/// Put a frame in canonical form (column order, dtypes) for equality checks.
pub fn canonical(df: &DataFrame) -> DataFrame {
    ohlcv_store::data::series::PriceSeries::from_frame(df)
        .unwrap()
        .to_frame()
        .unwrap()
}
