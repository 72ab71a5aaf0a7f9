// float_cmp: only in tests where assert_eq! on f64 is intentional.
#![cfg_attr(test, allow(clippy::float_cmp))]

pub mod config;
pub mod data;
pub mod error;

pub use config::Config;
pub use data::manager::{DataManager, UpdateSummary};
pub use error::{Error, Result, StorageError, ValidationError};
