//! Typed configuration, loaded once at startup and passed explicitly.
//!
//! | Source | Purpose |
//! |--------|---------|
//! | `config/config.toml` (or `OHLCV_CONFIG`) | base settings; missing file means defaults |
//! | `.env` | loaded into the process environment before overrides |
//! | `DATA_ROOT` | places `raw/`, `processed/` and `cache/` under one directory |
//! | `OHLCV_LOG_LEVEL` | overrides `logging.level` |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use garde::Validate;
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[garde(dive)]
    pub data: DataConfig,
    #[garde(dive)]
    pub cache: CacheConfig,
    #[garde(dive)]
    pub logging: LoggingConfig,
}

/// Root directories for stored, processed and cached series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DataConfig {
    #[garde(custom(non_empty_path))]
    pub raw_data_dir: PathBuf,
    #[garde(custom(non_empty_path))]
    pub processed_data_dir: PathBuf,
    #[garde(custom(non_empty_path))]
    pub cache_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self::under(Path::new("data"))
    }
}

impl DataConfig {
    /// All three directories below a single root.
    pub fn under(root: &Path) -> Self {
        Self {
            raw_data_dir: root.join("raw"),
            processed_data_dir: root.join("processed"),
            cache_dir: root.join("cache"),
        }
    }

    pub fn dirs(&self) -> [&Path; 3] {
        [&self.raw_data_dir, &self.processed_data_dir, &self.cache_dir]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Disk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    #[garde(skip)]
    pub backend: CacheBackendKind,
    #[garde(range(min = 1))]
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            default_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    #[garde(length(min = 1))]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from a TOML file. A missing file yields the defaults; sections
    /// and keys absent from the file keep their default values.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&text)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };
        config.check()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    /// Build from the process environment (see module docs).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = std::env::var("OHLCV_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut config = Self::load(Path::new(&path))?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.check()?;
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("DATA_ROOT").filter(|v| !v.is_empty()) {
            self.data = DataConfig::under(Path::new(&root));
        }
        if let Some(level) = lookup("OHLCV_LOG_LEVEL").filter(|v| !v.is_empty()) {
            self.logging.level = level;
        }
    }

    fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))
    }
}

#[allow(clippy::ptr_arg)]
fn non_empty_path(value: &PathBuf, _ctx: &()) -> garde::Result {
    if value.as_os_str().is_empty() {
        return Err(garde::Error::new("directory must not be empty"));
    }
    Ok(())
}
