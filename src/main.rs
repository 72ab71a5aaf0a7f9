use anyhow::{Context, Result};
use tracing_subscriber::{self, EnvFilter};

use ohlcv_store::data::interval::Interval;
use ohlcv_store::{Config, DataManager};

fn main() -> Result<()> {
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let manager = DataManager::new(&config).context("Failed to open data directories")?;
    tracing::info!(
        processed = %config.data.processed_data_dir.display(),
        cache = %config.data.cache_dir.display(),
        backend = ?config.cache.backend,
        "Opened data store"
    );

    manager.purge_expired_cache()?;

    let mut total = 0usize;
    for interval in Interval::ALL {
        for symbol in manager.list_symbols(interval.as_str())? {
            total += 1;
            let Some((first, last)) = manager.get_date_range(&symbol, interval.as_str())? else {
                continue;
            };
            let gaps = manager.get_data_gaps(&symbol, interval.as_str(), first, last)?;
            tracing::info!(
                %symbol,
                %interval,
                %first,
                %last,
                gaps = gaps.len(),
                "Stored series"
            );
            for gap in &gaps {
                tracing::debug!(%symbol, %interval, start = %gap.start, end = %gap.end, "Gap");
            }
        }
    }

    tracing::info!(series = total, "Status report complete");
    Ok(())
}
