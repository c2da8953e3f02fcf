//! Runtime settings resolved from the environment. A `.env` file in the
//! working directory is honoured so a shop can point the tool at a shared
//! database without editing shell profiles.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use directories::BaseDirs;

/// Folder name used beneath the user's home directory for application data.
const DATA_DIR_NAME: &str = ".inventory-tracker";
/// SQLite file name stored inside the application data directory.
const DB_FILE_NAME: &str = "inventory.sqlite";
/// Log file written next to the database.
const LOG_FILE_NAME: &str = "inventory.log";

/// Window in which a repeated scan of the same barcode is treated as a bounce.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(2);
/// Products at or below this on-hand quantity show up in restock alerts.
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub log_path: PathBuf,
    pub scan_timeout: Duration,
    pub low_stock_threshold: i64,
    /// Name recorded on ledger entries made from this session.
    pub user: Option<String>,
}

impl Config {
    /// Load `.env` (if present) and build the configuration from environment
    /// variables, falling back to paths under the home directory.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let db_path = match env::var("INVENTORY_DB_PATH") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => data_dir()?.join(DB_FILE_NAME),
        };

        let log_path = match env::var("INVENTORY_LOG_PATH") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => db_path
                .parent()
                .map(|dir| dir.join(LOG_FILE_NAME))
                .unwrap_or_else(|| PathBuf::from(LOG_FILE_NAME)),
        };

        let scan_timeout = match env::var("INVENTORY_SCAN_TIMEOUT_SECS") {
            Ok(raw) => parse_timeout(&raw)?,
            Err(_) => DEFAULT_SCAN_TIMEOUT,
        };

        let low_stock_threshold = match env::var("INVENTORY_LOW_STOCK_THRESHOLD") {
            Ok(raw) => raw
                .trim()
                .parse::<i64>()
                .context("INVENTORY_LOW_STOCK_THRESHOLD must be an integer")?,
            Err(_) => DEFAULT_LOW_STOCK_THRESHOLD,
        };

        let user = env::var("INVENTORY_USER")
            .or_else(|_| env::var("USER"))
            .ok()
            .filter(|name| !name.trim().is_empty());

        Ok(Self {
            db_path,
            log_path,
            scan_timeout,
            low_stock_threshold,
            user,
        })
    }
}

/// Parse a timeout expressed in (possibly fractional) seconds.
fn parse_timeout(raw: &str) -> Result<Duration> {
    let secs = raw
        .trim()
        .parse::<f64>()
        .context("INVENTORY_SCAN_TIMEOUT_SECS must be a number of seconds")?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(anyhow!("INVENTORY_SCAN_TIMEOUT_SECS must be a non-negative number"));
    }
    Duration::try_from_secs_f64(secs).context("INVENTORY_SCAN_TIMEOUT_SECS is too large")
}

/// Resolve the application data directory inside the user's home.
fn data_dir() -> Result<PathBuf> {
    let base_dirs = BaseDirs::new().ok_or_else(|| anyhow!("could not locate home directory"))?;
    Ok(base_dirs.home_dir().join(DATA_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_accepts_fractional_seconds() {
        assert_eq!(parse_timeout("2.5").unwrap(), Duration::from_millis(2500));
        assert_eq!(parse_timeout(" 0 ").unwrap(), Duration::ZERO);
    }

    #[test]
    fn timeout_rejects_garbage_and_negatives() {
        assert!(parse_timeout("soon").is_err());
        assert!(parse_timeout("-1").is_err());
        assert!(parse_timeout("1e30").is_err());
    }
}
