// ABOUTME: Configuration loading and validation for the daybook binary.
// ABOUTME: Reads DAYBOOK_* environment variables (after .env) with defaults for a single-user journal.

use std::path::PathBuf;
use std::time::Duration;

use daybook_core::registry::DEFAULT_MAX_CACHES;
use thiserror::Error;

const DATABASE_FILE: &str = "daybook.db";
const DEFAULT_IDLE_SECS: u64 = 300;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("DAYBOOK_MAX_CACHED_DAYS must be at least 1")]
    ZeroCacheCap,
}

/// Journal configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DaybookConfig {
    pub home: PathBuf,
    pub max_cached_days: usize,
    pub idle_threshold: Duration,
    pub device_id: Option<String>,
}

impl DaybookConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - DAYBOOK_HOME: data directory (default: ~/.daybook)
    /// - DAYBOOK_MAX_CACHED_DAYS: day caches kept in memory (default: 7)
    /// - DAYBOOK_IDLE_SECS: idle time before a day cache is dropped (default: 300)
    /// - DAYBOOK_DEVICE_ID: device id stamped on logged events (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = std::env::var("DAYBOOK_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/tmp"))
                    .join(".daybook")
            });

        let max_cached_days = number_var("DAYBOOK_MAX_CACHED_DAYS")?
            .map_or(DEFAULT_MAX_CACHES, |n| usize::try_from(n).unwrap_or(usize::MAX));
        if max_cached_days == 0 {
            return Err(ConfigError::ZeroCacheCap);
        }

        let idle_secs = number_var("DAYBOOK_IDLE_SECS")?.unwrap_or(DEFAULT_IDLE_SECS);

        let device_id = std::env::var("DAYBOOK_DEVICE_ID").ok().filter(|d| !d.is_empty());

        Ok(Self {
            home,
            max_cached_days,
            idle_threshold: Duration::from_secs(idle_secs),
            device_id,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.home.join(DATABASE_FILE)
    }
}

fn number_var(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(var) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        Err(_) => Ok(None),
    }
}
