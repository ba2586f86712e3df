//! Daemon configuration.
//!
//! Values come from the process environment, after an optional `.env` file has
//! been loaded. School-level settings (school name, term label) live in the
//! workspace database instead, see `db::settings_get_json`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Reports are served from the cache for this long unless overridden.
pub const DEFAULT_REPORT_CACHE_SECS: u64 = 300;

const DEFAULT_LOG_FILTER: &str = "warn";

const ENV_WORKSPACE: &str = "SCHOOLBOOK_WORKSPACE";
const ENV_REPORT_CACHE_SECS: &str = "SCHOOLBOOK_REPORT_CACHE_SECS";
const ENV_LOG: &str = "SCHOOLBOOK_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be a whole number of seconds, got {value:?}")]
    InvalidSeconds { key: &'static str, value: String },

    #[error("{key} must not be empty")]
    Empty { key: &'static str },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub report_cache_ttl: Duration,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            report_cache_ttl: Duration::from_secs(DEFAULT_REPORT_CACHE_SECS),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup so tests don't touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();

        if let Some(raw) = lookup(ENV_WORKSPACE) {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(ConfigError::Empty { key: ENV_WORKSPACE });
            }
            cfg.workspace = Some(PathBuf::from(trimmed));
        }

        if let Some(raw) = lookup(ENV_REPORT_CACHE_SECS) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidSeconds {
                    key: ENV_REPORT_CACHE_SECS,
                    value: raw.clone(),
                })?;
            cfg.report_cache_ttl = Duration::from_secs(secs);
        }

        if let Some(filter) = lookup(ENV_LOG).or_else(|| lookup("RUST_LOG")) {
            if !filter.trim().is_empty() {
                cfg.log_filter = filter.trim().to_string();
            }
        }

        Ok(cfg)
    }
}
