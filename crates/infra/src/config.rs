//! Engine configuration loaded from the process environment.

use std::time::Duration;

use thiserror::Error;

use tillpoint_observability::LogFormat;
use tillpoint_products::MAX_TAX_RATE_BPS;

pub const ENV_DATABASE_URL: &str = "TILLPOINT_DATABASE_URL";
pub const ENV_DATABASE_URL_FALLBACK: &str = "DATABASE_URL";
pub const ENV_DEFAULT_TAX_RATE_BPS: &str = "TILLPOINT_DEFAULT_TAX_RATE_BPS";
pub const ENV_LOCK_TIMEOUT_MS: &str = "TILLPOINT_LOCK_TIMEOUT_MS";
pub const ENV_DB_MAX_CONNECTIONS: &str = "TILLPOINT_DB_MAX_CONNECTIONS";
pub const ENV_LOG_FORMAT: &str = "TILLPOINT_LOG_FORMAT";

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Runtime settings for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Postgres connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Sales tax applied to products without their own rate.
    pub default_tax_rate_bps: u32,
    /// How long a unit of work waits for a row lock before giving up.
    pub lock_timeout: Duration,
    pub db_max_connections: u32,
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            default_tax_rate_bps: 0,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            log_format: LogFormat::default(),
        }
    }
}

impl EngineConfig {
    /// Install the process-wide subscriber in the configured format.
    pub fn init_logging(&self) {
        tillpoint_observability::init(self.log_format);
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset or blank values take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let database_url = get(ENV_DATABASE_URL).or_else(|| get(ENV_DATABASE_URL_FALLBACK));

        let default_tax_rate_bps = match get(ENV_DEFAULT_TAX_RATE_BPS) {
            Some(raw) => {
                let rate: u32 = parse(ENV_DEFAULT_TAX_RATE_BPS, &raw)?;
                if rate > MAX_TAX_RATE_BPS {
                    return Err(ConfigError {
                        var: ENV_DEFAULT_TAX_RATE_BPS,
                        value: raw,
                        reason: format!("must not exceed {MAX_TAX_RATE_BPS}"),
                    });
                }
                rate
            }
            None => defaults.default_tax_rate_bps,
        };

        let lock_timeout = match get(ENV_LOCK_TIMEOUT_MS) {
            Some(raw) => {
                let ms: u64 = parse(ENV_LOCK_TIMEOUT_MS, &raw)?;
                if ms == 0 {
                    return Err(ConfigError {
                        var: ENV_LOCK_TIMEOUT_MS,
                        value: raw,
                        reason: "must be positive".to_string(),
                    });
                }
                Duration::from_millis(ms)
            }
            None => defaults.lock_timeout,
        };

        let db_max_connections = match get(ENV_DB_MAX_CONNECTIONS) {
            Some(raw) => {
                let n: u32 = parse(ENV_DB_MAX_CONNECTIONS, &raw)?;
                if n == 0 {
                    return Err(ConfigError {
                        var: ENV_DB_MAX_CONNECTIONS,
                        value: raw,
                        reason: "must be positive".to_string(),
                    });
                }
                n
            }
            None => defaults.db_max_connections,
        };

        let log_format = match get(ENV_LOG_FORMAT) {
            Some(raw) => parse(ENV_LOG_FORMAT, &raw)?,
            None => defaults.log_format,
        };

        Ok(Self {
            database_url,
            default_tax_rate_bps,
            lock_timeout,
            db_max_connections,
            log_format,
        })
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
