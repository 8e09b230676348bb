/// Configuration management for the punishment engine
use crate::{
    db::{Dialect, RetryPolicy},
    error::{BansError, BansResult},
};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BansConfig {
    pub storage: StorageConfig,
    pub identity: IdentityConfig,
    pub executor: ExecutorConfig,
    pub persistence: PersistenceConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_url: String,
    pub dialect: Dialect,
    pub max_connections: u32,
    /// Load caches in the background instead of blocking startup
    pub async_loading: bool,
}

/// Identity cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Seconds after which a cached name is re-checked with the authority
    pub stale_secs: u64,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub workers: usize,
}

/// Background write retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Periodic job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub sweep_interval_secs: u64,
    pub health_check_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for BansConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                database_url: "sqlite://./data/bans.sqlite?mode=rwc".to_string(),
                dialect: Dialect::Sqlite,
                max_connections: 10,
                async_loading: false,
            },
            identity: IdentityConfig { stale_secs: 3600 },
            executor: ExecutorConfig { workers: 4 },
            persistence: PersistenceConfig {
                max_attempts: 5,
                backoff_ms: 250,
                max_backoff_ms: 10_000,
            },
            jobs: JobsConfig {
                sweep_interval_secs: 5,
                health_check_secs: 300,
            },
            logging: LoggingConfig {
                level: "bans_engine=info".to_string(),
                json: false,
            },
        }
    }
}

impl BansConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> BansResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> BansResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = lookup("BANS_DATABASE_URL").unwrap_or(defaults.storage.database_url);
        let dialect = match lookup("BANS_STORAGE_DIALECT") {
            Some(dialect) => dialect.parse()?,
            None => Dialect::from_url(&database_url)?,
        };

        let json = lookup("BANS_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(defaults.logging.json);

        Ok(BansConfig {
            storage: StorageConfig {
                database_url,
                dialect,
                max_connections: parse_var(
                    &lookup,
                    "BANS_DB_MAX_CONNECTIONS",
                    defaults.storage.max_connections,
                )?,
                async_loading: parse_var(
                    &lookup,
                    "BANS_ASYNC_LOADING",
                    defaults.storage.async_loading,
                )?,
            },
            identity: IdentityConfig {
                stale_secs: parse_var(
                    &lookup,
                    "BANS_IDENTITY_STALE_SECS",
                    defaults.identity.stale_secs,
                )?,
            },
            executor: ExecutorConfig {
                workers: parse_var(&lookup, "BANS_EXECUTOR_WORKERS", defaults.executor.workers)?,
            },
            persistence: PersistenceConfig {
                max_attempts: parse_var(
                    &lookup,
                    "BANS_PERSIST_MAX_ATTEMPTS",
                    defaults.persistence.max_attempts,
                )?,
                backoff_ms: parse_var(
                    &lookup,
                    "BANS_PERSIST_BACKOFF_MS",
                    defaults.persistence.backoff_ms,
                )?,
                max_backoff_ms: parse_var(
                    &lookup,
                    "BANS_PERSIST_MAX_BACKOFF_MS",
                    defaults.persistence.max_backoff_ms,
                )?,
            },
            jobs: JobsConfig {
                sweep_interval_secs: parse_var(
                    &lookup,
                    "BANS_SWEEP_INTERVAL_SECS",
                    defaults.jobs.sweep_interval_secs,
                )?,
                health_check_secs: parse_var(
                    &lookup,
                    "BANS_HEALTH_CHECK_SECS",
                    defaults.jobs.health_check_secs,
                )?,
            },
            logging: LoggingConfig {
                level: lookup("RUST_LOG").unwrap_or(defaults.logging.level),
                json,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> BansResult<()> {
        let url_dialect = Dialect::from_url(&self.storage.database_url)?;
        if url_dialect != self.storage.dialect {
            return Err(BansError::Configuration(format!(
                "Storage dialect {} does not match database URL ({})",
                self.storage.dialect, url_dialect
            )));
        }

        if self.storage.max_connections == 0 {
            return Err(BansError::Configuration(
                "Database pool needs at least one connection".to_string(),
            ));
        }

        if self.executor.workers == 0 {
            return Err(BansError::Configuration(
                "Executor needs at least one worker".to_string(),
            ));
        }

        if self.persistence.max_attempts == 0 {
            return Err(BansError::Configuration(
                "Persistence needs at least one attempt".to_string(),
            ));
        }

        if self.jobs.sweep_interval_secs == 0 {
            return Err(BansError::Configuration(
                "Sweep interval must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.persistence.max_attempts,
            base_backoff: Duration::from_millis(self.persistence.backoff_ms),
            max_backoff: Duration::from_millis(self.persistence.max_backoff_ms),
        }
    }

    pub fn identity_stale_after(&self) -> chrono::Duration {
        let secs = i64::try_from(self.identity.stale_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1_000))
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> BansResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| BansError::Configuration(format!("Invalid value for {}: {}", key, value))),
        None => Ok(default),
    }
}
