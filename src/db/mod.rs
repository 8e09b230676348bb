//! Database layer for the punishment engine
//!
//! Manages the connection pool and the dialect-neutral storage backend,
//! plus the retrying write queue used for background persistence.

pub mod backend;
pub mod query;
pub mod writer;

pub use backend::{SqlBackend, StorageBackend};
pub use query::{Query, SqlQuery, SqlRow, SqlValue};
pub use writer::{RetryPolicy, WriteQueue};

use crate::error::{BansError, BansResult};
use serde::{Deserialize, Serialize};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQL dialect of the backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Infer the dialect from a connection URL scheme
    pub fn from_url(url: &str) -> BansResult<Self> {
        if url.starts_with("sqlite:") {
            Ok(Dialect::Sqlite)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Ok(Dialect::Postgres)
        } else {
            Err(BansError::Configuration(format!(
                "Unsupported database URL: {}",
                url
            )))
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Sqlite => f.write_str("sqlite"),
            Dialect::Postgres => f.write_str("postgres"),
        }
    }
}

impl FromStr for Dialect {
    type Err = BansError;

    fn from_str(s: &str) -> BansResult<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            _ => Err(BansError::Configuration(format!("Unknown storage dialect: {}", s))),
        }
    }
}

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            enable_wal: true,
        }
    }
}

/// Whether a SQLite URL points at an in-memory database
fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Local file behind a SQLite URL, if any
fn sqlite_file(url: &str) -> Option<&Path> {
    let rest = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || is_memory_url(url) {
        None
    } else {
        Some(Path::new(path))
    }
}

/// Create a connection pool for any supported dialect
///
/// In-memory SQLite is pinned to a single long-lived connection, since every
/// new connection would open an empty database.
pub async fn create_pool(url: &str, options: &DatabaseOptions) -> BansResult<AnyPool> {
    sqlx::any::install_default_drivers();
    let dialect = Dialect::from_url(url)?;

    // Ensure parent directory exists
    if let Some(parent) = sqlite_file(url).and_then(Path::parent) {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut pool_options = AnyPoolOptions::new().acquire_timeout(options.acquire_timeout);

    if dialect == Dialect::Sqlite && is_memory_url(url) {
        pool_options = pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    } else {
        pool_options = pool_options.max_connections(options.max_connections);
    }

    if dialect == Dialect::Sqlite && options.enable_wal && sqlite_file(url).is_some() {
        pool_options = pool_options.after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA journal_mode=WAL").execute(conn).await?;
                Ok(())
            })
        });
    }

    pool_options
        .connect(url)
        .await
        .map_err(|e| BansError::storage(format!("CONNECT {}", dialect), e))
}

/// Create the Active, History and Cache tables if missing
pub async fn run_migrations(backend: &dyn StorageBackend) -> BansResult<()> {
    backend
        .execute(&[
            SqlQuery::plain(Query::CreateTableActive),
            SqlQuery::plain(Query::CreateTableHistory),
            SqlQuery::plain(Query::CreateTableCache),
        ])
        .await
}
