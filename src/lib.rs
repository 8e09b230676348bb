//! Punishment engine for multiplayer game servers
//!
//! Keeps bans, mutes, warns and kicks together with player identities in
//! memory, serves lookups from there, and persists every change to a SQL
//! store in the background.

pub mod config;
pub mod context;
pub mod db;
pub mod enforcement;
pub mod error;
pub mod executor;
pub mod identity;
pub mod jobs;
pub mod platform;
pub mod punishment;

pub use config::BansConfig;
pub use context::{BansContext, LoadState};
pub use enforcement::EnforcementFacade;
pub use error::{BansError, BansResult};
pub use platform::{HeadlessPlatform, Platform};
pub use punishment::{Expiration, Operator, Punishment, PunishmentId, PunishmentType, Subject};

#[cfg(test)]
pub(crate) mod testing {
    use crate::{
        db::{
            self, DatabaseOptions, Dialect, Query, RetryPolicy, SqlBackend, SqlQuery, SqlRow,
            WriteQueue,
        },
        executor::AsyncExecutor,
    };
    use std::sync::Arc;
    use std::time::Duration;

    /// In-memory SQLite backend with the tables created
    pub async fn memory_backend() -> Arc<SqlBackend> {
        let pool = db::create_pool("sqlite::memory:", &DatabaseOptions::default())
            .await
            .unwrap();
        let backend = Arc::new(SqlBackend::new(pool, Dialect::Sqlite));
        db::run_migrations(backend.as_ref()).await.unwrap();
        backend
    }

    /// Write queue over a fresh in-memory backend and its own worker pool
    pub async fn memory_writes() -> WriteQueue {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
        };
        WriteQueue::new(memory_backend().await, AsyncExecutor::pool(4), policy)
    }

    pub async fn select_all(writes: &WriteQueue, query: Query) -> Vec<SqlRow> {
        writes
            .backend()
            .query(&[SqlQuery::plain(query)])
            .await
            .unwrap()
            .remove(0)
    }
}
