/// Engine context and dependency injection
use crate::{
    config::BansConfig,
    db::{self, DatabaseOptions, Query, SqlBackend, SqlQuery, StorageBackend, WriteQueue},
    enforcement::EnforcementFacade,
    error::{BansError, BansResult},
    executor::AsyncExecutor,
    identity::IdentityCache,
    platform::Platform,
    punishment::PunishmentStore,
};
use futures::future::{abortable, AbortHandle, Aborted};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Progress of the startup load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Pending,
    Loaded,
    /// The load failed; caches start empty
    Failed(String),
    Cancelled,
}

/// Counts of what a load put into memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub identities: usize,
    pub active: usize,
    pub history: usize,
    pub expired: usize,
}

/// Engine context holding all shared services
#[derive(Clone)]
pub struct BansContext {
    pub config: Arc<BansConfig>,
    pub backend: Arc<SqlBackend>,
    pub executor: AsyncExecutor,
    pub writes: WriteQueue,
    pub punishments: Arc<PunishmentStore>,
    pub identities: Arc<IdentityCache>,
    pub enforcement: EnforcementFacade,
    loader: Arc<Mutex<Option<AbortHandle>>>,
    load_state: watch::Receiver<LoadState>,
}

impl BansContext {
    /// Create a context using the registered host scheduler or an internal pool
    pub async fn new(config: BansConfig, platform: Arc<dyn Platform>) -> BansResult<Self> {
        let executor = AsyncExecutor::from_default_or_pool(config.executor.workers);
        Self::with_executor(config, platform, executor).await
    }

    /// Create a context running background work on `executor`
    ///
    /// Fails if the store cannot be reached, the tables cannot be created, or
    /// a synchronous initial load fails.
    pub async fn with_executor(
        config: BansConfig,
        platform: Arc<dyn Platform>,
        executor: AsyncExecutor,
    ) -> BansResult<Self> {
        config.validate()?;

        let options = DatabaseOptions {
            max_connections: config.storage.max_connections,
            ..DatabaseOptions::default()
        };
        let pool = db::create_pool(&config.storage.database_url, &options).await?;
        let backend = Arc::new(SqlBackend::new(pool, config.storage.dialect));

        // Schema creation is fatal
        db::run_migrations(backend.as_ref()).await?;
        backend.ping().await?;

        let writes = WriteQueue::new(backend.clone(), executor.clone(), config.retry_policy());
        let punishments = Arc::new(PunishmentStore::new(writes.clone()));
        let identities = Arc::new(IdentityCache::new(
            writes.clone(),
            Arc::clone(&platform),
            config.identity_stale_after(),
        ));
        let enforcement = EnforcementFacade::new(
            Arc::clone(&punishments),
            Arc::clone(&identities),
            platform,
            executor.clone(),
        );

        let (state_tx, load_state) = watch::channel(LoadState::Pending);
        let context = Self {
            config: Arc::new(config),
            backend,
            executor,
            writes,
            punishments,
            identities,
            enforcement,
            loader: Arc::new(Mutex::new(None)),
            load_state,
        };

        if context.config.storage.async_loading {
            context.spawn_load(state_tx);
        } else {
            let summary = context.load().await?;
            info!(?summary, "Startup load complete");
            let _ = state_tx.send(LoadState::Loaded);
        }

        Ok(context)
    }

    fn spawn_load(&self, state_tx: watch::Sender<LoadState>) {
        let context = self.clone();
        let (load, handle) = abortable(async move { context.load().await });
        *self.loader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!("Loading caches in the background");
        tokio::spawn(async move {
            let state = match load.await {
                Ok(Ok(summary)) => {
                    info!(?summary, "Background load complete");
                    LoadState::Loaded
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Background load failed; starting with empty caches");
                    LoadState::Failed(e.to_string())
                }
                Err(Aborted) => {
                    warn!("Background load cancelled");
                    LoadState::Cancelled
                }
            };
            let _ = state_tx.send(state);
        });
    }

    /// Read every table into memory, then sweep what expired
    pub async fn load(&self) -> BansResult<LoadSummary> {
        let mut results = self
            .backend
            .query(&[
                SqlQuery::plain(Query::SelectAllCached),
                SqlQuery::plain(Query::SelectAllHistory),
                SqlQuery::plain(Query::SelectAllActive),
            ])
            .await?
            .into_iter();

        let (Some(cached), Some(history), Some(active)) =
            (results.next(), results.next(), results.next())
        else {
            return Err(BansError::Internal(
                "Startup load returned fewer result sets than statements".to_string(),
            ));
        };

        let identities = self.identities.load_all(&cached);
        let history = self.punishments.load_history(&history);
        let active = self.punishments.load_active(&active);
        let expired = self.punishments.refresh_active().len();

        Ok(LoadSummary {
            identities,
            active,
            history,
            expired,
        })
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state.borrow().clone()
    }

    /// Wait until the startup load has settled
    pub async fn wait_loaded(&self) -> LoadState {
        let mut state = self.load_state.clone();
        if let Ok(settled) = state.wait_for(|state| *state != LoadState::Pending).await {
            return settled.clone();
        }
        // Sender gone without settling
        let last = state.borrow().clone();
        last
    }

    /// Re-run the expiration sweep; returns how many punishments expired
    pub fn reload(&self) -> usize {
        let expired = self.punishments.refresh_active().len();
        info!(expired, "Reloaded punishment engine");
        expired
    }

    /// Cancel a pending load, flush queued writes and close the pool
    pub async fn close(&self) {
        if let Some(handle) = self
            .loader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }

        self.executor.close().await;
        self.backend.close().await;
        info!("Punishment engine closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HeadlessPlatform;
    use crate::punishment::{Expiration, Operator, Punishment, PunishmentType, Subject};
    use uuid::Uuid;

    fn memory_config(async_loading: bool) -> BansConfig {
        let mut config = BansConfig::default();
        config.storage.database_url = "sqlite::memory:".to_string();
        config.storage.async_loading = async_loading;
        config
    }

    #[tokio::test]
    async fn test_sync_startup() {
        let ctx = BansContext::new(memory_config(false), Arc::new(HeadlessPlatform))
            .await
            .unwrap();
        assert_eq!(ctx.load_state(), LoadState::Loaded);
        assert_eq!(ctx.punishments.active_count(), 0);

        let subject = Subject::Player(Uuid::new_v4());
        ctx.enforcement
            .add_punishment(Punishment::new(
                PunishmentType::Ban,
                subject,
                Operator::Console,
                "x-ray",
                Expiration::Permanent,
            ))
            .unwrap();
        assert!(ctx.enforcement.is_banned(&subject));
        assert_eq!(ctx.reload(), 0);

        ctx.close().await;
    }

    #[tokio::test]
    async fn test_async_startup_settles() {
        let ctx = BansContext::with_executor(
            memory_config(true),
            Arc::new(HeadlessPlatform),
            AsyncExecutor::pool(2),
        )
        .await
        .unwrap();

        assert_eq!(ctx.wait_loaded().await, LoadState::Loaded);
        ctx.close().await;
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = memory_config(false);
        config.executor.workers = 0;

        let result = BansContext::new(config, Arc::new(HeadlessPlatform)).await;
        assert!(matches!(result, Err(BansError::Configuration(_))));
    }
}
