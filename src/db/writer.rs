//! Write queue - background persistence with retry and backoff
//!
//! Memory is the source of truth; writes queued here only make the store
//! catch up. A write that keeps failing is retried with exponential backoff
//! and finally logged with its operation and key for manual reconciliation.

use crate::{
    db::{SqlQuery, StorageBackend},
    executor::AsyncExecutor,
};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Retry policy for background writes
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Queue of persistence writes run on the executor
#[derive(Clone)]
pub struct WriteQueue {
    backend: Arc<dyn StorageBackend>,
    executor: AsyncExecutor,
    policy: RetryPolicy,
}

impl WriteQueue {
    pub fn new(backend: Arc<dyn StorageBackend>, executor: AsyncExecutor, policy: RetryPolicy) -> Self {
        Self {
            backend,
            executor,
            policy,
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn executor(&self) -> &AsyncExecutor {
        &self.executor
    }

    /// Queue `queries` as one transactional write, ordered after earlier writes for `key`
    pub fn submit<K>(&self, key: &K, operation: &'static str, queries: Vec<SqlQuery>)
    where
        K: Hash + Display + ?Sized,
    {
        if queries.is_empty() {
            return;
        }

        let backend = Arc::clone(&self.backend);
        let policy = self.policy.clone();
        let key_label = key.to_string();

        self.executor.execute(key, async move {
            write_with_retry(backend.as_ref(), &policy, operation, &key_label, &queries).await;
        });
    }
}

/// Run one write until it succeeds or the policy gives up; returns whether it landed
pub(crate) async fn write_with_retry(
    backend: &dyn StorageBackend,
    policy: &RetryPolicy,
    operation: &str,
    key: &str,
    queries: &[SqlQuery],
) -> bool {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match backend.execute(queries).await {
            Ok(()) => {
                debug!(operation, key, attempt, "Persisted write");
                return true;
            }
            Err(e) if attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    operation,
                    key,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Persistence write failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!(
                    operation,
                    key,
                    attempts = attempt,
                    error = %e,
                    "Persistence write abandoned; store is out of sync with memory"
                );
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Dialect, Query, SqlRow};
    use crate::error::{BansError, BansResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend failing its first `failures` executions
    struct FlakyBackend {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl StorageBackend for FlakyBackend {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        async fn execute(&self, _queries: &[SqlQuery]) -> BansResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(BansError::storage("INSERT", sqlx::Error::PoolTimedOut))
            } else {
                Ok(())
            }
        }

        async fn query(&self, _queries: &[SqlQuery]) -> BansResult<Vec<Vec<SqlRow>>> {
            Ok(Vec::new())
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_millis(1000));
        assert_eq!(policy.backoff(30), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let backend = FlakyBackend {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let queries = vec![SqlQuery::plain(Query::Ping)];

        let landed = write_with_retry(&backend, &fast_policy(5), "test", "key", &queries).await;
        assert!(landed);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_abandoned() {
        let backend = FlakyBackend {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let queries = vec![SqlQuery::plain(Query::Ping)];

        let landed = write_with_retry(&backend, &fast_policy(3), "test", "key", &queries).await;
        assert!(!landed);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_submit_runs_on_executor() {
        let backend = Arc::new(FlakyBackend {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let executor = AsyncExecutor::pool(2);
        let queue = WriteQueue::new(backend.clone(), executor.clone(), fast_policy(3));

        queue.submit("subject", "test", vec![SqlQuery::plain(Query::Ping)]);
        queue.submit("subject", "empty", Vec::new());
        executor.drain().await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }
}
