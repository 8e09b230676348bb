//! Background task execution
//!
//! Work is either handed to a scheduler supplied by the host, or run on an
//! internal pool of keyed FIFO lanes. Either way, tasks submitted under the
//! same key run in submission order; tasks under unrelated keys may run in
//! parallel.

pub mod host;
pub mod pool;

pub use host::HostLanes;
pub use pool::WorkerPool;

use futures::future::BoxFuture;
use std::any::Any;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, OnceLock};
use tracing::info;

/// Boxed unit of background work
pub type Task = BoxFuture<'static, ()>;

/// Scheduler owned by the host process
pub trait TaskScheduler: Send + Sync {
    /// Run the task off the calling thread
    fn schedule(&self, task: Task);
}

static DEFAULT_SCHEDULER: OnceLock<Arc<dyn TaskScheduler>> = OnceLock::new();

/// Register a process-wide scheduler for [`AsyncExecutor::from_default_or_pool`]
///
/// Returns false if one was already registered.
pub fn register_default_scheduler(scheduler: Arc<dyn TaskScheduler>) -> bool {
    DEFAULT_SCHEDULER.set(scheduler).is_ok()
}

/// Executor for loading, persistence and enforcement work
#[derive(Clone)]
pub enum AsyncExecutor {
    /// Delegate to a scheduler supplied by the host
    Host(Arc<HostLanes>),
    /// Internally owned worker pool
    Pool(Arc<WorkerPool>),
}

impl AsyncExecutor {
    /// Executor backed by a new internal pool; must be called inside a Tokio runtime
    pub fn pool(workers: usize) -> Self {
        AsyncExecutor::Pool(Arc::new(WorkerPool::new(workers)))
    }

    pub fn host(scheduler: Arc<dyn TaskScheduler>) -> Self {
        AsyncExecutor::Host(Arc::new(HostLanes::new(scheduler)))
    }

    /// Use the registered process-wide scheduler, or fall back to an internal pool
    pub fn from_default_or_pool(workers: usize) -> Self {
        match DEFAULT_SCHEDULER.get() {
            Some(scheduler) => {
                info!("Using host-provided task scheduler");
                Self::host(Arc::clone(scheduler))
            }
            None => {
                info!(workers, "Starting internal worker pool");
                Self::pool(workers)
            }
        }
    }

    /// Run `task` in the background, ordered after earlier tasks with the same key
    pub fn execute<K, F>(&self, key: &K, task: F)
    where
        K: Hash + ?Sized,
        F: Future<Output = ()> + Send + 'static,
    {
        match self {
            AsyncExecutor::Host(lanes) => lanes.submit(key, Box::pin(task)),
            AsyncExecutor::Pool(pool) => pool.submit(key, Box::pin(task)),
        }
    }

    /// Wait for every task queued before this call to finish
    ///
    /// On a host scheduler this waits until nothing submitted is outstanding.
    pub async fn drain(&self) {
        match self {
            AsyncExecutor::Host(lanes) => lanes.drain().await,
            AsyncExecutor::Pool(pool) => pool.drain().await,
        }
    }

    /// Stop accepting tasks and let queued ones finish
    pub async fn close(&self) {
        match self {
            AsyncExecutor::Host(lanes) => lanes.close().await,
            AsyncExecutor::Pool(pool) => pool.close().await,
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
