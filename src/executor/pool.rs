//! Internal worker pool of keyed FIFO lanes
use crate::executor::{panic_message, Task};
use futures::FutureExt;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::{PoisonError, RwLock};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Fixed set of lanes, each running its tasks one at a time in order
pub struct WorkerPool {
    lanes: RwLock<Option<Vec<mpsc::UnboundedSender<Task>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    lane_count: usize,
}

impl WorkerPool {
    /// Spawn `workers` lanes on the current Tokio runtime
    pub fn new(workers: usize) -> Self {
        let lane_count = workers.max(1);
        let mut senders = Vec::with_capacity(lane_count);
        let mut handles = Vec::with_capacity(lane_count);

        for lane in 0..lane_count {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            handles.push(tokio::spawn(run_lane(lane, rx)));
        }

        Self {
            lanes: RwLock::new(Some(senders)),
            workers: Mutex::new(handles),
            lane_count,
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lane_count
    }

    fn lane_for<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.lane_count as u64) as usize
    }

    /// Queue a task on the lane owning `key`
    pub fn submit<K: Hash + ?Sized>(&self, key: &K, task: Task) {
        let lane = self.lane_for(key);
        let lanes = self.lanes.read().unwrap_or_else(PoisonError::into_inner);

        match lanes.as_ref() {
            Some(senders) => {
                if senders[lane].send(task).is_err() {
                    warn!(lane, "Worker lane stopped; dropping task");
                }
            }
            None => warn!(lane, "Worker pool is closed; dropping task"),
        }
    }

    /// Wait until every lane has run the tasks queued before this call
    pub async fn drain(&self) {
        let barriers: Vec<oneshot::Receiver<()>> = {
            let lanes = self.lanes.read().unwrap_or_else(PoisonError::into_inner);
            let Some(senders) = lanes.as_ref() else {
                return;
            };

            senders
                .iter()
                .filter_map(|sender| {
                    let (tx, rx) = oneshot::channel();
                    let barrier: Task = Box::pin(async move {
                        let _ = tx.send(());
                    });
                    sender.send(barrier).ok().map(|_| rx)
                })
                .collect()
        };

        for barrier in barriers {
            let _ = barrier.await;
        }
    }

    /// Stop accepting work, finish what is queued, and join the lanes
    pub async fn close(&self) {
        let senders = self
            .lanes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(senders);

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker lane ended abnormally: {}", e);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lanes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

async fn run_lane(lane: usize, mut rx: mpsc::UnboundedReceiver<Task>) {
    while let Some(task) = rx.recv().await {
        if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
            error!(lane, "Background task panicked: {}", panic_message(&*panic));
        }
    }
    debug!(lane, "Worker lane stopped");
}
