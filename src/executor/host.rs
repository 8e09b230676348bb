//! Keyed FIFO lanes in front of a host scheduler
//!
//! A host scheduler makes no ordering promise. Only the head task of each key
//! is handed to it; the runner it receives drains the rest of that key's queue
//! before returning, so tasks under one key still run in submission order.
use crate::executor::{panic_message, Task, TaskScheduler};
use futures::FutureExt;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{error, warn};

pub struct HostLanes {
    scheduler: Arc<dyn TaskScheduler>,
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<LaneState>,
    /// Submitted tasks that have not finished yet
    outstanding: watch::Sender<usize>,
}

#[derive(Default)]
struct LaneState {
    /// Keys with a runner in flight, and what queued up behind it
    queues: HashMap<u64, VecDeque<Task>>,
    closed: bool,
}

impl HostLanes {
    pub fn new(scheduler: Arc<dyn TaskScheduler>) -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            scheduler,
            shared: Arc::new(Shared {
                state: Mutex::new(LaneState::default()),
                outstanding,
            }),
        }
    }

    /// Queue a task behind earlier tasks with the same key
    pub fn submit<K: Hash + ?Sized>(&self, key: &K, task: Task) {
        let lane = lane_hash(key);
        {
            let mut state = self.shared.lock();
            if state.closed {
                warn!(lane, "Executor is closed; dropping task");
                return;
            }
            self.shared.outstanding.send_modify(|n| *n += 1);

            if let Some(queue) = state.queues.get_mut(&lane) {
                queue.push_back(task);
                return;
            }
            state.queues.insert(lane, VecDeque::new());
        }

        self.scheduler
            .schedule(run_lane(Arc::clone(&self.shared), lane, task));
    }

    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.borrow()
    }

    /// Wait until no submitted task is left
    ///
    /// Never returns if the host drops a scheduled task without running it.
    pub async fn drain(&self) {
        let mut outstanding = self.shared.outstanding.subscribe();
        let _ = outstanding.wait_for(|n| *n == 0).await;
    }

    /// Refuse new tasks, then wait for the submitted ones
    pub async fn close(&self) {
        self.shared.lock().closed = true;
        self.drain().await;
    }
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, LaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lane_hash<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn run_lane(shared: Arc<Shared>, lane: u64, first: Task) -> Task {
    Box::pin(async move {
        let mut next = Some(first);
        while let Some(task) = next {
            if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                error!(lane, "Background task panicked: {}", panic_message(&*panic));
            }

            next = {
                let mut state = shared.lock();
                let queued = state.queues.get_mut(&lane).and_then(VecDeque::pop_front);
                if queued.is_none() {
                    state.queues.remove(&lane);
                }
                queued
            };
            shared.outstanding.send_modify(|n| *n = n.saturating_sub(1));
        }
    })
}
