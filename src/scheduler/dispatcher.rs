use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::config::RateLimitConfig;
use crate::error::{AppError, Result};

use super::queue::{CompletionHandle, PendingQueue, QueueStats, WorkItem};
use super::window::WindowTracker;

/// Shortest pause taken while waiting for quota, so near-zero waits do not spin.
pub const MIN_WAIT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Draining,
}

/// Point-in-time view of the quota and queue, suitable for countdown displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub requests_in_window: usize,
    pub max_requests: usize,
    pub queue_length: usize,
    pub can_dispatch_now: bool,
    pub next_available_at: Instant,
    pub state: DispatcherState,
}

impl StatusSnapshot {
    /// Time left until the next quota slot opens; zero when one is open already.
    pub fn wait_time(&self) -> Duration {
        self.next_available_at
            .saturating_duration_since(Instant::now())
    }
}

struct SchedulerState {
    window: WindowTracker,
    queue: PendingQueue,
    state: DispatcherState,
    next_id: u64,
    clears: u64,
}

struct Shared {
    inner: Mutex<SchedulerState>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct WorkerGuard(JoinHandle<()>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Serializes provider calls through a single worker that never exceeds the configured quota.
///
/// Work runs strictly in submission order, one item at a time. Clones share the same
/// queue, window and worker; the worker stops once the last clone is dropped.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
    _worker: Arc<WorkerGuard>,
}

enum Step {
    Park,
    Wait(Duration),
    Dispatch(WorkItem),
}

impl Dispatcher {
    /// Start the dispatcher's worker on the current tokio runtime.
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        crate::config::validator::validate_rate_limit(&config)?;
        let runtime = Handle::try_current().map_err(|_| {
            AppError::message("request dispatcher must be created inside a tokio runtime")
        })?;

        let shared = Arc::new(Shared {
            inner: Mutex::new(SchedulerState {
                window: WindowTracker::new(config),
                queue: PendingQueue::default(),
                state: DispatcherState::Idle,
                next_id: 1,
                clears: 0,
            }),
            wake: Notify::new(),
        });

        let worker = runtime.spawn(drain(Arc::clone(&shared)));

        Ok(Self {
            shared,
            _worker: Arc::new(WorkerGuard(worker)),
        })
    }

    /// Queue `execute` behind everything already submitted and return a handle to its outcome.
    pub fn schedule<F, Fut, T>(&self, execute: F) -> CompletionHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = {
            let mut state = self.shared.lock();
            let id = state.next_id;
            state.next_id += 1;

            let (item, handle) = WorkItem::new(id, Instant::now(), execute);
            state.queue.push(item);
            debug!(
                "queued request #{id} ({} waiting)",
                state.queue.len()
            );
            handle
        };

        self.shared.wake.notify_one();
        handle
    }

    pub fn status(&self) -> StatusSnapshot {
        let mut state = self.shared.lock();
        let now = Instant::now();
        state.window.prune(now);

        StatusSnapshot {
            requests_in_window: state.window.count(),
            max_requests: state.window.max_requests(),
            queue_length: state.queue.len(),
            can_dispatch_now: state.window.can_admit(),
            next_available_at: state.window.next_free_at(now),
            state: state.state,
        }
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.shared.lock().queue.stats(Instant::now())
    }

    /// How many times [`Dispatcher::clear`] has run. Callers holding follow-up work compare
    /// this before and after an attempt to learn that the user cancelled in between.
    pub fn clear_generation(&self) -> u64 {
        self.shared.lock().clears
    }

    /// Reject everything still waiting with [`AppError::QueueCleared`]. Work already in
    /// flight is left to finish. Returns the number of rejected requests.
    pub fn clear(&self) -> usize {
        let cleared = {
            let mut state = self.shared.lock();
            state.state = DispatcherState::Idle;
            state.clears += 1;
            state.queue.drain()
        };

        let count = cleared.len();
        for item in cleared {
            item.job.reject(AppError::QueueCleared);
        }
        if count > 0 {
            info!("cleared {count} queued request(s)");
        }
        count
    }
}

async fn drain(shared: Arc<Shared>) {
    loop {
        let step = {
            let mut state = shared.lock();
            let now = Instant::now();
            state.window.prune(now);

            if state.queue.is_empty() {
                state.state = DispatcherState::Idle;
                Step::Park
            } else if !state.window.can_admit() {
                state.state = DispatcherState::Draining;
                let wait = state
                    .window
                    .next_free_at(now)
                    .saturating_duration_since(now)
                    .max(MIN_WAIT);
                Step::Wait(wait)
            } else {
                state.state = DispatcherState::Draining;
                match state.queue.pop_front() {
                    Some(item) => {
                        // The slot is taken at issue time, whatever the outcome.
                        state.window.record(now);
                        Step::Dispatch(item)
                    }
                    None => Step::Park,
                }
            }
        };

        match step {
            Step::Park => shared.wake.notified().await,
            Step::Wait(wait) => {
                debug!("request quota exhausted; waiting {} ms", wait.as_millis());
                sleep(wait).await;
            }
            Step::Dispatch(item) => {
                debug!(
                    "dispatching request #{} after {} ms in queue",
                    item.id,
                    item.enqueued_at.elapsed().as_millis()
                );
                item.job.run().await;
            }
        }
    }
}
