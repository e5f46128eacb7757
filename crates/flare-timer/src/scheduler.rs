//! Schedulers: something that runs a closure after a delay.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A deferred task handed to a [`Scheduler`].
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs tasks after a delay.
///
/// Implementations must never run a task early, and must never run a
/// task whose [`Scheduled`] handle has been cancelled.
pub trait Scheduler: Send + Sync + 'static {
    fn schedule(&self, delay: Duration, task: Task) -> Scheduled;
}

/// Handle to one scheduled task.
///
/// Dropping the handle does NOT cancel the task; call
/// [`Scheduled::cancel`].
pub struct Scheduled {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Scheduled {
    /// Creates a handle whose cancellation runs `cancel`.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Prevents the task from running, if it hasn't started yet.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Scheduled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Scheduled")
    }
}

// ---------------------------------------------------------------------------
// TokioScheduler
// ---------------------------------------------------------------------------

/// Real-clock scheduler: each task is a Tokio task sleeping on
/// `tokio::time::sleep`.
///
/// Must be used from inside a Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> Scheduled {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        Scheduled::new(move || handle.abort())
    }
}

// ---------------------------------------------------------------------------
// VirtualClock
// ---------------------------------------------------------------------------

/// Deterministic scheduler for tests.
///
/// Time starts at zero and only moves when [`advance`](Self::advance) is
/// called. Due tasks run on the caller's thread, in deadline order
/// (ties in scheduling order), outside the clock's lock; a task may
/// schedule further tasks.
#[derive(Clone, Default)]
pub struct VirtualClock {
    inner: Arc<Mutex<ClockState>>,
}

#[derive(Default)]
struct ClockState {
    now: Duration,
    next_seq: u64,
    /// Keyed by (deadline, scheduling order).
    pending: BTreeMap<(Duration, u64), Task>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed since the clock was created.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Number of tasks waiting to fire.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Delay until the next task fires, if any.
    pub fn next_deadline(&self) -> Option<Duration> {
        let state = self.lock();
        state
            .pending
            .keys()
            .next()
            .map(|(deadline, _)| deadline.saturating_sub(state.now))
    }

    /// Moves time forward by `by`, running every task that falls due.
    /// Returns how many tasks ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.lock().now + by;
        let mut ran = 0;
        loop {
            let task = {
                let mut state = self.lock();
                let due = state
                    .pending
                    .first_key_value()
                    .is_some_and(|((deadline, _), _)| *deadline <= target);
                if !due {
                    state.now = target;
                    break;
                }
                let Some(((deadline, _), task)) = state.pending.pop_first() else {
                    break;
                };
                state.now = deadline;
                task
            };
            task();
            ran += 1;
        }
        ran
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for VirtualClock {
    fn schedule(&self, delay: Duration, task: Task) -> Scheduled {
        let key = {
            let mut state = self.lock();
            let key = (state.now + delay, state.next_seq);
            state.next_seq += 1;
            state.pending.insert(key, task);
            key
        };
        let inner = Arc::clone(&self.inner);
        Scheduled::new(move || {
            inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pending
                .remove(&key);
        })
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("VirtualClock")
            .field("now", &state.now)
            .field("pending", &state.pending.len())
            .finish()
    }
}
