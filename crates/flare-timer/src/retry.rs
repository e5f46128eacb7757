//! The single-shot, backoff-driven retry timer.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::trace;

use crate::{Backoff, Scheduled, Scheduler};

/// Counter for generating unique timer tokens.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Identifies one scheduled firing.
///
/// The token is handed to the firing closure. Its owner passes it back
/// to [`RetryTimer::fire`], which accepts it only if that firing is still
/// the pending one; a firing that was already on its way when the timer
/// was reset is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

impl fmt::Display for TimerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// A cancelable one-shot timer whose delay grows with each attempt.
///
/// ```text
/// schedule_timeout():  tries += 1, fire after backoff(tries)
/// reset():             cancel, tries = 0
/// ```
///
/// At most one firing is pending at any time: scheduling again cancels
/// the previous firing first. Dropping the timer cancels it.
pub struct RetryTimer {
    scheduler: Arc<dyn Scheduler>,
    backoff: Backoff,
    tries: u32,
    pending: Option<(TimerToken, Scheduled)>,
}

impl RetryTimer {
    pub fn new(scheduler: Arc<dyn Scheduler>, backoff: Backoff) -> Self {
        Self {
            scheduler,
            backoff,
            tries: 0,
            pending: None,
        }
    }

    /// Schedules `on_fire` after `backoff(tries + 1)` and bumps `tries`.
    /// Returns the delay used.
    pub fn schedule_timeout(
        &mut self,
        on_fire: impl FnOnce(TimerToken) + Send + 'static,
    ) -> Duration {
        self.cancel();

        self.tries = self.tries.saturating_add(1);
        let delay = self.backoff.delay(self.tries);
        let token = TimerToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
        let handle = self
            .scheduler
            .schedule(delay, Box::new(move || on_fire(token)));
        self.pending = Some((token, handle));

        trace!(%token, tries = self.tries, delay_ms = delay.as_millis() as u64, "timer scheduled");
        delay
    }

    /// Cancels any pending firing and starts counting attempts from zero.
    pub fn reset(&mut self) {
        self.cancel();
        self.tries = 0;
    }

    /// Cancels any pending firing but keeps the attempt count.
    pub fn cancel(&mut self) {
        if let Some((_, handle)) = self.pending.take() {
            handle.cancel();
        }
    }

    /// Claims a firing. Returns `true` if `token` is the pending firing,
    /// which is then no longer pending; `false` for a stale token.
    pub fn fire(&mut self, token: TimerToken) -> bool {
        match &self.pending {
            Some((pending, _)) if *pending == token => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a firing is pending.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Attempts scheduled since the last reset.
    pub fn tries(&self) -> u32 {
        self.tries
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for RetryTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTimer")
            .field("tries", &self.tries)
            .field("pending", &self.pending.as_ref().map(|(token, _)| *token))
            .finish()
    }
}
