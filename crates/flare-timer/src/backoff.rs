//! Backoff functions: attempt count → delay.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Maps a 1-based attempt count to the delay before that attempt.
///
/// Cheap to clone; the function itself is shared.
#[derive(Clone)]
pub struct Backoff {
    delay_for: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
}

impl Backoff {
    /// Wraps an arbitrary function.
    pub fn from_fn(f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            delay_for: Arc::new(f),
        }
    }

    /// The same delay for every attempt.
    pub fn constant(delay: Duration) -> Self {
        Self::from_fn(move |_| delay)
    }

    /// Attempt `n` waits `steps[n - 1]`; attempts past the end of `steps`
    /// wait `tail`.
    pub fn stepped(steps: &[Duration], tail: Duration) -> Self {
        let steps = steps.to_vec();
        Self::from_fn(move |tries| {
            let index = tries.saturating_sub(1) as usize;
            steps.get(index).copied().unwrap_or(tail)
        })
    }

    /// The reconnect schedule: 1 s, 2 s, 5 s, 10 s, then 10 s forever.
    pub fn reconnect_default() -> Self {
        Self::stepped(
            &[secs(1), secs(2), secs(5), secs(10)],
            secs(10),
        )
    }

    /// The channel rejoin schedule: 1 s, 2 s, 5 s, then 10 s forever.
    pub fn rejoin_default() -> Self {
        Self::stepped(&[secs(1), secs(2), secs(5)], secs(10))
    }

    /// The delay before attempt `tries`.
    pub fn delay(&self, tries: u32) -> Duration {
        (self.delay_for)(tries)
    }
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backoff")
            .field("first", &self.delay(1))
            .finish_non_exhaustive()
    }
}
