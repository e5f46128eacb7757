//! Retry timers for Flare.
//!
//! Every wait in the client (reconnect backoff, channel rejoin backoff,
//! push timeouts, the heartbeat interval) is a [`RetryTimer`]: a
//! single-shot, cancelable timer whose delay comes from a [`Backoff`]
//! function of the attempt count.
//!
//! Timers never sleep a thread. They hand a closure to a [`Scheduler`],
//! which runs it once the delay has passed:
//!
//! - [`TokioScheduler`]: real clock, one sleeping Tokio task per firing.
//! - [`VirtualClock`]: deterministic clock for tests; nothing fires
//!   until [`VirtualClock::advance`] moves time forward.
//!
//! # Integration
//!
//! The owner of a timer typically forwards the firing into its own
//! command queue and checks the token when it gets there:
//!
//! ```ignore
//! timer.schedule_timeout(move |token| {
//!     let _ = tx.send(Command::Fired(token));
//! });
//!
//! // later, on the owner's task
//! Command::Fired(token) if timer.fire(token) => { /* still current */ }
//! ```

mod backoff;
mod retry;
mod scheduler;

pub use backoff::Backoff;
pub use retry::{RetryTimer, TimerToken};
pub use scheduler::{Scheduled, Scheduler, TokioScheduler, VirtualClock};
