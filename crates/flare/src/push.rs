//! Pushes: one outbound message on a channel and the reply it awaits.
//!
//! A [`Push`] is a handle. The state it refers to lives in the socket
//! task, owned by its channel:
//!
//! ```text
//! created ──send──▶ sent ──reply "ok"/"error"──▶ resolved
//!                     └────timeout elapsed─────▶ resolved (timeout)
//! ```
//!
//! A push resolves at most once per attempt. Hooks registered after the
//! push resolved fire immediately with the stored outcome.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use flare_protocol::Payload;
use flare_timer::{Backoff, RetryTimer, Scheduler, TimerToken};

use crate::actor::{Command, CommandSender};
use crate::channel::ChannelId;
use crate::listeners::Gate;

/// Counter for generating unique push ids.
static NEXT_PUSH_ID: AtomicU64 = AtomicU64::new(1);

/// Callback invoked with the reply's `response` payload.
pub(crate) type ReceiveCallback = dyn Fn(&Payload) + Send + Sync;

/// Identifies a push within the socket task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct PushId(u64);

impl PushId {
    pub(crate) fn next() -> Self {
        Self(NEXT_PUSH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PushId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "push-{}", self.0)
    }
}

/// How a push was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushStatus {
    /// The server replied with status `"ok"`.
    Ok,
    /// The server replied with status `"error"`.
    Error,
    /// No reply arrived within the push's timeout.
    Timeout,
}

impl PushStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }

    /// Maps a reply's status string. `"timeout"` is never sent by a
    /// server, so only `"ok"` and `"error"` are recognized.
    pub fn from_reply(status: &str) -> Option<Self> {
        match status {
            "ok" => Some(Self::Ok),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for PushStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The part of a push both its handles and the socket task touch: the
/// outcome and the hooks waiting for it.
///
/// Registering a hook and resolving the push take the same lock, so a
/// hook either is picked up by the resolution or sees its outcome and
/// replays it, never both.
#[derive(Clone, Default)]
pub(crate) struct PushShared(Arc<Mutex<SharedState>>);

#[derive(Default)]
struct SharedState {
    outcome: Option<(PushStatus, Payload)>,
    hooks: Vec<Hook>,
}

struct Hook {
    status: PushStatus,
    gate: Arc<Gate>,
    callback: Arc<ReceiveCallback>,
}

impl PushShared {
    /// Registers a hook. Returns the stored response when the push has
    /// already resolved with `status`, for the caller to replay.
    pub(crate) fn add_hook(&self, status: PushStatus, hook: Arc<ReceiveCallback>) -> Option<Payload> {
        let mut state = self.lock();
        state.hooks.push(Hook {
            status,
            gate: Arc::default(),
            callback: hook,
        });
        match &state.outcome {
            Some((received, payload)) if *received == status => Some(payload.clone()),
            _ => None,
        }
    }

    /// Removes the hooks for `status`. A hook already picked by a
    /// resolution is skipped, or waited for when it is running on
    /// another thread.
    pub(crate) fn remove_hooks(&self, status: PushStatus) {
        let removed: Vec<Hook> = {
            let mut state = self.lock();
            let (removed, kept): (Vec<Hook>, Vec<Hook>) = std::mem::take(&mut state.hooks)
                .into_iter()
                .partition(|hook| hook.status == status);
            state.hooks = kept;
            removed
        };
        for hook in removed {
            hook.gate.close();
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.lock().outcome.is_some()
    }

    pub(crate) fn clear_outcome(&self) {
        self.lock().outcome = None;
    }

    /// Stores the outcome and picks the hooks to run for it.
    fn resolve(&self, status: PushStatus, payload: Payload) -> Resolution {
        let mut state = self.lock();
        state.outcome = Some((status, payload.clone()));
        let hooks = state
            .hooks
            .iter()
            .filter(|hook| hook.status == status)
            .map(|hook| (Arc::clone(&hook.gate), Arc::clone(&hook.callback)))
            .collect();
        Resolution { hooks, payload }
    }

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PushShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("PushShared")
            .field("outcome", &state.outcome.as_ref().map(|(status, _)| *status))
            .field("hooks", &state.hooks.len())
            .finish()
    }
}

/// The hooks picked by one resolution.
pub(crate) struct Resolution {
    hooks: Vec<(Arc<Gate>, Arc<ReceiveCallback>)>,
    payload: Payload,
}

impl Resolution {
    /// Runs each hook that is still registered, in registration order.
    pub(crate) fn run(self) {
        for (gate, hook) in &self.hooks {
            gate.pass(|| hook(&self.payload));
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A handle to one push.
///
/// Register reply callbacks with [`Push::receive`]. Clones share the
/// push; once every clone is dropped and the push has resolved, the
/// socket task forgets it.
#[derive(Clone)]
pub struct Push {
    inner: Arc<PushHandle>,
}

struct PushHandle {
    channel: ChannelId,
    id: PushId,
    event: String,
    shared: PushShared,
    commands: CommandSender,
}

impl Drop for PushHandle {
    fn drop(&mut self) {
        self.commands.send_quietly(Command::ReleasePush {
            channel: self.channel,
            push: self.id,
        });
    }
}

impl Push {
    pub(crate) fn new(
        channel: ChannelId,
        id: PushId,
        event: impl Into<String>,
        shared: PushShared,
        commands: CommandSender,
    ) -> Self {
        Self {
            inner: Arc::new(PushHandle {
                channel,
                id,
                event: event.into(),
                shared,
                commands,
            }),
        }
    }

    /// The event this push sends.
    pub fn event(&self) -> &str {
        &self.inner.event
    }

    /// Calls `callback` with the reply's response when the push resolves
    /// with `status`. For [`PushStatus::Timeout`] the payload is empty.
    ///
    /// If the push has already resolved with `status`, `callback` runs
    /// right away, on the calling thread.
    ///
    /// ```ignore
    /// channel
    ///     .push("new_msg", r#"{"body":"hi"}"#)
    ///     .receive(PushStatus::Ok, |resp| println!("stored: {resp}"))
    ///     .receive(PushStatus::Timeout, |_| println!("no answer"));
    /// ```
    pub fn receive(
        self,
        status: PushStatus,
        callback: impl Fn(&Payload) + Send + Sync + 'static,
    ) -> Self {
        let callback: Arc<ReceiveCallback> = Arc::new(callback);
        if let Some(payload) = self.inner.shared.add_hook(status, Arc::clone(&callback)) {
            callback(&payload);
        }
        self
    }

    /// Removes every callback registered for `status`. Once this returns
    /// none of them runs, even for a reply already being dispatched; a
    /// call in progress on another thread finishes first.
    pub fn off(&self, status: PushStatus) {
        self.inner.shared.remove_hooks(status);
    }
}

impl fmt::Debug for Push {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Push")
            .field("id", &self.inner.id)
            .field("channel", &self.inner.channel)
            .field("event", &self.inner.event)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Socket-task state
// ---------------------------------------------------------------------------

/// What a push does for its channel's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushKind {
    Join,
    Leave,
    Message,
}

pub(crate) struct PushCore {
    pub(crate) kind: PushKind,
    pub(crate) event: String,
    pub(crate) payload: Payload,
    scheduler: Arc<dyn Scheduler>,
    timer: RetryTimer,
    reference: Option<String>,
    shared: PushShared,
    released: bool,
}

impl PushCore {
    pub(crate) fn new(
        kind: PushKind,
        event: impl Into<String>,
        payload: Payload,
        timeout: Duration,
        shared: PushShared,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            kind,
            event: event.into(),
            payload,
            timer: RetryTimer::new(Arc::clone(&scheduler), Backoff::constant(timeout)),
            scheduler,
            reference: None,
            shared,
            released: false,
        }
    }

    /// The ref of the current attempt, if sent.
    pub(crate) fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.shared.is_resolved()
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timer = RetryTimer::new(Arc::clone(&self.scheduler), Backoff::constant(timeout));
    }

    /// Starts a new attempt under `reference` and arms the timeout.
    /// Any previous outcome is discarded.
    pub(crate) fn start(
        &mut self,
        reference: String,
        on_timeout: impl FnOnce(TimerToken) + Send + 'static,
    ) {
        self.reference = Some(reference);
        self.shared.clear_outcome();
        self.timer.reset();
        self.timer.schedule_timeout(on_timeout);
    }

    /// Claims a timeout firing; `false` if it is stale.
    pub(crate) fn claim_timeout(&mut self, token: TimerToken) -> bool {
        self.timer.fire(token)
    }

    pub(crate) fn cancel_timeout(&mut self) {
        self.timer.reset();
    }

    /// Records the outcome and returns the hooks to run with it.
    pub(crate) fn resolve(&mut self, status: PushStatus, payload: Payload) -> Resolution {
        self.timer.reset();
        self.shared.resolve(status, payload)
    }

    /// Forgets the current attempt so the push can be sent again.
    pub(crate) fn reset(&mut self) {
        self.timer.reset();
        self.reference = None;
        self.shared.clear_outcome();
    }

    pub(crate) fn release(&mut self) {
        self.released = true;
    }

    /// Whether nothing can observe this push anymore.
    pub(crate) fn is_finished(&self) -> bool {
        self.released && self.is_resolved() && self.kind != PushKind::Join
    }
}

impl fmt::Debug for PushCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushCore")
            .field("kind", &self.kind)
            .field("event", &self.event)
            .field("reference", &self.reference)
            .field("shared", &self.shared)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flare_timer::VirtualClock;

    fn core(clock: &VirtualClock, shared: &PushShared) -> PushCore {
        PushCore::new(
            PushKind::Message,
            "new_msg",
            Payload::empty(),
            Duration::from_secs(10),
            shared.clone(),
            Arc::new(clock.clone()),
        )
    }

    fn recording_hook(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<ReceiveCallback> {
        let log = Arc::clone(log);
        Arc::new(move |payload: &Payload| log.lock().unwrap().push(format!("{name}:{payload}")))
    }

    #[test]
    fn test_status_from_reply() {
        assert_eq!(PushStatus::from_reply("ok"), Some(PushStatus::Ok));
        assert_eq!(PushStatus::from_reply("error"), Some(PushStatus::Error));
        assert_eq!(PushStatus::from_reply("timeout"), None);
        assert_eq!(PushStatus::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_resolution_runs_matching_hooks_in_order() {
        let clock = VirtualClock::new();
        let shared = PushShared::default();
        let mut push = core(&clock, &shared);
        let log = Arc::new(Mutex::new(Vec::new()));
        shared.add_hook(PushStatus::Ok, recording_hook(&log, "a"));
        shared.add_hook(PushStatus::Error, recording_hook(&log, "b"));
        shared.add_hook(PushStatus::Ok, recording_hook(&log, "c"));

        push.resolve(PushStatus::Ok, Payload::from("{}")).run();
        assert_eq!(*log.lock().unwrap(), vec!["a:{}", "c:{}"]);
        assert!(push.is_resolved());
    }

    #[test]
    fn test_late_hook_gets_stored_outcome() {
        let clock = VirtualClock::new();
        let shared = PushShared::default();
        let mut push = core(&clock, &shared);
        push.resolve(PushStatus::Error, Payload::from(r#"{"reason":"nope"}"#)).run();

        let replay = shared.add_hook(PushStatus::Error, Arc::new(|_: &Payload| {}));
        assert_eq!(replay, Some(Payload::from(r#"{"reason":"nope"}"#)));
        assert_eq!(shared.add_hook(PushStatus::Ok, Arc::new(|_: &Payload| {})), None);
    }

    #[test]
    fn test_hook_removed_after_resolution_picked_it_does_not_run() {
        let clock = VirtualClock::new();
        let shared = PushShared::default();
        let mut push = core(&clock, &shared);
        let log = Arc::new(Mutex::new(Vec::new()));
        shared.add_hook(PushStatus::Ok, recording_hook(&log, "a"));

        let resolution = push.resolve(PushStatus::Ok, Payload::empty());
        shared.remove_hooks(PushStatus::Ok);
        resolution.run();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_hook_may_remove_its_own_status_while_running() {
        let clock = VirtualClock::new();
        let shared = PushShared::default();
        let mut push = core(&clock, &shared);
        let log = Arc::new(Mutex::new(Vec::new()));
        let remover = {
            let shared = shared.clone();
            Arc::new(move |_: &Payload| shared.remove_hooks(PushStatus::Ok))
        };
        shared.add_hook(PushStatus::Ok, remover);
        shared.add_hook(PushStatus::Ok, recording_hook(&log, "after"));

        push.resolve(PushStatus::Ok, Payload::empty()).run();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_start_arms_timeout_and_resolve_cancels_it() {
        let clock = VirtualClock::new();
        let mut push = core(&clock, &PushShared::default());
        let fired = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&fired);
        push.start("1".into(), move |token| *slot.lock().unwrap() = Some(token));
        assert_eq!(push.reference(), Some("1"));
        assert_eq!(clock.pending(), 1);

        push.resolve(PushStatus::Ok, Payload::empty()).run();
        assert_eq!(clock.pending(), 0);
        clock.advance(Duration::from_secs(20));
        assert!(fired.lock().unwrap().is_none());
    }

    #[test]
    fn test_timeout_token_claimed_once() {
        let clock = VirtualClock::new();
        let mut push = core(&clock, &PushShared::default());
        let fired = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&fired);
        push.start("1".into(), move |token| *slot.lock().unwrap() = Some(token));

        clock.advance(Duration::from_secs(10));
        let token = fired.lock().unwrap().take().expect("timeout fired");
        assert!(push.claim_timeout(token));
        assert!(!push.claim_timeout(token));
    }

    #[test]
    fn test_reset_clears_attempt() {
        let clock = VirtualClock::new();
        let mut push = core(&clock, &PushShared::default());
        push.start("4".into(), |_| {});
        push.resolve(PushStatus::Timeout, Payload::empty()).run();
        push.reset();
        assert_eq!(push.reference(), None);
        assert!(!push.is_resolved());
    }

    #[test]
    fn test_finished_requires_release_and_resolution() {
        let clock = VirtualClock::new();
        let mut push = core(&clock, &PushShared::default());
        push.release();
        assert!(!push.is_finished());
        push.resolve(PushStatus::Ok, Payload::empty()).run();
        assert!(push.is_finished());
    }
}
