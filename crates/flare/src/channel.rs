//! Channels: one topic subscription multiplexed over the socket.
//!
//! A [`Channel`] handle sends commands; the channel's state machine runs
//! inside the socket task:
//!
//! ```text
//!            join()            reply ok
//! Closed ───────────▶ Joining ──────────▶ Joined
//!   ▲                   │  ▲                 │
//!   │      error/timeout│  │rejoin timer     │ phx_error / socket closed
//!   │                   ▼  │                 ▼
//!   │                  Errored ◀─────────────┘
//!   │    leave ok/timeout
//!   └──────────────── Leaving ◀── leave()
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use flare_protocol::{Payload, ProtocolError, SocketMessage, events};
use flare_timer::{Backoff, RetryTimer, Scheduler};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::FlareError;
use crate::actor::{Command, CommandSender};
use crate::listeners::Listeners;
use crate::push::{Push, PushCore, PushId, PushKind, PushShared};

/// Counter for generating unique channel ids.
static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Callback invoked with every message routed to a binding.
pub(crate) type BindingCallback = dyn Fn(&SocketMessage) + Send + Sync;

pub(crate) type Bindings = Listeners<String, BindingCallback>;

/// Identifies a channel within the socket task. Two channels on the
/// same topic have different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ChannelId(u64);

impl ChannelId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// Where a channel is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Closed,
    Errored,
    Joining,
    Joined,
    Leaving,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Errored => "errored",
            Self::Joining => "joining",
            Self::Joined => "joined",
            Self::Leaving => "leaving",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A handle to one channel. Cheap to clone.
///
/// Created by [`Socket::channel`](crate::Socket::channel). The channel
/// stays registered with its socket until it is closed by the server, a
/// completed leave, or [`Socket::remove`](crate::Socket::remove).
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelHandle>,
}

struct ChannelHandle {
    id: ChannelId,
    topic: String,
    join_push: PushId,
    join_shared: PushShared,
    timeout: Duration,
    bindings: Bindings,
    commands: CommandSender,
}

impl Channel {
    pub(crate) fn new(
        id: ChannelId,
        topic: String,
        join_push: (PushId, PushShared),
        timeout: Duration,
        bindings: Bindings,
        commands: CommandSender,
    ) -> Self {
        let (join_push, join_shared) = join_push;
        Self {
            inner: Arc::new(ChannelHandle {
                id,
                topic,
                join_push,
                join_shared,
                timeout,
                bindings,
                commands,
            }),
        }
    }

    pub(crate) fn id(&self) -> ChannelId {
        self.inner.id
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Joins the topic with the socket's default timeout.
    ///
    /// A channel joins once: calling this again while joining or joined
    /// only logs a warning. Every call returns the same join push, so
    /// hooks can be attached more than once.
    pub fn join(&self) -> Push {
        self.join_with_timeout(self.inner.timeout)
    }

    pub fn join_with_timeout(&self, timeout: Duration) -> Push {
        self.inner.commands.send(Command::Join {
            channel: self.inner.id,
            timeout,
        });
        Push::new(
            self.inner.id,
            self.inner.join_push,
            events::JOIN,
            self.inner.join_shared.clone(),
            self.inner.commands.clone(),
        )
    }

    /// Sends `event` with `payload`, or queues it until the channel is
    /// joined and the socket is open.
    pub fn push(&self, event: impl Into<String>, payload: impl Into<Payload>) -> Push {
        self.push_with_timeout(event, payload, self.inner.timeout)
    }

    pub fn push_with_timeout(
        &self,
        event: impl Into<String>,
        payload: impl Into<Payload>,
        timeout: Duration,
    ) -> Push {
        let event = event.into();
        let id = PushId::next();
        let shared = PushShared::default();
        let push = self.push_handle(id, event.clone(), &shared);
        self.inner.commands.send(Command::ChannelPush {
            channel: self.inner.id,
            push: id,
            event,
            payload: payload.into(),
            timeout,
            shared,
        });
        push
    }

    /// Serializes `value` to JSON and pushes it.
    ///
    /// # Errors
    /// [`FlareError::Protocol`] if `value` cannot be serialized.
    pub fn push_json<T: Serialize + ?Sized>(
        &self,
        event: impl Into<String>,
        value: &T,
    ) -> Result<Push, FlareError> {
        let text = serde_json::to_string(value).map_err(ProtocolError::Encode)?;
        Ok(self.push(event, Payload::Json(text)))
    }

    /// Leaves the topic with the socket's default timeout.
    pub fn leave(&self) -> Push {
        self.leave_with_timeout(self.inner.timeout)
    }

    /// Leaves the topic. The channel closes when the server acknowledges
    /// or the timeout elapses; it closes at once when there is nothing to
    /// tell the server.
    pub fn leave_with_timeout(&self, timeout: Duration) -> Push {
        let id = PushId::next();
        let shared = PushShared::default();
        let push = self.push_handle(id, events::LEAVE, &shared);
        self.inner.commands.send(Command::Leave {
            channel: self.inner.id,
            push: id,
            timeout,
            shared,
        });
        push
    }

    /// Calls `callback` for every message with `event` routed to this
    /// channel. Returns a ref for [`Channel::off`].
    pub fn on(
        &self,
        event: impl Into<String>,
        callback: impl Fn(&SocketMessage) + Send + Sync + 'static,
    ) -> u64 {
        self.inner.bindings.add(event.into(), Arc::new(callback))
    }

    /// Removes the bindings for `event`; only the one with `reference`
    /// when given. Once this returns a removed binding is never called
    /// again, even from a dispatch already in progress; a call running
    /// on another thread finishes first.
    pub fn off(&self, event: &str, reference: Option<u64>) {
        self.inner.bindings.remove(|e| e == event, reference);
    }

    pub fn on_close(&self, callback: impl Fn(&SocketMessage) + Send + Sync + 'static) -> u64 {
        self.on(events::CLOSE, callback)
    }

    pub fn on_error(&self, callback: impl Fn(&SocketMessage) + Send + Sync + 'static) -> u64 {
        self.on(events::ERROR, callback)
    }

    /// The channel's current state. A channel no longer registered with
    /// its socket reports [`ChannelState::Closed`].
    ///
    /// # Errors
    /// [`FlareError::SocketClosed`] if the socket task has stopped.
    pub async fn state(&self) -> Result<ChannelState, FlareError> {
        let (reply, rx) = oneshot::channel();
        self.inner.commands.send(Command::ChannelState {
            channel: self.inner.id,
            reply,
        });
        rx.await.map_err(|_| FlareError::SocketClosed)
    }

    fn push_handle(&self, id: PushId, event: impl Into<String>, shared: &PushShared) -> Push {
        Push::new(
            self.inner.id,
            id,
            event,
            shared.clone(),
            self.inner.commands.clone(),
        )
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("topic", &self.inner.topic)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Socket-task state
// ---------------------------------------------------------------------------

pub(crate) struct ChannelCore {
    pub(crate) topic: String,
    pub(crate) state: ChannelState,
    pub(crate) bindings: Bindings,
    pub(crate) join_push: PushId,
    pub(crate) pushes: HashMap<PushId, PushCore>,
    /// Pushes waiting for the channel to be joined, oldest first.
    pub(crate) queue: VecDeque<PushId>,
    pub(crate) rejoin_timer: RetryTimer,
}

impl ChannelCore {
    pub(crate) fn new(
        topic: String,
        params: Payload,
        join_push: (PushId, PushShared),
        bindings: Bindings,
        timeout: Duration,
        rejoin_after: Backoff,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let (join_push, join_shared) = join_push;
        let join = PushCore::new(
            PushKind::Join,
            events::JOIN,
            params,
            timeout,
            join_shared,
            Arc::clone(&scheduler),
        );
        Self {
            topic,
            state: ChannelState::Closed,
            bindings,
            join_push,
            pushes: HashMap::from([(join_push, join)]),
            queue: VecDeque::new(),
            rejoin_timer: RetryTimer::new(scheduler, rejoin_after),
        }
    }

    /// The ref of the current join attempt. Messages carrying any other
    /// join ref belong to a previous membership.
    pub(crate) fn join_ref(&self) -> Option<&str> {
        self.pushes
            .get(&self.join_push)
            .and_then(PushCore::reference)
    }

    pub(crate) fn join_push_mut(&mut self) -> Option<&mut PushCore> {
        self.pushes.get_mut(&self.join_push)
    }

    /// Whether `message` should be routed to this channel.
    pub(crate) fn accepts(&self, message: &SocketMessage) -> bool {
        if message.topic() != self.topic {
            return false;
        }
        match message {
            SocketMessage::Message {
                join_ref: Some(join_ref),
                ..
            } => self.join_ref() == Some(join_ref.as_str()),
            _ => true,
        }
    }

    /// The push whose current attempt was sent under `reference`.
    pub(crate) fn push_by_ref(&self, reference: &str) -> Option<PushId> {
        self.pushes
            .iter()
            .find(|(_, push)| push.reference() == Some(reference))
            .map(|(id, _)| *id)
    }
}

impl fmt::Debug for ChannelCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCore")
            .field("topic", &self.topic)
            .field("state", &self.state)
            .field("join_ref", &self.join_ref())
            .field("pushes", &self.pushes.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}
