//! The socket: one connection to a Phoenix endpoint, shared by channels.
//!
//! # Architecture
//!
//! ```text
//!  Socket ─┐                        ┌─▶ Transport (WebSocket)
//!  Channel ├─ Command ─▶ SocketActor ┤
//!  Push ───┘      ▲                 └─▶ RetryTimers (heartbeat, reconnect,
//!                 │                                  rejoin, push timeouts)
//!                 └── transport events, timer firings
//! ```
//!
//! Handles never touch socket state directly. Everything, including the
//! transport's events and timer firings, goes through one command queue
//! and is handled in order by a single task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use flare_protocol::{Payload, Serializer, SocketMessage};
use flare_timer::{Backoff, Scheduler};
use flare_transport::{CLOSE_NORMAL, TransportError, TransportFactory};
use tokio::sync::oneshot;

use crate::FlareError;
use crate::actor::{self, Command, CommandSender};
use crate::channel::{Bindings, Channel, ChannelId};
use crate::config::SocketConfig;
use crate::listeners::Listeners;
use crate::push::{PushId, PushShared};

/// Connection lifecycle of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

pub(crate) type OpenCallback = dyn Fn() + Send + Sync;
pub(crate) type CloseCallback = dyn Fn(u16, &str) + Send + Sync;
pub(crate) type ErrorCallback = dyn Fn(&TransportError) + Send + Sync;
pub(crate) type MessageCallback = dyn Fn(&SocketMessage) + Send + Sync;

/// Lifecycle callbacks registered on a socket.
#[derive(Clone, Default)]
pub(crate) struct SocketListeners {
    pub(crate) open: Listeners<(), OpenCallback>,
    pub(crate) close: Listeners<(), CloseCallback>,
    pub(crate) error: Listeners<(), ErrorCallback>,
    pub(crate) message: Listeners<(), MessageCallback>,
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// A handle to one socket. Cheap to clone.
///
/// Creating a socket spawns its task on the current Tokio runtime, so
/// it must be called from within one. The task runs until every handle
/// (sockets, channels, and pushes) is dropped.
///
/// # Example
///
/// ```ignore
/// let socket = Socket::builder("ws://localhost:4000/socket")
///     .param("token", "abc")
///     .build()?;
/// socket.connect();
///
/// let lobby = socket.channel("room:lobby", "{}");
/// lobby.on("new_msg", |msg| println!("{}", msg.payload()));
/// lobby.join().receive(PushStatus::Ok, |_| println!("joined"));
/// ```
#[derive(Clone)]
pub struct Socket {
    commands: CommandSender,
    endpoint_url: Arc<str>,
    timeout: Duration,
    listeners: SocketListeners,
}

impl Socket {
    /// A socket with default configuration.
    ///
    /// # Errors
    /// [`FlareError::InvalidEndpoint`] if `endpoint` isn't a WebSocket URL.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, FlareError> {
        Self::builder(endpoint).build()
    }

    pub fn builder(endpoint: impl Into<String>) -> SocketBuilder {
        SocketBuilder::new(endpoint)
    }

    /// Spawns the socket task for `config`.
    ///
    /// # Errors
    /// [`FlareError::InvalidEndpoint`] if the endpoint isn't a WebSocket
    /// URL. Nothing is spawned then.
    pub fn with_config(config: SocketConfig) -> Result<Self, FlareError> {
        let endpoint_url: Arc<str> = config.endpoint_url()?.as_str().into();
        let timeout = config.timeout;
        let listeners = SocketListeners::default();
        let commands = actor::spawn(config, endpoint_url.to_string(), listeners.clone());
        Ok(Self {
            commands,
            endpoint_url,
            timeout,
            listeners,
        })
    }

    /// The URL the transport connects to, query string included.
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Starts connecting. Does nothing while connecting or open.
    pub fn connect(&self) {
        self.commands.send(Command::Connect);
    }

    /// Closes the connection with code 1000 and no reason.
    ///
    /// # Errors
    /// [`FlareError::SocketClosed`] if the socket task has stopped.
    pub async fn disconnect(&self) -> Result<(), FlareError> {
        self.disconnect_with(CLOSE_NORMAL, None).await
    }

    /// Closes the connection without reconnecting. Resolves once the
    /// transport reports the close, or at once when already closed.
    ///
    /// # Errors
    /// [`FlareError::SocketClosed`] if the socket task has stopped.
    pub async fn disconnect_with(&self, code: u16, reason: Option<String>) -> Result<(), FlareError> {
        let (done, rx) = oneshot::channel();
        self.commands.send(Command::Disconnect { code, reason, done });
        rx.await.map_err(|_| FlareError::SocketClosed)
    }

    /// Creates a channel for `topic`, registered with this socket in the
    /// closed state. `params` is sent with every join.
    pub fn channel(&self, topic: impl Into<String>, params: impl Into<Payload>) -> Channel {
        let id = ChannelId::next();
        let join_push = (PushId::next(), PushShared::default());
        let topic = topic.into();
        let bindings = Bindings::default();
        self.commands.send(Command::AddChannel {
            id,
            topic: topic.clone(),
            params: params.into(),
            join_push: join_push.clone(),
            bindings: bindings.clone(),
        });
        Channel::new(
            id,
            topic,
            join_push,
            self.timeout,
            bindings,
            self.commands.clone(),
        )
    }

    /// Unregisters `channel` without telling the server. Its bindings are
    /// cleared and its timers canceled.
    pub fn remove(&self, channel: &Channel) {
        self.commands.send(Command::RemoveChannel(channel.id()));
    }

    /// Sends `message` as is, or buffers it until the socket is open.
    pub fn push(&self, message: SocketMessage) {
        self.commands.send(Command::Push(message));
    }

    pub fn on_open(&self, callback: impl Fn() + Send + Sync + 'static) -> u64 {
        self.listeners.open.add((), Arc::new(callback))
    }

    /// Called with the close code and reason every time the connection
    /// closes.
    pub fn on_close(&self, callback: impl Fn(u16, &str) + Send + Sync + 'static) -> u64 {
        self.listeners.close.add((), Arc::new(callback))
    }

    pub fn on_error(&self, callback: impl Fn(&TransportError) + Send + Sync + 'static) -> u64 {
        self.listeners.error.add((), Arc::new(callback))
    }

    /// Called with every decoded inbound message, before channel routing.
    pub fn on_message(&self, callback: impl Fn(&SocketMessage) + Send + Sync + 'static) -> u64 {
        self.listeners.message.add((), Arc::new(callback))
    }

    /// Removes lifecycle callbacks by the refs `on_*` returned.
    pub fn off(&self, refs: &[u64]) {
        self.listeners.open.remove_refs(refs);
        self.listeners.close.remove_refs(refs);
        self.listeners.error.remove_refs(refs);
        self.listeners.message.remove_refs(refs);
    }

    /// # Errors
    /// [`FlareError::SocketClosed`] if the socket task has stopped.
    pub async fn connection_state(&self) -> Result<ConnectionState, FlareError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::ConnectionState(reply));
        rx.await.map_err(|_| FlareError::SocketClosed)
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.connection_state().await, Ok(ConnectionState::Open))
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("endpoint_url", &self.endpoint_url)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and creating a [`Socket`].
pub struct SocketBuilder {
    config: SocketConfig,
}

impl SocketBuilder {
    fn new(endpoint: impl Into<String>) -> Self {
        Self {
            config: SocketConfig::new(endpoint),
        }
    }

    /// Adds a query parameter sent on every connect.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.params.push((key.into(), value.into()));
        self
    }

    pub fn vsn(mut self, vsn: impl Into<String>) -> Self {
        self.config.vsn = vsn.into();
        self
    }

    /// Default timeout for joins, leaves, and pushes.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn skip_heartbeat(mut self, skip: bool) -> Self {
        self.config.skip_heartbeat = skip;
        self
    }

    pub fn reconnect_after(mut self, backoff: Backoff) -> Self {
        self.config.reconnect_after = backoff;
        self
    }

    pub fn rejoin_after(mut self, backoff: Backoff) -> Self {
        self.config.rejoin_after = backoff;
        self
    }

    pub fn serializer(mut self, serializer: impl Serializer) -> Self {
        self.config.serializer = Arc::new(serializer);
        self
    }

    /// Replaces the WebSocket transport, e.g. with an in-memory one.
    pub fn transport(mut self, factory: impl TransportFactory) -> Self {
        self.config.transport = Arc::new(factory);
        self
    }

    /// Replaces the Tokio timer scheduler, e.g. with a
    /// [`VirtualClock`](flare_timer::VirtualClock).
    pub fn scheduler(mut self, scheduler: impl Scheduler) -> Self {
        self.config.scheduler = Arc::new(scheduler);
        self
    }

    /// Spawns the socket.
    ///
    /// # Errors
    /// See [`Socket::with_config`].
    pub fn build(self) -> Result<Socket, FlareError> {
        Socket::with_config(self.config)
    }
}

impl fmt::Debug for SocketBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketBuilder")
            .field("config", &self.config)
            .finish()
    }
}
