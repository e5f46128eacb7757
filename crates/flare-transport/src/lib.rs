//! Transport abstraction layer for Flare.
//!
//! The socket never touches the network directly. It asks a
//! [`TransportFactory`] for a fresh [`Transport`] on every connection
//! attempt, drives it with `connect`/`write`/`disconnect`, and receives
//! the transport's lifecycle through an [`EventSink`].
//!
//! A transport must deliver events in the order the byte stream produced
//! them, and never deliver a message before `Open` or after `Close`.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket client via `tokio-tungstenite`

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketFactory, WebSocketTransport};

use std::fmt;
use std::sync::Arc;

/// Close code for a normal, user-requested closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Opaque identifier for one connection attempt.
///
/// Every call to [`Transport::connect`] gets a new id, so events from a
/// connection that has since been replaced can be told apart and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A single WebSocket-style frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Size of the frame body in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A lifecycle notification from a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is established; writes will now reach the peer.
    Open,
    /// A frame arrived from the peer.
    Message(Frame),
    /// The connection ended. No further events follow.
    Close { code: u16, reason: String },
    /// Something went wrong. Usually followed by `Close`.
    Error(TransportError),
}

/// Where a transport delivers its events.
///
/// The sink stamps every event with the [`ConnectionId`] it was created
/// for. Cloning is cheap; the transport can hand clones to its I/O tasks.
#[derive(Clone)]
pub struct EventSink {
    id: ConnectionId,
    deliver: Arc<dyn Fn(ConnectionId, TransportEvent) + Send + Sync>,
}

impl EventSink {
    /// Creates a sink that forwards every event to `deliver`.
    pub fn new(
        id: ConnectionId,
        deliver: impl Fn(ConnectionId, TransportEvent) + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            deliver: Arc::new(deliver),
        }
    }

    /// The connection this sink reports for.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, event: TransportEvent) {
        (self.deliver)(self.id, event);
    }

    pub fn open(&self) {
        self.send(TransportEvent::Open);
    }

    pub fn message(&self, frame: Frame) {
        self.send(TransportEvent::Message(frame));
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) {
        self.send(TransportEvent::Close {
            code,
            reason: reason.into(),
        });
    }

    pub fn error(&self, error: TransportError) {
        self.send(TransportEvent::Error(error));
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").field("id", &self.id).finish()
    }
}

/// One client connection to a Phoenix endpoint.
///
/// All methods return immediately; their outcome is reported through the
/// [`EventSink`] given to `connect`. The socket is the only caller, and
/// it never calls `write` before it has seen `Open`.
pub trait Transport: Send + 'static {
    /// Starts connecting. Reports `Open` on success, or `Error` + `Close`
    /// on failure.
    fn connect(&mut self, sink: EventSink);

    /// Queues a frame for the peer.
    ///
    /// # Errors
    /// [`TransportError::NotConnected`] if the connection isn't running.
    fn write(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Starts a clean close. Reports `Close` once the connection ended.
    fn disconnect(&mut self, code: u16, reason: Option<String>);
}

/// Creates a new [`Transport`] for every connection attempt.
pub trait TransportFactory: Send + Sync + 'static {
    fn create(&self, endpoint: &str) -> Box<dyn Transport>;
}

/// Any `Fn(&str) -> Box<dyn Transport>` closure is a factory.
impl<F> TransportFactory for F
where
    F: Fn(&str) -> Box<dyn Transport> + Send + Sync + 'static,
{
    fn create(&self, endpoint: &str) -> Box<dyn Transport> {
        self(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(Frame::Text("abc".into()).len(), 3);
        assert_eq!(Frame::Binary(vec![1, 2]).len(), 2);
        assert!(Frame::Text(String::new()).is_empty());
    }

    #[test]
    fn test_event_sink_stamps_connection_id() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let sink = EventSink::new(ConnectionId::new(3), move |id, event| {
            log.lock().unwrap().push((id, format!("{event:?}")));
        });

        sink.open();
        sink.message(Frame::Text("hi".into()));
        sink.close(CLOSE_NORMAL, "bye");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(id, _)| *id == ConnectionId::new(3)));
        assert_eq!(seen[0].1, "Open");
        assert!(seen[2].1.contains("1000"));
    }
}
