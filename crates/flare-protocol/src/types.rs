//! Core protocol types for the Phoenix Channels wire format.
//!
//! Every frame on the wire decodes to exactly one [`SocketMessage`]. The
//! payload it carries is a [`Payload`]: either JSON text or raw bytes.

use std::fmt;

/// The reserved topic heartbeats are sent on.
pub const HEARTBEAT_TOPIC: &str = "phoenix";

/// Reserved lifecycle event names.
///
/// These are the only event names the socket and channels interpret
/// themselves; anything else is application-defined and handed to
/// channel bindings untouched.
pub mod events {
    /// Client → Server: subscribe to a topic.
    pub const JOIN: &str = "phx_join";
    /// Client → Server: unsubscribe from a topic.
    pub const LEAVE: &str = "phx_leave";
    /// Server → Client: a reply correlated to a previous push by `ref`.
    pub const REPLY: &str = "phx_reply";
    /// Server → Client: the channel process crashed.
    pub const ERROR: &str = "phx_error";
    /// Server → Client: the channel was closed.
    pub const CLOSE: &str = "phx_close";
    /// Client → Server: keep-alive on the reserved `phoenix` topic.
    pub const HEARTBEAT: &str = "heartbeat";
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The body of a message: JSON text or opaque bytes.
///
/// Equality is structural; two `Json` payloads are equal only when
/// their text is byte-for-byte identical, so `{"a":1}` and `{ "a": 1 }`
/// are different payloads.
///
/// Reading a payload as the wrong variant through [`Payload::json`] or
/// [`Payload::binary`] is a programming error and panics. Use
/// [`Payload::as_json`] / [`Payload::as_binary`] when the shape is not
/// known in advance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Payload {
    /// Serialized JSON text.
    Json(String),
    /// Raw bytes, carried only by binary frames.
    Binary(Vec<u8>),
}

impl Payload {
    /// The empty JSON object, used for joins without params, leaves,
    /// and heartbeats.
    pub fn empty() -> Self {
        Self::Json("{}".to_owned())
    }

    /// Returns the JSON text.
    ///
    /// # Panics
    /// Panics if the payload is `Binary`.
    pub fn json(&self) -> &str {
        match self {
            Self::Json(text) => text,
            Self::Binary(_) => panic!("payload is binary, not JSON"),
        }
    }

    /// Returns the raw bytes.
    ///
    /// # Panics
    /// Panics if the payload is `Json`.
    pub fn binary(&self) -> &[u8] {
        match self {
            Self::Binary(bytes) => bytes,
            Self::Json(_) => panic!("payload is JSON, not binary"),
        }
    }

    /// Returns the JSON text, or `None` for a binary payload.
    pub fn as_json(&self) -> Option<&str> {
        match self {
            Self::Json(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the raw bytes, or `None` for a JSON payload.
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            Self::Json(_) => None,
        }
    }

    /// Whether this payload must travel in a binary frame.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Json(text.to_owned())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Json(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Serializes the value compactly, the same canonical form the text
/// decoder produces for object and array payloads.
#[cfg(feature = "json")]
impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value.to_string())
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(text) => f.write_str(text),
            Self::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

// ---------------------------------------------------------------------------
// SocketMessage
// ---------------------------------------------------------------------------

/// One decoded frame.
///
/// ```text
/// Message   [join_ref, ref, topic, event, payload]      topic-scoped event
/// Reply     [join_ref, ref, topic, "phx_reply", {status, response}]
/// Broadcast [null, null, topic, event, payload]        server push, un-refed
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketMessage {
    /// A topic-scoped event, usually carrying the join ref of the channel
    /// it belongs to.
    Message {
        join_ref: Option<String>,
        reference: Option<String>,
        topic: String,
        event: String,
        payload: Payload,
    },

    /// The server's answer to the push whose ref is `reference`.
    Reply {
        join_ref: Option<String>,
        reference: Option<String>,
        topic: String,
        status: String,
        payload: Payload,
    },

    /// An event with neither join ref nor ref.
    Broadcast {
        topic: String,
        event: String,
        payload: Payload,
    },
}

impl SocketMessage {
    /// The topic this message is scoped to.
    pub fn topic(&self) -> &str {
        match self {
            Self::Message { topic, .. }
            | Self::Reply { topic, .. }
            | Self::Broadcast { topic, .. } => topic,
        }
    }

    /// The event name. Always `"phx_reply"` for a [`SocketMessage::Reply`].
    pub fn event(&self) -> &str {
        match self {
            Self::Message { event, .. } | Self::Broadcast { event, .. } => event,
            Self::Reply { .. } => events::REPLY,
        }
    }

    pub fn payload(&self) -> &Payload {
        match self {
            Self::Message { payload, .. }
            | Self::Reply { payload, .. }
            | Self::Broadcast { payload, .. } => payload,
        }
    }

    /// The message ref, if any.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Message { reference, .. } | Self::Reply { reference, .. } => {
                reference.as_deref()
            }
            Self::Broadcast { .. } => None,
        }
    }

    /// The join ref, if any.
    pub fn join_ref(&self) -> Option<&str> {
        match self {
            Self::Message { join_ref, .. } | Self::Reply { join_ref, .. } => {
                join_ref.as_deref()
            }
            Self::Broadcast { .. } => None,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_empty_is_json_object() {
        assert_eq!(Payload::empty(), Payload::Json("{}".into()));
        assert_eq!(Payload::default(), Payload::empty());
    }

    #[test]
    fn test_payload_checked_accessors() {
        let json = Payload::from("{\"a\":1}");
        assert_eq!(json.as_json(), Some("{\"a\":1}"));
        assert_eq!(json.as_binary(), None);
        assert!(!json.is_binary());

        let bin = Payload::from(vec![1, 2, 3]);
        assert_eq!(bin.as_binary(), Some(&[1u8, 2, 3][..]));
        assert_eq!(bin.as_json(), None);
        assert!(bin.is_binary());
    }

    #[test]
    #[should_panic(expected = "payload is binary")]
    fn test_payload_json_on_binary_panics() {
        Payload::Binary(vec![0]).json();
    }

    #[test]
    #[should_panic(expected = "payload is JSON")]
    fn test_payload_binary_on_json_panics() {
        Payload::empty().binary();
    }

    #[test]
    fn test_payload_equality_is_structural_on_text() {
        assert_ne!(Payload::from("{\"a\":1}"), Payload::from("{ \"a\": 1 }"));
    }

    #[test]
    fn test_payload_from_value_is_compact() {
        let payload = Payload::from(serde_json::json!({ "user": "foo" }));
        assert_eq!(payload.json(), "{\"user\":\"foo\"}");
    }

    #[test]
    fn test_payload_display() {
        assert_eq!(Payload::empty().to_string(), "{}");
        assert_eq!(Payload::Binary(vec![0; 4]).to_string(), "<4 bytes>");
    }

    #[test]
    fn test_reply_event_is_phx_reply() {
        let reply = SocketMessage::Reply {
            join_ref: None,
            reference: Some("2".into()),
            topic: "room:1".into(),
            status: "ok".into(),
            payload: Payload::empty(),
        };
        assert_eq!(reply.event(), "phx_reply");
        assert_eq!(reply.reference(), Some("2"));
        assert_eq!(reply.join_ref(), None);
        assert_eq!(reply.topic(), "room:1");
    }

    #[test]
    fn test_broadcast_has_no_refs() {
        let msg = SocketMessage::Broadcast {
            topic: "t".into(),
            event: "e".into(),
            payload: Payload::empty(),
        };
        assert_eq!(msg.reference(), None);
        assert_eq!(msg.join_ref(), None);
        assert_eq!(msg.event(), "e");
    }
}
