//! The [`Serializer`] trait and the text (JSON array) codec.
//!
//! A serializer converts between [`SocketMessage`] values and transport
//! [`Frame`]s. The socket doesn't care HOW that happens; it holds an
//! `Arc<dyn Serializer>`, so callers can plug in their own codec as long
//! as it honors the same encode/decode contract.
//!
//! Provided implementations:
//!
//! - [`JsonSerializer`]: text frames only, the `[join_ref, ref, topic,
//!   event, payload]` array.
//! - [`BinarySerializer`](crate::BinarySerializer): binary frames only.
//! - [`PhoenixSerializer`]: both, chosen per message: binary payloads
//!   travel in binary frames, everything else as text. This is the
//!   socket's default.

use flare_transport::Frame;

use crate::{ProtocolError, SocketMessage};
#[cfg(feature = "json")]
use crate::{events, BinarySerializer, Payload};
#[cfg(feature = "json")]
use serde::Deserialize;
#[cfg(feature = "json")]
use serde_json::Value;

/// Converts socket messages to transport frames and back.
///
/// `Send + Sync + 'static` because the socket actor owns it inside an
/// `Arc` on a Tokio task.
pub trait Serializer: Send + Sync + 'static {
    /// Encodes a message into the frame that will be written to the
    /// transport.
    ///
    /// # Errors
    /// Returns a [`ProtocolError`] if the message can't be represented
    /// in this encoding.
    fn encode(&self, message: &SocketMessage) -> Result<Frame, ProtocolError>;

    /// Decodes one inbound frame.
    ///
    /// # Errors
    /// Returns a [`ProtocolError`] when the frame violates the wire
    /// contract. Callers must drop the frame; it is never retried.
    fn decode(&self, frame: &Frame) -> Result<SocketMessage, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonSerializer
// ---------------------------------------------------------------------------

/// The text encoding: a 5-element JSON array.
///
/// Encoding renders every field as a JSON string literal, **including
/// the payload**: a `Json("{\"foo\": 1}")` payload is embedded as the
/// escaped string `"{\"foo\": 1}"`, not spliced in as a raw object.
/// Existing servers and tests depend on that exact text, so it is kept.
///
/// Decoding is more lenient about the payload: an object or array is
/// re-serialized compactly, a string is used as-is.
///
/// ```rust
/// use flare_protocol::{JsonSerializer, Payload, SocketMessage};
///
/// let message = SocketMessage::Message {
///     join_ref: Some("0".into()),
///     reference: Some("1".into()),
///     topic: "t".into(),
///     event: "e".into(),
///     payload: Payload::Json("{\"foo\": 1}".into()),
/// };
/// let text = JsonSerializer.encode_text(&message).unwrap();
/// assert_eq!(text, r#"["0","1","t","e","{\"foo\": 1}"]"#);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

/// The body of a `phx_reply` frame.
#[cfg(feature = "json")]
#[derive(Deserialize)]
struct ReplyBody {
    status: String,
    response: Value,
}

#[cfg(feature = "json")]
impl JsonSerializer {
    /// Encodes a message as the JSON array text.
    ///
    /// # Errors
    /// Binary payloads can't be carried in text frames and are rejected
    /// with [`ProtocolError::InvalidFrame`].
    pub fn encode_text(&self, message: &SocketMessage) -> Result<String, ProtocolError> {
        let Payload::Json(text) = message.payload() else {
            return Err(ProtocolError::invalid(
                "binary payloads must be sent in binary frames",
            ));
        };

        let body = match message {
            SocketMessage::Reply { status, .. } => {
                serde_json::json!({ "status": status, "response": text })
            }
            _ => Value::String(text.clone()),
        };

        let array = Value::Array(vec![
            optional_field(message.join_ref()),
            optional_field(message.reference()),
            Value::String(message.topic().to_owned()),
            Value::String(message.event().to_owned()),
            body,
        ]);
        serde_json::to_string(&array).map_err(ProtocolError::Encode)
    }

    /// Decodes the JSON array text into a message.
    ///
    /// # Errors
    /// Malformed JSON, an array of the wrong length, non-string refs,
    /// topic or event, or a reply without `status`/`response`.
    pub fn decode_text(&self, text: &str) -> Result<SocketMessage, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(ProtocolError::Decode)?;
        let Value::Array(fields) = value else {
            return Err(ProtocolError::invalid("expected a JSON array"));
        };

        // `try_into` on a Vec gives back the Vec when the length is wrong,
        // which is exactly what we need for the error message.
        let [join_ref, reference, topic, event, payload]: [Value; 5] =
            fields.try_into().map_err(|fields: Vec<Value>| {
                ProtocolError::invalid(format!(
                    "expected 5 array elements, got {}",
                    fields.len()
                ))
            })?;

        let join_ref = optional_string(join_ref, "join_ref")?;
        let reference = optional_string(reference, "ref")?;
        let topic = required_string(topic, "topic")?;
        let event = required_string(event, "event")?;

        if event == events::REPLY {
            let body: ReplyBody =
                serde_json::from_value(payload).map_err(ProtocolError::Decode)?;
            return Ok(SocketMessage::Reply {
                join_ref,
                reference,
                topic,
                status: body.status,
                payload: canonicalize(body.response),
            });
        }

        let payload = canonicalize(payload);
        if join_ref.is_none() && reference.is_none() {
            Ok(SocketMessage::Broadcast {
                topic,
                event,
                payload,
            })
        } else {
            Ok(SocketMessage::Message {
                join_ref,
                reference,
                topic,
                event,
                payload,
            })
        }
    }
}

#[cfg(feature = "json")]
impl Serializer for JsonSerializer {
    fn encode(&self, message: &SocketMessage) -> Result<Frame, ProtocolError> {
        self.encode_text(message).map(Frame::Text)
    }

    fn decode(&self, frame: &Frame) -> Result<SocketMessage, ProtocolError> {
        match frame {
            Frame::Text(text) => self.decode_text(text),
            Frame::Binary(_) => Err(ProtocolError::invalid(
                "text serializer received a binary frame",
            )),
        }
    }
}

#[cfg(feature = "json")]
fn optional_field(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |s| Value::String(s.to_owned()))
}

#[cfg(feature = "json")]
fn optional_string(value: Value, name: &str) -> Result<Option<String>, ProtocolError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(ProtocolError::invalid(format!(
            "{name} must be a string or null, got {other}"
        ))),
    }
}

#[cfg(feature = "json")]
fn required_string(value: Value, name: &str) -> Result<String, ProtocolError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ProtocolError::invalid(format!(
            "{name} must be a string, got {other}"
        ))),
    }
}

/// Strings are taken verbatim; every other value is re-serialized
/// compactly.
#[cfg(feature = "json")]
fn canonicalize(value: Value) -> Payload {
    match value {
        Value::String(s) => Payload::Json(s),
        other => Payload::Json(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// PhoenixSerializer
// ---------------------------------------------------------------------------

/// Text for JSON payloads, binary frames for binary payloads.
///
/// Inbound frames are decoded according to the frame kind the transport
/// reports, so a server may mix both encodings on one connection.
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct PhoenixSerializer;

#[cfg(feature = "json")]
impl Serializer for PhoenixSerializer {
    fn encode(&self, message: &SocketMessage) -> Result<Frame, ProtocolError> {
        if message.payload().is_binary() {
            BinarySerializer.encode_bytes(message).map(Frame::Binary)
        } else {
            JsonSerializer.encode_text(message).map(Frame::Text)
        }
    }

    fn decode(&self, frame: &Frame) -> Result<SocketMessage, ProtocolError> {
        match frame {
            Frame::Text(text) => JsonSerializer.decode_text(text),
            Frame::Binary(bytes) => BinarySerializer.decode_bytes(bytes),
        }
    }
}
