//! The binary frame encoding.
//!
//! ```text
//! ┌──────┬──────────────────┬────────────────────────┬───────────────┐
//! │ kind │ one length byte  │ the string fields'     │ payload bytes │
//! │ (u8) │ per string field │ UTF-8 bytes, in order  │ (the rest)    │
//! └──────┴──────────────────┴────────────────────────┴───────────────┘
//!
//! kind 0  push       fields: join_ref, ref, topic, event
//! kind 1  reply      fields: join_ref, ref, topic, status
//! kind 2  broadcast  fields: topic, event
//! ```
//!
//! An absent join ref or ref is written as a zero-length field, and a
//! zero-length field decodes back to `None`.

use flare_transport::Frame;

use crate::{Payload, ProtocolError, Serializer, SocketMessage};

const KIND_PUSH: u8 = 0;
const KIND_REPLY: u8 = 1;
const KIND_BROADCAST: u8 = 2;

/// Encodes and decodes binary frames. Only messages with a
/// [`Payload::Binary`] payload can be encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinarySerializer;

impl BinarySerializer {
    /// Encodes a message as a binary frame.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidFrame`] if the payload is JSON or any
    /// string field is longer than 255 bytes.
    pub fn encode_bytes(&self, message: &SocketMessage) -> Result<Vec<u8>, ProtocolError> {
        let (kind, fields, payload): (u8, Vec<&str>, &Payload) = match message {
            SocketMessage::Message {
                join_ref,
                reference,
                topic,
                event,
                payload,
            } => (
                KIND_PUSH,
                vec![
                    join_ref.as_deref().unwrap_or(""),
                    reference.as_deref().unwrap_or(""),
                    topic.as_str(),
                    event.as_str(),
                ],
                payload,
            ),
            SocketMessage::Reply {
                join_ref,
                reference,
                topic,
                status,
                payload,
            } => (
                KIND_REPLY,
                vec![
                    join_ref.as_deref().unwrap_or(""),
                    reference.as_deref().unwrap_or(""),
                    topic.as_str(),
                    status.as_str(),
                ],
                payload,
            ),
            SocketMessage::Broadcast {
                topic,
                event,
                payload,
            } => (KIND_BROADCAST, vec![topic.as_str(), event.as_str()], payload),
        };

        let Payload::Binary(bytes) = payload else {
            return Err(ProtocolError::invalid(
                "JSON payloads must be sent in text frames",
            ));
        };

        let text_len: usize = fields.iter().map(|f| f.len()).sum();
        let mut out = Vec::with_capacity(1 + fields.len() + text_len + bytes.len());
        out.push(kind);
        for field in &fields {
            let len = u8::try_from(field.len()).map_err(|_| {
                ProtocolError::invalid(format!(
                    "field {field:?} is {} bytes, the limit is 255",
                    field.len()
                ))
            })?;
            out.push(len);
        }
        for field in &fields {
            out.extend_from_slice(field.as_bytes());
        }
        out.extend_from_slice(bytes);
        Ok(out)
    }

    /// Decodes a binary frame.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidFrame`] for an empty frame, an unknown
    /// kind, a truncated header or field, or a field that isn't UTF-8.
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<SocketMessage, ProtocolError> {
        let (&kind, rest) = bytes
            .split_first()
            .ok_or_else(|| ProtocolError::invalid("empty binary frame"))?;

        let field_count = match kind {
            KIND_PUSH | KIND_REPLY => 4,
            KIND_BROADCAST => 2,
            other => {
                return Err(ProtocolError::invalid(format!(
                    "unknown binary frame kind {other}"
                )));
            }
        };

        let (fields, payload) = split_fields(rest, field_count)?;
        let payload = Payload::Binary(payload.to_vec());
        let mut fields = fields.into_iter();
        let mut next = || fields.next().unwrap_or_default();

        Ok(match kind {
            KIND_PUSH => SocketMessage::Message {
                join_ref: non_empty(next()),
                reference: non_empty(next()),
                topic: next(),
                event: next(),
                payload,
            },
            KIND_REPLY => SocketMessage::Reply {
                join_ref: non_empty(next()),
                reference: non_empty(next()),
                topic: next(),
                status: next(),
                payload,
            },
            _ => SocketMessage::Broadcast {
                topic: next(),
                event: next(),
                payload,
            },
        })
    }
}

impl Serializer for BinarySerializer {
    fn encode(&self, message: &SocketMessage) -> Result<Frame, ProtocolError> {
        self.encode_bytes(message).map(Frame::Binary)
    }

    fn decode(&self, frame: &Frame) -> Result<SocketMessage, ProtocolError> {
        match frame {
            Frame::Binary(bytes) => self.decode_bytes(bytes),
            Frame::Text(_) => Err(ProtocolError::invalid(
                "binary serializer received a text frame",
            )),
        }
    }
}

/// Reads `count` length bytes, then that many string fields. Returns the
/// fields and whatever follows them.
fn split_fields(bytes: &[u8], count: usize) -> Result<(Vec<String>, &[u8]), ProtocolError> {
    if bytes.len() < count {
        return Err(ProtocolError::invalid(format!(
            "binary header needs {count} length bytes, frame has {}",
            bytes.len()
        )));
    }
    let (lengths, mut body) = bytes.split_at(count);

    let mut fields = Vec::with_capacity(count);
    for &len in lengths {
        let len = usize::from(len);
        if body.len() < len {
            return Err(ProtocolError::invalid(format!(
                "binary field needs {len} bytes, {} remain",
                body.len()
            )));
        }
        let (field, tail) = body.split_at(len);
        let field = std::str::from_utf8(field)
            .map_err(|e| ProtocolError::invalid(format!("binary field is not UTF-8: {e}")))?;
        fields.push(field.to_owned());
        body = tail;
    }
    Ok((fields, body))
}

fn non_empty(field: String) -> Option<String> {
    if field.is_empty() { None } else { Some(field) }
}
