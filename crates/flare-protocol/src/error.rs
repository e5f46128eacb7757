//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means a frame could not be converted. The
//! socket treats a decode failure as fatal for that single frame: the
//! wire contract was violated, so there is nothing sensible to retry.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization of the text array failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The text frame is not valid JSON.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame parsed, but does not have the shape the protocol
    /// requires: wrong array length, a missing field, an unknown binary
    /// kind, a truncated header, or a field longer than 255 bytes.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

impl ProtocolError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidFrame(reason.into())
    }
}
