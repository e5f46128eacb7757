//! Unified error type for the flare client.
//!
//! Wraps the errors of the lower layers so application code can use `?`
//! without juggling several error types.

use flare_protocol::ProtocolError;
use flare_transport::TransportError;

/// Errors surfaced by the flare client API.
#[derive(Debug, thiserror::Error)]
pub enum FlareError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The endpoint can't be turned into a WebSocket URL.
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The socket's background task is gone, so the request could not be
    /// answered. Happens once the runtime shuts down.
    #[error("socket task has stopped")]
    SocketClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: FlareError = TransportError::NotConnected.into();
        assert!(matches!(err, FlareError::Transport(_)));
        assert_eq!(err.to_string(), "transport is not connected");
    }

    #[test]
    fn test_from_protocol_error() {
        let proto = ProtocolError::InvalidFrame("expected 5 elements".into());
        let err: FlareError = proto.into();
        assert!(matches!(err, FlareError::Protocol(_)));
        assert!(err.to_string().contains("expected 5 elements"));
    }

    #[test]
    fn test_invalid_endpoint_display() {
        let err = FlareError::InvalidEndpoint {
            endpoint: "ftp://host".into(),
            reason: "unsupported scheme \"ftp\"".into(),
        };
        assert_eq!(
            err.to_string(),
            r#"invalid endpoint "ftp://host": unsupported scheme "ftp""#
        );
    }

    #[test]
    fn test_socket_closed_display() {
        assert_eq!(FlareError::SocketClosed.to_string(), "socket task has stopped");
    }
}
