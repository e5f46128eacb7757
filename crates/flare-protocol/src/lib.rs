//! Wire protocol for Flare.
//!
//! This crate defines the "language" a Phoenix Channels client speaks:
//!
//! - **Types** ([`SocketMessage`], [`Payload`]): the messages that
//!   travel on the wire, plus the reserved event and topic names.
//! - **Codecs** ([`Serializer`] trait, [`JsonSerializer`],
//!   [`BinarySerializer`], [`PhoenixSerializer`]): how those messages
//!   are converted to and from transport frames.
//! - **Errors** ([`ProtocolError`]): what can go wrong during
//!   encoding/decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between the transport (raw frames) and the
//! socket (channels, pushes, replies). It doesn't know about connections
//! or timers; it only knows how to turn a [`SocketMessage`] into a
//! [`Frame`](flare_transport::Frame) and back.
//!
//! ```text
//! Transport (frames) → Protocol (SocketMessage) → Socket (channels)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod binary;
mod codec;
mod error;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use binary::BinarySerializer;
pub use codec::Serializer;
#[cfg(feature = "json")]
pub use codec::{JsonSerializer, PhoenixSerializer};
pub use error::ProtocolError;
pub use types::{events, Payload, SocketMessage, HEARTBEAT_TOPIC};
