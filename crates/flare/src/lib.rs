//! # Flare
//!
//! Client for Phoenix Channels: one socket to a Phoenix endpoint,
//! multiplexing any number of topic subscriptions.
//!
//! - [`Socket`] owns the connection: heartbeats, reconnects with backoff,
//!   and buffers outbound messages while disconnected.
//! - [`Channel`] is one topic: join, leave, push, and event bindings,
//!   rejoined automatically after errors and reconnects.
//! - [`Push`] is one outbound message awaiting its reply, resolved as
//!   ok, error, or timeout.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flare::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), FlareError> {
//! let socket = Socket::new("ws://localhost:4000/socket")?;
//! socket.connect();
//!
//! let lobby = socket.channel("room:lobby", "{}");
//! lobby.on("new_msg", |msg| println!("{}", msg.payload()));
//! lobby
//!     .join()
//!     .receive(PushStatus::Ok, |_| println!("joined"))
//!     .receive(PushStatus::Error, |resp| println!("rejected: {resp}"));
//! # Ok(())
//! # }
//! ```

mod actor;
mod channel;
mod config;
mod error;
mod listeners;
mod push;
mod socket;

pub use channel::{Channel, ChannelState};
pub use config::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_TIMEOUT, DEFAULT_VSN, SocketConfig};
pub use error::FlareError;
pub use push::{Push, PushStatus};
pub use socket::{ConnectionState, Socket, SocketBuilder};

pub use flare_protocol as protocol;
pub use flare_timer as timer;
pub use flare_transport as transport;

/// Convenience re-exports for the common case.
pub mod prelude {
    pub use crate::error::FlareError;
    pub use crate::{Channel, ChannelState, ConnectionState, Push, PushStatus, Socket};
    pub use flare_protocol::{Payload, SocketMessage};
    pub use flare_timer::Backoff;
}
