//! WebSocket client transport using `tokio-tungstenite`.
//!
//! Each connection runs as one Tokio task that owns the stream. The
//! [`WebSocketTransport`] handle talks to that task over an unbounded
//! channel, so `write` and `disconnect` never block the caller.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::{
    CLOSE_ABNORMAL, EventSink, Frame, Transport, TransportError, TransportFactory,
};

/// Close code used when the peer closes without a status.
const CLOSE_NO_STATUS: u16 = 1005;

/// Instructions from the handle to the connection task.
enum Outbound {
    Frame(Frame),
    Close { code: u16, reason: String },
}

/// A [`Transport`] that connects to a `ws://` URL.
pub struct WebSocketTransport {
    endpoint: String,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Creates an unconnected transport for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            outbound: None,
            task: None,
        }
    }
}

impl Transport for WebSocketTransport {
    fn connect(&mut self, sink: EventSink) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        self.task = Some(tokio::spawn(run_connection(
            self.endpoint.clone(),
            sink,
            rx,
        )));
    }

    fn write(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.outbound
            .as_ref()
            .ok_or(TransportError::NotConnected)?
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::NotConnected)
    }

    fn disconnect(&mut self, code: u16, reason: Option<String>) {
        if let Some(tx) = &self.outbound {
            let _ = tx.send(Outbound::Close {
                code,
                reason: reason.unwrap_or_default(),
            });
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The default [`TransportFactory`]: a new [`WebSocketTransport`] per
/// connection attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketFactory;

impl TransportFactory for WebSocketFactory {
    fn create(&self, endpoint: &str) -> Box<dyn Transport> {
        Box::new(WebSocketTransport::new(endpoint))
    }
}

fn io_error(kind: std::io::ErrorKind, e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(kind, e.to_string())
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
    }
}

/// Owns one WebSocket stream from connect to close.
async fn run_connection(
    endpoint: String,
    sink: EventSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let conn = sink.id();
    let ws = match tokio_tungstenite::connect_async(endpoint.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            tracing::debug!(%conn, %endpoint, error = %e, "WebSocket connect failed");
            sink.error(TransportError::ConnectFailed(io_error(
                std::io::ErrorKind::ConnectionRefused,
                &e,
            )));
            sink.close(CLOSE_ABNORMAL, e.to_string());
            return;
        }
    };

    tracing::debug!(%conn, %endpoint, "WebSocket connected");
    sink.open();

    let (mut write, mut read) = ws.split();
    let mut closing = false;

    loop {
        tokio::select! {
            out = outbound.recv(), if !closing => match out {
                Some(Outbound::Frame(frame)) => {
                    tracing::trace!(%conn, bytes = frame.len(), "writing frame");
                    if let Err(e) = write.send(into_message(frame)).await {
                        sink.error(TransportError::SendFailed(io_error(
                            std::io::ErrorKind::BrokenPipe,
                            &e,
                        )));
                        sink.close(CLOSE_ABNORMAL, e.to_string());
                        return;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    // Keep reading until the peer echoes the close frame.
                    closing = true;
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if write.send(Message::Close(Some(frame))).await.is_err() {
                        sink.close(code, reason);
                        return;
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    sink.message(Frame::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    sink.message(Frame::Binary(bytes.to_vec()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or_else(
                        || (CLOSE_NO_STATUS, String::new()),
                        |f| (u16::from(f.code), f.reason.as_str().to_owned()),
                    );
                    let _ = write.close().await;
                    tracing::debug!(%conn, code, %reason, "WebSocket closed by peer");
                    sink.close(code, reason);
                    return;
                }
                Some(Ok(_)) => {} // ping/pong/raw frame
                Some(Err(e)) => {
                    sink.error(TransportError::ReceiveFailed(io_error(
                        std::io::ErrorKind::ConnectionReset,
                        &e,
                    )));
                    sink.close(CLOSE_ABNORMAL, e.to_string());
                    return;
                }
                None => {
                    sink.close(CLOSE_ABNORMAL, "stream ended");
                    return;
                }
            },
        }
    }
}
