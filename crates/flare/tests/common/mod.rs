//! In-memory transport and a test harness around it.
//!
//! `MockServer` plays the Phoenix endpoint: it records every frame the
//! socket writes and injects open/close/message events on demand. The
//! socket runs on a `VirtualClock`, so timers only fire when a test
//! advances it.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use flare::prelude::*;
use flare::SocketBuilder;
use flare::timer::VirtualClock;
use flare::transport::{
    CLOSE_ABNORMAL, EventSink, Frame, Transport, TransportError, TransportFactory,
};

// =========================================================================
// Mock transport
// =========================================================================

#[derive(Default)]
struct ServerState {
    sinks: Vec<EventSink>,
    endpoints: Vec<String>,
    written: Vec<Frame>,
    disconnects: Vec<(u16, Option<String>)>,
}

/// Shared view of every connection the socket made.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

struct MockTransport {
    server: MockServer,
    endpoint: String,
    sink: Option<EventSink>,
}

impl Transport for MockTransport {
    fn connect(&mut self, sink: EventSink) {
        let mut state = self.server.state.lock().unwrap();
        state.sinks.push(sink.clone());
        state.endpoints.push(self.endpoint.clone());
        self.sink = Some(sink);
    }

    fn write(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.server.state.lock().unwrap().written.push(frame);
        Ok(())
    }

    fn disconnect(&mut self, code: u16, reason: Option<String>) {
        self.server
            .state
            .lock()
            .unwrap()
            .disconnects
            .push((code, reason.clone()));
        if let Some(sink) = &self.sink {
            sink.close(code, reason.unwrap_or_default());
        }
    }
}

impl MockServer {
    pub fn factory(&self) -> impl TransportFactory {
        let server = self.clone();
        move |endpoint: &str| -> Box<dyn Transport> {
            Box::new(MockTransport {
                server: server.clone(),
                endpoint: endpoint.to_owned(),
                sink: None,
            })
        }
    }

    fn latest(&self) -> EventSink {
        self.state
            .lock()
            .unwrap()
            .sinks
            .last()
            .cloned()
            .expect("socket never connected")
    }

    /// The sink of the `index`th connection, oldest first.
    pub fn connection(&self, index: usize) -> EventSink {
        self.state.lock().unwrap().sinks[index].clone()
    }

    pub fn open(&self) {
        self.latest().open();
    }

    /// Drops the connection from the server side.
    pub fn drop_connection(&self) {
        self.latest().close(CLOSE_ABNORMAL, "connection lost");
    }

    pub fn fail(&self) {
        let sink = self.latest();
        sink.error(TransportError::ConnectionClosed("reset by peer".into()));
        sink.close(CLOSE_ABNORMAL, "reset by peer");
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.latest().message(Frame::Text(text.into()));
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        self.latest().message(Frame::Binary(bytes));
    }

    /// Number of transports the socket has connected.
    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().sinks.len()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.state.lock().unwrap().endpoints.clone()
    }

    pub fn disconnects(&self) -> Vec<(u16, Option<String>)> {
        self.state.lock().unwrap().disconnects.clone()
    }

    /// Every text frame written so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .written
            .iter()
            .filter_map(|frame| match frame {
                Frame::Text(text) => Some(text.clone()),
                Frame::Binary(_) => None,
            })
            .collect()
    }

    pub fn sent_binary(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .written
            .iter()
            .filter_map(|frame| match frame {
                Frame::Binary(bytes) => Some(bytes.clone()),
                Frame::Text(_) => None,
            })
            .collect()
    }

    /// Sent frames parsed as JSON arrays.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .map(|text| serde_json::from_str(text).expect("sent frame is JSON"))
            .collect()
    }

    /// Sent frames whose event is `event`.
    pub fn sent_events(&self, event: &str) -> Vec<serde_json::Value> {
        self.sent_json()
            .into_iter()
            .filter(|frame| frame[3] == event)
            .collect()
    }

    pub fn clear_sent(&self) {
        self.state.lock().unwrap().written.clear();
    }
}

// =========================================================================
// Harness
// =========================================================================

pub const ENDPOINT: &str = "ws://localhost:4000/socket";

pub struct Harness {
    pub socket: Socket,
    pub server: MockServer,
    pub clock: VirtualClock,
}

pub fn harness() -> Harness {
    harness_with(|builder| builder)
}

pub fn harness_with(configure: impl FnOnce(SocketBuilder) -> SocketBuilder) -> Harness {
    let server = MockServer::default();
    let clock = VirtualClock::new();
    let builder = Socket::builder(ENDPOINT)
        .transport(server.factory())
        .scheduler(clock.clone());
    let socket = configure(builder).build().expect("valid endpoint");
    Harness {
        socket,
        server,
        clock,
    }
}

impl Harness {
    /// Waits until the socket task has handled everything queued so far.
    pub async fn settle(&self) {
        self.socket
            .connection_state()
            .await
            .expect("socket task running");
    }

    /// Connects and opens the connection.
    pub async fn connect(&self) {
        self.socket.connect();
        self.settle().await;
        self.server.open();
        self.settle().await;
    }

    pub async fn advance(&self, by: Duration) {
        self.clock.advance(by);
        self.settle().await;
    }

    pub async fn reply(&self, topic: &str, reference: &str, status: &str, response: &str) {
        self.server.send_text(format!(
            r#"[null,"{reference}","{topic}","phx_reply",{{"status":"{status}","response":{response}}}]"#
        ));
        self.settle().await;
    }

    /// Joins `topic` and acknowledges the join.
    pub async fn joined_channel(&self, topic: &str) -> Channel {
        let channel = self.socket.channel(topic, "{}");
        let _ = channel.join();
        self.settle().await;
        let join = self
            .server
            .sent_events("phx_join")
            .into_iter()
            .rev()
            .find(|frame| frame[2] == topic)
            .expect("join sent");
        let reference = join[1].as_str().expect("join has a ref").to_owned();
        self.reply(topic, &reference, "ok", "{}").await;
        channel
    }
}

/// Records the payloads a callback is invoked with.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn record(&self, entry: impl Into<String>) {
        self.calls.lock().unwrap().push(entry.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// A `receive` hook that records the response under `label`.
    pub fn hook(&self, label: &'static str) -> impl Fn(&Payload) + Send + Sync + 'static {
        let recorder = self.clone();
        move |payload: &Payload| recorder.record(format!("{label}:{payload}"))
    }
}
