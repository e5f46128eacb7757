//! The socket task and the commands it processes.
//!
//! One `SocketActor` per socket owns the transport, the send buffer,
//! every channel, and every timer. It handles one [`Command`] at a time,
//! so socket and channel state never needs a lock.
//!
//! Timer firings and transport events arrive as commands too. Each one
//! carries a token (timers) or a connection id (transport), and anything
//! stale (a canceled timer, a replaced connection) is dropped on arrival.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use flare_protocol::{HEARTBEAT_TOPIC, Payload, SocketMessage, events};
use flare_timer::{RetryTimer, TimerToken};
use flare_transport::{
    CLOSE_ABNORMAL, ConnectionId, EventSink, Frame, Transport, TransportError, TransportEvent,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::channel::{Bindings, ChannelCore, ChannelId, ChannelState};
use crate::config::SocketConfig;
use crate::push::{PushCore, PushId, PushKind, PushShared, PushStatus};
use crate::socket::{ConnectionState, SocketListeners};

/// Everything the socket task can be asked to do.
pub(crate) enum Command {
    Connect,
    Disconnect {
        code: u16,
        reason: Option<String>,
        done: oneshot::Sender<()>,
    },
    Push(SocketMessage),
    ConnectionState(oneshot::Sender<ConnectionState>),
    Transport {
        conn: ConnectionId,
        event: TransportEvent,
    },
    Timer {
        timer: TimerKind,
        token: TimerToken,
    },
    AddChannel {
        id: ChannelId,
        topic: String,
        params: Payload,
        join_push: (PushId, PushShared),
        bindings: Bindings,
    },
    RemoveChannel(ChannelId),
    Join {
        channel: ChannelId,
        timeout: Duration,
    },
    Leave {
        channel: ChannelId,
        push: PushId,
        timeout: Duration,
        shared: PushShared,
    },
    ChannelPush {
        channel: ChannelId,
        push: PushId,
        event: String,
        payload: Payload,
        timeout: Duration,
        shared: PushShared,
    },
    ChannelState {
        channel: ChannelId,
        reply: oneshot::Sender<ChannelState>,
    },
    ReleasePush {
        channel: ChannelId,
        push: PushId,
    },
}

/// Which timer a firing belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    Heartbeat,
    Reconnect,
    Rejoin(ChannelId),
    PushTimeout(ChannelId, PushId),
}

/// The handles' end of the command queue.
#[derive(Clone)]
pub(crate) struct CommandSender(mpsc::UnboundedSender<Command>);

impl CommandSender {
    pub(crate) fn send(&self, command: Command) {
        if self.0.send(command).is_err() {
            warn!("socket task has stopped, command dropped");
        }
    }

    /// Like `send`, for drop paths where a stopped task is expected.
    pub(crate) fn send_quietly(&self, command: Command) {
        let _ = self.0.send(command);
    }
}

/// Spawns the socket task and returns its command queue.
///
/// The task keeps only weak senders for itself (transport sink, timer
/// firings), so it stops once every handle is gone.
pub(crate) fn spawn(
    config: SocketConfig,
    endpoint_url: String,
    listeners: SocketListeners,
) -> CommandSender {
    let (tx, rx) = mpsc::unbounded_channel();
    let actor = SocketActor::new(config, endpoint_url, listeners, tx.downgrade(), rx);
    tokio::spawn(actor.run());
    CommandSender(tx)
}

/// Builds the closure a timer runs when it fires: post the firing back
/// to the socket task.
fn fire_into(
    commands: &mpsc::WeakUnboundedSender<Command>,
    timer: TimerKind,
) -> impl FnOnce(TimerToken) + Send + 'static {
    let commands = commands.clone();
    move |token| {
        if let Some(commands) = commands.upgrade() {
            let _ = commands.send(Command::Timer { timer, token });
        }
    }
}

pub(crate) struct SocketActor {
    config: SocketConfig,
    endpoint_url: String,
    listeners: SocketListeners,

    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
    conn: Option<ConnectionId>,
    next_conn: u64,
    /// Set by an explicit disconnect; suppresses the reconnect.
    close_was_clean: bool,
    pending_disconnects: Vec<oneshot::Sender<()>>,
    send_buffer: VecDeque<SocketMessage>,
    next_ref: u64,

    heartbeat_timer: RetryTimer,
    pending_heartbeat_ref: Option<String>,
    reconnect_timer: RetryTimer,

    channels: BTreeMap<ChannelId, ChannelCore>,

    weak_tx: mpsc::WeakUnboundedSender<Command>,
    receiver: mpsc::UnboundedReceiver<Command>,
}

impl SocketActor {
    fn new(
        config: SocketConfig,
        endpoint_url: String,
        listeners: SocketListeners,
        weak_tx: mpsc::WeakUnboundedSender<Command>,
        receiver: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let heartbeat_timer = RetryTimer::new(
            Arc::clone(&config.scheduler),
            flare_timer::Backoff::constant(config.heartbeat_interval),
        );
        let reconnect_timer = RetryTimer::new(
            Arc::clone(&config.scheduler),
            config.reconnect_after.clone(),
        );
        Self {
            config,
            endpoint_url,
            listeners,
            state: ConnectionState::Closed,
            transport: None,
            conn: None,
            next_conn: 0,
            close_was_clean: false,
            pending_disconnects: Vec::new(),
            send_buffer: VecDeque::new(),
            next_ref: 0,
            heartbeat_timer,
            pending_heartbeat_ref: None,
            reconnect_timer,
            channels: BTreeMap::new(),
            weak_tx,
            receiver,
        }
    }

    async fn run(mut self) {
        debug!(endpoint = %self.endpoint_url, "socket task started");

        while let Some(command) = self.receiver.recv().await {
            self.handle(command);
        }

        if let Some(mut transport) = self.transport.take() {
            transport.disconnect(flare_transport::CLOSE_NORMAL, None);
        }
        debug!(endpoint = %self.endpoint_url, "socket task stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect { code, reason, done } => self.disconnect(code, reason, done),
            Command::Push(message) => self.push(message),
            Command::ConnectionState(reply) => {
                let _ = reply.send(self.state);
            }
            Command::Transport { conn, event } => {
                if self.conn == Some(conn) {
                    self.on_transport_event(event);
                } else {
                    trace!(%conn, "ignoring event from a replaced connection");
                }
            }
            Command::Timer { timer, token } => self.on_timer(timer, token),
            Command::AddChannel {
                id,
                topic,
                params,
                join_push,
                bindings,
            } => {
                debug!(%id, %topic, "channel created");
                let core = ChannelCore::new(
                    topic,
                    params,
                    join_push,
                    bindings,
                    self.config.timeout,
                    self.config.rejoin_after.clone(),
                    Arc::clone(&self.config.scheduler),
                );
                self.channels.insert(id, core);
            }
            Command::RemoveChannel(id) => {
                if let Some(channel) = self.channels.remove(&id) {
                    channel.bindings.clear();
                    debug!(%id, topic = %channel.topic, "channel removed");
                }
            }
            Command::Join { channel, timeout } => self.join(channel, timeout),
            Command::Leave {
                channel,
                push,
                timeout,
                shared,
            } => self.leave(channel, push, timeout, shared),
            Command::ChannelPush {
                channel,
                push,
                event,
                payload,
                timeout,
                shared,
            } => {
                let core = PushCore::new(
                    PushKind::Message,
                    event,
                    payload,
                    timeout,
                    shared,
                    Arc::clone(&self.config.scheduler),
                );
                self.channel_push(channel, push, core);
            }
            Command::ChannelState { channel, reply } => {
                let state = self
                    .channels
                    .get(&channel)
                    .map_or(ChannelState::Closed, |c| c.state);
                let _ = reply.send(state);
            }
            Command::ReleasePush { channel, push } => {
                let Some(core) = self.channels.get_mut(&channel) else {
                    return;
                };
                if let Some(p) = core.pushes.get_mut(&push) {
                    p.release();
                    if p.is_finished() {
                        core.pushes.remove(&push);
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    fn connect(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            debug!(state = %self.state, "connect ignored");
            return;
        }

        // A connect while closing abandons the old transport.
        self.transport = None;
        self.resolve_disconnects();

        self.close_was_clean = false;
        self.next_conn += 1;
        let conn = ConnectionId::new(self.next_conn);

        let commands = self.weak_tx.clone();
        let sink = EventSink::new(conn, move |conn, event| {
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Transport { conn, event });
            }
        });

        info!(%conn, endpoint = %self.endpoint_url, "connecting");
        let mut transport = self.config.transport.create(&self.endpoint_url);
        self.state = ConnectionState::Connecting;
        self.conn = Some(conn);
        transport.connect(sink);
        self.transport = Some(transport);
    }

    fn disconnect(&mut self, code: u16, reason: Option<String>, done: oneshot::Sender<()>) {
        self.close_was_clean = true;
        self.reconnect_timer.reset();
        self.heartbeat_timer.reset();
        self.pending_heartbeat_ref = None;

        match self.transport.as_mut() {
            Some(transport) if self.state != ConnectionState::Closed => {
                info!(code, "disconnecting");
                self.state = ConnectionState::Closing;
                transport.disconnect(code, reason);
                self.pending_disconnects.push(done);
            }
            _ => {
                let _ = done.send(());
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(frame) => self.on_frame(frame),
            TransportEvent::Close { code, reason } => self.on_close(code, &reason),
            TransportEvent::Error(error) => self.on_error(error),
        }
    }

    fn on_open(&mut self) {
        if self.state == ConnectionState::Closing {
            debug!("connection opened after disconnect was requested");
            return;
        }

        info!(conn = ?self.conn, endpoint = %self.endpoint_url, "socket open");
        self.state = ConnectionState::Open;
        self.reconnect_timer.reset();
        self.pending_heartbeat_ref = None;
        self.schedule_heartbeat();

        while let Some(message) = self.send_buffer.pop_front() {
            self.write(message);
        }

        self.listeners.open.dispatch(|_| true, |callback| callback());

        let ids: Vec<ChannelId> = self.channels.keys().copied().collect();
        for id in ids {
            let Some(channel) = self.channels.get_mut(&id) else {
                continue;
            };
            channel.rejoin_timer.reset();
            if channel.state == ChannelState::Errored {
                self.rejoin(id);
            }
        }
    }

    fn on_close(&mut self, code: u16, reason: &str) {
        info!(code, reason, clean = self.close_was_clean, "socket closed");
        self.state = ConnectionState::Closed;
        self.transport = None;
        self.conn = None;
        self.heartbeat_timer.reset();
        self.pending_heartbeat_ref = None;

        self.error_channels();

        if !self.close_was_clean {
            let on_fire = fire_into(&self.weak_tx, TimerKind::Reconnect);
            let delay = self.reconnect_timer.schedule_timeout(on_fire);
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = self.reconnect_timer.tries(),
                "reconnect scheduled"
            );
        }

        self.resolve_disconnects();
        self.listeners
            .close
            .dispatch(|_| true, |callback| callback(code, reason));
    }

    fn on_error(&mut self, error: TransportError) {
        warn!(%error, "transport error");
        self.error_channels();
        self.listeners
            .error
            .dispatch(|_| true, |callback| callback(&error));
    }

    /// Drops the connection without waiting for the transport and runs
    /// the regular close handling, reconnect included.
    fn close_abnormally(&mut self, reason: &str) {
        if let Some(mut transport) = self.transport.take() {
            transport.disconnect(CLOSE_ABNORMAL, Some(reason.to_owned()));
        }
        self.close_was_clean = false;
        self.on_close(CLOSE_ABNORMAL, reason);
    }

    fn resolve_disconnects(&mut self) {
        for done in self.pending_disconnects.drain(..) {
            let _ = done.send(());
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    fn make_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    fn push(&mut self, message: SocketMessage) {
        if self.state == ConnectionState::Open {
            self.write(message);
        } else {
            trace!(topic = %message.topic(), event = %message.event(), "buffered until open");
            self.send_buffer.push_back(message);
        }
    }

    /// Removes a message still waiting in the send buffer. Returns whether
    /// one was there.
    fn unbuffer(&mut self, topic: &str, reference: &str) -> bool {
        let before = self.send_buffer.len();
        self.send_buffer
            .retain(|m| !(m.topic() == topic && m.reference() == Some(reference)));
        self.send_buffer.len() != before
    }

    fn write(&mut self, message: SocketMessage) {
        let frame = match self.config.serializer.encode(&message) {
            Ok(frame) => frame,
            Err(error) => {
                error!(%error, topic = %message.topic(), event = %message.event(), "failed to encode message");
                return;
            }
        };
        trace!(
            topic = %message.topic(),
            event = %message.event(),
            reference = ?message.reference(),
            bytes = frame.len(),
            "sending"
        );
        if let Some(transport) = self.transport.as_mut() {
            if let Err(error) = transport.write(frame) {
                warn!(%error, "failed to write frame");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    fn schedule_heartbeat(&mut self) {
        self.heartbeat_timer.reset();
        if self.config.skip_heartbeat {
            return;
        }
        let on_fire = fire_into(&self.weak_tx, TimerKind::Heartbeat);
        self.heartbeat_timer.schedule_timeout(on_fire);
    }

    fn send_heartbeat(&mut self) {
        if self.state != ConnectionState::Open {
            return;
        }

        if let Some(pending) = self.pending_heartbeat_ref.take() {
            warn!(reference = %pending, "heartbeat timeout, closing connection");
            self.close_abnormally("heartbeat timeout");
            return;
        }

        let reference = self.make_ref();
        trace!(%reference, "heartbeat");
        self.pending_heartbeat_ref = Some(reference.clone());
        self.push(SocketMessage::Message {
            join_ref: None,
            reference: Some(reference),
            topic: HEARTBEAT_TOPIC.to_owned(),
            event: events::HEARTBEAT.to_owned(),
            payload: Payload::empty(),
        });

        let on_fire = fire_into(&self.weak_tx, TimerKind::Heartbeat);
        self.heartbeat_timer.schedule_timeout(on_fire);
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    fn on_frame(&mut self, frame: Frame) {
        let message = match self.config.serializer.decode(&frame) {
            Ok(message) => message,
            Err(error) => {
                error!(%error, bytes = frame.len(), "dropping undecodable frame");
                return;
            }
        };
        trace!(
            topic = %message.topic(),
            event = %message.event(),
            reference = ?message.reference(),
            "received"
        );

        if let SocketMessage::Reply {
            topic,
            reference: Some(reference),
            ..
        } = &message
        {
            if topic == HEARTBEAT_TOPIC
                && self.pending_heartbeat_ref.as_deref() == Some(reference.as_str())
            {
                trace!(%reference, "heartbeat acknowledged");
                self.pending_heartbeat_ref = None;
            }
        }

        self.listeners
            .message
            .dispatch(|_| true, |callback| callback(&message));

        let targets: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(_, channel)| channel.accepts(&message))
            .map(|(id, _)| *id)
            .collect();

        for id in &targets {
            self.trigger(*id, &message);
        }

        // Bindings see a reply first: resolving a leave closes the channel.
        if let SocketMessage::Reply {
            reference,
            status,
            payload,
            ..
        } = &message
        {
            self.resolve_reply(&targets, reference.as_deref(), status, payload);
        }
    }

    /// Resolves the push a reply answers, on whichever target channel
    /// sent it.
    fn resolve_reply(
        &mut self,
        targets: &[ChannelId],
        reference: Option<&str>,
        status: &str,
        payload: &Payload,
    ) {
        let Some(reference) = reference else {
            debug!("reply without ref ignored");
            return;
        };
        let Some(status) = PushStatus::from_reply(status) else {
            warn!(%status, %reference, "reply with unknown status ignored");
            return;
        };
        for id in targets {
            let push = self
                .channels
                .get(id)
                .and_then(|channel| channel.push_by_ref(reference));
            if let Some(push) = push {
                self.resolve_push(*id, push, status, payload.clone());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------------

    /// Runs the channel's own handling for `message`, then its bindings.
    fn trigger(&mut self, id: ChannelId, message: &SocketMessage) {
        let event = message.event();
        if event == events::ERROR {
            self.channel_errored(id);
        }

        let Some(bindings) = self.channels.get(&id).map(|c| c.bindings.clone()) else {
            return;
        };
        bindings.dispatch(|e| e == event, |callback| callback(message));

        if event == events::CLOSE {
            if let Some(channel) = self.channels.remove(&id) {
                channel.bindings.clear();
                info!(%id, topic = %channel.topic, "channel closed");
            }
        }
    }

    /// Delivers a locally generated lifecycle event to a channel.
    fn trigger_local(&mut self, id: ChannelId, event: &str) {
        let Some(channel) = self.channels.get(&id) else {
            return;
        };
        let message = SocketMessage::Message {
            join_ref: channel.join_ref().map(str::to_owned),
            reference: None,
            topic: channel.topic.clone(),
            event: event.to_owned(),
            payload: Payload::empty(),
        };
        self.trigger(id, &message);
    }

    /// Errors every channel that is joined or joining, after the
    /// connection failed under it.
    fn error_channels(&mut self) {
        let affected: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(_, c)| matches!(c.state, ChannelState::Joined | ChannelState::Joining))
            .map(|(id, _)| *id)
            .collect();
        for id in affected {
            self.trigger_local(id, events::ERROR);
        }
    }

    fn channel_errored(&mut self, id: ChannelId) {
        let Some(channel) = self.channels.get_mut(&id) else {
            return;
        };
        if matches!(channel.state, ChannelState::Leaving | ChannelState::Closed) {
            return;
        }
        if channel.state == ChannelState::Joining {
            if let Some(join) = channel.join_push_mut() {
                join.reset();
            }
        }
        channel.state = ChannelState::Errored;
        warn!(%id, topic = %channel.topic, "channel errored");

        if self.state == ConnectionState::Open {
            let on_fire = fire_into(&self.weak_tx, TimerKind::Rejoin(id));
            let delay = channel.rejoin_timer.schedule_timeout(on_fire);
            debug!(%id, delay_ms = delay.as_millis() as u64, "rejoin scheduled");
        }
    }

    fn join(&mut self, id: ChannelId, timeout: Duration) {
        let Some(channel) = self.channels.get_mut(&id) else {
            warn!(%id, "join on a channel that is no longer registered");
            return;
        };
        if !matches!(channel.state, ChannelState::Closed | ChannelState::Errored) {
            warn!(
                %id,
                topic = %channel.topic,
                state = %channel.state,
                "join called more than once on a channel, ignoring"
            );
            return;
        }
        if let Some(join) = channel.join_push_mut() {
            join.set_timeout(timeout);
        }
        self.rejoin(id);
    }

    /// Sends the join push again under a fresh ref.
    fn rejoin(&mut self, id: ChannelId) {
        let Some(channel) = self.channels.get_mut(&id) else {
            return;
        };
        if channel.state == ChannelState::Leaving {
            return;
        }
        channel.rejoin_timer.cancel();
        channel.state = ChannelState::Joining;
        debug!(%id, topic = %channel.topic, "joining");
        let join_push = channel.join_push;
        self.send_push(id, join_push);
    }

    fn leave(&mut self, id: ChannelId, push: PushId, timeout: Duration, shared: PushShared) {
        let open = self.state == ConnectionState::Open;
        let scheduler = Arc::clone(&self.config.scheduler);
        let Some(channel) = self.channels.get_mut(&id) else {
            debug!(%id, "leave on a channel that is no longer registered");
            return;
        };

        let can_push = open && channel.state == ChannelState::Joined;
        channel.rejoin_timer.reset();
        if let Some(join) = channel.join_push_mut() {
            join.cancel_timeout();
        }
        channel.state = ChannelState::Leaving;
        debug!(%id, topic = %channel.topic, "leaving");

        let leave = PushCore::new(
            PushKind::Leave,
            events::LEAVE,
            Payload::empty(),
            timeout,
            shared,
            scheduler,
        );
        channel.pushes.insert(push, leave);

        // Sent even when the channel can't push: a join still in flight,
        // or one buffered until the socket opens, must be undone on the
        // server. The channel itself closes right away in that case.
        self.send_push(id, push);
        if !can_push {
            self.resolve_push(id, push, PushStatus::Ok, Payload::empty());
        }
    }

    fn channel_push(&mut self, id: ChannelId, push: PushId, core: PushCore) {
        let open = self.state == ConnectionState::Open;
        let Some(channel) = self.channels.get_mut(&id) else {
            warn!(%id, event = %core.event, "push on a channel that is no longer registered");
            return;
        };
        channel.pushes.insert(push, core);

        if !(open && channel.state == ChannelState::Joined) {
            trace!(%id, %push, state = %channel.state, "push queued until joined");
            channel.queue.push_back(push);
            return;
        }
        self.send_push(id, push);
    }

    /// Starts a new attempt of `push` under a fresh ref and hands it to
    /// the socket.
    fn send_push(&mut self, id: ChannelId, push: PushId) {
        let reference = self.make_ref();
        let Some(channel) = self.channels.get_mut(&id) else {
            return;
        };
        let Some(core) = channel.pushes.get_mut(&push) else {
            return;
        };

        let on_timeout = fire_into(&self.weak_tx, TimerKind::PushTimeout(id, push));
        core.start(reference.clone(), on_timeout);
        let event = core.event.clone();
        let payload = core.payload.clone();

        let message = SocketMessage::Message {
            join_ref: channel.join_ref().map(str::to_owned),
            reference: Some(reference),
            topic: channel.topic.clone(),
            event,
            payload,
        };
        self.push(message);
    }

    /// Resolves a push once: runs the channel's own handling for it, then
    /// the hooks registered for `status`.
    fn resolve_push(&mut self, id: ChannelId, push: PushId, status: PushStatus, payload: Payload) {
        let Some(channel) = self.channels.get_mut(&id) else {
            return;
        };
        let Some(core) = channel.pushes.get_mut(&push) else {
            return;
        };
        if core.is_resolved() {
            trace!(%id, %push, "push already resolved");
            return;
        }

        let kind = core.kind;
        debug!(%id, event = %core.event, %status, "push resolved");
        let hooks = core.resolve(status, payload);

        match kind {
            PushKind::Join => self.on_join_reply(id, status),
            PushKind::Leave => {
                if matches!(status, PushStatus::Ok | PushStatus::Timeout) {
                    self.trigger_local(id, events::CLOSE);
                }
            }
            PushKind::Message => {}
        }

        hooks.run();

        if let Some(channel) = self.channels.get_mut(&id) {
            if channel.pushes.get(&push).is_some_and(PushCore::is_finished) {
                channel.pushes.remove(&push);
            }
        }
    }

    fn on_join_reply(&mut self, id: ChannelId, status: PushStatus) {
        let open = self.state == ConnectionState::Open;
        let Some(channel) = self.channels.get_mut(&id) else {
            return;
        };
        if channel.state != ChannelState::Joining {
            debug!(%id, state = %channel.state, "join reply ignored");
            return;
        }

        match status {
            PushStatus::Ok => {
                channel.state = ChannelState::Joined;
                channel.rejoin_timer.reset();
                info!(%id, topic = %channel.topic, join_ref = ?channel.join_ref(), "joined");
                let queued: Vec<PushId> = channel.queue.drain(..).collect();
                for push in queued {
                    self.send_push(id, push);
                }
            }
            PushStatus::Error => {
                channel.state = ChannelState::Errored;
                warn!(%id, topic = %channel.topic, "join rejected");
                if open {
                    let on_fire = fire_into(&self.weak_tx, TimerKind::Rejoin(id));
                    channel.rejoin_timer.schedule_timeout(on_fire);
                }
            }
            PushStatus::Timeout => {
                warn!(%id, topic = %channel.topic, "join timed out");
                let stale_join_ref = channel.join_ref().map(str::to_owned);
                let topic = channel.topic.clone();
                channel.state = ChannelState::Errored;
                if let Some(join) = channel.join_push_mut() {
                    join.reset();
                }
                if open {
                    let on_fire = fire_into(&self.weak_tx, TimerKind::Rejoin(id));
                    channel.rejoin_timer.schedule_timeout(on_fire);
                }

                // A join that never left the send buffer is simply
                // dropped. Otherwise tell the server to drop the
                // membership it may still create for the timed-out attempt.
                let Some(stale_join_ref) = stale_join_ref else {
                    return;
                };
                if self.unbuffer(&topic, &stale_join_ref) {
                    debug!(%id, %topic, join_ref = %stale_join_ref, "unsent join dropped");
                    return;
                }
                let reference = self.make_ref();
                self.push(SocketMessage::Message {
                    join_ref: Some(stale_join_ref),
                    reference: Some(reference),
                    topic,
                    event: events::LEAVE.to_owned(),
                    payload: Payload::empty(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    fn on_timer(&mut self, timer: TimerKind, token: TimerToken) {
        match timer {
            TimerKind::Heartbeat => {
                if self.heartbeat_timer.fire(token) {
                    self.send_heartbeat();
                }
            }
            TimerKind::Reconnect => {
                if self.reconnect_timer.fire(token) && !self.close_was_clean {
                    info!(attempt = self.reconnect_timer.tries(), "reconnecting");
                    self.connect();
                }
            }
            TimerKind::Rejoin(id) => {
                let claimed = self
                    .channels
                    .get_mut(&id)
                    .is_some_and(|channel| channel.rejoin_timer.fire(token));
                if claimed && self.state == ConnectionState::Open {
                    self.rejoin(id);
                }
            }
            TimerKind::PushTimeout(id, push) => {
                let claimed = self
                    .channels
                    .get_mut(&id)
                    .and_then(|channel| channel.pushes.get_mut(&push))
                    .is_some_and(|core| core.claim_timeout(token));
                if claimed {
                    self.resolve_push(id, push, PushStatus::Timeout, Payload::empty());
                }
            }
        }
    }
}
