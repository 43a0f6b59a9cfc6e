//! The logical session.
//!
//! Every [`EmulatedSession`] runs as one task that owns all of its state.
//! HTTP handlers never touch that state directly: they post
//! [`SessionEvent`]s through a [`SessionHandle`] and the task applies them in
//! order. Timers, carrier watchers and the inactivity tracker post events the
//! same way, so a stale timer or a late detach can be recognised by the
//! carrier id it carries.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use wseb_proto::{Command, Message, ProtocolMode, TransportKind};

use crate::carrier::{WriteError, WriterCarrier, WriterParams, WriterSlot};
use crate::close::CloseState;
use crate::config::SessionConfig;
use crate::connection::{ReaderGuard, WsebConnection};
use crate::error::{SessionError, SessionResult, TimeoutKind};
use crate::id::{CarrierId, SessionId};
use crate::queue::{OutboundItem, OutboundQueue};
use crate::sequence::SequenceCounter;
use crate::timer::{TimerKind, TimerSet};
use crate::tracker::InactivityTracker;

/// Messages flowing from upstream carriers to the application.
pub type InboundSender = mpsc::Sender<SessionResult<Message>>;

/// Parameters fixed when a session is created.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Session identifier.
    pub id: SessionId,
    /// Negotiation mode.
    pub mode: ProtocolMode,
    /// Carrier transport.
    pub transport: TransportKind,
    /// Ordinal declared on create; both directions start here.
    pub initial_sequence: u64,
    /// Whether the client accepts server PINGs.
    pub ping_enabled: bool,
    /// Negotiated subprotocol.
    pub subprotocol: Option<String>,
    /// Negotiated extensions.
    pub extensions: Vec<String>,
    /// Timeouts and capacities.
    pub config: SessionConfig,
}

impl SessionOptions {
    /// Options for a fresh session with a generated id.
    #[must_use]
    pub fn new(mode: ProtocolMode, config: SessionConfig) -> Self {
        Self {
            id: SessionId::generate(),
            mode,
            transport: TransportKind::Binary,
            initial_sequence: 0,
            ping_enabled: false,
            subprotocol: None,
            extensions: Vec::new(),
            config,
        }
    }

    /// Set the session id.
    #[must_use]
    pub fn with_id(mut self, id: SessionId) -> Self {
        self.id = id;
        self
    }

    /// Set the carrier transport.
    #[must_use]
    pub const fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Set the ordinal declared on create.
    #[must_use]
    pub const fn with_initial_sequence(mut self, sequence: u64) -> Self {
        self.initial_sequence = sequence;
        self
    }

    /// Enable server PINGs.
    #[must_use]
    pub const fn with_ping(mut self, enabled: bool) -> Self {
        self.ping_enabled = enabled;
        self
    }

    /// Set the negotiated subprotocol.
    #[must_use]
    pub fn with_subprotocol(mut self, subprotocol: Option<String>) -> Self {
        self.subprotocol = subprotocol;
        self
    }

    /// Set the negotiated extensions.
    #[must_use]
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }
}

/// Immutable facts about a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Negotiation mode.
    pub mode: ProtocolMode,
    /// Carrier transport.
    pub transport: TransportKind,
    /// Negotiated subprotocol.
    pub subprotocol: Option<String>,
    /// Negotiated extensions.
    pub extensions: Vec<String>,
    /// Whether the client accepts server PINGs.
    pub ping_enabled: bool,
    /// Idle timeout advertised to downstream carriers.
    pub client_idle_timeout: Duration,
    /// Largest frame accepted upstream.
    pub max_frame_size: usize,
    /// Chunks buffered per downstream carrier.
    pub carrier_capacity: usize,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Both CLOSEs were exchanged.
    Clean,
    /// A bounded wait expired.
    TimedOut(TimeoutKind),
    /// The session was reset.
    Reset(SessionError),
}

impl Termination {
    /// The error surfaced to the application, if any.
    #[must_use]
    pub fn error(&self) -> Option<SessionError> {
        match self {
            Self::Clean => None,
            Self::TimedOut(kind) => Some(SessionError::Timeout(*kind)),
            Self::Reset(err) => Some(err.clone()),
        }
    }
}

/// Diagnostic view of session state, published after every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Attached writer.
    pub writer: Option<CarrierId>,
    /// Writer waiting for the next swap.
    pub pending_writer: Option<CarrierId>,
    /// Attached reader.
    pub reader: Option<CarrierId>,
    /// Last accepted downstream ordinal.
    pub writer_seq: u64,
    /// Last accepted upstream ordinal.
    pub reader_seq: u64,
    /// A reconnect marker is queued.
    pub reconnecting: bool,
    /// Close handshake progress.
    pub close: CloseState,
    /// Queued outbound items.
    pub queued: usize,
    /// Set once the session has ended.
    pub termination: Option<Termination>,
}

/// Outcome of a downstream attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterAttachment {
    /// The carrier is the writer now.
    Attached,
    /// The carrier waits for the current writer to be swapped out.
    Pending,
}

/// A downstream carrier accepted by the session.
#[derive(Debug)]
pub struct DownstreamAttachment {
    /// Carrier id.
    pub id: CarrierId,
    /// Attached or pending.
    pub state: WriterAttachment,
    /// Body chunks for the HTTP response. Ends when the session lets go of
    /// the carrier.
    pub body: mpsc::Receiver<Bytes>,
}

/// Transitions posted to a session.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    AttachWriter {
        id: CarrierId,
        sink: mpsc::Sender<Bytes>,
        params: WriterParams,
        sequence_no: Option<u64>,
        reply: oneshot::Sender<SessionResult<WriterAttachment>>,
    },
    WriterWritable(CarrierId),
    WriterClosed(CarrierId),
    AttachReader {
        id: CarrierId,
        sequence_no: Option<u64>,
        reply: oneshot::Sender<SessionResult<InboundSender>>,
    },
    ReaderCommand(CarrierId, Command),
    ReaderDetached {
        id: CarrierId,
        result: SessionResult<()>,
    },
    CloseRequested,
    Reset(SessionError),
    ConnectTimeout,
    ReconnectTimeout,
    CloseTimeout,
    KeepaliveTick(CarrierId),
    FlushReady(CarrierId),
    FlushBackup(CarrierId),
    SendPing,
    InactivityTimeout,
}

/// Cloneable handle used by HTTP handlers to drive a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    info: Arc<SessionInfo>,
    events: mpsc::UnboundedSender<SessionEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
    slot: Arc<WriterSlot>,
    tracker: Arc<InactivityTracker>,
}

impl SessionHandle {
    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.info.id
    }

    /// Immutable session facts.
    #[must_use]
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Offer a downstream carrier.
    ///
    /// # Errors
    ///
    /// Fails with `OrderingViolation` on a sequence mismatch (the session is
    /// reset) or `Closed` if the session has ended.
    pub async fn attach_writer(
        &self,
        params: WriterParams,
        sequence_no: Option<u64>,
    ) -> SessionResult<DownstreamAttachment> {
        let id = CarrierId::next();
        let (sink, body) = mpsc::channel(self.info.carrier_capacity.max(1));
        let (reply, response) = oneshot::channel();
        self.post(SessionEvent::AttachWriter {
            id,
            sink,
            params,
            sequence_no,
            reply,
        })?;
        let state = response.await.map_err(|_| SessionError::Closed)??;
        Ok(DownstreamAttachment { id, state, body })
    }

    /// Offer an upstream carrier.
    ///
    /// # Errors
    ///
    /// Fails with `ProtocolViolation` if another reader is attached,
    /// `OrderingViolation` on a sequence mismatch (both reset the session),
    /// or `Closed` if the session has ended.
    pub async fn attach_reader(&self, sequence_no: Option<u64>) -> SessionResult<ReaderGuard> {
        let id = CarrierId::next();
        let (reply, response) = oneshot::channel();
        self.post(SessionEvent::AttachReader {
            id,
            sequence_no,
            reply,
        })?;
        let inbound = response.await.map_err(|_| SessionError::Closed)??;
        Ok(ReaderGuard::new(id, inbound, self.clone()))
    }

    /// Start the close handshake.
    pub fn close(&self) {
        let _ = self.post(SessionEvent::CloseRequested);
    }

    /// Reset the session with `error`.
    pub fn reset(&self, error: SessionError) {
        let _ = self.post(SessionEvent::Reset(error));
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        self.tracker.touch(&self.info.id);
    }

    /// The attached writer, read without a round trip to the session.
    #[must_use]
    pub fn current_writer(&self) -> Option<CarrierId> {
        self.slot.current()
    }

    /// Latest published state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Whether the session has ended.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.snapshot.borrow().termination.is_some()
    }

    /// Wait for the session to end.
    pub async fn terminated(&self) -> Termination {
        let mut snapshot = self.snapshot.clone();
        let ended = snapshot
            .wait_for(|s| s.termination.is_some())
            .await
            .ok()
            .and_then(|s| s.termination.clone());
        ended
            .or_else(|| snapshot.borrow().termination.clone())
            .unwrap_or(Termination::Reset(SessionError::Closed))
    }

    pub(crate) fn post(&self, event: SessionEvent) -> SessionResult<()> {
        self.events.send(event).map_err(|_| SessionError::Closed)
    }
}

enum Head {
    Marker,
    Frame(Bytes),
    Close,
}

/// The session task.
pub struct EmulatedSession {
    id: SessionId,
    mode: ProtocolMode,
    config: SessionConfig,
    ping_enabled: bool,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    app: mpsc::Receiver<Message>,
    app_open: bool,
    inbound: Option<InboundSender>,
    slot: Arc<WriterSlot>,
    writer: Option<WriterCarrier>,
    pending_writer: Option<WriterCarrier>,
    reader: Option<CarrierId>,
    writer_seq: SequenceCounter,
    reader_seq: SequenceCounter,
    queue: OutboundQueue,
    close: CloseState,
    close_requested: bool,
    reconnecting: bool,
    awaiting_writable: bool,
    ever_attached: bool,
    timers: TimerSet<SessionEvent>,
    tracker: Arc<InactivityTracker>,
    snapshot: watch::Sender<SessionSnapshot>,
    termination: Option<Termination>,
}

impl EmulatedSession {
    /// Start a session. Returns the handle for HTTP handlers and the
    /// connection for the application.
    pub fn spawn(
        options: SessionOptions,
        tracker: Arc<InactivityTracker>,
    ) -> (SessionHandle, WsebConnection) {
        let config = options.config;
        let (events_tx, events) = mpsc::unbounded_channel();
        let (app_tx, app) = mpsc::channel(config.outbound_high_water.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let slot = Arc::new(WriterSlot::new());
        let validate = options.mode.validates_sequence();

        let info = Arc::new(SessionInfo {
            id: options.id.clone(),
            mode: options.mode,
            transport: options.transport,
            subprotocol: options.subprotocol,
            extensions: options.extensions,
            ping_enabled: options.ping_enabled,
            client_idle_timeout: config.client_idle_timeout(),
            max_frame_size: config.max_frame_size,
            carrier_capacity: config.carrier_capacity,
        });

        let initial = SessionSnapshot {
            writer: None,
            pending_writer: None,
            reader: None,
            writer_seq: options.initial_sequence,
            reader_seq: options.initial_sequence,
            reconnecting: false,
            close: CloseState::open(),
            queued: 0,
            termination: None,
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let handle = SessionHandle {
            info,
            events: events_tx.clone(),
            snapshot: snapshot_rx,
            slot: Arc::clone(&slot),
            tracker: Arc::clone(&tracker),
        };
        let connection = WsebConnection::new(handle.clone(), app_tx, inbound_rx);

        let mut session = Self {
            id: options.id,
            mode: options.mode,
            ping_enabled: options.ping_enabled,
            timers: TimerSet::new(events_tx.clone()),
            events_tx,
            events,
            app,
            app_open: true,
            inbound: Some(inbound_tx),
            slot,
            writer: None,
            pending_writer: None,
            reader: None,
            writer_seq: SequenceCounter::new(options.initial_sequence, validate),
            reader_seq: SequenceCounter::new(options.initial_sequence, validate),
            queue: OutboundQueue::new(),
            close: CloseState::open(),
            close_requested: false,
            reconnecting: false,
            awaiting_writable: false,
            ever_attached: false,
            tracker,
            snapshot: snapshot_tx,
            termination: None,
            config,
        };
        session.start();
        tokio::spawn(session.run());

        (handle, connection)
    }

    fn start(&mut self) {
        self.timers.arm(
            TimerKind::Connect,
            self.config.connect_timeout(),
            SessionEvent::ConnectTimeout,
        );
        if let Some(timeout) = self.config.inactivity_timeout() {
            self.tracker.register(
                self.id.clone(),
                timeout,
                self.ping_enabled,
                self.events_tx.clone(),
            );
        }
    }

    async fn run(mut self) {
        info!(session_id = %self.id, mode = ?self.mode, "Session started");

        while self.termination.is_none() {
            let accepting = self.accepting_messages();
            tokio::select! {
                biased;
                event = self.events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => self.terminate(Termination::Reset(SessionError::Closed)),
                },
                message = self.app.recv(), if accepting => match message {
                    Some(message) => {
                        self.queue.push_message(&message);
                        self.flush();
                    }
                    None => {
                        debug!(session_id = %self.id, "Application dropped its sender");
                        self.app_open = false;
                        self.request_close();
                    }
                },
            }
            self.publish();
        }

        info!(session_id = %self.id, "Session ended");
    }

    fn accepting_messages(&self) -> bool {
        self.app_open
            && !self.close_requested
            && !self.close.is_closing()
            && self.queue.data_frames() < self.config.outbound_high_water
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::AttachWriter {
                id,
                sink,
                params,
                sequence_no,
                reply,
            } => self.attach_writer(id, sink, params, sequence_no, reply),
            SessionEvent::WriterWritable(id) => {
                if self.writer_id() == Some(id) {
                    self.awaiting_writable = false;
                    self.flush();
                }
            }
            SessionEvent::WriterClosed(id) => {
                if self.detach_lost_writer(id) {
                    self.flush();
                }
            }
            SessionEvent::AttachReader {
                id,
                sequence_no,
                reply,
            } => self.attach_reader(id, sequence_no, reply),
            SessionEvent::ReaderCommand(id, command) => self.reader_command(id, command),
            SessionEvent::ReaderDetached { id, result } => self.reader_detached(id, result),
            SessionEvent::CloseRequested => self.request_close(),
            SessionEvent::Reset(err) => self.terminate(Termination::Reset(err)),
            SessionEvent::ConnectTimeout => {
                if !self.ever_attached {
                    self.terminate(Termination::TimedOut(TimeoutKind::Connect));
                }
            }
            SessionEvent::ReconnectTimeout => {
                if self.writer.is_none() {
                    self.terminate(Termination::TimedOut(TimeoutKind::Reconnect));
                }
            }
            SessionEvent::CloseTimeout => {
                self.terminate(Termination::TimedOut(TimeoutKind::CloseHandshake));
            }
            SessionEvent::KeepaliveTick(id) => self.keepalive(id),
            SessionEvent::FlushReady(id) => {
                if let Some(writer) = self.writer.as_mut().filter(|w| w.id() == id) {
                    writer.set_ready(true);
                    self.flush();
                }
            }
            SessionEvent::FlushBackup(id) => {
                if let Some(writer) = self.writer.as_mut().filter(|w| w.id() == id) {
                    writer.write_command(Command::Noop);
                }
            }
            SessionEvent::SendPing => {
                self.queue.push_control(Command::Ping);
                self.flush();
            }
            SessionEvent::InactivityTimeout => {
                self.terminate(Termination::TimedOut(TimeoutKind::Inactivity));
            }
        }
    }

    fn writer_id(&self) -> Option<CarrierId> {
        self.writer.as_ref().map(WriterCarrier::id)
    }

    // ==================== Writer side ====================

    fn attach_writer(
        &mut self,
        id: CarrierId,
        sink: mpsc::Sender<Bytes>,
        params: WriterParams,
        sequence_no: Option<u64>,
        reply: oneshot::Sender<SessionResult<WriterAttachment>>,
    ) {
        if let Err(err) = self.writer_seq.advance(sequence_no) {
            warn!(session_id = %self.id, carrier = %id, error = %err, "Downstream rejected");
            let _ = reply.send(Err(err.clone()));
            self.terminate(Termination::Reset(err));
            return;
        }

        let (release, released) = oneshot::channel();
        self.watch_carrier(id, sink.clone(), released);
        let carrier = WriterCarrier::new(id, sink, params, release);

        if self.writer.is_none() {
            self.install_writer(carrier);
            let _ = reply.send(Ok(WriterAttachment::Attached));
        } else {
            if let Some(previous) = self.pending_writer.replace(carrier) {
                debug!(session_id = %self.id, carrier = %previous.id(), "Pending downstream replaced");
                previous.finish(Some(Command::Reconnect));
            }
            debug!(session_id = %self.id, carrier = %id, "Downstream pending");
            let _ = reply.send(Ok(WriterAttachment::Pending));
            self.request_reconnect();
        }
        self.flush();
    }

    /// Post `WriterClosed` when the HTTP response goes away, unless the
    /// session lets go of the carrier first.
    fn watch_carrier(
        &self,
        id: CarrierId,
        sink: mpsc::Sender<Bytes>,
        released: oneshot::Receiver<()>,
    ) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = sink.closed() => {
                    let _ = events.send(SessionEvent::WriterClosed(id));
                }
                _ = released => {}
            }
        });
    }

    fn install_writer(&mut self, mut carrier: WriterCarrier) {
        let id = carrier.id();
        if !self.slot.install(id) {
            warn!(session_id = %self.id, carrier = %id, "Writer slot already occupied");
        }
        self.ever_attached = true;
        self.awaiting_writable = false;
        self.timers.cancel(TimerKind::Connect);
        self.timers.cancel(TimerKind::Reconnect);
        self.timers.cancel_writer_timers();

        if self.mode.emits_initial_noop() {
            carrier.write_command(Command::Noop);
        }

        let keepalive = carrier
            .params()
            .keepalive
            .or_else(|| self.config.keepalive_interval());
        if let Some(interval) = keepalive {
            self.timers.arm_interval(TimerKind::Keepalive, interval, move || {
                SessionEvent::KeepaliveTick(id)
            });
        }

        if let Some(delay) = carrier.params().flush_delay {
            carrier.set_ready(false);
            self.timers
                .arm(TimerKind::FlushDelay, delay, SessionEvent::FlushReady(id));
            for (slot, factor) in [(1u8, 2u32), (2, 4), (3, 8)] {
                self.timers.arm(
                    TimerKind::FlushBackup(slot),
                    delay * factor,
                    SessionEvent::FlushBackup(id),
                );
            }
        }

        info!(
            session_id = %self.id,
            carrier = %id,
            polling = ?carrier.params().polling,
            "Downstream attached"
        );
        self.writer = Some(carrier);
    }

    fn take_writer(&mut self) -> Option<WriterCarrier> {
        let writer = self.writer.take()?;
        self.slot.release(writer.id());
        self.timers.cancel_writer_timers();
        self.awaiting_writable = false;
        Some(writer)
    }

    fn request_reconnect(&mut self) {
        if !self.reconnecting {
            self.reconnecting = true;
            self.queue.push_reconnect();
        }
    }

    /// Drop a writer whose response went away. Returns whether state
    /// changed.
    fn detach_lost_writer(&mut self, id: CarrierId) -> bool {
        if self.pending_writer.as_ref().is_some_and(|p| p.id() == id) {
            debug!(session_id = %self.id, carrier = %id, "Pending downstream closed");
            self.pending_writer = None;
            return true;
        }
        if self.writer_id() != Some(id) {
            return false;
        }
        self.take_writer();
        info!(session_id = %self.id, carrier = %id, "Downstream closed");

        if self.queue.remove_reconnect() {
            self.reconnecting = false;
        }
        if let Some(pending) = self.pending_writer.take() {
            self.install_writer(pending);
        } else {
            self.arm_reconnect_timeout();
        }
        true
    }

    fn service_reconnect(&mut self) {
        self.reconnecting = false;
        let detached = self.take_writer();
        let had_writer = detached.is_some();
        if let Some(writer) = detached {
            debug!(session_id = %self.id, carrier = %writer.id(), "Downstream swapped out");
            let command = (!self.close.is_closing()).then_some(Command::Reconnect);
            writer.finish(command);
        }

        if let Some(pending) = self.pending_writer.take() {
            self.install_writer(pending);
        } else if had_writer {
            self.arm_reconnect_timeout();
        }
    }

    /// Once our CLOSE is out the close timer bounds the wait instead.
    fn arm_reconnect_timeout(&mut self) {
        if self.close.is_sent() {
            return;
        }
        self.timers.arm(
            TimerKind::Reconnect,
            self.config.reconnect_timeout(),
            SessionEvent::ReconnectTimeout,
        );
    }

    fn await_writable(&mut self) {
        if self.awaiting_writable {
            return;
        }
        let Some(writer) = self.writer.as_ref() else {
            return;
        };
        self.awaiting_writable = true;
        let sink = writer.sink().clone();
        let id = writer.id();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            // the permit is released on drop; only the wakeup matters
            let _ = sink.reserve().await;
            let _ = events.send(SessionEvent::WriterWritable(id));
        });
    }

    fn keepalive(&mut self, id: CarrierId) {
        let Some(writer) = self.writer.as_mut().filter(|w| w.id() == id) else {
            return;
        };
        if writer.params().is_long_polling() {
            self.request_reconnect();
            self.flush();
        } else {
            writer.keepalive();
        }
    }

    /// Drain the outbound queue onto the attached writer.
    fn flush(&mut self) {
        if self.termination.is_some() {
            return;
        }
        let mut wrote = false;

        loop {
            let head = match self.queue.front() {
                None => break,
                Some(OutboundItem::Reconnect) => Head::Marker,
                Some(OutboundItem::Frame { bytes, .. }) => Head::Frame(bytes.clone()),
                Some(OutboundItem::Close) => Head::Close,
            };

            if let Head::Marker = head {
                self.queue.pop_front();
                self.service_reconnect();
                continue;
            }

            let Some(writer) = self.writer.as_mut() else {
                break;
            };
            if !writer.is_ready() || self.awaiting_writable {
                break;
            }

            let bytes = match &head {
                Head::Frame(bytes) => bytes.clone(),
                _ => {
                    let mut buf = BytesMut::with_capacity(Command::Close.encoded_len());
                    Command::Close.encode(&mut buf);
                    buf.freeze()
                }
            };

            match writer.try_write(&bytes) {
                Ok(()) => {
                    wrote = true;
                    let exhausted = writer.buffer_exhausted();
                    self.queue.pop_front();
                    if let Head::Close = head {
                        debug!(session_id = %self.id, "CLOSE written");
                        if self.close.mark_sent() {
                            self.terminate(Termination::Clean);
                            return;
                        }
                        self.timers.arm(
                            TimerKind::Close,
                            self.config.close_timeout(),
                            SessionEvent::CloseTimeout,
                        );
                    }
                    // control frames and CLOSE count too, or a long-poll never completes
                    if exhausted && !self.reconnecting {
                        debug!(session_id = %self.id, "Client buffer reached, reconnecting");
                        self.request_reconnect();
                    }
                }
                Err(WriteError::Full) => {
                    self.await_writable();
                    break;
                }
                Err(WriteError::Closed) => {
                    let id = writer.id();
                    if let Head::Close = head {
                        let termination = if self.close.is_received() {
                            Termination::Clean
                        } else {
                            Termination::Reset(SessionError::network(
                                "downstream closed before CLOSE was written",
                            ))
                        };
                        self.terminate(termination);
                        return;
                    }
                    self.detach_lost_writer(id);
                }
            }
        }

        if !wrote {
            if let Some(writer) = self.writer.as_mut().filter(|w| w.is_ready()) {
                writer.pad();
            }
        }
    }

    // ==================== Reader side ====================

    fn attach_reader(
        &mut self,
        id: CarrierId,
        sequence_no: Option<u64>,
        reply: oneshot::Sender<SessionResult<InboundSender>>,
    ) {
        if let Some(current) = self.reader.filter(|_| !self.close.is_closing()) {
            let err = SessionError::protocol("overlapping upstream");
            warn!(session_id = %self.id, carrier = %id, current = %current, "Overlapping upstream");
            let _ = reply.send(Err(err.clone()));
            self.terminate(Termination::Reset(err));
            return;
        }
        if let Err(err) = self.reader_seq.advance(sequence_no) {
            warn!(session_id = %self.id, carrier = %id, error = %err, "Upstream rejected");
            let _ = reply.send(Err(err.clone()));
            self.terminate(Termination::Reset(err));
            return;
        }
        let Some(inbound) = self.inbound.clone() else {
            let _ = reply.send(Err(SessionError::Closed));
            return;
        };
        debug!(session_id = %self.id, carrier = %id, "Upstream attached");
        self.reader = Some(id);
        let _ = reply.send(Ok(inbound));
    }

    fn reader_command(&mut self, id: CarrierId, command: Command) {
        if self.reader != Some(id) {
            debug!(session_id = %self.id, carrier = %id, %command, "Command from detached upstream");
            return;
        }
        match command {
            Command::Ping => {
                self.queue.push_control(Command::Pong);
                self.flush();
            }
            Command::Close => self.close_received(),
            Command::Reconnect => {
                debug!(session_id = %self.id, carrier = %id, "Upstream reconnecting");
            }
            Command::Pong | Command::Noop => {}
        }
    }

    fn reader_detached(&mut self, id: CarrierId, result: SessionResult<()>) {
        if self.reader != Some(id) {
            return;
        }
        self.reader = None;
        match result {
            Ok(()) => debug!(session_id = %self.id, carrier = %id, "Upstream detached"),
            Err(err) if !self.close.is_received() => {
                warn!(session_id = %self.id, carrier = %id, error = %err, "Upstream failed");
                self.terminate(Termination::Reset(err));
            }
            Err(_) => {}
        }
    }

    // ==================== Close handshake ====================

    fn request_close(&mut self) {
        if self.close.is_sent() || self.close_requested {
            return;
        }
        info!(session_id = %self.id, "Closing session");
        self.start_close();
        self.flush();
    }

    fn close_received(&mut self) {
        info!(session_id = %self.id, "Peer CLOSE received");
        if self.close.mark_received() {
            self.terminate(Termination::Clean);
            return;
        }
        self.start_close();
        self.flush();
    }

    fn start_close(&mut self) {
        if self.close_requested {
            return;
        }
        self.close_requested = true;
        self.queue.push_close();
    }

    fn terminate(&mut self, termination: Termination) {
        if self.termination.is_some() {
            return;
        }
        match &termination {
            Termination::Clean => info!(session_id = %self.id, "Session closed cleanly"),
            Termination::TimedOut(kind) => {
                warn!(session_id = %self.id, timeout = %kind, "Session timed out");
            }
            Termination::Reset(err) => warn!(session_id = %self.id, error = %err, "Session reset"),
        }

        self.timers.cancel_all();
        if let Some(writer) = self.take_writer() {
            writer.finish(None);
        }
        if let Some(pending) = self.pending_writer.take() {
            pending.finish(None);
        }
        self.queue.clear();
        self.reconnecting = false;

        if let Some(inbound) = self.inbound.take() {
            if let Some(err) = termination.error() {
                if let Err(mpsc::error::TrySendError::Full(item)) = inbound.try_send(Err(err)) {
                    tokio::spawn(async move {
                        let _ = inbound.send(item).await;
                    });
                }
            }
        }
        self.tracker.unregister(&self.id);
        self.termination = Some(termination);
    }

    fn publish(&self) {
        let next = SessionSnapshot {
            writer: self.writer_id(),
            pending_writer: self.pending_writer.as_ref().map(WriterCarrier::id),
            reader: self.reader,
            writer_seq: self.writer_seq.current(),
            reader_seq: self.reader_seq.current(),
            reconnecting: self.reconnecting,
            close: self.close,
            queued: self.queue.len(),
            termination: self.termination.clone(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl std::fmt::Debug for EmulatedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedSession")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("writer", &self.writer_id())
            .field("reader", &self.reader)
            .field("close", &self.close)
            .finish_non_exhaustive()
    }
}
