//! Station connection: one charge point's WebSocket session
//!
//! A [`Connection`] dials the central system, then runs three tasks per
//! session sharing one socket:
//!
//! - **read**: receives frames under a rolling read deadline and hands data
//!   payloads to the observer
//! - **write**: the only task touching the socket sink; drains keepalive
//!   pings (priority) and the bounded data queue in FIFO order
//! - **keepalive**: the single keepalive timer; feeds pings to the write task
//!   and fails the session when the peer has gone silent
//!
//! When a session ends without [`Connection::disconnect`] having been called,
//! the connection reconnects with capped exponential backoff until the
//! configured attempt limit, then parks in `Error`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::http::header;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Instrument, Span};

use super::queue::{OutboundFrame, OutboundQueue};
use super::request::build_request;
use super::stats::StatsCounters;
use super::{tls, ConnectionConfig, ConnectionObserver, ConnectionState, ConnectionStats};
use crate::shared::{sleep_or_cancel, ConnectionError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pending keepalive pings; one is enough, the write task drains it first.
const CONTROL_QUEUE_CAPACITY: usize = 1;
/// Extra time granted to session tasks on disconnect beyond the write timeout.
const TEARDOWN_SLACK: Duration = Duration::from_millis(250);

/// A single station's session with the central system.
///
/// Cloning is cheap; all clones drive the same session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    observer: Arc<dyn ConnectionObserver>,
    span: Span,

    state: RwLock<ConnectionState>,
    stats: Mutex<StatsCounters>,
    last_error: Mutex<Option<String>>,
    reconnect_attempts: AtomicU32,

    session: Mutex<Option<ActiveSession>>,
    next_session_id: AtomicU64,

    /// Armed exactly once, by `disconnect`.
    cancel: CancellationToken,
    closing: AtomicBool,
}

/// The live socket session owned by a connection.
struct ActiveSession {
    link: Arc<SessionLink>,
    queue: OutboundQueue,
    tasks: Vec<JoinHandle<()>>,
}

/// State shared by the three tasks of one session.
struct SessionLink {
    id: u64,
    /// Child of the connection token; also cancelled when the session ends.
    cancel: CancellationToken,
    ended: AtomicBool,
    last_inbound: Mutex<Instant>,
}

impl SessionLink {
    fn new(id: u64, cancel: CancellationToken) -> Self {
        Self {
            id,
            cancel,
            ended: AtomicBool::new(false),
            last_inbound: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_inbound.lock() = Instant::now();
    }

    fn silence(&self) -> Duration {
        self.last_inbound.lock().elapsed()
    }

    /// Returns `true` for the first caller only.
    fn finish(&self) -> bool {
        let first = !self.ended.swap(true, Ordering::SeqCst);
        self.cancel.cancel();
        first
    }
}

impl Connection {
    /// Create a connection in the `Disconnected` state.
    ///
    /// `span` carries the logging context for everything this connection
    /// does; nothing is dialed until [`connect`](Self::connect).
    pub fn new(config: ConnectionConfig, observer: Arc<dyn ConnectionObserver>, span: Span) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                observer,
                span,
                state: RwLock::new(ConnectionState::Disconnected),
                stats: Mutex::new(StatsCounters::default()),
                last_error: Mutex::new(None),
                reconnect_attempts: AtomicU32::new(0),
                session: Mutex::new(None),
                next_session_id: AtomicU64::new(1),
                cancel: CancellationToken::new(),
                closing: AtomicBool::new(false),
            }),
        }
    }

    pub fn station_id(&self) -> &str {
        &self.inner.config.station_id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Dial the central system and start the session tasks.
    ///
    /// Calling this while connected re-dials and retires the previous
    /// socket. Fails with `Closed` once [`disconnect`](Self::disconnect) has
    /// been called.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.inner.connect().instrument(self.inner.span.clone()).await
    }

    /// Tear the connection down for good. Idempotent.
    ///
    /// Signals cancellation, lets the write task send a close frame, closes
    /// the socket and leaves the connection `Closed`. Teardown problems are
    /// logged, not returned.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.inner.disconnect().instrument(self.inner.span.clone()).await;
        Ok(())
    }

    /// Queue an application payload for delivery.
    ///
    /// Waits up to the configured send timeout for queue space.
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> Result<(), ConnectionError> {
        self.send_frame(OutboundFrame::Data(payload.into())).await
    }

    /// Queue any outbound frame behind the data already waiting.
    pub async fn send_frame(&self, frame: OutboundFrame) -> Result<(), ConnectionError> {
        let state = self.state();
        if !state.is_connected() {
            return Err(ConnectionError::NotConnected(state));
        }

        let (queue, cancel) = {
            let slot = self.inner.session.lock();
            match slot.as_ref() {
                Some(session) => (session.queue.clone(), session.link.cancel.clone()),
                None => return Err(ConnectionError::NotConnected(state)),
            }
        };

        queue.push(frame, self.inner.config.send_timeout, &cancel).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /// Consecutive reconnect attempts since the last successful handshake
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Snapshot of counters, timestamps and the live queue depth.
    pub fn stats(&self) -> ConnectionStats {
        let state = self.state();
        let counters = self.inner.stats.lock().clone();
        let queue_depth = self
            .inner
            .session
            .lock()
            .as_ref()
            .map_or(0, |session| session.queue.depth());

        ConnectionStats::from_counters(
            &self.inner.config.station_id,
            state,
            &counters,
            self.reconnect_attempts(),
            self.last_error(),
            queue_depth,
        )
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("station_id", &self.inner.config.station_id)
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    /// Move to `next` unless the connection is already `Closed`.
    fn set_state(&self, next: ConnectionState) -> bool {
        let mut state = self.state.write();
        if state.is_terminal() {
            return false;
        }
        if *state != next {
            debug!(from = %*state, to = %next, "State transition");
            *state = next;
        }
        true
    }

    fn record_error(&self, err: &ConnectionError) {
        *self.last_error.lock() = Some(err.to_string());
    }

    /// Caller-initiated connect; a failed dial leaves the connection in `Error`.
    async fn connect(self: &Arc<Self>) -> Result<(), ConnectionError> {
        let result = self.try_connect().await;
        if let Err(err) = &result {
            if !matches!(err, ConnectionError::Closed) {
                self.set_state(ConnectionState::Error);
            }
        }
        result
    }

    async fn try_connect(self: &Arc<Self>) -> Result<(), ConnectionError> {
        if self.cancel.is_cancelled() {
            return Err(ConnectionError::Closed);
        }

        self.set_state(ConnectionState::Connecting);
        self.retire_session();

        info!(
            url = %self.config.url,
            subprotocol = self.config.subprotocol(),
            "Connecting to central system"
        );

        let ws = match self.dial().await {
            Ok(ws) => ws,
            Err(err) => {
                if self.cancel.is_cancelled() {
                    debug!("Connect aborted by disconnect");
                    return Err(ConnectionError::Closed);
                }
                error!(error = %err, "Connect failed");
                self.record_error(&err);
                self.observer.on_error(&err);
                return Err(err);
            }
        };

        self.start_session(ws)
    }

    async fn dial(&self) -> Result<WsStream, ConnectionError> {
        let request = build_request(&self.config)?;
        let connector = tls::build_connector(&self.config.tls).await?;
        let connect_timeout = self.config.connect_timeout;

        let handshake = tokio::time::timeout(
            connect_timeout,
            connect_async_tls_with_config(request, None, true, connector),
        );

        let (ws, response) = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ConnectionError::Closed),
            result = handshake => result.map_err(|_| ConnectionError::ConnectTimeout(connect_timeout))??,
        };

        let negotiated = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        match negotiated {
            Some(protocol) => debug!(subprotocol = protocol, "Subprotocol negotiated"),
            None => warn!("Central system did not confirm a subprotocol"),
        }

        Ok(ws)
    }

    /// Install a freshly dialed socket as the current session.
    ///
    /// The install happens under the session lock: a concurrent dial that
    /// finished first is retired, and a `disconnect` that already ran drops
    /// the socket instead.
    fn start_session(self: &Arc<Self>, ws: WsStream) -> Result<(), ConnectionError> {
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let link = Arc::new(SessionLink::new(id, self.cancel.child_token()));
        let (queue, data_rx) = OutboundQueue::channel(self.config.send_queue_capacity);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);

        let previous = {
            let mut slot = self.session.lock();
            if self.cancel.is_cancelled() {
                debug!("Disconnected while handshaking, dropping socket");
                return Err(ConnectionError::Closed);
            }
            let previous = slot.replace(ActiveSession {
                link: link.clone(),
                queue,
                tasks: Vec::with_capacity(3),
            });
            self.stats.lock().connected_at = Some(Utc::now());
            metrics::gauge!("emulator_connections_active").increment(1.0);
            previous
        };
        if let Some(previous) = previous {
            self.retire(previous);
        }
        self.reconnect_attempts.store(0, Ordering::SeqCst);

        let (sink, stream) = ws.split();
        if self.set_state(ConnectionState::Connected) {
            info!(session = id, "Connected");
            self.observer.on_connected();
        }

        let tasks = vec![
            tokio::spawn(
                read_loop(self.clone(), link.clone(), stream).instrument(self.span.clone()),
            ),
            tokio::spawn(
                write_loop(self.clone(), link.clone(), sink, data_rx, control_rx)
                    .instrument(self.span.clone()),
            ),
            tokio::spawn(
                keepalive_loop(self.clone(), link.clone(), control_tx).instrument(self.span.clone()),
            ),
        ];

        // The session may already have ended; its tasks then finish detached.
        let mut slot = self.session.lock();
        if let Some(session) = slot.as_mut().filter(|s| s.link.id == link.id) {
            session.tasks = tasks;
        }
        Ok(())
    }

    /// Stop the current session, if any, without triggering reconnection.
    fn retire_session(&self) {
        let previous = self.session.lock().take();
        if let Some(previous) = previous {
            self.retire(previous);
        }
    }

    fn retire(&self, previous: ActiveSession) {
        if previous.link.finish() {
            debug!(session = previous.link.id, "Retiring previous session");
            self.session_closed();
            self.observer.on_disconnected(None);
        }
    }

    /// Bookkeeping shared by every way a session can end.
    fn session_closed(&self) {
        self.stats.lock().disconnected_at = Some(Utc::now());
        metrics::gauge!("emulator_connections_active").decrement(1.0);
    }

    /// Called by whichever session task notices the session is over first.
    fn end_session(self: &Arc<Self>, link: &SessionLink, error: Option<ConnectionError>) {
        if !link.finish() {
            return;
        }
        self.session_closed();

        let explicit = self.cancel.is_cancelled();
        let superseded = {
            let mut slot = self.session.lock();
            match slot.as_ref().map(|current| current.link.id) {
                Some(id) if id == link.id => {
                    if !explicit {
                        slot.take();
                    }
                    false
                }
                Some(_) => true,
                None => false,
            }
        };
        if superseded {
            // A newer session owns the connection state now.
            debug!(session = link.id, "Superseded session ended");
            self.observer.on_disconnected(error.as_ref());
            return;
        }

        self.set_state(ConnectionState::Disconnected);
        match &error {
            Some(err) => {
                warn!(session = link.id, error = %err, "Session lost");
                self.record_error(err);
                self.observer.on_error(err);
            }
            None => info!(session = link.id, "Session closed"),
        }
        self.observer.on_disconnected(error.as_ref());

        if explicit {
            self.set_state(ConnectionState::Closed);
        } else {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let max_attempts = self.config.max_reconnect_attempts;
        let attempts = self.reconnect_attempts.load(Ordering::SeqCst);
        if attempts >= max_attempts {
            let err = ConnectionError::ReconnectExhausted(attempts);
            error!(attempts, "Giving up on reconnecting");
            self.record_error(&err);
            self.set_state(ConnectionState::Error);
            self.observer.on_error(&err);
            return;
        }

        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.config.reconnect_backoff.delay(attempt);
        if !self.set_state(ConnectionState::Reconnecting) {
            return;
        }
        metrics::counter!("emulator_reconnect_attempts_total").increment(1);
        info!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        let inner = Arc::clone(self);
        tokio::spawn(
            async move {
                if !sleep_or_cancel(delay, &inner.cancel).await {
                    debug!(attempt, "Reconnect cancelled during backoff");
                    return;
                }
                if let Err(err) = inner.try_connect().await {
                    if inner.cancel.is_cancelled() {
                        return;
                    }
                    warn!(attempt, error = %err, "Reconnect attempt failed");
                    inner.schedule_reconnect();
                }
            }
            .instrument(self.span.clone()),
        );
    }

    async fn disconnect(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            debug!("Disconnect already performed");
            return;
        }

        info!("Disconnecting");
        self.cancel.cancel();

        let session = self.session.lock().take();
        if let Some(mut session) = session {
            let grace = self.config.write_timeout + TEARDOWN_SLACK;
            let joined = tokio::time::timeout(
                grace,
                futures_util::future::join_all(session.tasks.iter_mut()),
            )
            .await;

            match joined {
                Ok(results) => {
                    for result in results {
                        if let Err(e) = result {
                            warn!(error = %e, "Session task ended abnormally");
                        }
                    }
                }
                Err(_) => {
                    warn!(grace_ms = grace.as_millis() as u64, "Session tasks did not stop in time");
                    for task in &session.tasks {
                        task.abort();
                    }
                }
            }

            // Aborted tasks never reach `end_session`.
            if session.link.finish() {
                self.session_closed();
                self.observer.on_disconnected(None);
            }
        }

        self.stats.lock().disconnected_at = Some(Utc::now());
        self.set_state(ConnectionState::Closed);
        info!("Disconnected");
    }

    fn handle_inbound(&self, payload: &[u8]) {
        self.stats.lock().record_received(payload.len());
        metrics::counter!("emulator_messages_received_total").increment(1);
        metrics::counter!("emulator_bytes_received_total").increment(payload.len() as u64);
        trace!(bytes = payload.len(), "Frame received");
        self.observer.on_message(payload);
    }

    fn record_sent(&self, bytes: usize) {
        self.stats.lock().record_sent(bytes);
        metrics::counter!("emulator_messages_sent_total").increment(1);
        metrics::counter!("emulator_bytes_sent_total").increment(bytes as u64);
    }
}

async fn read_loop(inner: Arc<Inner>, link: Arc<SessionLink>, mut stream: SplitStream<WsStream>) {
    let read_timeout = inner.config.read_timeout;

    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = link.cancel.cancelled() => break None,
            next = tokio::time::timeout(read_timeout, stream.next()) => next,
        };

        let message = match next {
            Err(_) => break Some(ConnectionError::ReadTimeout(read_timeout)),
            Ok(None) => break None,
            Ok(Some(Err(e))) => break Some(ConnectionError::from(e)),
            Ok(Some(Ok(message))) => message,
        };

        link.touch();
        match message {
            Message::Text(text) => inner.handle_inbound(text.as_bytes()),
            Message::Binary(data) => inner.handle_inbound(&data),
            Message::Ping(_) => trace!("Ping received"),
            Message::Pong(_) => trace!("Pong received"),
            Message::Close(frame) => {
                debug!(?frame, "Close frame received");
                break None;
            }
            Message::Frame(_) => {}
        }
    };

    trace!(session = link.id, "Read task stopped");
    inner.end_session(&link, outcome);
}

async fn write_loop(
    inner: Arc<Inner>,
    link: Arc<SessionLink>,
    mut sink: SplitSink<WsStream, Message>,
    mut data_rx: mpsc::Receiver<OutboundFrame>,
    mut control_rx: mpsc::Receiver<OutboundFrame>,
) {
    let write_timeout = inner.config.write_timeout;

    let outcome = loop {
        let frame = tokio::select! {
            biased;
            _ = link.cancel.cancelled() => break None,
            Some(frame) = control_rx.recv() => frame,
            Some(frame) = data_rx.recv() => frame,
            else => break None,
        };

        let is_data = !frame.is_control();
        let len = frame.len();
        match tokio::time::timeout(write_timeout, sink.send(frame.into_message())).await {
            Ok(Ok(())) => {
                if is_data {
                    inner.record_sent(len);
                }
            }
            Ok(Err(e)) => break Some(ConnectionError::from(e)),
            Err(_) => break Some(ConnectionError::WriteTimeout(write_timeout)),
        }
    };

    let failed = outcome.is_some();
    inner.end_session(&link, outcome);

    // Best effort: sends a close frame if none went out yet, then flushes.
    if !failed {
        match tokio::time::timeout(write_timeout, sink.close()).await {
            Ok(Ok(())) => trace!(session = link.id, "Socket closed"),
            Ok(Err(e)) => debug!(session = link.id, error = %e, "Socket close failed"),
            Err(_) => debug!(session = link.id, "Socket close timed out"),
        }
    }
}

async fn keepalive_loop(
    inner: Arc<Inner>,
    link: Arc<SessionLink>,
    control_tx: mpsc::Sender<OutboundFrame>,
) {
    let period = inner.config.keepalive_interval;
    if period.is_zero() {
        link.cancel.cancelled().await;
        return;
    }
    let silence_limit = period + inner.config.keepalive_timeout;

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let failure = loop {
        tokio::select! {
            biased;
            _ = link.cancel.cancelled() => break None,
            _ = ticker.tick() => {}
        }

        let silence = link.silence();
        if silence > silence_limit {
            break Some(ConnectionError::KeepaliveTimeout(silence));
        }

        match control_tx.try_send(OutboundFrame::Ping(Vec::new())) {
            Ok(()) => trace!("Keepalive ping queued"),
            Err(TrySendError::Full(_)) => debug!("Previous keepalive ping still pending"),
            Err(TrySendError::Closed(_)) => break Some(ConnectionError::Closed),
        }
    };

    if let Some(err) = failure {
        inner.end_session(&link, Some(err));
    }
}
