//! Event Stream Client
//!
//! Owns the single connection to the event server and drives its lifecycle:
//!
//! ```text
//!                connect()
//! Disconnected ────────────► Connecting ──open ok──► Connected
//!      ▲                      ▲     │                    │
//!      │ disconnect()   timer │     │ open failed        │ close / error
//!      │                      │     ▼                    │
//!      └──────────────────── Reconnecting ◄──────────────┘
//!                                   │ budget spent
//!                                   ▼
//!                           PermanentlyFailed ──connect()──► Connecting
//! ```
//!
//! Every transition takes the shared lock and verifies that the session it
//! belongs to is still current, so a cancelled session (or a reconnect timer
//! that fires after `disconnect`) can never move the state machine.
//!
//! Frames are decoded and dispatched in receive order on the session task.
//! No lock is held while handlers run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, JsonCodec};
use super::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use super::reconnect::{BackoffPolicy, ReconnectConfig};
use crate::application::ports::{Frame, Transport, TransportConnection, TransportError};
use crate::domain::connection::{ConnectionEvent, ConnectionState};
use crate::domain::envelope::{Endpoint, Envelope, Payload};
use crate::domain::subscription::{HandlerId, Subscription, SubscriptionRegistry};
use crate::infrastructure::metrics::{self, TransportFailure};

/// Upper bound on the close handshake of a torn-down connection.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Error Type
// =============================================================================

/// Errors returned by client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// `connect` was called outside a Tokio runtime.
    #[error("no Tokio runtime available to drive the connection")]
    NoRuntime,

    /// No connection is live.
    #[error("not connected")]
    NotConnected,

    /// The outbound queue is full.
    #[error("outbound queue is full")]
    OutboundFull,

    /// Encoding an outbound envelope failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the event stream client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Event server address.
    pub endpoint: Endpoint,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration (`None` disables pings).
    pub heartbeat: Option<HeartbeatConfig>,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
    /// Capacity of the outbound message queue.
    pub outbound_capacity: usize,
}

impl ClientConfig {
    /// Create a configuration with default reconnect behavior and no heartbeat.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            reconnect: ReconnectConfig::default(),
            heartbeat: None,
            event_capacity: 256,
            outbound_capacity: 256,
        }
    }

    /// Set the maximum number of reconnection attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.reconnect.max_attempts = max_attempts;
        self
    }

    /// Set the base and maximum reconnect delays.
    #[must_use]
    pub fn with_reconnect_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.reconnect.base_delay = base_delay;
        self.reconnect.max_delay = max_delay;
        self
    }

    /// Set the upward jitter fraction applied to reconnect delays.
    #[must_use]
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.reconnect.jitter_factor = jitter_factor;
        self
    }

    /// Replace the whole reconnect configuration.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Enable heartbeat pings. A zero ping interval disables them.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = (!heartbeat.ping_interval.is_zero()).then_some(heartbeat);
        self
    }

    /// Set the lifecycle event channel capacity.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the outbound queue capacity.
    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// Callback invoked once the reconnect budget is exhausted.
pub type PermanentFailureCallback = Arc<dyn Fn(u32) + Send + Sync>;

struct Session {
    id: u64,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    attempt: u32,
    session: Option<Session>,
    outbound: Option<mpsc::Sender<String>>,
    /// Task of the last torn-down session, awaited before the next open.
    retired: Option<JoinHandle<()>>,
}

impl Shared {
    fn is_current(&self, session_id: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session_id)
    }

    fn retire_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.cancel.cancel();
            if let Some(task) = session.task.take() {
                self.retired = Some(task);
            }
        }
        self.outbound = None;
    }
}

/// What the session task should do after a transport failure.
enum FailureAction {
    Retry(Duration),
    Exhausted(u32),
    Stale,
}

/// Why a live connection stopped.
enum ConnectionEnd {
    Cancelled,
    Failed(TransportFailure, TransportError),
}

struct ClientInner {
    config: ClientConfig,
    backoff: BackoffPolicy,
    transport: Arc<dyn Transport>,
    registry: SubscriptionRegistry,
    codec: JsonCodec,
    shared: Mutex<Shared>,
    events: broadcast::Sender<ConnectionEvent>,
    on_permanent_failure: RwLock<Option<PermanentFailureCallback>>,
    next_session: AtomicU64,
}

// =============================================================================
// Event Stream Client
// =============================================================================

/// Resilient event stream client.
///
/// Manages the connection lifecycle including:
/// - Automatic reconnection with bounded exponential backoff
/// - Decoding `{type, payload}` frames
/// - Fan-out to subscribers registered per event type
/// - Optional heartbeat monitoring
///
/// Dropping the client tears the connection down.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use event_stream::{ClientConfig, Endpoint, EventStreamClient, WebSocketTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let endpoint = Endpoint::parse("ws://localhost:8000/ws")?;
/// let client = EventStreamClient::new(
///     ClientConfig::new(endpoint),
///     Arc::new(WebSocketTransport::new()),
/// );
///
/// let _prices = client.subscribe("price", |payload| {
///     println!("price update: {payload}");
///     Ok(())
/// });
///
/// client.connect()?;
/// // ...
/// client.disconnect();
/// # Ok(())
/// # }
/// ```
pub struct EventStreamClient {
    inner: Arc<ClientInner>,
}

impl EventStreamClient {
    /// Create a new client. No connection is opened until [`connect`](Self::connect).
    #[must_use]
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let backoff = BackoffPolicy::new(config.reconnect.clone());

        Self {
            inner: Arc::new(ClientInner {
                config,
                backoff,
                transport,
                registry: SubscriptionRegistry::new(),
                codec: JsonCodec::new(),
                shared: Mutex::new(Shared::default()),
                events,
                on_permanent_failure: RwLock::new(None),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    /// Start connecting.
    ///
    /// A no-op while connecting or connected. Otherwise starts a fresh session
    /// with the attempt counter reset; from `Reconnecting` the pending timer is
    /// cancelled and the connection is opened immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoRuntime`] if called outside a Tokio runtime.
    pub fn connect(&self) -> Result<(), ClientError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let mut shared = self.inner.shared.lock();
        if shared.state.is_active() {
            tracing::debug!(state = %shared.state, "Connect ignored, session already active");
            return Ok(());
        }

        shared.retire_session();
        shared.attempt = 0;

        let session_id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let previous = shared.retired.take();
        shared.session = Some(Session {
            id: session_id,
            cancel: cancel.clone(),
            task: None,
        });
        self.inner.transition(&mut shared, ConnectionState::Connecting);

        tracing::info!(url = %self.inner.config.endpoint, session_id, "Connecting to event stream");

        let inner = Arc::clone(&self.inner);
        let task = runtime.spawn(async move {
            if let Some(previous) = previous
                && let Err(error) = previous.await
            {
                tracing::warn!(error = %error, "Previous session task did not finish cleanly");
            }

            let session = AssertUnwindSafe(Arc::clone(&inner).run_session(session_id, cancel));
            if session.catch_unwind().await.is_err() {
                inner.on_session_panic(session_id);
            }
        });

        if let Some(session) = shared.session.as_mut() {
            session.task = Some(task);
        }

        Ok(())
    }

    /// Tear the connection down.
    ///
    /// Cancels any pending reconnect, closes the live transport, resets the
    /// reconnect bookkeeping and clears every subscription. Safe to call in any
    /// state and any number of times.
    pub fn disconnect(&self) {
        {
            let mut shared = self.inner.shared.lock();
            shared.retire_session();
            shared.attempt = 0;
            if shared.state != ConnectionState::Disconnected {
                tracing::info!(from = %shared.state, "Disconnecting from event stream");
                self.inner
                    .transition(&mut shared, ConnectionState::Disconnected);
            }
        }

        self.inner.registry.clear();
    }

    /// Queue an envelope for the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] if no connection is live and
    /// [`ClientError::OutboundFull`] if the outbound queue is full.
    pub fn send(&self, message_type: &str, payload: Payload) -> Result<(), ClientError> {
        let text = self
            .inner
            .codec
            .encode(&Envelope::new(message_type, payload))?;

        let shared = self.inner.shared.lock();
        let Some(outbound) = shared.outbound.as_ref() else {
            return Err(ClientError::NotConnected);
        };

        outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ClientError::OutboundFull,
            mpsc::error::TrySendError::Closed(_) => ClientError::NotConnected,
        })
    }

    /// Register a handler for an event type.
    pub fn subscribe<F>(&self, message_type: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(message_type, handler)
    }

    /// Register a handler that receives the payload decoded as `T`.
    pub fn subscribe_as<T, F>(&self, message_type: impl Into<String>, handler: F) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.registry.subscribe_as(message_type, handler)
    }

    /// Remove a handler. Unknown handlers are a no-op.
    pub fn unsubscribe(&self, message_type: &str, id: HandlerId) -> bool {
        self.inner.registry.unsubscribe(message_type, id)
    }

    /// Register the callback invoked when reconnects are exhausted.
    pub fn on_permanent_failure<F>(&self, callback: F)
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        *self.inner.on_permanent_failure.write() = Some(Arc::new(callback));
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Current reconnect attempt counter.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.inner.shared.lock().attempt
    }

    /// The subscription registry.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        let mut shared = self.inner.shared.lock();
        shared.retire_session();
        if shared.state != ConnectionState::Disconnected {
            self.inner
                .transition(&mut shared, ConnectionState::Disconnected);
        }
    }
}

// =============================================================================
// Session Driver
// =============================================================================

impl ClientInner {
    fn transition(&self, shared: &mut Shared, next: ConnectionState) {
        let previous = shared.state;
        shared.state = next;

        tracing::debug!(from = %previous, to = %next, attempt = shared.attempt, "Connection state changed");
        metrics::set_connection_state(next);

        // No receivers is fine
        let _ = self.events.send(ConnectionEvent::StateChanged {
            state: next,
            attempt: shared.attempt,
        });
    }

    /// Run one session until it is cancelled or the reconnect budget is spent.
    async fn run_session(self: Arc<Self>, session_id: u64, cancel: CancellationToken) {
        loop {
            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                result = self.transport.open(&self.config.endpoint) => result,
            };

            let failure = match opened {
                Ok(mut connection) => {
                    let end = match self.on_open(session_id) {
                        Some(outbound_rx) => {
                            self.drive_connection(connection.as_mut(), outbound_rx, &cancel)
                                .await
                        }
                        None => ConnectionEnd::Cancelled,
                    };
                    close_connection(connection.as_mut()).await;

                    match end {
                        ConnectionEnd::Cancelled => return,
                        ConnectionEnd::Failed(kind, error) => (kind, error),
                    }
                }
                Err(error) => (TransportFailure::Open, error),
            };

            let (kind, error) = failure;
            tracing::warn!(error = %error, kind = ?kind, "Event stream connection lost");
            metrics::record_transport_error(kind);

            match self.on_failure(session_id) {
                FailureAction::Retry(delay) => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            tracing::debug!("Reconnect timer cancelled");
                            return;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }

                    if !self.on_timer_fired(session_id) {
                        return;
                    }
                }
                FailureAction::Exhausted(attempts) => {
                    self.notify_permanent_failure(attempts);
                    return;
                }
                FailureAction::Stale => return,
            }
        }
    }

    /// Connected transition. Returns the outbound queue receiver, or `None`
    /// if the session was cancelled while opening.
    fn on_open(&self, session_id: u64) -> Option<mpsc::Receiver<String>> {
        let mut shared = self.shared.lock();
        if !shared.is_current(session_id) {
            return None;
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        shared.outbound = Some(outbound_tx);
        shared.attempt = 0;
        self.transition(&mut shared, ConnectionState::Connected);

        tracing::info!(url = %self.config.endpoint, "Event stream connected");
        Some(outbound_rx)
    }

    /// Reconnecting transition after a failed open or a lost connection.
    fn on_failure(&self, session_id: u64) -> FailureAction {
        let mut shared = self.shared.lock();
        if !shared.is_current(session_id) {
            return FailureAction::Stale;
        }
        shared.outbound = None;

        let Some(delay) = self.backoff.next_delay(shared.attempt) else {
            tracing::error!(attempts = shared.attempt, "Reconnect attempts exhausted, giving up");
            return FailureAction::Exhausted(self.fail_permanently(&mut shared));
        };

        shared.attempt += 1;
        let attempt = shared.attempt;
        self.transition(&mut shared, ConnectionState::Reconnecting);

        tracing::info!(
            attempt,
            delay_ms = delay.as_millis(),
            "Reconnecting to event stream"
        );
        metrics::record_reconnect(delay);
        let _ = self
            .events
            .send(ConnectionEvent::ReconnectScheduled { attempt, delay });

        FailureAction::Retry(delay)
    }

    /// Terminal transition. Ends the session and reports the attempts made.
    fn fail_permanently(&self, shared: &mut Shared) -> u32 {
        let attempts = shared.attempt;
        shared.outbound = None;
        self.transition(shared, ConnectionState::Reconnecting);
        self.transition(shared, ConnectionState::PermanentlyFailed);
        // Session ends here; the task handle is simply dropped
        shared.session = None;

        metrics::record_permanent_failure();
        let _ = self.events.send(ConnectionEvent::PermanentFailure { attempts });
        attempts
    }

    /// The session task panicked. Fail terminally rather than leave a live
    /// looking state behind with nothing driving it.
    fn on_session_panic(&self, session_id: u64) {
        let attempts = {
            let mut shared = self.shared.lock();
            if !shared.is_current(session_id) {
                return;
            }
            tracing::error!(session_id, "Session task panicked, giving up");
            self.fail_permanently(&mut shared)
        };
        self.notify_permanent_failure(attempts);
    }

    /// Invoke the permanent-failure callback outside the lock, unless a
    /// `connect` has already started a new session.
    fn notify_permanent_failure(&self, attempts: u32) {
        {
            let shared = self.shared.lock();
            if shared.session.is_some() || shared.state != ConnectionState::PermanentlyFailed {
                tracing::debug!(state = %shared.state, "Skipping stale permanent failure callback");
                return;
            }
        }

        let callback = self.on_permanent_failure.read().clone();
        if let Some(callback) = callback {
            callback(attempts);
        }
    }

    /// Connecting transition when the reconnect timer fires.
    fn on_timer_fired(&self, session_id: u64) -> bool {
        let mut shared = self.shared.lock();
        if !shared.is_current(session_id) {
            return false;
        }
        self.transition(&mut shared, ConnectionState::Connecting);
        true
    }

    /// Pump frames, outbound messages and heartbeats until the connection ends.
    async fn drive_connection(
        &self,
        connection: &mut dyn TransportConnection,
        mut outbound_rx: mpsc::Receiver<String>,
        cancel: &CancellationToken,
    ) -> ConnectionEnd {
        let (mut heartbeat, mut ping_timer) = self
            .config
            .heartbeat
            .and_then(|config| {
                heartbeat_timer(config.ping_interval)
                    .map(|timer| (HeartbeatMonitor::new(config), timer))
            })
            .unzip();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return ConnectionEnd::Cancelled,
                frame = connection.next_frame() => {
                    match frame {
                        Some(Ok(frame)) => {
                            if let Some(monitor) = heartbeat.as_mut() {
                                monitor.record_activity();
                            }
                            match frame {
                                Frame::Text(text) => self.handle_text(&text),
                                Frame::Binary(data) => {
                                    tracing::debug!(len = data.len(), "Ignoring binary frame");
                                }
                                Frame::Ping | Frame::Pong => {}
                                Frame::Close(reason) => {
                                    tracing::info!(reason = ?reason, "Server sent close frame");
                                    return ConnectionEnd::Failed(
                                        TransportFailure::Closed,
                                        TransportError::Closed,
                                    );
                                }
                            }
                        }
                        Some(Err(error)) => {
                            return ConnectionEnd::Failed(TransportFailure::Io, error);
                        }
                        None => {
                            tracing::info!("Event stream ended");
                            return ConnectionEnd::Failed(
                                TransportFailure::Closed,
                                TransportError::Closed,
                            );
                        }
                    }
                }
                Some(text) = outbound_rx.recv() => {
                    if let Err(error) = connection.send_text(text).await {
                        return ConnectionEnd::Failed(TransportFailure::Io, error);
                    }
                }
                () = next_tick(&mut ping_timer) => {
                    let Some(monitor) = heartbeat.as_mut() else {
                        continue;
                    };
                    if let Err(error) = monitor.check() {
                        tracing::warn!(error = %error, "Heartbeat timeout");
                        return ConnectionEnd::Failed(
                            TransportFailure::Heartbeat,
                            TransportError::Io(error.to_string()),
                        );
                    }
                    if let Err(error) = connection.ping().await {
                        return ConnectionEnd::Failed(TransportFailure::Io, error);
                    }
                    monitor.mark_ping_sent();
                }
            }
        }
    }

    /// Decode a text frame and dispatch it. Malformed frames are dropped.
    fn handle_text(&self, text: &str) {
        metrics::record_frame_received();

        match self.codec.decode(text) {
            Ok(envelope) => {
                let outcome = self
                    .registry
                    .dispatch(&envelope.message_type, &envelope.payload);
                if outcome.invoked() == 0 {
                    tracing::trace!(message_type = %envelope.message_type, "No handlers for event");
                }
                metrics::record_dispatch(
                    &envelope.message_type,
                    outcome.delivered,
                    outcome.failures.len(),
                );
            }
            Err(error) => {
                tracing::warn!(error = %error, "Dropping malformed frame");
                metrics::record_decode_error();
            }
        }
    }
}

/// Ping timer for a heartbeat period, or `None` if the period is unusable.
fn heartbeat_timer(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        tracing::warn!("Zero heartbeat interval, running without heartbeat");
        return None;
    }
    let Some(start) = Instant::now().checked_add(period) else {
        tracing::warn!(
            interval_secs = period.as_secs(),
            "Heartbeat interval out of range, running without heartbeat"
        );
        return None;
    };

    let mut timer = tokio::time::interval_at(start, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    Some(timer)
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn close_connection(connection: &mut dyn TransportConnection) {
    match tokio::time::timeout(CLOSE_TIMEOUT, connection.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => tracing::debug!(error = %error, "Error closing connection"),
        Err(_) => tracing::debug!("Timed out closing connection"),
    }
}

// =============================================================================
// Tests
// =============================================================================
