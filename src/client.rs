//! Observer client for robot-combat battle servers.
//!
//! [`ObserverClient`] owns one logical server connection at a time. It opens
//! the transport, identifies itself with an observer handshake, classifies
//! inbound battle frames, and fans them out to registered subscriber
//! callbacks while tracking a [`ConnectionState`] snapshot that is broadcast
//! on every transition. Abnormal closures trigger automatic, bounded
//! reconnection with linear backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! let client = ObserverClient::new("ws://localhost:7655");
//!
//! client.on_connection_state_change(Arc::new(|state| {
//!     println!("connected: {}", state.is_connected);
//! }));
//! client.on(EventCategory::Tick, Arc::new(|tick| {
//!     println!("tick: {tick}");
//! }));
//!
//! client.connect().await;
//! // … later:
//! client.disconnect();
//! ```

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{ObserverError, Result};
use crate::protocol::{classify, Classification, EventCategory, ObserverHandshake};
use crate::transport::{Connector, Incoming, Transport, CLOSE_ABNORMAL, CLOSE_NORMAL};

/// Ceiling on automatic reconnection attempts after abnormal closures.
/// Once reached, resuming requires an explicit [`ObserverClient::connect`].
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base reconnection delay; attempt `n` waits `n × base` (linear backoff).
const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Display name sent in the observer handshake.
const OBSERVER_NAME: &str = "Arena Observer";

/// Observer version sent in the handshake; the crate version at compile time.
const OBSERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Terminal error message once the retry ceiling is reached.
const EXHAUSTED_ERROR: &str = "max reconnection attempts reached";

// ── Connection state ────────────────────────────────────────────────

/// Snapshot of connection health, broadcast on every transition.
///
/// Exactly one authoritative copy lives inside the client; accessors hand out
/// defensive clones. Invariant: `is_connected` and `is_connecting` are never
/// both true.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// Whether a transport is currently open.
    pub is_connected: bool,
    /// Whether a connection attempt is in flight.
    pub is_connecting: bool,
    /// Human-readable description of the most recent failure, if any.
    pub error: Option<String>,
    /// The server address this client targets.
    pub server_url: Option<String>,
}

// ── Handler types ───────────────────────────────────────────────────

/// Subscriber callback for battle events. Receives the full parsed message.
///
/// Identity is `Arc` pointer identity: registering the same handle twice is a
/// no-op, and [`ObserverClient::off`] removes exactly the handle it is given.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Observer callback for connection-state transitions.
pub type StateHandler = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

/// Lock a mutex, recovering the guard if a panicking handler poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Client ──────────────────────────────────────────────────────────

/// Async observer client for a robot-combat battle server.
///
/// See the [module docs](self) for an overview. All state lives in the client
/// instance (no globals), so multiple independent clients can coexist.
pub struct ObserverClient {
    inner: Arc<Inner>,
}

struct Inner {
    /// Server address as given by the caller (normalized per attempt).
    server_url: String,
    /// Transport factory, called once per connection attempt.
    connector: Arc<dyn Connector>,
    /// The authoritative connection-state snapshot.
    state: Mutex<ConnectionState>,
    /// Battle-event subscriber registry.
    event_handlers: Mutex<HashMap<EventCategory, Vec<EventHandler>>>,
    /// Connection-state subscriber registry.
    state_handlers: Mutex<Vec<StateHandler>>,
    /// Abnormal closures survived since the last successful open.
    reconnect_attempts: AtomicU32,
    /// Session generation; bumped by `connect` and `disconnect` so a
    /// superseded session task can never mutate state afterwards.
    epoch: AtomicU64,
    /// Sender half of the outbound frame channel into the session task.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Handle of the single pending reconnect timer, if any.
    reconnect_timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Handle of the current session task, aborted on drop.
    session_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ObserverClient {
    /// Create a client that connects over WebSocket.
    #[cfg(feature = "transport-websocket")]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_connector(
            server_url,
            Arc::new(crate::transports::websocket::WsConnector),
        )
    }

    /// Create a client with a custom [`Connector`].
    ///
    /// The connector is invoked once per connection attempt, including
    /// scheduled reconnection attempts.
    pub fn with_connector(server_url: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                server_url: server_url.into(),
                connector,
                state: Mutex::new(ConnectionState::default()),
                event_handlers: Mutex::new(HashMap::new()),
                state_handlers: Mutex::new(Vec::new()),
                reconnect_attempts: AtomicU32::new(0),
                epoch: AtomicU64::new(0),
                outbound: Mutex::new(None),
                reconnect_timer: Mutex::new(None),
                session_task: Mutex::new(None),
            }),
        }
    }

    /// Connect to the battle server.
    ///
    /// Returns immediately after initiating the attempt; completion (or
    /// failure) is observed through the connection-state listeners. A call
    /// while already connecting or connected is a no-op, so there is at most
    /// one in-flight attempt. A malformed server address fails synchronously
    /// into the error state without opening a transport.
    pub async fn connect(&self) {
        Inner::connect(Arc::clone(&self.inner), None).await;
    }

    /// Disconnect from the server.
    ///
    /// Cancels any pending scheduled reconnection, closes the transport with
    /// a normal-closure code and reason, and clears the error. Idempotent.
    pub fn disconnect(&self) {
        debug!("disconnect requested");
        if let Some(timer) = lock(&self.inner.reconnect_timer).take() {
            timer.abort();
        }
        let snapshot = {
            let mut state = lock(&self.inner.state);
            // Bumped under the state lock, so a session task that already
            // passed its epoch check cannot slip a mutation in between the
            // bump and this reset.
            self.inner.epoch.fetch_add(1, Ordering::AcqRel);
            // Dropping the sender asks the session task to close the
            // transport with a normal code and reason.
            lock(&self.inner.outbound).take();
            state.is_connected = false;
            state.is_connecting = false;
            state.error = None;
            state.clone()
        };
        self.inner.notify_state(&snapshot);
    }

    /// Send a message to the server.
    ///
    /// The message is serialized and transmitted only when the transport is
    /// open; otherwise the call is a logged no-op. It never fails the caller,
    /// queues, or retries.
    pub fn send<T: Serialize>(&self, message: &T) {
        if !self.is_connected() {
            warn!("cannot send message: not connected");
            return;
        }
        let Some(sender) = lock(&self.inner.outbound).clone() else {
            warn!("cannot send message: not connected");
            return;
        };
        match serde_json::to_string(message) {
            Ok(json) => {
                if sender.send(json).is_err() {
                    warn!("cannot send message: session has exited");
                }
            }
            Err(e) => error!("failed to serialize outbound message: {e}"),
        }
    }

    /// Subscribe a handler to a battle-event category.
    ///
    /// Re-registering the same handle for the same category is a no-op.
    /// Handlers for a category are invoked in registration order.
    pub fn on(&self, category: EventCategory, handler: EventHandler) {
        let mut registry = lock(&self.inner.event_handlers);
        let handlers = registry.entry(category).or_default();
        if !handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            handlers.push(handler);
        }
    }

    /// Unsubscribe a handler from a battle-event category.
    ///
    /// Removing a handle that is not registered is a no-op.
    pub fn off(&self, category: EventCategory, handler: &EventHandler) {
        if let Some(handlers) = lock(&self.inner.event_handlers).get_mut(&category) {
            handlers.retain(|h| !Arc::ptr_eq(h, handler));
        }
    }

    /// Subscribe to connection-state transitions.
    ///
    /// The handler is synchronously invoked once with the current snapshot
    /// before this method returns, so an initial state can never be missed.
    pub fn on_connection_state_change(&self, handler: StateHandler) {
        let snapshot = lock(&self.inner.state).clone();
        {
            let mut handlers = lock(&self.inner.state_handlers);
            if !handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
                handlers.push(Arc::clone(&handler));
            }
        }
        if catch_unwind(AssertUnwindSafe(|| handler(&snapshot))).is_err() {
            error!("connection state listener panicked");
        }
    }

    /// Unsubscribe from connection-state transitions.
    pub fn off_connection_state_change(&self, handler: &StateHandler) {
        lock(&self.inner.state_handlers).retain(|h| !Arc::ptr_eq(h, handler));
    }

    /// Returns a defensive copy of the current connection-state snapshot.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.inner.state).clone()
    }

    /// Returns `true` if a transport is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.state).is_connected
    }
}

impl std::fmt::Debug for ObserverClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.connection_state();
        f.debug_struct("ObserverClient")
            .field("server_url", &self.inner.server_url)
            .field("is_connected", &state.is_connected)
            .field("is_connecting", &state.is_connecting)
            .finish()
    }
}

impl Drop for ObserverClient {
    fn drop(&mut self) {
        // `Drop` is synchronous, so a graceful close cannot be awaited here.
        // Aborting the tasks drops the transport and the timer immediately.
        if let Some(timer) = lock(&self.inner.reconnect_timer).take() {
            timer.abort();
        }
        if let Some(session) = lock(&self.inner.session_task).take() {
            session.abort();
        }
    }
}

// ── Internal state machine ──────────────────────────────────────────

impl Inner {
    /// Begin a connection attempt. No-op while connecting or connected, or
    /// when `expected_epoch` (carried by the reconnect timer) has been
    /// superseded by a `disconnect` or an explicit `connect` in the interim.
    async fn connect(inner: Arc<Inner>, expected_epoch: Option<u64>) {
        let accepted = {
            let mut state = lock(&inner.state);
            if let Some(expected) = expected_epoch {
                if !inner.is_current(expected) {
                    debug!("scheduled reconnect superseded, skipping");
                    return;
                }
            }
            if state.is_connecting || state.is_connected {
                None
            } else {
                state.is_connecting = true;
                state.is_connected = false;
                state.error = None;
                state.server_url = Some(inner.server_url.clone());
                Some(state.clone())
            }
        };
        let Some(snapshot) = accepted else {
            debug!("connect ignored: already connecting or connected");
            return;
        };
        inner.notify_state(&snapshot);

        let ws_url = match normalize_server_url(&inner.server_url) {
            Ok(url) => url,
            Err(e) => {
                warn!("refusing to connect: {e}");
                inner.update_state(|s| {
                    s.is_connecting = false;
                    s.is_connected = false;
                    s.error = Some(e.to_string());
                });
                return;
            }
        };

        // Open a new session generation. The epoch bump and channel swap
        // happen under the state lock, atomic with any `disconnect`.
        let opened = {
            let state = lock(&inner.state);
            if !state.is_connecting {
                // A concurrent disconnect() canceled this attempt after the
                // listeners saw the connecting snapshot.
                None
            } else {
                let epoch = inner.epoch.fetch_add(1, Ordering::AcqRel) + 1;
                let (tx, rx) = mpsc::unbounded_channel();
                *lock(&inner.outbound) = Some(tx);
                Some((epoch, rx))
            }
        };
        let Some((epoch, rx)) = opened else {
            debug!("connect canceled before a transport was opened");
            return;
        };

        let session = tokio::spawn(run_session(Arc::clone(&inner), epoch, ws_url, rx));
        *lock(&inner.session_task) = Some(session);
    }

    /// Whether `epoch` still identifies the live session generation.
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    /// Replace the state snapshot and synchronously notify listeners.
    fn update_state(&self, mutate: impl FnOnce(&mut ConnectionState)) {
        let snapshot = {
            let mut state = lock(&self.state);
            mutate(&mut state);
            state.clone()
        };
        self.notify_state(&snapshot);
    }

    /// Like [`update_state`](Self::update_state), but applied only while
    /// `epoch` is still the live session generation. The epoch check and the
    /// mutation happen under the state lock, so a `disconnect` or a new
    /// `connect` cannot interleave between them. Returns whether the update
    /// was applied; listeners are notified only when it was.
    fn update_state_if_current(
        &self,
        epoch: u64,
        mutate: impl FnOnce(&mut ConnectionState),
    ) -> bool {
        let snapshot = {
            let mut state = lock(&self.state);
            if !self.is_current(epoch) {
                return false;
            }
            mutate(&mut state);
            state.clone()
        };
        self.notify_state(&snapshot);
        true
    }

    /// Invoke every state listener with `snapshot`, isolating panics.
    fn notify_state(&self, snapshot: &ConnectionState) {
        let handlers: Vec<StateHandler> = lock(&self.state_handlers).clone();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(snapshot))).is_err() {
                error!("connection state listener panicked");
            }
        }
    }

    /// React to the transport closing with `code`/`reason`. Ignored when
    /// `epoch` is no longer the live session generation.
    fn handle_close(self: &Arc<Self>, epoch: u64, code: u16, reason: &str) {
        let snapshot = {
            let mut state = lock(&self.state);
            if !self.is_current(epoch) {
                return;
            }
            lock(&self.outbound).take();
            state.is_connected = false;
            state.is_connecting = false;
            state.error = Some(close_error_message(code, reason));
            state.clone()
        };
        info!(code, reason, "disconnected from battle server");
        self.notify_state(&snapshot);
        if code != CLOSE_NORMAL {
            self.schedule_reconnect(epoch);
        }
    }

    /// Schedule a single deferred reconnection attempt, or surface the
    /// terminal exhaustion error once the ceiling is reached. The timer
    /// carries `epoch` so that a `disconnect` landing while it sleeps
    /// cancels the attempt even if the abort comes too late.
    fn schedule_reconnect(self: &Arc<Self>, epoch: u64) {
        let attempts = self.reconnect_attempts.load(Ordering::Acquire);
        if attempts >= MAX_RECONNECT_ATTEMPTS {
            error!("max reconnection attempts reached");
            self.update_state_if_current(epoch, |s| {
                s.error = Some(EXHAUSTED_ERROR.to_string());
            });
            return;
        }

        let attempt = attempts + 1;
        self.reconnect_attempts.store(attempt, Ordering::Release);
        let delay = RECONNECT_BASE_DELAY * attempt;
        info!(
            attempt,
            max = MAX_RECONNECT_ATTEMPTS,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnection"
        );

        let inner = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            lock(&inner.reconnect_timer).take();
            Inner::connect(inner, Some(epoch)).await;
        });
        // At most one scheduled attempt exists at a time.
        if let Some(previous) = lock(&self.reconnect_timer).replace(timer) {
            previous.abort();
        }
    }

    /// Parse an inbound frame, classify it, and fan it out to subscribers.
    ///
    /// Malformed frames and frames without a `type` are dropped with a
    /// warning; unrecognized types are dropped silently. Handler panics are
    /// caught per handler and never suppress delivery to siblings.
    fn dispatch_frame(&self, text: &str) {
        let message: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!("failed to parse inbound frame: {e}");
                return;
            }
        };
        let wire_type = message
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty());
        let Some(wire_type) = wire_type else {
            warn!("received message without type, dropping");
            return;
        };

        match classify(wire_type) {
            Classification::Battle(category) => {
                let handlers: Vec<EventHandler> = lock(&self.event_handlers)
                    .get(&category)
                    .cloned()
                    .unwrap_or_default();
                for handler in handlers {
                    if catch_unwind(AssertUnwindSafe(|| handler(&message))).is_err() {
                        error!(category = %category, "event handler panicked");
                    }
                }
            }
            Classification::Handshake => {
                debug!("handshake frame received (not deliverable)");
            }
            Classification::Unknown => {
                debug!(wire_type, "unhandled message type");
            }
        }
    }
}

/// Drive one transport session: open, handshake, pump frames, close.
async fn run_session(
    inner: Arc<Inner>,
    epoch: u64,
    url: String,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    debug!(url = %url, "session task started");

    let mut transport: Box<dyn Transport> = match inner.connector.connect(&url).await {
        Ok(transport) => transport,
        Err(e) => {
            warn!("failed to open transport: {e}");
            // An attempt that never opened behaves like an abnormal closure:
            // same error surface, same retry policy.
            inner.handle_close(epoch, CLOSE_ABNORMAL, "");
            return;
        }
    };

    let still_current = inner.update_state_if_current(epoch, |s| {
        s.is_connected = true;
        s.is_connecting = false;
        s.error = None;
    });
    if !still_current {
        // Superseded while opening; shut the socket without touching state.
        let _ = transport.close().await;
        return;
    }
    inner.reconnect_attempts.store(0, Ordering::Release);
    info!(url = %url, "connected to battle server");

    // Identify ourselves before anything else.
    let handshake = ObserverHandshake::new(OBSERVER_NAME, OBSERVER_VERSION);
    match serde_json::to_string(&handshake) {
        Ok(json) => {
            if let Err(e) = transport.send(json).await {
                warn!("failed to send observer handshake: {e}");
            }
        }
        Err(e) => error!("failed to serialize observer handshake: {e}"),
    }

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(json) => {
                        if let Err(e) = transport.send(json).await {
                            warn!("transport send error: {e}");
                        }
                    }
                    // Sender dropped — disconnect() was called or this
                    // session was replaced. Close normally; state was
                    // already updated by the caller.
                    None => {
                        let _ = transport.close().await;
                        debug!("session task closed on request");
                        return;
                    }
                }
            }
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(Incoming::Text(text))) => inner.dispatch_frame(&text),
                    Some(Ok(Incoming::Closed { code, reason })) => {
                        inner.handle_close(epoch, code, &reason);
                        return;
                    }
                    Some(Err(e)) => {
                        // Error notifications set the error surface but do
                        // not drive the state machine; the closure that
                        // follows does.
                        warn!("transport receive error: {e}");
                        inner.update_state_if_current(epoch, |s| {
                            s.is_connected = false;
                            s.is_connecting = false;
                            s.error = Some(format!("transport error: {e}"));
                        });
                    }
                    None => {
                        // Stream ended without a close frame.
                        inner.handle_close(epoch, CLOSE_ABNORMAL, "");
                        return;
                    }
                }
            }
        }
    }
}

/// Map an HTTP-family address onto its WebSocket equivalent and validate
/// the scheme (`http://` → `ws://`, `https://` → `wss://`).
fn normalize_server_url(url: &str) -> Result<String> {
    let normalized = match url.strip_prefix("http") {
        Some(rest) => format!("ws{rest}"),
        None => url.to_string(),
    };
    if normalized.starts_with("ws://") || normalized.starts_with("wss://") {
        Ok(normalized)
    } else {
        Err(ObserverError::InvalidServerUrl(url.to_string()))
    }
}

/// Derive the human-readable error text for a closure.
fn close_error_message(code: u16, reason: &str) -> String {
    if code == CLOSE_ABNORMAL {
        "connection failed - server may be offline or unreachable".to_string()
    } else if code == CLOSE_NORMAL {
        "connection closed normally".to_string()
    } else if !reason.is_empty() {
        reason.to_string()
    } else {
        "connection closed".to_string()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    /// Connector that records calls and always refuses to open a transport.
    struct RefusingConnector {
        calls: AtomicUsize,
    }

    impl RefusingConnector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ObserverError::TransportClosed)
        }
    }

    fn test_client() -> ObserverClient {
        ObserverClient::with_connector("ws://localhost:7655", RefusingConnector::new())
    }

    fn noop_handler() -> EventHandler {
        Arc::new(|_msg: &Value| {})
    }

    fn handler_count(client: &ObserverClient, category: EventCategory) -> usize {
        lock(&client.inner.event_handlers)
            .get(&category)
            .map_or(0, Vec::len)
    }

    // ── URL normalization ───────────────────────────────────────────

    #[test]
    fn http_scheme_normalizes_to_ws() {
        assert_eq!(normalize_server_url("http://x:1").unwrap(), "ws://x:1");
    }

    #[test]
    fn https_scheme_normalizes_to_wss() {
        assert_eq!(
            normalize_server_url("https://arena.example/ws").unwrap(),
            "wss://arena.example/ws"
        );
    }

    #[test]
    fn ws_schemes_pass_through() {
        assert_eq!(
            normalize_server_url("ws://localhost:7655").unwrap(),
            "ws://localhost:7655"
        );
        assert_eq!(normalize_server_url("wss://a").unwrap(), "wss://a");
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let err = normalize_server_url("ftp://x").unwrap_err();
        assert!(matches!(err, ObserverError::InvalidServerUrl(_)));
    }

    // ── Closure-code classification ─────────────────────────────────

    #[test]
    fn close_error_messages_by_code() {
        assert_eq!(
            close_error_message(1006, ""),
            "connection failed - server may be offline or unreachable"
        );
        assert_eq!(close_error_message(1000, ""), "connection closed normally");
        assert_eq!(
            close_error_message(1011, "server shutting down"),
            "server shutting down"
        );
        assert_eq!(close_error_message(1011, ""), "connection closed");
    }

    #[test]
    fn abnormal_code_wins_over_reason_text() {
        // Mirrors the closure-code precedence: 1006 always maps to the
        // unreachable-server message.
        assert_eq!(
            close_error_message(1006, "whatever"),
            "connection failed - server may be offline or unreachable"
        );
    }

    // ── Subscriber registry ─────────────────────────────────────────

    #[test]
    fn duplicate_registration_is_idempotent() {
        let client = test_client();
        let handler = noop_handler();

        client.on(EventCategory::Tick, Arc::clone(&handler));
        client.on(EventCategory::Tick, Arc::clone(&handler));

        assert_eq!(handler_count(&client, EventCategory::Tick), 1);
    }

    #[test]
    fn off_removes_only_the_given_handle() {
        let client = test_client();
        let first = noop_handler();
        let second = noop_handler();

        client.on(EventCategory::BotDeath, Arc::clone(&first));
        client.on(EventCategory::BotDeath, Arc::clone(&second));
        client.off(EventCategory::BotDeath, &first);

        assert_eq!(handler_count(&client, EventCategory::BotDeath), 1);
    }

    #[test]
    fn off_of_absent_handler_is_noop() {
        let client = test_client();
        let handler = noop_handler();

        client.off(EventCategory::GameEnded, &handler);
        client.on(EventCategory::GameEnded, Arc::clone(&handler));
        client.off(EventCategory::GameEnded, &handler);
        client.off(EventCategory::GameEnded, &handler);

        assert_eq!(handler_count(&client, EventCategory::GameEnded), 0);
    }

    #[test]
    fn registries_are_independent_per_category() {
        let client = test_client();
        let handler = noop_handler();

        client.on(EventCategory::Tick, Arc::clone(&handler));
        client.on(EventCategory::BulletFired, Arc::clone(&handler));
        client.off(EventCategory::Tick, &handler);

        assert_eq!(handler_count(&client, EventCategory::Tick), 0);
        assert_eq!(handler_count(&client, EventCategory::BulletFired), 1);
    }

    // ── State listeners ─────────────────────────────────────────────

    #[test]
    fn state_listener_gets_immediate_replay_exactly_once() {
        let client = test_client();
        let seen: Arc<StdMutex<Vec<ConnectionState>>> = Arc::new(StdMutex::new(Vec::new()));

        let listener: StateHandler = {
            let seen = Arc::clone(&seen);
            Arc::new(move |state: &ConnectionState| {
                seen.lock().unwrap().push(state.clone());
            })
        };
        client.on_connection_state_change(Arc::clone(&listener));

        let snapshots = seen.lock().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0], ConnectionState::default());
    }

    #[test]
    fn removed_state_listener_is_not_notified() {
        let client = test_client();
        let count = Arc::new(AtomicUsize::new(0));

        let listener: StateHandler = {
            let count = Arc::clone(&count);
            Arc::new(move |_state: &ConnectionState| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        client.on_connection_state_change(Arc::clone(&listener));
        assert_eq!(count.load(Ordering::SeqCst), 1); // immediate replay

        client.off_connection_state_change(&listener);
        client.inner.update_state(|s| s.error = Some("x".into()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_state_listener_does_not_block_siblings() {
        let client = test_client();
        let count = Arc::new(AtomicUsize::new(0));

        let bad: StateHandler = Arc::new(|_state: &ConnectionState| panic!("listener bug"));
        let good: StateHandler = {
            let count = Arc::clone(&count);
            Arc::new(move |_state: &ConnectionState| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        client.on_connection_state_change(bad);
        client.on_connection_state_change(Arc::clone(&good));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        client.inner.update_state(|s| s.error = Some("boom".into()));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    // ── connect() preconditions ─────────────────────────────────────

    #[tokio::test]
    async fn invalid_scheme_fails_synchronously_without_transport() {
        let connector = RefusingConnector::new();
        let client = ObserverClient::with_connector("ftp://x", Arc::clone(&connector) as Arc<dyn Connector>);

        client.connect().await;

        let state = client.connection_state();
        assert!(!state.is_connected);
        assert!(!state.is_connecting);
        assert!(state.error.unwrap().contains("invalid server address"));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connect_is_noop_while_connecting() {
        /// Connector that records calls and then hangs forever.
        struct HangingConnector {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl Connector for HangingConnector {
            async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                std::future::pending().await
            }
        }

        let connector = Arc::new(HangingConnector {
            calls: AtomicUsize::new(0),
        });
        let client = ObserverClient::with_connector("ws://x", Arc::clone(&connector) as Arc<dyn Connector>);

        client.connect().await;
        tokio::task::yield_now().await;
        client.connect().await;
        tokio::task::yield_now().await;

        assert!(client.connection_state().is_connecting);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    // ── Dispatch ────────────────────────────────────────────────────

    fn recording_handler() -> (EventHandler, Arc<StdMutex<Vec<Value>>>) {
        let received: Arc<StdMutex<Vec<Value>>> = Arc::new(StdMutex::new(Vec::new()));
        let handler: EventHandler = {
            let received = Arc::clone(&received);
            Arc::new(move |msg: &Value| {
                received.lock().unwrap().push(msg.clone());
            })
        };
        (handler, received)
    }

    #[test]
    fn bot_death_frame_reaches_only_bot_death_handlers() {
        let client = test_client();
        let (death_handler, deaths) = recording_handler();
        let (tick_handler, ticks) = recording_handler();

        client.on(EventCategory::BotDeath, death_handler);
        client.on(EventCategory::Tick, tick_handler);

        client
            .inner
            .dispatch_frame(r#"{"type":"BotDeathEvent","victimId":7}"#);

        let deaths = deaths.lock().unwrap();
        assert_eq!(deaths.len(), 1);
        assert_eq!(deaths[0], json!({"type": "BotDeathEvent", "victimId": 7}));
        assert!(ticks.lock().unwrap().is_empty());
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        let client = test_client();
        let order: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            client.on(
                EventCategory::Tick,
                Arc::new(move |_msg: &Value| order.lock().unwrap().push(label)),
            );
        }

        client.inner.dispatch_frame(
            r#"{"type":"TickEventForObserver","roundNumber":1,"botStates":[],"bulletStates":[],"events":[]}"#,
        );

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unrecognized_type_reaches_no_handler_and_sets_no_error() {
        let client = test_client();
        let (handler, received) = recording_handler();
        for category in EventCategory::ALL {
            client.on(category, Arc::clone(&handler));
        }

        client
            .inner
            .dispatch_frame(r#"{"type":"BotListUpdate","bots":[]}"#);

        assert!(received.lock().unwrap().is_empty());
        assert!(client.connection_state().error.is_none());
    }

    #[test]
    fn frame_without_type_is_dropped() {
        let client = test_client();
        let (handler, received) = recording_handler();
        for category in EventCategory::ALL {
            client.on(category, Arc::clone(&handler));
        }

        client.inner.dispatch_frame(r#"{"victimId":7}"#);
        client.inner.dispatch_frame(r#"{"type":"","victimId":7}"#);
        client.inner.dispatch_frame(r#"{"type":42,"victimId":7}"#);

        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn malformed_frame_is_dropped_without_error_state() {
        let client = test_client();
        client.inner.dispatch_frame("{not json");
        assert!(client.connection_state().error.is_none());
    }

    #[test]
    fn handshake_frame_is_recognized_but_not_delivered() {
        let client = test_client();
        let (handler, received) = recording_handler();
        for category in EventCategory::ALL {
            client.on(category, Arc::clone(&handler));
        }

        client.inner.dispatch_frame(
            r#"{"type":"ObserverHandshake","name":"x","sessionId":"observer-1-abc","version":"1.0"}"#,
        );

        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_handler_does_not_suppress_siblings() {
        let client = test_client();
        let (recorder, received) = recording_handler();
        let panicking: EventHandler = Arc::new(|_msg: &Value| panic!("handler bug"));

        client.on(EventCategory::BotDeath, panicking);
        client.on(EventCategory::BotDeath, recorder);

        client
            .inner
            .dispatch_frame(r#"{"type":"BotDeathEvent","victimId":1}"#);
        client
            .inner
            .dispatch_frame(r#"{"type":"BotDeathEvent","victimId":2}"#);

        // The recorder ran for both frames despite the panicking sibling.
        assert_eq!(received.lock().unwrap().len(), 2);
    }

    // ── send() ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn send_while_disconnected_is_silent_noop() {
        let client = test_client();
        let before = client.connection_state();

        client.send(&json!({"hello": "arena"}));

        assert_eq!(client.connection_state(), before);
    }

    // ── Session supersession ────────────────────────────────────────

    #[test]
    fn stale_epoch_state_update_is_ignored() {
        let client = test_client();
        let inner = &client.inner;
        let epoch = {
            let _state = lock(&inner.state);
            inner.epoch.fetch_add(1, Ordering::AcqRel) + 1
        };
        assert!(inner.update_state_if_current(epoch, |s| s.is_connecting = true));

        // A disconnect supersedes the session generation…
        client.disconnect();

        let notifications = Arc::new(AtomicUsize::new(0));
        let listener: StateHandler = {
            let notifications = Arc::clone(&notifications);
            Arc::new(move |_state: &ConnectionState| {
                notifications.fetch_add(1, Ordering::SeqCst);
            })
        };
        client.on_connection_state_change(listener);
        assert_eq!(notifications.load(Ordering::SeqCst), 1); // immediate replay

        // …so the old session's write neither lands nor notifies anyone.
        assert!(!inner.update_state_if_current(epoch, |s| s.is_connected = true));
        assert!(!client.is_connected());
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn superseded_reconnect_timer_does_not_redial() {
        let connector = RefusingConnector::new();
        let client = ObserverClient::with_connector("ws://x", Arc::clone(&connector) as Arc<dyn Connector>);

        let scheduled = client.inner.epoch.load(Ordering::Acquire);
        client.disconnect();
        // What the timer body runs after waking with a superseded epoch.
        Inner::connect(Arc::clone(&client.inner), Some(scheduled)).await;
        tokio::task::yield_now().await;

        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
        assert!(!client.connection_state().is_connecting);
    }

    // ── State invariant ─────────────────────────────────────────────

    #[tokio::test]
    async fn connected_and_connecting_never_both_true() {
        let client = test_client();
        let violations = Arc::new(AtomicUsize::new(0));

        let listener: StateHandler = {
            let violations = Arc::clone(&violations);
            Arc::new(move |state: &ConnectionState| {
                if state.is_connected && state.is_connecting {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        client.on_connection_state_change(listener);

        // Walk the snapshot through every transition the machine performs.
        client.inner.update_state(|s| {
            s.is_connecting = true;
            s.is_connected = false;
        });
        client.inner.update_state(|s| {
            s.is_connected = true;
            s.is_connecting = false;
        });
        client.inner.handle_close(
            client.inner.epoch.load(Ordering::Acquire),
            1006,
            "",
        );
        client.disconnect();

        assert_eq!(violations.load(Ordering::SeqCst), 0);
    }
}
