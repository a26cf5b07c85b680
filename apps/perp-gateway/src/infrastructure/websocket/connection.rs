//! Connection Manager
//!
//! Owns the lifecycle of one venue socket: dial, read loop, serialized
//! writes, ping/pong, health monitoring, and the state machine in
//! [`super::state`].
//!
//! # Sessions
//!
//! Each successful dial starts a new session with its own cancellation
//! token (a child of the manager's shutdown token) and generation number.
//! The read loop and health monitor belong to one session. A connection
//! error only tears the socket down if it comes from the current
//! generation, so a late error from an old read loop can never close a
//! newer socket.
//!
//! # Callbacks
//!
//! - `on_connect` after every successful dial
//! - `on_message` for every text frame; an `Err` or a panic is logged and
//!   forwarded to `on_error`, the loop keeps reading
//! - `on_disconnect` then `on_error` when the socket is lost
//!
//! [`ConnectionManager::disconnect`] is terminal and never calls
//! `on_disconnect`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use reqwest::Url;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_util::sync::CancellationToken;

use super::auth::AuthManager;
use super::config::ConnectionConfig;
use super::error::ConnectionError;
use super::health::{ActivityTracker, HealthConfig, HealthEvent, HealthMonitor};
use super::state::{ConnectionEvent, ConnectionState};
use super::transport::{DialRequest, Dialer, FrameSink, FrameStream};
use crate::error::GatewayError;
use crate::infrastructure::metrics::{self, MetricsSnapshot, ServiceMetrics};
use crate::infrastructure::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState,
};

/// Called after a successful dial.
pub type OnConnect = Arc<dyn Fn() + Send + Sync>;
/// Called when the socket is lost.
pub type OnDisconnect = Arc<dyn Fn() + Send + Sync>;
/// Called for every inbound text frame.
pub type OnMessage = Arc<dyn Fn(&str) -> Result<(), GatewayError> + Send + Sync>;
/// Called for handler failures and connection losses.
pub type OnError = Arc<dyn Fn(GatewayError) + Send + Sync>;

/// Callback set for a [`ConnectionManager`].
#[derive(Clone, Default)]
pub struct ConnectionCallbacks {
    on_connect: Option<OnConnect>,
    on_disconnect: Option<OnDisconnect>,
    on_message: Option<OnMessage>,
    on_error: Option<OnError>,
}

impl ConnectionCallbacks {
    /// Empty callback set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect callback.
    #[must_use]
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Set the disconnect callback.
    #[must_use]
    pub fn on_disconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Set the message callback.
    #[must_use]
    pub fn on_message(
        mut self,
        f: impl Fn(&str) -> Result<(), GatewayError> + Send + Sync + 'static,
    ) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Set the error callback.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(GatewayError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for ConnectionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCallbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Point-in-time view of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Venue label.
    pub venue: &'static str,
    /// Current state.
    pub state: ConnectionState,
    /// Configured endpoint.
    pub url: String,
    /// Time of the last successful dial, while connected.
    pub connected_since: Option<DateTime<Utc>>,
    /// Time since the last inbound activity.
    pub idle: Duration,
    /// Message counters.
    pub metrics: MetricsSnapshot,
    /// Dial circuit breaker state.
    pub breaker: CircuitBreakerState,
}

/// Socket lifecycle manager for one venue endpoint.
pub struct ConnectionManager {
    config: ConnectionConfig,
    venue: &'static str,
    dialer: Arc<dyn Dialer>,
    auth: Option<Arc<AuthManager>>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<ServiceMetrics>,
    state: RwLock<ConnectionState>,
    writer: tokio::sync::Mutex<Option<FrameSink>>,
    activity: Arc<ActivityTracker>,
    callbacks: RwLock<ConnectionCallbacks>,
    shutdown: CancellationToken,
    session: Mutex<Option<CancellationToken>>,
    generation: AtomicU64,
    connected_at: Mutex<Option<DateTime<Utc>>>,
}

impl ConnectionManager {
    /// Create a manager in `Disconnected`.
    #[must_use]
    pub fn new(config: ConnectionConfig, venue: &'static str, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            breaker: Arc::new(CircuitBreaker::new(
                format!("{venue}-ws"),
                CircuitBreakerConfig::default(),
            )),
            metrics: Arc::new(ServiceMetrics::new(venue)),
            config,
            venue,
            dialer,
            auth: None,
            state: RwLock::new(ConnectionState::Disconnected),
            writer: tokio::sync::Mutex::new(None),
            activity: Arc::new(ActivityTracker::new()),
            callbacks: RwLock::new(ConnectionCallbacks::default()),
            shutdown: CancellationToken::new(),
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
            connected_at: Mutex::new(None),
        }
    }

    /// Inject auth headers into every dial.
    #[must_use]
    pub fn with_auth(mut self, auth: Arc<AuthManager>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Share a circuit breaker.
    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    /// Share message counters.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace the callback set.
    pub fn set_callbacks(&self, callbacks: ConnectionCallbacks) {
        *self.callbacks.write() = callbacks;
    }

    /// Venue label.
    #[must_use]
    pub const fn venue(&self) -> &'static str {
        self.venue
    }

    /// Settings.
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Message counters.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    /// Dial circuit breaker.
    #[must_use]
    pub const fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Connected and heard from within `read_timeout`.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state() == ConnectionState::Connected && self.activity.idle() < self.config.read_timeout
    }

    /// Snapshot of state and counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        let state = self.state();
        ConnectionStats {
            venue: self.venue,
            state,
            url: self.config.url.clone(),
            connected_since: if state == ConnectionState::Connected {
                *self.connected_at.lock()
            } else {
                None
            },
            idle: self.activity.idle(),
            metrics: self.metrics.snapshot(),
            breaker: self.breaker.state(),
        }
    }

    // =========================================================================
    // Connect / Disconnect
    // =========================================================================

    /// Dial the configured endpoint and start the session tasks.
    ///
    /// # Errors
    ///
    /// - `Stopped` after [`Self::disconnect`]
    /// - `AlreadyConnected` while connected or connecting
    /// - `CircuitOpen` when the dial breaker is open
    /// - `InvalidUrl` / `InsecureScheme` for a bad endpoint (state unchanged)
    /// - `AuthHeader`, `Timeout`, or `Dial` when the dial fails
    pub async fn connect(self: &Arc<Self>) -> Result<(), ConnectionError> {
        ensure_can_connect(self.state())?;

        if !self.breaker.is_call_permitted() {
            return Err(ConnectionError::CircuitOpen(self.breaker.name().to_string()));
        }

        let url = Url::parse(&self.config.url)
            .map_err(|e| ConnectionError::InvalidUrl(format!("{}: {e}", self.config.url)))?;
        if url.scheme() != "wss" {
            return Err(ConnectionError::InsecureScheme(url.scheme().to_string()));
        }

        {
            let mut state = self.state.write();
            ensure_can_connect(*state)?;
            *state = state.on(ConnectionEvent::Connect);
        }

        tracing::info!(venue = self.venue, url = %url, "Connecting");

        let headers = match &self.auth {
            Some(auth) => match auth.headers().await {
                Ok(headers) => headers,
                Err(e) => {
                    self.transition(ConnectionEvent::DialFailed);
                    return Err(ConnectionError::AuthHeader(e));
                }
            },
            None => Vec::new(),
        };

        let request = DialRequest {
            url,
            headers,
            handshake_timeout: self.config.handshake_timeout,
            read_buffer_size: self.config.read_buffer_size,
            write_buffer_size: self.config.write_buffer_size,
            max_message_size: self.config.max_message_size,
        };

        let dialed = tokio::select! {
            () = self.shutdown.cancelled() => Err(ConnectionError::Stopped),
            result = tokio::time::timeout(self.config.connect_timeout, self.dialer.dial(request)) => {
                result.unwrap_or(Err(ConnectionError::Timeout("connect")))
            }
        };

        let (sink, stream) = match dialed {
            Ok(pair) => pair,
            Err(e) => {
                self.transition(ConnectionEvent::DialFailed);
                if e != ConnectionError::Stopped {
                    self.breaker.record_failure();
                    tracing::error!(venue = self.venue, error = %e, "Dial failed");
                }
                return Err(e);
            }
        };

        *self.writer.lock().await = Some(sink);

        let session = {
            let mut state = self.state.write();
            if *state == ConnectionState::Stopped {
                None
            } else {
                *state = state.on(ConnectionEvent::DialSucceeded);
                let session = self.shutdown.child_token();
                *self.session.lock() = Some(session.clone());
                Some(session)
            }
        };

        let Some(session) = session else {
            self.close_writer().await;
            return Err(ConnectionError::Stopped);
        };

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.connected_at.lock() = Some(Utc::now());
        self.activity.touch();
        self.breaker.record_success();
        metrics::set_websocket_connected(self.venue, true);

        tokio::spawn(Arc::clone(self).read_loop(stream, generation, session.clone()));
        if self.config.enable_health_monitor {
            self.spawn_health_monitor(session);
        }

        tracing::info!(venue = self.venue, generation, "Connected");

        let on_connect = self.callbacks.read().on_connect.clone();
        if let Some(on_connect) = on_connect {
            on_connect();
        }
        Ok(())
    }

    fn transition(&self, event: ConnectionEvent) -> ConnectionState {
        let mut state = self.state.write();
        let previous = *state;
        *state = previous.on(event);
        previous
    }

    /// Stop the manager. Terminal and idempotent.
    ///
    /// Does not call `on_disconnect`.
    pub async fn disconnect(&self) {
        let previous = self.transition(ConnectionEvent::UserDisconnect);
        if previous == ConnectionState::Stopped {
            return;
        }

        self.shutdown.cancel();
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.cancel();
        }
        self.close_writer().await;
        metrics::set_websocket_connected(self.venue, false);
        tracing::info!(venue = self.venue, from = %previous, "Disconnected by user");
    }

    async fn close_writer(&self) {
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = tokio::time::timeout(self.config.write_timeout, sink.close()).await;
        }
    }

    async fn handle_connection_error(&self, generation: u64, err: ConnectionError) {
        {
            let mut state = self.state.write();
            if self.generation.load(Ordering::Acquire) != generation
                || *state != ConnectionState::Connected
            {
                return;
            }
            *state = state.on(ConnectionEvent::ConnectionLost);
        }

        let session = self.session.lock().take();
        if let Some(session) = session {
            session.cancel();
        }
        self.close_writer().await;
        self.metrics.inc_errors();
        metrics::set_websocket_connected(self.venue, false);
        tracing::warn!(venue = self.venue, error = %err, "Connection lost");

        let (on_disconnect, on_error) = {
            let callbacks = self.callbacks.read();
            (callbacks.on_disconnect.clone(), callbacks.on_error.clone())
        };
        if let Some(on_disconnect) = on_disconnect {
            on_disconnect();
        }
        if let Some(on_error) = on_error {
            on_error(GatewayError::Transport(format!("connection lost: {err}")));
        }
    }

    // =========================================================================
    // Read Loop
    // =========================================================================

    async fn read_loop(
        self: Arc<Self>,
        mut stream: FrameStream,
        generation: u64,
        session: CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                () = session.cancelled() => return,
                next = tokio::time::timeout(self.config.read_deadline, stream.next()) => next,
            };

            let message = match next {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(e))) => {
                    tracing::error!(venue = self.venue, error = %e, "WebSocket read error");
                    self.handle_connection_error(generation, ConnectionError::Read(e.to_string()))
                        .await;
                    return;
                }
                Ok(None) => {
                    tracing::info!(venue = self.venue, "WebSocket stream ended");
                    self.handle_connection_error(
                        generation,
                        ConnectionError::Closed {
                            code: None,
                            reason: "stream ended".to_string(),
                        },
                    )
                    .await;
                    return;
                }
                Err(_) => {
                    tracing::error!(
                        venue = self.venue,
                        deadline_ms = self.config.read_deadline.as_millis(),
                        "Read deadline exceeded"
                    );
                    self.handle_connection_error(generation, ConnectionError::Timeout("read"))
                        .await;
                    return;
                }
            };

            match message {
                Message::Text(text) => self.dispatch(text.as_str()),
                Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.dispatch(text),
                    Err(_) => {
                        self.activity.touch();
                        tracing::warn!(venue = self.venue, len = bytes.len(), "Dropping non-UTF-8 binary frame");
                    }
                },
                Message::Ping(payload) => {
                    self.activity.touch();
                    if self
                        .write_frame(Message::Pong(payload), self.config.pong_timeout)
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Message::Pong(_) => self.activity.touch(),
                Message::Close(frame) => {
                    let (code, reason) = frame.map_or((None, String::new()), |f| {
                        (Some(u16::from(f.code)), f.reason.to_string())
                    });
                    tracing::info!(venue = self.venue, ?code, %reason, "Server closed connection");
                    self.handle_connection_error(generation, ConnectionError::Closed { code, reason })
                        .await;
                    return;
                }
                Message::Frame(_) => {}
            }
        }
    }

    fn dispatch(&self, text: &str) {
        self.activity.touch();
        self.metrics.inc_received();

        let (on_message, on_error) = {
            let callbacks = self.callbacks.read();
            (callbacks.on_message.clone(), callbacks.on_error.clone())
        };
        let Some(on_message) = on_message else {
            return;
        };
        let result = match std::panic::catch_unwind(AssertUnwindSafe(|| on_message(text))) {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(venue = self.venue, %reason, "Message handler panicked");
                Err(GatewayError::Protocol(format!("message handler panicked: {reason}")))
            }
        };
        if let Err(e) = result {
            tracing::warn!(venue = self.venue, error = %e, "Message handler failed");
            if let Some(on_error) = on_error {
                on_error(e);
            }
        }
    }

    fn spawn_health_monitor(self: &Arc<Self>, session: CancellationToken) {
        let (tx, mut rx) = mpsc::channel(4);
        let monitor = HealthMonitor::new(
            HealthConfig {
                interval: self.config.health_check_interval,
                stale_after: self.config.health_check_timeout,
                send_pings: self.config.enable_health_pings,
            },
            Arc::clone(&self.activity),
            tx,
            session,
        );
        tokio::spawn(monitor.run());

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    HealthEvent::Stale { idle } => {
                        tracing::warn!(
                            venue = manager.venue,
                            idle_secs = idle.as_secs(),
                            "Connection appears stale"
                        );
                    }
                    HealthEvent::SendPing => {
                        if let Err(e) = manager.send_ping().await {
                            tracing::debug!(venue = manager.venue, error = %e, "Health ping failed");
                        }
                    }
                }
            }
        });
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Send one frame.
    ///
    /// # Errors
    ///
    /// `NotConnected` unless connected; `WriteDeadline` or `Write` if the
    /// write fails, which also ends the socket.
    pub async fn send(&self, message: Message) -> Result<(), ConnectionError> {
        if self.state() != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected);
        }
        self.write_frame(message, self.config.write_timeout).await
    }

    /// Send a text frame.
    ///
    /// # Errors
    ///
    /// See [`Self::send`].
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        self.send(Message::text(text.into())).await
    }

    /// Serialize `value` and send it as a text frame.
    ///
    /// # Errors
    ///
    /// `Serialize` if encoding fails, otherwise see [`Self::send`].
    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), ConnectionError> {
        let text =
            serde_json::to_string(value).map_err(|e| ConnectionError::Serialize(e.to_string()))?;
        self.send_text(text).await
    }

    /// Send the configured application ping, or a control ping.
    ///
    /// # Errors
    ///
    /// See [`Self::send`].
    pub async fn send_ping(&self) -> Result<(), ConnectionError> {
        match &self.config.ping_payload {
            Some(payload) => self.send_text(payload.clone()).await,
            None => self.send(Message::Ping(Bytes::new())).await,
        }
    }

    async fn write_frame(&self, message: Message, deadline: Duration) -> Result<(), ConnectionError> {
        let generation = self.generation.load(Ordering::Acquire);
        let result = {
            let mut writer = self.writer.lock().await;
            let Some(sink) = writer.as_mut() else {
                return Err(ConnectionError::NotConnected);
            };
            match tokio::time::timeout(deadline, sink.send(message)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ConnectionError::Write(e.to_string())),
                Err(_) => Err(ConnectionError::WriteDeadline),
            }
        };

        if let Err(e) = &result {
            tracing::error!(venue = self.venue, error = %e, "WebSocket write failed");
            self.handle_connection_error(generation, e.clone()).await;
        }
        result
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

const fn ensure_can_connect(state: ConnectionState) -> Result<(), ConnectionError> {
    match state {
        ConnectionState::Stopped => Err(ConnectionError::Stopped),
        ConnectionState::Connected | ConnectionState::Connecting => {
            Err(ConnectionError::AlreadyConnected)
        }
        ConnectionState::Disconnected | ConnectionState::Failed => Ok(()),
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("venue", &self.venue)
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct RefusingDialer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Dialer for RefusingDialer {
        async fn dial(
            &self,
            _request: DialRequest,
        ) -> Result<(FrameSink, FrameStream), ConnectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ConnectionError::Dial("connection refused".into()))
        }
    }

    fn manager(url: &str) -> (Arc<ConnectionManager>, Arc<RefusingDialer>) {
        let dialer = Arc::new(RefusingDialer {
            calls: AtomicUsize::new(0),
        });
        let manager = ConnectionManager::new(
            ConnectionConfig::new(url).without_health_monitor(),
            "test",
            dialer.clone(),
        );
        (Arc::new(manager), dialer)
    }

    #[tokio::test]
    async fn plaintext_url_is_rejected_without_dialing() {
        let (manager, dialer) = manager("ws://x/ws");
        let err = manager.connect().await.unwrap_err();
        assert_eq!(err, ConnectionError::InsecureScheme("ws".into()));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(dialer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.breaker().failures(), 0);
    }

    #[tokio::test]
    async fn malformed_url_is_rejected() {
        let (manager, _) = manager("not a url");
        assert!(matches!(
            manager.connect().await,
            Err(ConnectionError::InvalidUrl(_))
        ));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn dial_failure_moves_to_failed() {
        let (manager, dialer) = manager("wss://mock/ws");
        assert!(matches!(
            manager.connect().await,
            Err(ConnectionError::Dial(_))
        ));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(dialer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.breaker().failures(), 1);
    }

    #[tokio::test]
    async fn breaker_opens_after_repeated_dial_failures() {
        let (manager, dialer) = manager("wss://mock/ws");
        for _ in 0..5 {
            let _ = manager.connect().await;
        }
        assert_eq!(manager.breaker().state(), CircuitBreakerState::Open);
        assert!(matches!(
            manager.connect().await,
            Err(ConnectionError::CircuitOpen(_))
        ));
        assert_eq!(dialer.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let (manager, _) = manager("wss://mock/ws");
        assert_eq!(
            manager.send_text("hello").await,
            Err(ConnectionError::NotConnected)
        );
        assert_eq!(
            manager.send_json(&serde_json::json!({"op": "ping"})).await,
            Err(ConnectionError::NotConnected)
        );
    }

    #[tokio::test]
    async fn disconnect_is_terminal_and_idempotent() {
        let (manager, dialer) = manager("wss://mock/ws");
        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = disconnects.clone();
        manager.set_callbacks(ConnectionCallbacks::new().on_disconnect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Stopped);
        assert_eq!(manager.connect().await, Err(ConnectionError::Stopped));
        assert_eq!(dialer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(disconnects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stats_reflect_configuration() {
        let (manager, _) = manager("wss://mock/ws");
        let stats = manager.stats();
        assert_eq!(stats.venue, "test");
        assert_eq!(stats.state, ConnectionState::Disconnected);
        assert_eq!(stats.url, "wss://mock/ws");
        assert!(stats.connected_since.is_none());
        assert_eq!(stats.breaker, CircuitBreakerState::Closed);
        assert!(!manager.is_healthy());
    }
}
