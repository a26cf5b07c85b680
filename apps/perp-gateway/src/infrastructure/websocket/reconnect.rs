//! Reconnection Manager
//!
//! Exponential backoff with jitter, and a monitor task that watches the
//! connection state and runs a bounded attempt sequence whenever a live
//! socket is lost.
//!
//! # Attempt Sequence
//!
//! ```text
//! Connected ──lost──▶ Disconnected/Failed
//!                          │
//!            n = 1..=max_attempts (or forever when max_attempts is 0)
//!                          │
//!         sleep(next_delay(n)) ─▶ on_start(n) ─▶ connect()
//!                          │                      │
//!                          │              ok ─▶ on_success(n), done
//!                          │             err ─▶ on_fail(n, err), next n
//!                          ▼
//!            on_fail(n, MaxAttemptsReached), monitor keeps running
//! ```
//!
//! A user disconnect (`Stopped`) ends the sequence immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection::ConnectionManager;
use super::error::{ConnectionError, ReconnectError};
use super::state::ConnectionState;

/// Backoff settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Symmetric jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts per sequence (0 = unlimited).
    pub max_attempts: u32,
    /// How often the monitor samples the connection state.
    pub monitor_interval: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 10,
            monitor_interval: Duration::from_millis(500),
        }
    }
}

/// Exponential backoff with symmetric jitter.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectStrategy {
    config: ReconnectConfig,
}

impl ReconnectStrategy {
    /// Create a strategy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Settings.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Un-jittered delay for attempt `attempt` (1-based):
    /// `min(initial * multiplier^(attempt-1), max)`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.config.initial_delay.as_secs_f64() * self.config.multiplier.powi(exponent);
        let max = self.config.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            return self.config.max_delay;
        }
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(self.config.max_delay)
    }

    /// Jittered delay for attempt `attempt`, never above `max_delay`.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.config.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }

        let base_secs = base.as_secs_f64();
        let range = base_secs * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-range..=range);
        Duration::try_from_secs_f64((base_secs + jitter).max(0.0))
            .unwrap_or(base)
            .min(self.config.max_delay)
    }
}

/// Attempt hook.
pub type AttemptHook = Arc<dyn Fn(u32) + Send + Sync>;
/// Failure hook.
pub type FailHook = Arc<dyn Fn(u32, &ReconnectError) + Send + Sync>;

/// Callbacks fired by the attempt sequence.
#[derive(Clone, Default)]
pub struct ReconnectHooks {
    on_start: Option<AttemptHook>,
    on_success: Option<AttemptHook>,
    on_fail: Option<FailHook>,
}

impl ReconnectHooks {
    /// No hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called before each attempt.
    #[must_use]
    pub fn on_start(mut self, f: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(f));
        self
    }

    /// Called once an attempt succeeds.
    #[must_use]
    pub fn on_success(mut self, f: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// Called after each failed attempt and once on exhaustion.
    #[must_use]
    pub fn on_fail(mut self, f: impl Fn(u32, &ReconnectError) + Send + Sync + 'static) -> Self {
        self.on_fail = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for ReconnectHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectHooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_fail", &self.on_fail.is_some())
            .finish()
    }
}

/// Watches a connection and reconnects it after unexpected loss.
pub struct ReconnectManager {
    connection: Arc<ConnectionManager>,
    strategy: ReconnectStrategy,
    hooks: RwLock<ReconnectHooks>,
    started: AtomicBool,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ReconnectManager {
    /// Create a manager for `connection`.
    #[must_use]
    pub fn new(connection: Arc<ConnectionManager>, config: ReconnectConfig) -> Self {
        Self {
            connection,
            strategy: ReconnectStrategy::new(config),
            hooks: RwLock::new(ReconnectHooks::default()),
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Replace the hooks.
    pub fn set_hooks(&self, hooks: ReconnectHooks) {
        *self.hooks.write() = hooks;
    }

    /// Backoff strategy.
    #[must_use]
    pub const fn strategy(&self) -> &ReconnectStrategy {
        &self.strategy
    }

    /// Whether an attempt sequence is in progress.
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn the state monitor. Only the first call spawns.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(tokio::spawn(Arc::clone(self).monitor(cancel)))
    }

    async fn monitor(self: Arc<Self>, cancel: CancellationToken) {
        let venue = self.connection.venue();
        let mut ticker = tokio::time::interval(self.strategy.config.monitor_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut previous = self.connection.state();

        tracing::debug!(venue, "Reconnect monitor started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let current = self.connection.state();
            if current == ConnectionState::Stopped {
                break;
            }
            if previous == ConnectionState::Connected
                && matches!(current, ConnectionState::Disconnected | ConnectionState::Failed)
            {
                let _ = self.reconnect(&cancel).await;
            }
            previous = self.connection.state();
        }
        tracing::debug!(venue, "Reconnect monitor stopped");
    }

    /// Run one attempt sequence now.
    ///
    /// Returns the attempt number that succeeded.
    ///
    /// # Errors
    ///
    /// `Cancelled` if stopped or cancelled, or another sequence is running;
    /// `MaxAttemptsReached` when every attempt failed.
    pub async fn reconnect(&self, cancel: &CancellationToken) -> Result<u32, ReconnectError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ReconnectError::Cancelled);
        }
        let _guard = RunningGuard(&self.running);

        let venue = self.connection.venue();
        let max_attempts = self.strategy.config.max_attempts;
        let mut attempt = 0;

        while max_attempts == 0 || attempt < max_attempts {
            if self.connection.state() == ConnectionState::Stopped {
                return Err(ReconnectError::Cancelled);
            }

            attempt += 1;
            let delay = self.strategy.next_delay(attempt);
            tracing::info!(
                venue,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting"
            );

            tokio::select! {
                () = cancel.cancelled() => return Err(ReconnectError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
            if self.connection.state() == ConnectionState::Stopped {
                return Err(ReconnectError::Cancelled);
            }

            self.connection.metrics().inc_reconnects();
            let hooks = self.hooks.read().clone();
            if let Some(on_start) = &hooks.on_start {
                on_start(attempt);
            }

            match self.connection.connect().await {
                Ok(()) | Err(ConnectionError::AlreadyConnected) => {
                    tracing::info!(venue, attempt, "Reconnected");
                    if let Some(on_success) = &hooks.on_success {
                        on_success(attempt);
                    }
                    return Ok(attempt);
                }
                Err(ConnectionError::Stopped) => return Err(ReconnectError::Cancelled),
                Err(e) => {
                    tracing::warn!(venue, attempt, error = %e, "Reconnect attempt failed");
                    let err = ReconnectError::Connect(e);
                    if let Some(on_fail) = &hooks.on_fail {
                        on_fail(attempt, &err);
                    }
                }
            }
        }

        let err = ReconnectError::MaxAttemptsReached { attempts: attempt };
        tracing::error!(venue, attempts = attempt, "Reconnect attempts exhausted");
        let on_fail = self.hooks.read().on_fail.clone();
        if let Some(on_fail) = on_fail {
            on_fail(attempt, &err);
        }
        Err(err)
    }
}

impl std::fmt::Debug for ReconnectManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectManager")
            .field("venue", &self.connection.venue())
            .field("strategy", &self.strategy)
            .field("running", &self.is_reconnecting())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::websocket::config::ConnectionConfig;
    use crate::infrastructure::websocket::transport::{DialRequest, Dialer, FrameSink, FrameStream};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use proptest::prelude::*;

    fn no_jitter(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
            monitor_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!((config.jitter_factor - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 10);
    }

    #[test]
    fn delays_grow_exponentially_then_cap() {
        let strategy = ReconnectStrategy::new(no_jitter(0));
        assert_eq!(strategy.next_delay(1), Duration::from_millis(100));
        assert_eq!(strategy.next_delay(2), Duration::from_millis(200));
        assert_eq!(strategy.next_delay(3), Duration::from_millis(400));
        assert_eq!(strategy.next_delay(4), Duration::from_millis(800));
        assert_eq!(strategy.next_delay(5), Duration::from_secs(1));
        assert_eq!(strategy.next_delay(500), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let strategy = ReconnectStrategy::new(ReconnectConfig {
            jitter_factor: 0.1,
            ..no_jitter(0)
        });
        for _ in 0..200 {
            let delay = strategy.next_delay(2);
            assert!(delay >= Duration::from_millis(180), "{delay:?}");
            assert!(delay <= Duration::from_millis(220), "{delay:?}");
        }
    }

    proptest! {
        #[test]
        fn delays_are_monotone_within_jitter_and_bounded(
            initial_ms in 1u64..5_000,
            max_ms in 1u64..120_000,
            multiplier in 1.0f64..4.0,
            jitter in 0.0f64..0.5,
            attempt in 1u32..64,
        ) {
            let config = ReconnectConfig {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_millis(max_ms),
                multiplier,
                jitter_factor: jitter,
                max_attempts: 0,
                monitor_interval: Duration::from_millis(500),
            };
            let strategy = ReconnectStrategy::new(config);
            let current = strategy.next_delay(attempt);
            let next = strategy.next_delay(attempt + 1);
            let bound = strategy.base_delay(attempt).mul_f64(2.0 * jitter) + Duration::from_millis(1);

            prop_assert!(current <= config.max_delay);
            prop_assert!(next <= config.max_delay);
            prop_assert!(next + bound >= current);
        }
    }

    struct ScriptedDialer {
        failures_left: Mutex<u32>,
    }

    #[async_trait]
    impl Dialer for ScriptedDialer {
        async fn dial(
            &self,
            _request: DialRequest,
        ) -> Result<(FrameSink, FrameStream), ConnectionError> {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(ConnectionError::Dial("refused".into()));
            }
            drop(left);
            let (tx, _rx) = futures::channel::mpsc::unbounded();
            let sink: FrameSink = Box::pin(futures::SinkExt::sink_map_err(tx, |_| {
                tokio_tungstenite::tungstenite::Error::ConnectionClosed
            }));
            let stream: FrameStream = Box::pin(futures::stream::pending());
            Ok((sink, stream))
        }
    }

    fn connection(failures: u32) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            ConnectionConfig::new("wss://mock/ws").without_health_monitor(),
            "test",
            Arc::new(ScriptedDialer {
                failures_left: Mutex::new(failures),
            }),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_succeeds_after_failures() {
        let connection = connection(2);
        let manager = ReconnectManager::new(connection.clone(), no_jitter(5));
        let events = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (events.clone(), events.clone(), events.clone());
        manager.set_hooks(
            ReconnectHooks::new()
                .on_start(move |n| a.lock().push(format!("start {n}")))
                .on_success(move |n| b.lock().push(format!("success {n}")))
                .on_fail(move |n, _| c.lock().push(format!("fail {n}"))),
        );

        let attempt = manager.reconnect(&CancellationToken::new()).await.unwrap();
        assert_eq!(attempt, 3);
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(
            *events.lock(),
            vec!["start 1", "fail 1", "start 2", "fail 2", "start 3", "success 3"]
        );
        assert_eq!(connection.metrics().snapshot().reconnects, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_reports_exhaustion() {
        let connection = connection(u32::MAX);
        let manager = ReconnectManager::new(connection, no_jitter(3));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        manager.set_hooks(ReconnectHooks::new().on_fail(move |n, err| {
            sink.lock().push((n, err.clone()));
        }));

        let err = manager.reconnect(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, ReconnectError::MaxAttemptsReached { attempts: 3 });

        let failures = failures.lock();
        assert_eq!(failures.len(), 4);
        assert_eq!(
            failures[3],
            (3, ReconnectError::MaxAttemptsReached { attempts: 3 })
        );
        assert!(!manager.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_connection_short_circuits() {
        let connection = connection(0);
        connection.disconnect().await;
        let manager = ReconnectManager::new(connection, no_jitter(5));
        assert_eq!(
            manager.reconnect(&CancellationToken::new()).await,
            Err(ReconnectError::Cancelled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_sleep() {
        let manager = ReconnectManager::new(connection(u32::MAX), no_jitter(0));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });
        assert_eq!(manager.reconnect(&cancel).await, Err(ReconnectError::Cancelled));
    }

    #[tokio::test]
    async fn start_spawns_monitor_once() {
        let manager = Arc::new(ReconnectManager::new(connection(0), no_jitter(1)));
        let cancel = CancellationToken::new();
        let first = manager.start(cancel.clone());
        assert!(first.is_some());
        assert!(manager.start(cancel.clone()).is_none());
        cancel.cancel();
        first.unwrap().await.unwrap();
    }
}
