//! Circuit breaker guarding venue dials and REST calls.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN       (max_failures consecutive failures)
//! OPEN → HALF_OPEN    (more than reset_timeout since the last failure)
//! HALF_OPEN → CLOSED  (next call succeeds)
//! HALF_OPEN → OPEN    (next call fails)
//! ```
//!
//! A success in `CLOSED` resets the failure count. `HALF_OPEN` admits calls
//! until one of them reports an outcome.
//!
//! # Example
//!
//! ```rust,ignore
//! let breaker = CircuitBreaker::new("hyperliquid-ws", CircuitBreakerConfig::default());
//!
//! if breaker.is_call_permitted() {
//!     match dial().await {
//!         Ok(socket) => breaker.record_success(),
//!         Err(e) => breaker.record_failure(),
//!     }
//! }
//! ```

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected.
    Open,
    /// Probing whether the service recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub max_failures: u32,
    /// Time after the last failure before a trial call is admitted.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Configuration for REST endpoints.
    ///
    /// Shorter reset so order entry recovers quickly.
    #[must_use]
    pub const fn rest() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitBreakerState,
    failures: u32,
    last_failure: Option<Instant>,
}

/// Three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    rejected_calls: AtomicU64,
    state_transitions: AtomicU64,
}

impl CircuitBreaker {
    /// Create a breaker in `CLOSED`.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(Inner {
                state: CircuitBreakerState::Closed,
                failures: 0,
                last_failure: None,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
        }
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Current state, without applying time-based transitions.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .state
    }

    /// Consecutive failures counted so far.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .failures
    }

    /// Check if a call is permitted now.
    #[must_use]
    pub fn is_call_permitted(&self) -> bool {
        self.is_call_permitted_at(Instant::now())
    }

    /// Check if a call is permitted at `now`.
    ///
    /// An `OPEN` breaker whose reset timeout has elapsed moves to
    /// `HALF_OPEN` and admits the call.
    pub fn is_call_permitted_at(&self, now: Instant) -> bool {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map_or(Duration::MAX, |at| now.saturating_duration_since(at));
                if elapsed > self.config.reset_timeout {
                    inner.state = CircuitBreakerState::HalfOpen;
                    inner.failures = 0;
                    drop(inner);
                    self.state_transitions.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        name = %self.name,
                        from = "OPEN",
                        to = "HALF_OPEN",
                        "Circuit breaker testing"
                    );
                    true
                } else {
                    drop(inner);
                    self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let previous = inner.state;
        inner.failures = 0;
        if previous == CircuitBreakerState::HalfOpen {
            inner.state = CircuitBreakerState::Closed;
            inner.last_failure = None;
            drop(inner);
            self.state_transitions.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                name = %self.name,
                from = %previous,
                to = "CLOSED",
                "Circuit breaker closed"
            );
        }
    }

    /// Record a failed call now.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// Record a failed call at `now`.
    pub fn record_failure_at(&self, now: Instant) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let previous = inner.state;
        inner.last_failure = Some(now);

        let open = match previous {
            CircuitBreakerState::Closed => {
                inner.failures = inner.failures.saturating_add(1);
                inner.failures >= self.config.max_failures
            }
            CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => false,
        };

        if open {
            inner.state = CircuitBreakerState::Open;
            let failures = inner.failures;
            drop(inner);
            self.state_transitions.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                name = %self.name,
                from = %previous,
                to = "OPEN",
                failures,
                "Circuit breaker opened"
            );
        }
    }

    /// Snapshot of counters and state.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let (state, consecutive_failures) = {
            let inner = self
                .inner
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            (inner.state, inner.failures)
        };
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state,
            consecutive_failures,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
        }
    }

    /// Force the breaker open (emergency stop).
    pub fn force_open(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.state != CircuitBreakerState::Open {
            inner.state = CircuitBreakerState::Open;
            inner.last_failure = Some(Instant::now());
            drop(inner);
            self.state_transitions.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(name = %self.name, "Circuit breaker forced open");
        }
    }

    /// Force the breaker closed (manual recovery).
    pub fn force_close(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.state != CircuitBreakerState::Closed {
            inner.state = CircuitBreakerState::Closed;
            inner.failures = 0;
            inner.last_failure = None;
            drop(inner);
            self.state_transitions.fetch_add(1, Ordering::Relaxed);
            tracing::info!(name = %self.name, "Circuit breaker forced closed");
        }
    }
}

/// Metrics for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Service name.
    pub name: String,
    /// Current state.
    pub state: CircuitBreakerState,
    /// Current consecutive failure count.
    pub consecutive_failures: u32,
    /// Total recorded outcomes.
    pub total_calls: u64,
    /// Total recorded failures.
    pub total_failures: u64,
    /// Calls rejected while open.
    pub rejected_calls: u64,
    /// Number of state transitions.
    pub state_transitions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(max_failures: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                max_failures,
                reset_timeout: Duration::from_millis(reset_ms),
            },
        )
    }

    #[test]
    fn test_initial_state_is_closed() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert!(breaker.is_call_permitted());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = breaker(3, 1_000);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.failures(), 2);
    }

    #[test]
    fn test_state_trace_under_failures_then_success() {
        let breaker = breaker(3, 100);
        let start = Instant::now();
        let mut trace = vec![breaker.state()];

        for i in 0..3 {
            assert!(breaker.is_call_permitted_at(start));
            breaker.record_failure_at(start);
            if i < 2 {
                assert_eq!(breaker.state(), CircuitBreakerState::Closed);
            }
        }
        trace.push(breaker.state());

        // Still inside the reset timeout.
        assert!(!breaker.is_call_permitted_at(start + Duration::from_millis(100)));

        assert!(breaker.is_call_permitted_at(start + Duration::from_millis(101)));
        trace.push(breaker.state());

        breaker.record_success();
        trace.push(breaker.state());

        assert_eq!(
            trace,
            vec![
                CircuitBreakerState::Closed,
                CircuitBreakerState::Open,
                CircuitBreakerState::HalfOpen,
                CircuitBreakerState::Closed,
            ]
        );
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = breaker(1, 10);
        let start = Instant::now();
        breaker.record_failure_at(start);
        assert!(breaker.is_call_permitted_at(start + Duration::from_millis(20)));
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);

        breaker.record_failure_at(start + Duration::from_millis(21));
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert!(!breaker.is_call_permitted_at(start + Duration::from_millis(25)));
    }

    #[test]
    fn test_half_open_admits_concurrent_trial_calls() {
        let breaker = breaker(1, 1);
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.is_call_permitted());
        assert!(breaker.is_call_permitted());
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
    }

    #[test]
    fn test_metrics() {
        let breaker = breaker(2, 1_000);
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_call_permitted());

        let metrics = breaker.metrics();
        assert_eq!(metrics.name, "test");
        assert_eq!(metrics.state, CircuitBreakerState::Open);
        assert_eq!(metrics.total_calls, 3);
        assert_eq!(metrics.total_failures, 2);
        assert_eq!(metrics.rejected_calls, 1);
        assert_eq!(metrics.state_transitions, 1);
    }

    #[test]
    fn test_force_open_and_close() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        breaker.force_open();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert!(!breaker.is_call_permitted());

        breaker.force_close();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert!(breaker.is_call_permitted());
    }
}
