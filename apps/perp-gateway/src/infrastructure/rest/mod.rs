//! Venue REST plumbing.
//!
//! [`RestClient`] wraps `reqwest` with status categorization, exponential
//! backoff for transient failures, and a circuit breaker. Venue modules
//! build [`RestRequest`]s and decode the JSON they get back.

mod client;

use std::time::Duration;

pub use client::{RequestSigner, RestClient, RestRequest};

/// REST failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RestError {
    /// HTTP 429 after retries were exhausted.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds suggested by `Retry-After`.
        retry_after_secs: u64,
    },

    /// HTTP 401/403 or missing credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Venue refused the request (HTTP 400/422 or a venue error envelope).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Breaker is open.
    #[error("circuit '{0}' is open")]
    CircuitOpen(String),

    /// Response body did not decode.
    #[error("decode error: {0}")]
    Decode(String),

    /// Request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Any other non-success status.
    #[error("http {status}: {message}")]
    Http {
        /// Status code.
        status: u16,
        /// Body or venue message.
        message: String,
    },

    /// Transient failures persisted past the retry budget.
    #[error("gave up after {attempts} attempts")]
    MaxRetriesExceeded {
        /// Attempts made.
        attempts: u32,
    },
}

/// Retry policy for transient REST failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any delay.
    pub max_backoff: Duration,
    /// Growth factor between retries.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }
}
