//! Resilience patterns for venue connections.
//!
//! Circuit breakers guard dials and REST calls; token buckets gate
//! inbound message processing.

mod circuit_breaker;
mod rate_limiter;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerState,
};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
