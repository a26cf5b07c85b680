//! Token bucket rate limiter.
//!
//! Holds up to `capacity` tokens. Once `refill_interval` has elapsed since
//! the last refill the bucket is topped up to `capacity` in one step; each
//! admitted call consumes one token.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Tokens available per window.
    pub capacity: u32,
    /// Window length.
    pub refill_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            refill_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// Token bucket gate.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Full bucket starting now.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    /// Full bucket whose first window starts at `start`.
    #[must_use]
    pub const fn starting_at(config: RateLimiterConfig, start: Instant) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: config.capacity,
                last_refill: start,
            }),
            config,
        }
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> RateLimiterConfig {
        self.config
    }

    /// Try to take a token now.
    #[must_use]
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Try to take a token at `now`.
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut bucket = self.bucket.lock();
        if now.saturating_duration_since(bucket.last_refill) >= self.config.refill_interval {
            bucket.tokens = self.config.capacity;
            bucket.last_refill = now;
        }
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Tokens left in the current window.
    #[must_use]
    pub fn available(&self) -> u32 {
        self.bucket.lock().tokens
    }
}
