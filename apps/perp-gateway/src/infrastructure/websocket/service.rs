//! Inbound message pipeline.
//!
//! Every text frame passes rate limiter, validator, and handler in that
//! order. Frames are counted as received by the connection manager; this
//! pipeline counts processed and dropped frames and their latency.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::validator::MessageValidator;
use crate::error::GatewayError;
use crate::infrastructure::metrics::ServiceMetrics;
use crate::infrastructure::resilience::RateLimiter;

/// Processing time above which a warning is logged.
pub const SLOW_PROCESSING_THRESHOLD: Duration = Duration::from_millis(10);

/// Result of feeding one frame through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handler ran and succeeded.
    Processed,
    /// Frame dropped by the rate limiter.
    Dropped,
}

/// Rate limiting, validation, and metrics around a frame handler.
#[derive(Debug)]
pub struct MessageService {
    limiter: RateLimiter,
    validator: MessageValidator,
    metrics: Arc<ServiceMetrics>,
}

impl MessageService {
    /// Compose the pipeline.
    #[must_use]
    pub const fn new(
        limiter: RateLimiter,
        validator: MessageValidator,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            limiter,
            validator,
            metrics,
        }
    }

    /// Shared counters.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    /// Run `raw` through the pipeline and hand the decoded JSON to `handler`.
    ///
    /// Rate-limited frames are dropped silently and reported as
    /// [`Outcome::Dropped`].
    ///
    /// # Errors
    ///
    /// Returns a protocol error for invalid frames and the handler's error
    /// when it fails. Both count as dropped.
    pub fn process<F>(&self, raw: &str, handler: F) -> Result<Outcome, GatewayError>
    where
        F: FnOnce(Value) -> Result<(), GatewayError>,
    {
        let started = Instant::now();
        let venue = self.metrics.venue();

        if !self.limiter.allow() {
            self.metrics.inc_dropped("rate_limited");
            tracing::warn!(venue, "Inbound rate limit exceeded, dropping message");
            return Ok(Outcome::Dropped);
        }

        let value = match self.validator.validate(raw) {
            Ok(value) => value,
            Err(e) => {
                self.metrics.inc_dropped("validation");
                return Err(e.into());
            }
        };

        if let Err(e) = handler(value) {
            self.metrics.inc_dropped("parse");
            return Err(e);
        }

        let elapsed = started.elapsed();
        self.metrics.record_processed(elapsed);
        if elapsed > SLOW_PROCESSING_THRESHOLD {
            tracing::warn!(
                venue,
                elapsed_ms = elapsed.as_millis(),
                "Slow message processing"
            );
        }
        Ok(Outcome::Processed)
    }
}
