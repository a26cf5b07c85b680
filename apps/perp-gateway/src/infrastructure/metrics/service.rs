//! Per-connection counters.
//!
//! Each venue stream owns one [`ServiceMetrics`]. Counters are atomics so
//! the read loop, reconnect monitor, and callers can update and read them
//! without locking. Every increment is mirrored into the global recorder
//! labeled by venue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Point-in-time copy of [`ServiceMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Frames read from the socket.
    pub received: u64,
    /// Frames handled successfully.
    pub processed: u64,
    /// Frames dropped by rate limit, validation, or parse failure.
    pub dropped: u64,
    /// Connection losses.
    pub errors: u64,
    /// Reconnect attempts.
    pub reconnects: u64,
    /// Latency of the most recent processed frame, in microseconds.
    pub last_latency_us: u64,
    /// Mean latency of processed frames, in microseconds.
    pub avg_latency_us: u64,
}

/// Atomic message and connection counters for one venue connection.
#[derive(Debug)]
pub struct ServiceMetrics {
    venue: &'static str,
    received: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
    reconnects: AtomicU64,
    last_latency_us: AtomicU64,
    total_latency_us: AtomicU64,
}

impl ServiceMetrics {
    /// Counters labeled with `venue`.
    #[must_use]
    pub const fn new(venue: &'static str) -> Self {
        Self {
            venue,
            received: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            last_latency_us: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
        }
    }

    /// Venue label.
    #[must_use]
    pub const fn venue(&self) -> &'static str {
        self.venue
    }

    /// Count a frame read from the socket.
    pub fn inc_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        super::record_message_received(self.venue);
    }

    /// Count a handled frame and its latency.
    pub fn record_processed(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.last_latency_us.store(micros, Ordering::Relaxed);
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
        super::record_message_processed(self.venue);
        super::record_processing_duration(self.venue, latency);
    }

    /// Count a dropped frame.
    pub fn inc_dropped(&self, reason: &'static str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        super::record_message_dropped(self.venue, reason);
    }

    /// Count a connection loss.
    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        super::record_connection_error(self.venue);
    }

    /// Count a reconnect attempt.
    pub fn inc_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        super::record_reconnect(self.venue);
    }

    /// Copy the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let total = self.total_latency_us.load(Ordering::Relaxed);
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed,
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            last_latency_us: self.last_latency_us.load(Ordering::Relaxed),
            avg_latency_us: total.checked_div(processed).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = ServiceMetrics::new("test");
        metrics.inc_received();
        metrics.inc_received();
        metrics.inc_dropped("validation");
        metrics.record_processed(Duration::from_micros(100));
        metrics.record_processed(Duration::from_micros(300));
        metrics.inc_errors();
        metrics.inc_reconnects();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.reconnects, 1);
        assert_eq!(snapshot.last_latency_us, 300);
        assert_eq!(snapshot.avg_latency_us, 200);
    }

    #[test]
    fn empty_snapshot_has_zero_average() {
        assert_eq!(ServiceMetrics::new("test").snapshot(), MetricsSnapshot::default());
    }
}
