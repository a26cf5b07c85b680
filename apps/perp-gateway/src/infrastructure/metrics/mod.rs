//! Prometheus Metrics Module
//!
//! Process-wide metrics facade for the gateway.
//!
//! # Metrics Categories
//!
//! - **Messages**: received, processed, and dropped frames per venue
//! - **Connections**: socket state and connection errors per venue
//! - **Reconnects**: reconnect attempts per venue
//! - **Latency**: inbound message processing time
//! - **REST**: request outcomes per venue
//!
//! # Integration
//!
//! The gateway is consumed in-process and serves no endpoint. The embedding
//! process renders the text exposition through [`get_metrics_handle`].

mod service;

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub use service::{MetricsSnapshot, ServiceMetrics};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "perp_gateway_messages_received_total",
        "Total frames read from venue WebSockets"
    );
    describe_counter!(
        "perp_gateway_messages_processed_total",
        "Total frames that passed rate limiting and validation and were handled"
    );
    describe_counter!(
        "perp_gateway_messages_dropped_total",
        "Total frames dropped by rate limiting, validation, or parsing"
    );
    describe_counter!(
        "perp_gateway_klines_dropped_total",
        "Total synthesized klines dropped because the output buffer was full"
    );

    describe_gauge!(
        "perp_gateway_websocket_connected",
        "1 when the venue WebSocket is connected, 0 otherwise"
    );
    describe_gauge!(
        "perp_gateway_subscriptions",
        "Number of live subscriptions per venue"
    );

    describe_counter!(
        "perp_gateway_connection_errors_total",
        "Total connection losses per venue"
    );
    describe_counter!(
        "perp_gateway_reconnects_total",
        "Total reconnect attempts per venue"
    );
    describe_counter!(
        "perp_gateway_rest_requests_total",
        "Total REST requests per venue and outcome"
    );

    describe_histogram!(
        "perp_gateway_message_processing_seconds",
        "Time to validate and handle one inbound frame"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for REST requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestOutcome {
    /// 2xx response decoded.
    Success,
    /// Retried after a transient failure.
    Retry,
    /// Failed permanently.
    Failure,
}

impl RestOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Retry => "retry",
            Self::Failure => "failure",
        }
    }
}

/// Record a frame read from a venue socket.
pub fn record_message_received(venue: &'static str) {
    counter!("perp_gateway_messages_received_total", "venue" => venue).increment(1);
}

/// Record a frame handled successfully.
pub fn record_message_processed(venue: &'static str) {
    counter!("perp_gateway_messages_processed_total", "venue" => venue).increment(1);
}

/// Record a dropped frame with the reason.
pub fn record_message_dropped(venue: &'static str, reason: &'static str) {
    counter!(
        "perp_gateway_messages_dropped_total",
        "venue" => venue,
        "reason" => reason
    )
    .increment(1);
}

/// Record a synthesized kline dropped on a full buffer.
pub fn record_kline_dropped() {
    counter!("perp_gateway_klines_dropped_total").increment(1);
}

/// Update the socket state gauge.
pub fn set_websocket_connected(venue: &'static str, connected: bool) {
    gauge!("perp_gateway_websocket_connected", "venue" => venue)
        .set(if connected { 1.0 } else { 0.0 });
}

/// Update the live subscription gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(venue: &'static str, count: usize) {
    gauge!("perp_gateway_subscriptions", "venue" => venue).set(count as f64);
}

/// Record a connection loss.
pub fn record_connection_error(venue: &'static str) {
    counter!("perp_gateway_connection_errors_total", "venue" => venue).increment(1);
}

/// Record a reconnect attempt.
pub fn record_reconnect(venue: &'static str) {
    counter!("perp_gateway_reconnects_total", "venue" => venue).increment(1);
}

/// Record a REST request outcome.
pub fn record_rest_request(venue: &'static str, outcome: RestOutcome) {
    counter!(
        "perp_gateway_rest_requests_total",
        "venue" => venue,
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record message processing duration.
pub fn record_processing_duration(venue: &'static str, duration: Duration) {
    histogram!("perp_gateway_message_processing_seconds", "venue" => venue)
        .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_outcome_as_str() {
        assert_eq!(RestOutcome::Success.as_str(), "success");
        assert_eq!(RestOutcome::Retry.as_str(), "retry");
        assert_eq!(RestOutcome::Failure.as_str(), "failure");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_message_received("test");
        record_message_dropped("test", "rate_limited");
        set_websocket_connected("test", true);
        record_processing_duration("test", Duration::from_millis(3));
    }
}
