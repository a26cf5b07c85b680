//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports: the generic
//! WebSocket machinery, venue adapters, REST plumbing, and the ambient
//! configuration, logging, and metrics support.

/// Per-venue broadcast channels behind the update streams.
pub mod broadcast;

/// Environment-driven configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Rate limiting and circuit breaking.
pub mod resilience;

/// HTTP client shared by the venue REST connectors.
pub mod rest;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;

/// Venue adapters and the connector registry.
pub mod venues;

/// Generic WebSocket connection, reconnect, and routing machinery.
pub mod websocket;
