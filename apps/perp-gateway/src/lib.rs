#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Perp Gateway - Crypto Perpetuals Market Data and Execution
//!
//! Maintains WebSocket feeds and REST sessions to perpetual futures venues
//! (Hyperliquid, Paradex, Bybit) and exposes them through one canonical,
//! decimal-precise connector surface consumed in-process.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: canonical records and subscription identity
//!   - `market`: assets, order books, trades, klines, positions, balances
//!   - `subscription`: `(channel, instrument, interval)` keys
//!
//! - **Application**: ports and venue-independent services
//!   - `ports`: `Connector`, `WebSocketConnector`, auth, clock
//!   - `services`: kline synthesis from trades
//!
//! - **Infrastructure**: adapters and ambient concerns
//!   - `websocket`: connection, reconnect, validation, routing, facade
//!   - `venues`: per-venue protocols, parsers, REST connectors, registry
//!   - `rest`, `resilience`, `broadcast`, `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! venue WS ─▶ ConnectionManager ─▶ MessageService ─▶ VenueProtocol::route
//!                                                          │
//!              update streams ◀── BroadcastHub ◀── SubscriptionRouter
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Domain layer - Canonical types with no I/O.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Crate-level error type.
pub mod error;

// Domain types
pub use domain::market::{
    AccountBalance, Asset, ConnectorInfo, FundingRate, Kline, KlineInterval, LimitOrderRequest,
    MarketOrderRequest, Order, OrderAck, OrderBook, OrderStatus, OrderType, Position,
    PositionSide, PriceLevel, Side, TimeInForce, Trade,
};
pub use domain::subscription::{Channel, SubscriptionId, SubscriptionKey};

// Ports
pub use application::ports::{
    ActionSigner, AuthProvider, AuthToken, Clock, Connector, ConnectorResult, SystemClock,
    WebSocketConnector,
};

// Errors
pub use error::{ErrorKind, GatewayError};

// Configuration
pub use infrastructure::config::{ConfigError, ConnectionTuning, GatewayConfig, VenueSettings};

// Registry
pub use infrastructure::venues::{ConnectorRegistry, Venue, VenueHandle, build_registry};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
