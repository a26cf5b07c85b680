//! Configuration Module
//!
//! Environment-driven settings for venues and shared socket tuning.

mod settings;

pub use settings::{
    ConfigError, ConnectionTuning, DEFAULT_MARKET_SLIPPAGE, GatewayConfig, VenueCredentials,
    VenueSettings,
};
