//! Hyperliquid adapter.
//!
//! - [`HyperliquidProtocol`]: WebSocket subscriptions and routing
//! - [`HyperliquidConnector`]: REST queries and signed order entry

mod client;
pub mod parse;
mod protocol;

pub use client::HyperliquidConnector;
pub use protocol::{HyperliquidProtocol, PING};
