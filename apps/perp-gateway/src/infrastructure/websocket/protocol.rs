//! Venue wire protocol seam.
//!
//! A [`VenueProtocol`] knows one venue's symbols, subscribe frames, auth
//! frame, and how to route an inbound JSON frame to canonical events. The
//! connection, router, and facade are generic over it.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use super::validator::ValidatorConfig;
use crate::application::ports::AuthToken;
use crate::domain::market::{Asset, KlineInterval, MarketEvent};
use crate::domain::subscription::SubscriptionKey;
use crate::infrastructure::venues::parse::ParseError;

/// Monotonic request ids for JSON-RPC style frames.
#[derive(Debug)]
pub struct RequestIds(AtomicU64);

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIds {
    /// Ids starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Next id.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// A canonical event and the key it is delivered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    /// Routing key.
    pub key: SubscriptionKey,
    /// Parsed payload.
    pub event: MarketEvent,
}

/// Non-data frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Subscribe or unsubscribe acknowledged.
    Ack(String),
    /// Application-level pong.
    Pong,
    /// Result of the auth frame.
    AuthResult {
        /// Whether the venue accepted the credentials.
        success: bool,
        /// Venue message.
        message: String,
    },
    /// Venue reported an error.
    VenueError(String),
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Canonical events to dispatch.
    Data(Vec<Routed>),
    /// Control frame.
    Control(Control),
    /// Channel this protocol does not know.
    Unknown(String),
}

/// One venue's wire protocol.
pub trait VenueProtocol: Send + Sync + 'static {
    /// Venue label used in logs and metrics.
    fn venue(&self) -> &'static str;

    /// Wire symbol for `asset`.
    fn instrument(&self, asset: &Asset) -> String;

    /// Canonical asset for a wire symbol.
    fn asset(&self, instrument: &str) -> Asset;

    /// Order book routing key.
    fn order_book_key(&self, asset: &Asset) -> SubscriptionKey {
        SubscriptionKey::order_book(self.instrument(asset))
    }

    /// Trades routing key.
    fn trades_key(&self, asset: &Asset) -> SubscriptionKey {
        SubscriptionKey::trades(self.instrument(asset))
    }

    /// Venue label for `interval`, or `None` if unsupported.
    fn candle_interval(&self, interval: KlineInterval) -> Option<String>;

    /// Candle routing key, or `None` if the interval is unsupported.
    fn candle_key(&self, asset: &Asset, interval: KlineInterval) -> Option<SubscriptionKey> {
        self.candle_interval(interval)
            .map(|label| SubscriptionKey::candle(self.instrument(asset), label))
    }

    /// Account routing key, or `None` if account data is unavailable.
    fn account_key(&self) -> Option<SubscriptionKey>;

    /// Frames that subscribe `key`. `None` if the key is unsupported; an
    /// empty list if nothing needs to be sent.
    fn subscribe_frames(&self, key: &SubscriptionKey, ids: &RequestIds) -> Option<Vec<Value>>;

    /// Frames that unsubscribe `key`.
    fn unsubscribe_frames(&self, key: &SubscriptionKey, ids: &RequestIds) -> Option<Vec<Value>>;

    /// Frame sent once per session before subscriptions.
    fn auth_frame(&self, _token: Option<&AuthToken>, _ids: &RequestIds) -> Option<Value> {
        None
    }

    /// Classify and parse an inbound frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for malformed payloads on known channels.
    fn route(&self, frame: &Value) -> Result<Inbound, ParseError>;

    /// Validation rules for inbound frames.
    fn validator_config(&self) -> ValidatorConfig;

    /// Application-level ping text.
    fn ping_payload(&self) -> Option<String> {
        None
    }

    /// Whether the venue streams candles. When `false`, candles are
    /// synthesized from trades.
    fn native_klines(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_monotonic() {
        let ids = RequestIds::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
    }
}
