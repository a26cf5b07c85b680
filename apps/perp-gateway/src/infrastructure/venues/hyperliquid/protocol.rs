//! Hyperliquid WebSocket protocol.
//!
//! Subscription-object idiom:
//!
//! ```json
//! {"method":"subscribe","subscription":{"type":"l2Book","coin":"BTC"}}
//! ```
//!
//! Inbound frames are `{channel, data}`. The account feed is `webData2`,
//! keyed by the user address.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{Value, json};

use super::parse;
use crate::domain::market::{Asset, KlineInterval, MarketEvent};
use crate::domain::subscription::{Channel, SubscriptionKey};
use crate::infrastructure::venues::parse::{ParseError, field, str_field};
use crate::infrastructure::websocket::{
    Control, Inbound, RequestIds, Routed, ValidatorConfig, VenueProtocol,
};

/// Application heartbeat; the venue closes idle sockets after 60s.
pub const PING: &str = r#"{"method":"ping"}"#;

/// Hyperliquid wire protocol.
#[derive(Debug, Clone, Default)]
pub struct HyperliquidProtocol {
    user: Option<String>,
}

impl HyperliquidProtocol {
    /// Public feeds only.
    #[must_use]
    pub const fn new() -> Self {
        Self { user: None }
    }

    /// Enable the account feed for `address`.
    #[must_use]
    pub fn with_user(mut self, address: impl AsRef<str>) -> Self {
        self.user = Some(address.as_ref().to_lowercase());
        self
    }

    fn subscription(key: &SubscriptionKey) -> Value {
        match key.channel {
            Channel::OrderBook => json!({"type": "l2Book", "coin": key.instrument}),
            Channel::Trades => json!({"type": "trades", "coin": key.instrument}),
            Channel::Candle => json!({
                "type": "candle",
                "coin": key.instrument,
                "interval": key.interval,
            }),
            Channel::Account => json!({"type": "webData2", "user": key.instrument}),
        }
    }

    fn frame(&self, method: &str, key: &SubscriptionKey) -> Option<Vec<Value>> {
        if key.channel == Channel::Account && self.user.as_deref() != Some(key.instrument.as_str())
        {
            return None;
        }
        Some(vec![json!({
            "method": method,
            "subscription": Self::subscription(key),
        })])
    }

    fn route_trades(data: &Value) -> Result<Inbound, ParseError> {
        let mut by_coin: BTreeMap<String, Vec<_>> = BTreeMap::new();
        for trade in parse::trades(data)? {
            by_coin
                .entry(trade.asset.as_str().to_string())
                .or_default()
                .push(trade);
        }
        Ok(Inbound::Data(
            by_coin
                .into_iter()
                .map(|(coin, trades)| Routed {
                    key: SubscriptionKey::trades(coin),
                    event: MarketEvent::Trades(trades),
                })
                .collect(),
        ))
    }

    fn route_account(&self, data: &Value) -> Result<Inbound, ParseError> {
        let user = data
            .get("user")
            .and_then(Value::as_str)
            .or(self.user.as_deref())
            .ok_or_else(|| ParseError::MissingField("user".into()))?;
        let update = parse::clearinghouse(field(data, "clearinghouseState")?, Utc::now())?;
        Ok(Inbound::Data(vec![Routed {
            key: SubscriptionKey::account(Some(user)),
            event: MarketEvent::Account(update),
        }]))
    }
}

impl VenueProtocol for HyperliquidProtocol {
    fn venue(&self) -> &'static str {
        "hyperliquid"
    }

    fn instrument(&self, asset: &Asset) -> String {
        asset.as_str().to_string()
    }

    fn asset(&self, instrument: &str) -> Asset {
        Asset::new(instrument)
    }

    fn candle_interval(&self, interval: KlineInterval) -> Option<String> {
        Some(interval.as_str().to_string())
    }

    fn account_key(&self) -> Option<SubscriptionKey> {
        self.user
            .as_deref()
            .map(|user| SubscriptionKey::account(Some(user)))
    }

    fn subscribe_frames(&self, key: &SubscriptionKey, _ids: &RequestIds) -> Option<Vec<Value>> {
        self.frame("subscribe", key)
    }

    fn unsubscribe_frames(&self, key: &SubscriptionKey, _ids: &RequestIds) -> Option<Vec<Value>> {
        self.frame("unsubscribe", key)
    }

    fn route(&self, frame: &Value) -> Result<Inbound, ParseError> {
        let channel = str_field(frame, "channel")?;
        match channel {
            "l2Book" => {
                let book = parse::order_book(field(frame, "data")?)?;
                Ok(Inbound::Data(vec![Routed {
                    key: SubscriptionKey::order_book(book.asset.as_str()),
                    event: MarketEvent::OrderBook(book),
                }]))
            }
            "trades" => Self::route_trades(field(frame, "data")?),
            "candle" => {
                let kline = parse::candle(field(frame, "data")?, Utc::now())?;
                Ok(Inbound::Data(vec![Routed {
                    key: SubscriptionKey::candle(kline.asset.as_str(), kline.interval.as_str()),
                    event: MarketEvent::Kline(kline),
                }]))
            }
            "webData2" => self.route_account(field(frame, "data")?),
            "subscriptionResponse" => Ok(Inbound::Control(Control::Ack(
                frame.get("data").map_or_else(String::new, Value::to_string),
            ))),
            "pong" => Ok(Inbound::Control(Control::Pong)),
            "error" => Ok(Inbound::Control(Control::VenueError(
                match frame.get("data") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => "unspecified error".to_string(),
                },
            ))),
            other => Ok(Inbound::Unknown(other.to_string())),
        }
    }

    fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig::default().with_type_field("channel")
    }

    fn ping_payload(&self) -> Option<String> {
        Some(PING.to_string())
    }
}
