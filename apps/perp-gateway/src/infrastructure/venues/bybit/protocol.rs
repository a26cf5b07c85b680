//! Bybit V5 WebSocket protocol.
//!
//! Public market data and private account data live on separate sockets,
//! so one [`BybitProtocol`] is built per socket. Frames use the `op` idiom:
//!
//! ```json
//! {"req_id":"3","op":"subscribe","args":["orderbook.50.BTCUSDT"]}
//! ```
//!
//! Order book pushes are a snapshot followed by deltas; the protocol keeps a
//! local book per symbol and routes the merged state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};

use super::parse::{self, LocalBook};
use super::signer::{BybitCredentials, WS_AUTH_TTL_MS};
use crate::application::ports::{AuthToken, Clock};
use crate::domain::market::{AccountUpdate, Asset, KlineInterval, MarketEvent};
use crate::domain::subscription::{Channel, SubscriptionKey};
use crate::infrastructure::venues::parse::{
    ParseError, array_field, field, opt_millis_field, str_field,
};
use crate::infrastructure::venues::symbols::{asset_from_bybit, bybit_symbol};
use crate::infrastructure::websocket::{
    Control, Inbound, RequestIds, Routed, ValidatorConfig, VenueProtocol,
};

/// Levels requested on the order book topic.
pub const BOOK_DEPTH: u32 = 50;

/// Application heartbeat; the venue drops sockets idle for 20s.
pub const PING: &str = r#"{"op":"ping"}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Socket {
    Public,
    Private,
}

/// Bybit wire protocol for one socket.
pub struct BybitProtocol {
    socket: Socket,
    credentials: Option<BybitCredentials>,
    clock: Arc<dyn Clock>,
    books: Mutex<HashMap<String, LocalBook>>,
}

impl BybitProtocol {
    /// Public market data socket.
    #[must_use]
    pub fn public(clock: Arc<dyn Clock>) -> Self {
        Self {
            socket: Socket::Public,
            credentials: None,
            clock,
            books: Mutex::new(HashMap::new()),
        }
    }

    /// Private account socket.
    #[must_use]
    pub fn private(credentials: BybitCredentials, clock: Arc<dyn Clock>) -> Self {
        Self {
            socket: Socket::Private,
            credentials: Some(credentials),
            clock,
            books: Mutex::new(HashMap::new()),
        }
    }

    fn topics(&self, key: &SubscriptionKey) -> Option<Vec<String>> {
        match (self.socket, key.channel) {
            (Socket::Public, Channel::OrderBook) => {
                Some(vec![format!("orderbook.{BOOK_DEPTH}.{}", key.instrument)])
            }
            (Socket::Public, Channel::Trades) => Some(vec![format!("publicTrade.{}", key.instrument)]),
            (Socket::Public, Channel::Candle) if !key.interval.is_empty() => Some(vec![format!(
                "kline.{}.{}",
                key.interval, key.instrument
            )]),
            (Socket::Private, Channel::Account) if Some(key) == self.account_key().as_ref() => {
                Some(vec!["position".to_string(), "wallet".to_string()])
            }
            _ => None,
        }
    }

    fn op(op: &str, topics: Vec<String>, ids: &RequestIds) -> Value {
        json!({
            "req_id": ids.next().to_string(),
            "op": op,
            "args": topics,
        })
    }

    fn route_book(&self, frame: &Value, symbol: &str) -> Result<Inbound, ParseError> {
        let data = field(frame, "data")?;
        let timestamp = opt_millis_field(frame, "ts")?.unwrap_or_else(|| self.clock.now());
        let mut books = self.books.lock();
        let book = match str_field(frame, "type")? {
            "snapshot" => {
                let book = books.entry(symbol.to_string()).or_default();
                book.apply_snapshot(data)?;
                book
            }
            "delta" => {
                let book = books
                    .get_mut(symbol)
                    .ok_or_else(|| ParseError::invalid_value("type", "delta before snapshot"))?;
                book.apply_delta(data)?;
                book
            }
            other => return Err(ParseError::invalid_value("type", other)),
        };
        let snapshot = book.to_order_book(asset_from_bybit(symbol), timestamp);
        drop(books);
        Ok(Inbound::Data(vec![Routed {
            key: SubscriptionKey::order_book(symbol),
            event: MarketEvent::OrderBook(snapshot),
        }]))
    }

    fn route_topic(&self, frame: &Value, topic: &str) -> Result<Inbound, ParseError> {
        let mut parts = topic.split('.');
        let routed = match (parts.next(), parts.next(), parts.next()) {
            (Some("orderbook"), Some(_), Some(symbol)) => return self.route_book(frame, symbol),
            (Some("publicTrade"), Some(symbol), None) => {
                let trades = array_field(frame, "data")?
                    .iter()
                    .map(parse::ws_trade)
                    .collect::<Result<Vec<_>, _>>()?;
                vec![Routed {
                    key: SubscriptionKey::trades(symbol),
                    event: MarketEvent::Trades(trades),
                }]
            }
            (Some("kline"), Some(interval), Some(symbol)) => array_field(frame, "data")?
                .iter()
                .map(|data| {
                    Ok(Routed {
                        key: SubscriptionKey::candle(symbol, interval),
                        event: MarketEvent::Kline(parse::ws_kline(data, symbol)?),
                    })
                })
                .collect::<Result<Vec<_>, ParseError>>()?,
            (Some("position"), None, None) => {
                let now = self.clock.now();
                let positions = array_field(frame, "data")?
                    .iter()
                    .map(|p| parse::position(p, now))
                    .collect::<Result<Vec<_>, _>>()?;
                vec![Routed {
                    key: SubscriptionKey::account(None),
                    event: MarketEvent::Account(AccountUpdate {
                        positions,
                        balance: None,
                    }),
                }]
            }
            (Some("wallet"), None, None) => {
                let timestamp =
                    opt_millis_field(frame, "creationTime")?.unwrap_or_else(|| self.clock.now());
                array_field(frame, "data")?
                    .iter()
                    .map(|w| {
                        Ok(Routed {
                            key: SubscriptionKey::account(None),
                            event: MarketEvent::Account(AccountUpdate {
                                positions: Vec::new(),
                                balance: Some(parse::wallet(w, timestamp)?),
                            }),
                        })
                    })
                    .collect::<Result<Vec<_>, ParseError>>()?
            }
            _ => return Ok(Inbound::Unknown(topic.to_string())),
        };
        Ok(Inbound::Data(routed))
    }

    fn route_op(frame: &Value, op: &str) -> Inbound {
        let success = frame.get("success").and_then(Value::as_bool).unwrap_or(true);
        let message = frame
            .get("ret_msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match op {
            "auth" => Inbound::Control(Control::AuthResult { success, message }),
            "ping" | "pong" => Inbound::Control(Control::Pong),
            _ if !success => Inbound::Control(Control::VenueError(message)),
            "subscribe" | "unsubscribe" => Inbound::Control(Control::Ack(format!(
                "{op} {}",
                frame.get("req_id").and_then(Value::as_str).unwrap_or_default()
            ))),
            other => Inbound::Unknown(other.to_string()),
        }
    }
}

impl VenueProtocol for BybitProtocol {
    fn venue(&self) -> &'static str {
        "bybit"
    }

    fn instrument(&self, asset: &Asset) -> String {
        bybit_symbol(asset)
    }

    fn asset(&self, instrument: &str) -> Asset {
        asset_from_bybit(instrument)
    }

    fn candle_interval(&self, interval: KlineInterval) -> Option<String> {
        Some(parse::interval_label(interval).to_string())
    }

    fn account_key(&self) -> Option<SubscriptionKey> {
        (self.socket == Socket::Private).then(|| SubscriptionKey::account(None))
    }

    fn subscribe_frames(&self, key: &SubscriptionKey, ids: &RequestIds) -> Option<Vec<Value>> {
        self.topics(key)
            .map(|topics| vec![Self::op("subscribe", topics, ids)])
    }

    fn unsubscribe_frames(&self, key: &SubscriptionKey, ids: &RequestIds) -> Option<Vec<Value>> {
        let topics = self.topics(key)?;
        if key.channel == Channel::OrderBook {
            self.books.lock().remove(&key.instrument);
        }
        Some(vec![Self::op("unsubscribe", topics, ids)])
    }

    fn auth_frame(&self, _token: Option<&AuthToken>, ids: &RequestIds) -> Option<Value> {
        let credentials = self.credentials.as_ref()?;
        let expires = self.clock.now().timestamp_millis() + WS_AUTH_TTL_MS;
        match credentials.ws_signature(expires) {
            Ok(signature) => Some(json!({
                "req_id": ids.next().to_string(),
                "op": "auth",
                "args": [credentials.api_key(), expires, signature],
            })),
            Err(e) => {
                tracing::error!(venue = "bybit", error = %e, "Cannot sign auth frame");
                None
            }
        }
    }

    fn route(&self, frame: &Value) -> Result<Inbound, ParseError> {
        if let Some(topic) = frame.get("topic").and_then(Value::as_str) {
            return self.route_topic(frame, topic);
        }
        match frame.get("op").and_then(Value::as_str) {
            Some(op) => Ok(Self::route_op(frame, op)),
            None => Ok(Inbound::Unknown("unclassified".to_string())),
        }
    }

    fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig::default()
    }

    fn ping_payload(&self) -> Option<String> {
        Some(PING.to_string())
    }
}

impl std::fmt::Debug for BybitProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitProtocol")
            .field("socket", &self.socket)
            .field("credentials", &self.credentials)
            .field("books", &self.books.lock().len())
            .finish_non_exhaustive()
    }
}
