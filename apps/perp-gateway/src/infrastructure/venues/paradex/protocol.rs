//! Paradex WebSocket protocol.
//!
//! JSON-RPC 2.0 idiom. Requests carry monotonically increasing ids and data
//! arrives as `{"method":"subscription","params":{"channel","data"}}`.
//! Candles are not streamed; they are built from the trades channel.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};

use super::parse;
use crate::application::ports::AuthToken;
use crate::domain::market::{AccountUpdate, Asset, KlineInterval, MarketEvent};
use crate::domain::subscription::{Channel, SubscriptionKey};
use crate::infrastructure::venues::parse::{ParseError, field, str_field};
use crate::infrastructure::venues::symbols::{
    asset_from_paradex, default_tick, paradex_market, paradex_tick_label,
};
use crate::infrastructure::websocket::{
    Control, Inbound, RequestIds, Routed, ValidatorConfig, VenueProtocol,
};

const NO_AUTH_ID: u64 = 0;

/// Paradex wire protocol.
#[derive(Debug, Default)]
pub struct ParadexProtocol {
    authenticated: bool,
    auth_id: AtomicU64,
}

impl ParadexProtocol {
    /// Public feeds only.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            authenticated: false,
            auth_id: AtomicU64::new(NO_AUTH_ID),
        }
    }

    /// Enable the private `positions` and `account` channels. Requires a
    /// JWT from the session's auth provider.
    #[must_use]
    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }

    fn channels(&self, key: &SubscriptionKey) -> Option<Vec<String>> {
        match key.channel {
            Channel::OrderBook => {
                let tick = paradex_tick_label(default_tick(&asset_from_paradex(&key.instrument)));
                Some(vec![format!(
                    "order_book.{}.snapshot@15@100ms@{tick}",
                    key.instrument
                )])
            }
            Channel::Trades => Some(vec![format!("trades.{}", key.instrument)]),
            Channel::Candle => Some(Vec::new()),
            Channel::Account if self.authenticated && Some(key) == self.account_key().as_ref() => {
                Some(vec!["positions".to_string(), "account".to_string()])
            }
            Channel::Account => None,
        }
    }

    fn requests(&self, method: &str, key: &SubscriptionKey, ids: &RequestIds) -> Option<Vec<Value>> {
        self.channels(key).map(|channels| {
            channels
                .into_iter()
                .map(|channel| {
                    json!({
                        "jsonrpc": "2.0",
                        "id": ids.next(),
                        "method": method,
                        "params": {"channel": channel},
                    })
                })
                .collect()
        })
    }

    fn is_auth_reply(&self, frame: &Value) -> bool {
        let expected = self.auth_id.load(Ordering::Acquire);
        expected != NO_AUTH_ID && frame.get("id").and_then(Value::as_u64) == Some(expected)
    }

    fn route_data(params: &Value) -> Result<Inbound, ParseError> {
        let channel = str_field(params, "channel")?;
        let data = field(params, "data")?;
        let (prefix, rest) = channel.split_once('.').unwrap_or((channel, ""));
        let routed = match prefix {
            "order_book" => {
                let book = parse::book_snapshot(data)?;
                let market = rest.split('.').next().unwrap_or_default();
                Routed {
                    key: SubscriptionKey::order_book(market),
                    event: MarketEvent::OrderBook(book),
                }
            }
            "trades" => {
                let trade = parse::trade(data)?;
                Routed {
                    key: SubscriptionKey::trades(rest),
                    event: MarketEvent::Trades(vec![trade]),
                }
            }
            "positions" => Routed {
                key: SubscriptionKey::account(None),
                event: MarketEvent::Account(AccountUpdate {
                    positions: vec![parse::position(data)?],
                    balance: None,
                }),
            },
            "account" => Routed {
                key: SubscriptionKey::account(None),
                event: MarketEvent::Account(AccountUpdate {
                    positions: Vec::new(),
                    balance: Some(parse::balance(data)?),
                }),
            },
            _ => return Ok(Inbound::Unknown(channel.to_string())),
        };
        Ok(Inbound::Data(vec![routed]))
    }

    fn error_message(error: &Value) -> String {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unspecified error");
        match error.get("code").and_then(Value::as_i64) {
            Some(code) => format!("{code}: {message}"),
            None => message.to_string(),
        }
    }
}

impl VenueProtocol for ParadexProtocol {
    fn venue(&self) -> &'static str {
        "paradex"
    }

    fn instrument(&self, asset: &Asset) -> String {
        paradex_market(asset)
    }

    fn asset(&self, instrument: &str) -> Asset {
        asset_from_paradex(instrument)
    }

    fn candle_interval(&self, interval: KlineInterval) -> Option<String> {
        KlineInterval::AGGREGATED
            .contains(&interval)
            .then(|| interval.as_str().to_string())
    }

    fn account_key(&self) -> Option<SubscriptionKey> {
        self.authenticated.then(|| SubscriptionKey::account(None))
    }

    fn subscribe_frames(&self, key: &SubscriptionKey, ids: &RequestIds) -> Option<Vec<Value>> {
        self.requests("subscribe", key, ids)
    }

    fn unsubscribe_frames(&self, key: &SubscriptionKey, ids: &RequestIds) -> Option<Vec<Value>> {
        self.requests("unsubscribe", key, ids)
    }

    fn auth_frame(&self, token: Option<&AuthToken>, ids: &RequestIds) -> Option<Value> {
        let token = token?;
        let id = ids.next();
        self.auth_id.store(id, Ordering::Release);
        Some(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "auth",
            "params": {"bearer": token.token},
        }))
    }

    fn route(&self, frame: &Value) -> Result<Inbound, ParseError> {
        if frame.get("method").and_then(Value::as_str) == Some("subscription") {
            return Self::route_data(field(frame, "params")?);
        }
        if let Some(error) = frame.get("error") {
            let message = Self::error_message(error);
            if self.is_auth_reply(frame) {
                return Ok(Inbound::Control(Control::AuthResult {
                    success: false,
                    message,
                }));
            }
            return Ok(Inbound::Control(Control::VenueError(message)));
        }
        if let Some(result) = frame.get("result") {
            if self.is_auth_reply(frame) {
                return Ok(Inbound::Control(Control::AuthResult {
                    success: true,
                    message: result.to_string(),
                }));
            }
            let channel = result
                .get("channel")
                .and_then(Value::as_str)
                .map_or_else(|| result.to_string(), str::to_string);
            return Ok(Inbound::Control(Control::Ack(channel)));
        }
        Ok(Inbound::Unknown(
            frame
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or("unclassified")
                .to_string(),
        ))
    }

    fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            required_fields: vec!["jsonrpc".to_string()],
            ..ValidatorConfig::default()
        }
    }

    fn native_klines(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn token() -> AuthToken {
        AuthToken::new("jwt-abc", Some(Utc::now() + chrono::Duration::minutes(5)))
    }

    #[test]
    fn subscribe_frames_use_increasing_ids() {
        let protocol = ParadexProtocol::new();
        let ids = RequestIds::new();
        let btc = Asset::new("BTC");

        let book = protocol.subscribe_frames(&protocol.order_book_key(&btc), &ids).unwrap();
        assert_eq!(
            book,
            vec![json!({
                "jsonrpc": "2.0", "id": 1, "method": "subscribe",
                "params": {"channel": "order_book.BTC-USD-PERP.snapshot@15@100ms@1"}
            })]
        );
        let trades = protocol.subscribe_frames(&protocol.trades_key(&Asset::new("SOL")), &ids).unwrap();
        assert_eq!(trades[0]["id"], 2);
        assert_eq!(trades[0]["params"]["channel"], "trades.SOL-USD-PERP");
    }

    #[test]
    fn candles_are_synthesized() {
        let protocol = ParadexProtocol::new();
        assert!(!protocol.native_klines());
        let key = protocol.candle_key(&Asset::new("ETH"), KlineInterval::FiveMinutes).unwrap();
        assert_eq!(protocol.subscribe_frames(&key, &RequestIds::new()), Some(Vec::new()));
        assert!(protocol.candle_key(&Asset::new("ETH"), KlineInterval::OneDay).is_none());
    }

    #[test]
    fn account_requires_authentication() {
        let ids = RequestIds::new();
        let public = ParadexProtocol::new();
        assert!(public.account_key().is_none());
        assert!(public.subscribe_frames(&SubscriptionKey::account(None), &ids).is_none());
        assert!(public.auth_frame(None, &ids).is_none());

        let private = ParadexProtocol::new().authenticated();
        let frames = private.subscribe_frames(&private.account_key().unwrap(), &ids).unwrap();
        let channels: Vec<_> = frames.iter().map(|f| f["params"]["channel"].clone()).collect();
        assert_eq!(channels, vec![json!("positions"), json!("account")]);
    }

    #[test]
    fn auth_reply_is_matched_by_id() {
        let protocol = ParadexProtocol::new().authenticated();
        let ids = RequestIds::new();
        let frame = protocol.auth_frame(Some(&token()), &ids).unwrap();
        assert_eq!(frame["params"]["bearer"], "jwt-abc");
        let id = frame["id"].as_u64().unwrap();

        let ok = json!({"jsonrpc": "2.0", "id": id, "result": {"node_id": "n1"}});
        assert!(matches!(
            protocol.route(&ok).unwrap(),
            Inbound::Control(Control::AuthResult { success: true, .. })
        ));
        let denied = json!({"jsonrpc": "2.0", "id": id, "error": {"code": 40110, "message": "invalid bearer"}});
        assert_eq!(
            protocol.route(&denied).unwrap(),
            Inbound::Control(Control::AuthResult {
                success: false,
                message: "40110: invalid bearer".into()
            })
        );
        let other = json!({"jsonrpc": "2.0", "id": id + 1, "error": {"message": "unknown channel"}});
        assert_eq!(
            protocol.route(&other).unwrap(),
            Inbound::Control(Control::VenueError("unknown channel".into()))
        );
    }

    #[test]
    fn routes_trades_and_books() {
        let protocol = ParadexProtocol::new();
        let trade = json!({
            "jsonrpc": "2.0", "method": "subscription",
            "params": {"channel": "trades.ETH-USD-PERP", "data": {
                "id": "t1", "market": "ETH-USD-PERP", "side": "SELL",
                "size": "0.5", "price": "2000.5", "created_at": 1_700_000_000_000_i64
            }}
        });
        let Inbound::Data(routed) = protocol.route(&trade).unwrap() else {
            panic!("expected data");
        };
        assert_eq!(routed[0].key, SubscriptionKey::trades("ETH-USD-PERP"));

        let book = json!({
            "jsonrpc": "2.0", "method": "subscription",
            "params": {"channel": "order_book.ETH-USD-PERP.snapshot@15@100ms@1", "data": {
                "market": "ETH-USD-PERP", "inserts": [{"side": "BUY", "price": "1999", "size": "1"}]
            }}
        });
        let Inbound::Data(routed) = protocol.route(&book).unwrap() else {
            panic!("expected data");
        };
        assert_eq!(routed[0].key, SubscriptionKey::order_book("ETH-USD-PERP"));
        let MarketEvent::OrderBook(book) = &routed[0].event else {
            panic!("expected book");
        };
        assert_eq!(book.bids[0].price, dec!(1999));
    }

    #[test]
    fn subscription_result_is_an_ack() {
        let ack = json!({"jsonrpc": "2.0", "id": 4, "result": {"channel": "trades.BTC-USD-PERP"}});
        assert_eq!(
            ParadexProtocol::new().route(&ack).unwrap(),
            Inbound::Control(Control::Ack("trades.BTC-USD-PERP".into()))
        );
    }

    #[test]
    fn unknown_channels_are_reported() {
        let frame = json!({
            "jsonrpc": "2.0", "method": "subscription",
            "params": {"channel": "fills.BTC-USD-PERP", "data": {}}
        });
        assert_eq!(
            ParadexProtocol::new().route(&frame).unwrap(),
            Inbound::Unknown("fills.BTC-USD-PERP".into())
        );
    }
}
