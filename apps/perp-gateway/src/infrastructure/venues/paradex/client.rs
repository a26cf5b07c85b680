//! Paradex REST connector.
//!
//! Public market data needs no credentials. Private endpoints carry the
//! session JWT as a bearer token, and order bodies are additionally signed
//! by an [`ActionSigner`] that returns `signature` / `signature_timestamp`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Value, json};

use super::parse;
use crate::application::ports::{ActionSigner, Clock, Connector, ConnectorResult};
use crate::domain::market::{
    AccountBalance, Asset, ConnectorInfo, FundingRate, Kline, KlineInterval, LimitOrderRequest,
    MarketOrderRequest, Order, OrderAck, OrderBook, OrderStatus, OrderType, Position, Side,
    TimeInForce,
};
use crate::error::GatewayError;
use crate::infrastructure::rest::{RestClient, RestRequest};
use crate::infrastructure::venues::parse::{ParseError, decimal_field, opt_decimal_field, str_field};
use crate::infrastructure::venues::symbols::{asset_from_paradex, paradex_market};
use crate::infrastructure::websocket::AuthManager;

/// Paradex REST connector.
pub struct ParadexConnector {
    rest: RestClient,
    clock: Arc<dyn Clock>,
    auth: Option<Arc<AuthManager>>,
    signer: Option<Arc<dyn ActionSigner>>,
    testnet: bool,
}

impl ParadexConnector {
    /// Public-data connector.
    #[must_use]
    pub fn new(rest: RestClient, clock: Arc<dyn Clock>, testnet: bool) -> Self {
        Self {
            rest,
            clock,
            auth: None,
            signer: None,
            testnet,
        }
    }

    /// JWT source for private endpoints. Shared with the stream session.
    #[must_use]
    pub fn with_auth(mut self, auth: Arc<AuthManager>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Order signer.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn ActionSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    async fn public(&self, request: RestRequest) -> ConnectorResult<Value> {
        Ok(self.rest.send(&request).await?)
    }

    async fn private(&self, request: RestRequest) -> ConnectorResult<Value> {
        let auth = self
            .auth
            .as_ref()
            .ok_or_else(|| GatewayError::Auth("paradex JWT provider not configured".into()))?;
        let token = auth.token().await?;
        Ok(self.rest.send(&request.bearer(&token.token)).await?)
    }

    async fn summary(&self, market: &str) -> ConnectorResult<Vec<Value>> {
        let response = self
            .public(RestRequest::get("/markets/summary").query("market", market))
            .await?;
        Ok(parse::results(&response)?.to_vec())
    }

    async fn submit_order(&self, mut order: Value) -> ConnectorResult<OrderAck> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| GatewayError::Auth("paradex signer not configured".into()))?;
        let signature = signer.sign(&order).await?;
        let (Value::Object(fields), Value::Object(body)) = (signature, &mut order) else {
            return Err(GatewayError::Auth("paradex signer returned a non-object".into()));
        };
        body.extend(fields);

        tracing::info!(
            venue = "paradex",
            market = %order["market"],
            side = %order["side"],
            kind = %order["type"],
            size = %order["size"],
            "Placing order"
        );
        let response = self.private(RestRequest::post("/orders").json(order)).await?;
        order_ack(&response)
    }
}

fn order_ack(response: &Value) -> ConnectorResult<OrderAck> {
    let status = match str_field(response, "status")? {
        "NEW" | "OPEN" | "UNTRIGGERED" => OrderStatus::Open,
        "CLOSED" => match response.get("cancel_reason").and_then(Value::as_str) {
            Some(reason) if !reason.is_empty() => {
                return Err(GatewayError::Rejected(reason.to_string()));
            }
            _ => OrderStatus::Filled,
        },
        other => return Err(ParseError::invalid_value("status", other).into()),
    };
    let size = decimal_field(response, "size")?;
    let remaining = opt_decimal_field(response, "remaining_size")?.unwrap_or(size);
    let filled_quantity = size
        .checked_sub(remaining)
        .ok_or_else(|| ParseError::invalid_value("remaining_size", remaining))?;
    Ok(OrderAck {
        order_id: str_field(response, "id")?.to_string(),
        client_order_id: response
            .get("client_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        status,
        filled_quantity,
        average_price: opt_decimal_field(response, "avg_fill_price")?.filter(|p| !p.is_zero()),
    })
}

const fn side_label(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

const fn instruction(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Gtc => "GTC",
        TimeInForce::Ioc => "IOC",
        TimeInForce::PostOnly => "POST_ONLY",
    }
}

fn resolution(interval: KlineInterval) -> ConnectorResult<u32> {
    match interval {
        KlineInterval::OneMinute => Ok(1),
        KlineInterval::FiveMinutes => Ok(5),
        KlineInterval::FifteenMinutes => Ok(15),
        KlineInterval::OneHour => Ok(60),
        other => Err(GatewayError::InvalidRequest(format!(
            "paradex has no {other} klines"
        ))),
    }
}

fn flags(reduce_only: bool) -> Value {
    if reduce_only {
        json!(["REDUCE_ONLY"])
    } else {
        json!([])
    }
}

#[async_trait]
impl Connector for ParadexConnector {
    fn connector_info(&self) -> ConnectorInfo {
        ConnectorInfo {
            venue: "paradex".to_string(),
            supported_order_types: vec![OrderType::Limit, OrderType::Market],
            max_leverage: Decimal::from(50),
            supports_perpetuals: true,
            supports_spot: false,
            quote_currency: "USD".to_string(),
            testnet: self.testnet,
        }
    }

    async fn fetch_klines(
        &self,
        asset: &Asset,
        interval: KlineInterval,
        limit: usize,
    ) -> ConnectorResult<Vec<Kline>> {
        let market = paradex_market(asset);
        let now = self.clock.now();
        let end = now.timestamp_millis();
        let span = interval
            .seconds()
            .saturating_mul(1_000)
            .saturating_mul(i64::try_from(limit).unwrap_or(i64::MAX));
        let response = self
            .public(
                RestRequest::get("/markets/klines")
                    .query("symbol", &market)
                    .query("resolution", resolution(interval)?)
                    .query("start_at", end.saturating_sub(span))
                    .query("end_at", end),
            )
            .await?;
        let mut klines = parse::results(&response)?
            .iter()
            .map(|row| parse::kline_row(row, &market, interval, now))
            .collect::<Result<Vec<_>, _>>()?;
        klines.sort_by_key(|k| k.open_time);
        if klines.len() > limit {
            klines.drain(..klines.len() - limit);
        }
        Ok(klines)
    }

    async fn fetch_price(&self, asset: &Asset) -> ConnectorResult<Decimal> {
        let rows = self.summary(&paradex_market(asset)).await?;
        let row = rows
            .first()
            .ok_or_else(|| GatewayError::NotFound(format!("paradex has no market {asset}")))?;
        match opt_decimal_field(row, "mark_price")? {
            Some(mark) => Ok(mark),
            None => Ok(decimal_field(row, "last_traded_price")?),
        }
    }

    async fn fetch_order_book(&self, asset: &Asset, depth: usize) -> ConnectorResult<OrderBook> {
        let response = self
            .public(
                RestRequest::get(format!("/orderbook/{}", paradex_market(asset)))
                    .query("depth", depth),
            )
            .await?;
        let mut book = parse::book_rest(&response)?;
        book.bids.truncate(depth);
        book.asks.truncate(depth);
        Ok(book)
    }

    async fn fetch_current_funding_rates(
        &self,
        assets: &[Asset],
    ) -> ConnectorResult<Vec<FundingRate>> {
        let now = self.clock.now();
        let rows = self.summary("ALL").await?;
        rows.iter()
            .filter_map(|row| {
                let symbol = row
                    .get("symbol")
                    .and_then(Value::as_str)
                    .filter(|s| s.ends_with("-USD-PERP"))?;
                let asset = asset_from_paradex(symbol);
                (assets.is_empty() || assets.contains(&asset)).then_some((asset, row))
            })
            .map(|(asset, row)| {
                Ok(FundingRate {
                    asset,
                    rate: decimal_field(row, "funding_rate")?,
                    premium: None,
                    next_funding_time: None,
                    timestamp: now,
                })
            })
            .collect()
    }

    async fn fetch_historical_funding_rates(
        &self,
        asset: &Asset,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ConnectorResult<Vec<FundingRate>> {
        let response = self
            .public(
                RestRequest::get("/funding/data")
                    .query("market", paradex_market(asset))
                    .query("start_at", start.timestamp_millis())
                    .query("end_at", end.timestamp_millis()),
            )
            .await?;
        let mut rates = parse::results(&response)?
            .iter()
            .map(parse::funding)
            .collect::<Result<Vec<_>, _>>()?;
        rates.sort_by_key(|r| r.timestamp);
        Ok(rates)
    }

    async fn place_limit_order(&self, request: &LimitOrderRequest) -> ConnectorResult<OrderAck> {
        let mut order = json!({
            "market": paradex_market(&request.asset),
            "side": side_label(request.side),
            "type": "LIMIT",
            "size": request.quantity.normalize().to_string(),
            "price": request.price.normalize().to_string(),
            "instruction": instruction(request.time_in_force),
            "flags": flags(request.reduce_only),
        });
        if let Some(id) = &request.client_order_id {
            order["client_id"] = json!(id);
        }
        self.submit_order(order).await
    }

    async fn place_market_order(
        &self,
        request: &MarketOrderRequest,
    ) -> ConnectorResult<OrderAck> {
        self.submit_order(json!({
            "market": paradex_market(&request.asset),
            "side": side_label(request.side),
            "type": "MARKET",
            "size": request.quantity.normalize().to_string(),
            "instruction": "IOC",
            "flags": flags(request.reduce_only),
        }))
        .await
    }

    async fn cancel_order(&self, _asset: &Asset, order_id: &str) -> ConnectorResult<()> {
        self.private(RestRequest::delete(format!("/orders/{order_id}")))
            .await
            .map(drop)
    }

    async fn get_open_orders(&self, asset: Option<&Asset>) -> ConnectorResult<Vec<Order>> {
        let mut request = RestRequest::get("/orders");
        if let Some(asset) = asset {
            request = request.query("market", paradex_market(asset));
        }
        let response = self.private(request).await?;
        Ok(parse::results(&response)?
            .iter()
            .map(parse::order)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn get_account_balance(&self) -> ConnectorResult<AccountBalance> {
        let response = self.private(RestRequest::get("/account")).await?;
        Ok(parse::balance(&response)?)
    }

    async fn get_positions(&self) -> ConnectorResult<Vec<Position>> {
        let response = self.private(RestRequest::get("/positions")).await?;
        let positions = parse::results(&response)?
            .iter()
            .filter(|p| p.get("status").and_then(Value::as_str) != Some("CLOSED"))
            .map(parse::position)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(positions.into_iter().filter(|p| !p.size.is_zero()).collect())
    }
}

impl std::fmt::Debug for ParadexConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParadexConnector")
            .field("rest", &self.rest)
            .field("auth", &self.auth.is_some())
            .field("signer", &self.signer.is_some())
            .field("testnet", &self.testnet)
            .finish_non_exhaustive()
    }
}
