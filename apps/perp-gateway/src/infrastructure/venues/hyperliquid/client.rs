//! Hyperliquid REST connector.
//!
//! Reads go to `POST /info` with a `{"type": ...}` body. Orders and
//! cancels go to `POST /exchange` as signed actions; signing is delegated
//! to an [`ActionSigner`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::sync::OnceCell;

use super::parse;
use crate::application::ports::{ActionSigner, Clock, Connector, ConnectorResult};
use crate::domain::market::{
    AccountBalance, AccountUpdate, Asset, ConnectorInfo, FundingRate, Kline, KlineInterval,
    LimitOrderRequest, MarketOrderRequest, Order, OrderAck, OrderBook, OrderStatus, OrderType,
    Position, Side, TimeInForce,
};
use crate::error::GatewayError;
use crate::infrastructure::rest::{RestClient, RestRequest};
use crate::infrastructure::venues::parse::{
    ParseError, array_field, as_array, decimal, decimal_field, field, opt_decimal_field,
    str_field,
};
use crate::infrastructure::venues::symbols::round_significant;

const PRICE_FIGURES: u32 = 5;
const MAX_PRICE_DECIMALS: u32 = 6;

struct OrderSpec<'a> {
    asset: &'a Asset,
    side: Side,
    price: Decimal,
    quantity: Decimal,
    tif: &'static str,
    reduce_only: bool,
    client_order_id: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
struct AssetMeta {
    index: u32,
    size_decimals: u32,
}

/// Hyperliquid REST connector.
pub struct HyperliquidConnector {
    rest: RestClient,
    clock: Arc<dyn Clock>,
    user: Option<String>,
    vault: Option<String>,
    signer: Option<Arc<dyn ActionSigner>>,
    slippage: Decimal,
    testnet: bool,
    meta: OnceCell<HashMap<String, AssetMeta>>,
}

impl HyperliquidConnector {
    /// Public-data connector.
    #[must_use]
    pub fn new(rest: RestClient, clock: Arc<dyn Clock>, slippage: Decimal, testnet: bool) -> Self {
        Self {
            rest,
            clock,
            user: None,
            vault: None,
            signer: None,
            slippage,
            testnet,
            meta: OnceCell::new(),
        }
    }

    /// Account address used for account queries.
    #[must_use]
    pub fn with_user(mut self, address: impl Into<String>) -> Self {
        self.user = Some(address.into());
        self
    }

    /// Trade on behalf of a vault.
    #[must_use]
    pub fn with_vault(mut self, address: impl Into<String>) -> Self {
        self.vault = Some(address.into());
        self
    }

    /// Signer for orders and cancels.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn ActionSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    async fn info(&self, body: Value) -> ConnectorResult<Value> {
        Ok(self.rest.send(&RestRequest::post("/info").json(body)).await?)
    }

    fn user(&self) -> ConnectorResult<&str> {
        self.vault
            .as_deref()
            .or(self.user.as_deref())
            .ok_or_else(|| GatewayError::Auth("hyperliquid account address not configured".into()))
    }

    async fn asset_meta(&self, asset: &Asset) -> ConnectorResult<AssetMeta> {
        let table = self
            .meta
            .get_or_try_init(|| async {
                let meta = self.info(json!({"type": "meta"})).await?;
                let table = array_field(&meta, "universe")?
                    .iter()
                    .enumerate()
                    .map(|(index, entry)| {
                        let size_decimals = entry
                            .get("szDecimals")
                            .and_then(Value::as_u64)
                            .and_then(|d| u32::try_from(d).ok())
                            .unwrap_or_default();
                        Ok((
                            str_field(entry, "name")?.to_string(),
                            AssetMeta {
                                index: u32::try_from(index)
                                    .map_err(|_| ParseError::invalid_value("universe", index))?,
                                size_decimals,
                            },
                        ))
                    })
                    .collect::<Result<HashMap<_, _>, ParseError>>()?;
                Ok::<_, GatewayError>(table)
            })
            .await?;
        table
            .get(asset.as_str())
            .copied()
            .ok_or_else(|| GatewayError::NotFound(format!("hyperliquid has no market {asset}")))
    }

    async fn mids(&self) -> ConnectorResult<Value> {
        self.info(json!({"type": "allMids"})).await
    }

    async fn clearinghouse(&self) -> ConnectorResult<AccountUpdate> {
        let state = self
            .info(json!({"type": "clearinghouseState", "user": self.user()?}))
            .await?;
        Ok(parse::clearinghouse(&state, self.clock.now())?)
    }

    async fn exchange(&self, action: Value) -> ConnectorResult<Value> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| GatewayError::Auth("hyperliquid signer not configured".into()))?;
        let nonce = self.clock.now().timestamp_millis();
        let mut payload = json!({"action": action, "nonce": nonce});
        if let Some(vault) = &self.vault {
            payload["vaultAddress"] = json!(vault);
        }
        let signature = signer
            .sign(&payload)
            .await
            .map_err(|e| GatewayError::Auth(e.to_string()))?;
        payload["signature"] = signature;

        let response: Value = self
            .rest
            .send(&RestRequest::post("/exchange").json(payload))
            .await?;
        if response.get("status").and_then(Value::as_str) == Some("ok") {
            Ok(field(&response, "response")?.clone())
        } else {
            Err(GatewayError::Rejected(
                response
                    .get("response")
                    .map_or_else(|| response.to_string(), venue_message),
            ))
        }
    }

    async fn submit_order(&self, spec: OrderSpec<'_>) -> ConnectorResult<OrderAck> {
        let OrderSpec {
            asset,
            side,
            price,
            quantity,
            tif,
            reduce_only,
            client_order_id,
        } = spec;
        let meta = self.asset_meta(asset).await?;
        let price_decimals = MAX_PRICE_DECIMALS.saturating_sub(meta.size_decimals);
        let price = round_significant(price, PRICE_FIGURES, price_decimals)?;
        let size = quantity.round_dp(meta.size_decimals).normalize();
        if size.is_zero() {
            return Err(GatewayError::InvalidRequest(format!(
                "quantity {quantity} rounds to zero for {asset}"
            )));
        }

        let mut order = json!({
            "a": meta.index,
            "b": side.is_buy(),
            "p": price.to_string(),
            "s": size.to_string(),
            "r": reduce_only,
            "t": {"limit": {"tif": tif}},
        });
        if let Some(cloid) = client_order_id {
            order["c"] = json!(cloid);
        }

        tracing::info!(venue = "hyperliquid", %asset, ?side, %price, %size, tif, "Placing order");
        let response = self
            .exchange(json!({"type": "order", "orders": [order], "grouping": "na"}))
            .await?;
        let status = response
            .pointer("/data/statuses/0")
            .ok_or_else(|| ParseError::MissingField("statuses".into()))?;
        order_ack(status, client_order_id.map(str::to_string))
    }
}

fn venue_message(value: &Value) -> String {
    value
        .as_str()
        .map_or_else(|| value.to_string(), str::to_string)
}

fn order_ack(status: &Value, client_order_id: Option<String>) -> ConnectorResult<OrderAck> {
    if let Some(error) = status.get("error") {
        return Err(GatewayError::Rejected(venue_message(error)));
    }
    if let Some(resting) = status.get("resting") {
        return Ok(OrderAck {
            order_id: field(resting, "oid")?.to_string(),
            client_order_id,
            status: OrderStatus::Open,
            filled_quantity: Decimal::ZERO,
            average_price: None,
        });
    }
    let filled = field(status, "filled")?;
    Ok(OrderAck {
        order_id: field(filled, "oid")?.to_string(),
        client_order_id,
        status: OrderStatus::Filled,
        filled_quantity: decimal_field(filled, "totalSz")?,
        average_price: Some(decimal_field(filled, "avgPx")?),
    })
}

const fn tif_label(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Gtc => "Gtc",
        TimeInForce::Ioc => "Ioc",
        TimeInForce::PostOnly => "Alo",
    }
}

#[async_trait]
impl Connector for HyperliquidConnector {
    fn connector_info(&self) -> ConnectorInfo {
        ConnectorInfo {
            venue: "hyperliquid".to_string(),
            supported_order_types: vec![OrderType::Limit, OrderType::Market],
            max_leverage: Decimal::from(50),
            supports_perpetuals: true,
            supports_spot: false,
            quote_currency: "USDC".to_string(),
            testnet: self.testnet,
        }
    }

    async fn fetch_klines(
        &self,
        asset: &Asset,
        interval: KlineInterval,
        limit: usize,
    ) -> ConnectorResult<Vec<Kline>> {
        let now = self.clock.now();
        let span = interval
            .seconds()
            .saturating_mul(1_000)
            .saturating_mul(i64::try_from(limit).unwrap_or(i64::MAX));
        let end = now.timestamp_millis();
        let response = self
            .info(json!({
                "type": "candleSnapshot",
                "req": {
                    "coin": asset.as_str(),
                    "interval": interval.as_str(),
                    "startTime": end.saturating_sub(span),
                    "endTime": end,
                },
            }))
            .await?;
        let mut klines = as_array(&response, "candles")?
            .iter()
            .map(|c| parse::candle(c, now))
            .collect::<Result<Vec<_>, _>>()?;
        klines.sort_by_key(|k| k.open_time);
        if klines.len() > limit {
            klines.drain(..klines.len() - limit);
        }
        Ok(klines)
    }

    async fn fetch_price(&self, asset: &Asset) -> ConnectorResult<Decimal> {
        let mids = self.mids().await?;
        let mid = mids
            .get(asset.as_str())
            .ok_or_else(|| GatewayError::NotFound(format!("no mid for {asset}")))?;
        Ok(decimal(mid, asset.as_str())?)
    }

    async fn fetch_order_book(&self, asset: &Asset, depth: usize) -> ConnectorResult<OrderBook> {
        let response = self
            .info(json!({"type": "l2Book", "coin": asset.as_str()}))
            .await?;
        let mut book = parse::order_book(&response)?;
        book.bids.truncate(depth);
        book.asks.truncate(depth);
        Ok(book)
    }

    async fn fetch_current_funding_rates(
        &self,
        assets: &[Asset],
    ) -> ConnectorResult<Vec<FundingRate>> {
        let response = self.info(json!({"type": "metaAndAssetCtxs"})).await?;
        let parts = as_array(&response, "metaAndAssetCtxs")?;
        let (Some(meta), Some(contexts)) = (parts.first(), parts.get(1)) else {
            return Err(ParseError::MissingField("metaAndAssetCtxs".into()).into());
        };
        let universe = array_field(meta, "universe")?;
        let contexts = as_array(contexts, "assetCtxs")?;
        let now = self.clock.now();
        let next_hour = KlineInterval::OneHour.bucket_start(now) + chrono::Duration::hours(1);

        universe
            .iter()
            .zip(contexts)
            .filter_map(|(entry, ctx)| {
                let name = entry.get("name").and_then(Value::as_str)?;
                let asset = Asset::new(name);
                (assets.is_empty() || assets.contains(&asset)).then_some((asset, ctx))
            })
            .map(|(asset, ctx)| {
                Ok(FundingRate {
                    asset,
                    rate: decimal_field(ctx, "funding")?,
                    premium: opt_decimal_field(ctx, "premium")?,
                    next_funding_time: Some(next_hour),
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
            .info(json!({
                "type": "fundingHistory",
                "coin": asset.as_str(),
                "startTime": start.timestamp_millis(),
                "endTime": end.timestamp_millis(),
            }))
            .await?;
        Ok(as_array(&response, "fundingHistory")?
            .iter()
            .map(parse::funding)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn place_limit_order(&self, request: &LimitOrderRequest) -> ConnectorResult<OrderAck> {
        self.submit_order(OrderSpec {
            asset: &request.asset,
            side: request.side,
            price: request.price,
            quantity: request.quantity,
            tif: tif_label(request.time_in_force),
            reduce_only: request.reduce_only,
            client_order_id: request.client_order_id.as_deref(),
        })
        .await
    }

    async fn place_market_order(
        &self,
        request: &MarketOrderRequest,
    ) -> ConnectorResult<OrderAck> {
        let mid = self.fetch_price(&request.asset).await?;
        let slippage = request.slippage.unwrap_or(self.slippage);
        let factor = if request.side.is_buy() {
            Decimal::ONE.checked_add(slippage)
        } else {
            Decimal::ONE.checked_sub(slippage)
        };
        let price = factor.and_then(|f| mid.checked_mul(f)).ok_or_else(|| {
            GatewayError::InvalidRequest(format!("slippage {slippage} overflows price {mid}"))
        })?;
        self.submit_order(OrderSpec {
            asset: &request.asset,
            side: request.side,
            price,
            quantity: request.quantity,
            tif: "Ioc",
            reduce_only: request.reduce_only,
            client_order_id: None,
        })
        .await
    }

    async fn cancel_order(&self, asset: &Asset, order_id: &str) -> ConnectorResult<()> {
        let meta = self.asset_meta(asset).await?;
        let oid: u64 = order_id
            .parse()
            .map_err(|_| GatewayError::InvalidRequest(format!("invalid order id {order_id}")))?;
        let response = self
            .exchange(json!({"type": "cancel", "cancels": [{"a": meta.index, "o": oid}]}))
            .await?;
        match response.pointer("/data/statuses/0") {
            Some(Value::String(s)) if s == "success" => Ok(()),
            Some(status) => Err(GatewayError::Rejected(
                status.get("error").map_or_else(|| status.to_string(), venue_message),
            )),
            None => Err(ParseError::MissingField("statuses".into()).into()),
        }
    }

    async fn get_open_orders(&self, asset: Option<&Asset>) -> ConnectorResult<Vec<Order>> {
        let response = self
            .info(json!({"type": "frontendOpenOrders", "user": self.user()?}))
            .await?;
        let orders = as_array(&response, "openOrders")?
            .iter()
            .map(parse::open_order)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orders
            .into_iter()
            .filter(|o| asset.is_none_or(|a| &o.asset == a))
            .collect())
    }

    async fn get_account_balance(&self) -> ConnectorResult<AccountBalance> {
        self.clearinghouse()
            .await?
            .balance
            .ok_or_else(|| ParseError::MissingField("marginSummary".into()).into())
    }

    async fn get_positions(&self) -> ConnectorResult<Vec<Position>> {
        Ok(self
            .clearinghouse()
            .await?
            .positions
            .into_iter()
            .filter(|p| !p.size.is_zero())
            .collect())
    }
}

impl std::fmt::Debug for HyperliquidConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperliquidConnector")
            .field("rest", &self.rest)
            .field("user", &self.user)
            .field("vault", &self.vault)
            .field("signer", &self.signer.is_some())
            .field("slippage", &self.slippage)
            .field("testnet", &self.testnet)
            .finish_non_exhaustive()
    }
}
