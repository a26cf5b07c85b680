//! Bybit V5 REST connector (USDT linear perpetuals).
//!
//! Every response is a `{retCode, retMsg, result}` envelope; a non-zero
//! `retCode` is mapped onto the gateway error kinds. Private calls are
//! signed with the `X-BAPI-*` headers by the client's [`RequestSigner`].
//!
//! [`RequestSigner`]: crate::infrastructure::rest::RequestSigner

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Value, json};

use super::parse;
use crate::application::ports::{Clock, Connector, ConnectorResult};
use crate::domain::market::{
    AccountBalance, Asset, ConnectorInfo, FundingRate, Kline, KlineInterval, LimitOrderRequest,
    MarketOrderRequest, Order, OrderAck, OrderBook, OrderStatus, OrderType, Position, Side,
    TimeInForce,
};
use crate::error::GatewayError;
use crate::infrastructure::rest::{RestClient, RestRequest};
use crate::infrastructure::venues::parse::{
    ParseError, array_field, decimal_field, field, str_field,
};
use crate::infrastructure::venues::symbols::{asset_from_bybit, bybit_symbol};

const CATEGORY: &str = "linear";
const SETTLE_COIN: &str = "USDT";
const MAX_KLINES: usize = 1_000;
const MAX_BOOK_DEPTH: usize = 500;

/// Bybit REST connector.
pub struct BybitConnector {
    rest: RestClient,
    clock: Arc<dyn Clock>,
    slippage: Option<Decimal>,
    testnet: bool,
}

impl BybitConnector {
    /// Connector over `rest`. Private calls need a signer on the client.
    #[must_use]
    pub fn new(rest: RestClient, clock: Arc<dyn Clock>, testnet: bool) -> Self {
        Self {
            rest,
            clock,
            slippage: None,
            testnet,
        }
    }

    /// Slippage cap for market orders that do not set one.
    #[must_use]
    pub const fn with_slippage(mut self, slippage: Decimal) -> Self {
        self.slippage = Some(slippage);
        self
    }

    async fn call(&self, request: RestRequest) -> ConnectorResult<Value> {
        let envelope: Value = self.rest.send(&request).await?;
        let code = envelope.get("retCode").and_then(Value::as_i64).unwrap_or(-1);
        if code == 0 {
            return Ok(field(&envelope, "result")?.clone());
        }
        let message = envelope
            .get("retMsg")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        Err(ret_code_error(code, message))
    }

    async fn list(&self, request: RestRequest) -> ConnectorResult<Vec<Value>> {
        let result = self.call(request).await?;
        Ok(array_field(&result, "list")?.to_vec())
    }

    async fn ticker(&self, asset: &Asset) -> ConnectorResult<Value> {
        self.list(
            RestRequest::get("/v5/market/tickers")
                .query("category", CATEGORY)
                .query("symbol", bybit_symbol(asset)),
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::NotFound(format!("bybit has no market {asset}")))
    }

    async fn submit_order(&self, body: Value) -> ConnectorResult<OrderAck> {
        tracing::info!(
            venue = "bybit",
            symbol = %body["symbol"],
            side = %body["side"],
            kind = %body["orderType"],
            qty = %body["qty"],
            "Placing order"
        );
        let result = self
            .call(RestRequest::post("/v5/order/create").json(body).signed())
            .await?;
        Ok(OrderAck {
            order_id: str_field(&result, "orderId")?.to_string(),
            client_order_id: result
                .get("orderLinkId")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            status: OrderStatus::Open,
            filled_quantity: Decimal::ZERO,
            average_price: None,
        })
    }
}

fn ret_code_error(code: i64, message: &str) -> GatewayError {
    match code {
        10006 | 10018 => GatewayError::RateLimited,
        10003 | 10004 | 10005 | 10007 | 33004 => GatewayError::Auth(message.to_string()),
        110_001 => GatewayError::NotFound(message.to_string()),
        _ => GatewayError::Rejected(format!("{code}: {message}")),
    }
}

const fn side_label(side: Side) -> &'static str {
    match side {
        Side::Buy => "Buy",
        Side::Sell => "Sell",
    }
}

const fn tif_label(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Gtc => "GTC",
        TimeInForce::Ioc => "IOC",
        TimeInForce::PostOnly => "PostOnly",
    }
}

#[async_trait]
impl Connector for BybitConnector {
    fn connector_info(&self) -> ConnectorInfo {
        ConnectorInfo {
            venue: "bybit".to_string(),
            supported_order_types: vec![OrderType::Limit, OrderType::Market],
            max_leverage: Decimal::from(100),
            supports_perpetuals: true,
            supports_spot: false,
            quote_currency: SETTLE_COIN.to_string(),
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
        let rows = self
            .list(
                RestRequest::get("/v5/market/kline")
                    .query("category", CATEGORY)
                    .query("symbol", bybit_symbol(asset))
                    .query("interval", parse::interval_label(interval))
                    .query("limit", limit.clamp(1, MAX_KLINES)),
            )
            .await?;
        let mut klines = rows
            .iter()
            .map(|row| parse::rest_kline(row, asset, interval, now))
            .collect::<Result<Vec<_>, _>>()?;
        klines.sort_by_key(|k| k.open_time);
        if klines.len() > limit {
            klines.drain(..klines.len() - limit);
        }
        Ok(klines)
    }

    async fn fetch_price(&self, asset: &Asset) -> ConnectorResult<Decimal> {
        let ticker = self.ticker(asset).await?;
        Ok(decimal_field(&ticker, "markPrice").or_else(|_| decimal_field(&ticker, "lastPrice"))?)
    }

    async fn fetch_order_book(&self, asset: &Asset, depth: usize) -> ConnectorResult<OrderBook> {
        let result = self
            .call(
                RestRequest::get("/v5/market/orderbook")
                    .query("category", CATEGORY)
                    .query("symbol", bybit_symbol(asset))
                    .query("limit", depth.clamp(1, MAX_BOOK_DEPTH)),
            )
            .await?;
        let mut book = parse::book_rest(&result)?;
        book.bids.truncate(depth);
        book.asks.truncate(depth);
        Ok(book)
    }

    async fn fetch_current_funding_rates(
        &self,
        assets: &[Asset],
    ) -> ConnectorResult<Vec<FundingRate>> {
        let now = self.clock.now();
        let tickers = self
            .list(RestRequest::get("/v5/market/tickers").query("category", CATEGORY))
            .await?;
        tickers
            .iter()
            .filter(|t| {
                t.get("symbol")
                    .and_then(Value::as_str)
                    .filter(|s| s.ends_with(SETTLE_COIN))
                    .is_some_and(|s| assets.is_empty() || assets.contains(&asset_from_bybit(s)))
            })
            .filter(|t| t.get("fundingRate").and_then(Value::as_str).is_some_and(|r| !r.is_empty()))
            .map(|t| Ok(parse::ticker_funding(t, now)?))
            .collect()
    }

    async fn fetch_historical_funding_rates(
        &self,
        asset: &Asset,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ConnectorResult<Vec<FundingRate>> {
        let rows = self
            .list(
                RestRequest::get("/v5/market/funding/history")
                    .query("category", CATEGORY)
                    .query("symbol", bybit_symbol(asset))
                    .query("startTime", start.timestamp_millis())
                    .query("endTime", end.timestamp_millis()),
            )
            .await?;
        let mut rates = rows
            .iter()
            .map(parse::funding)
            .collect::<Result<Vec<_>, _>>()?;
        rates.sort_by_key(|r| r.timestamp);
        Ok(rates)
    }

    async fn place_limit_order(&self, request: &LimitOrderRequest) -> ConnectorResult<OrderAck> {
        let mut body = json!({
            "category": CATEGORY,
            "symbol": bybit_symbol(&request.asset),
            "side": side_label(request.side),
            "orderType": "Limit",
            "qty": request.quantity.normalize().to_string(),
            "price": request.price.normalize().to_string(),
            "timeInForce": tif_label(request.time_in_force),
            "reduceOnly": request.reduce_only,
        });
        if let Some(id) = &request.client_order_id {
            body["orderLinkId"] = json!(id);
        }
        self.submit_order(body).await
    }

    async fn place_market_order(
        &self,
        request: &MarketOrderRequest,
    ) -> ConnectorResult<OrderAck> {
        let mut body = json!({
            "category": CATEGORY,
            "symbol": bybit_symbol(&request.asset),
            "side": side_label(request.side),
            "orderType": "Market",
            "qty": request.quantity.normalize().to_string(),
            "timeInForce": "IOC",
            "reduceOnly": request.reduce_only,
        });
        if let Some(slippage) = request.slippage.or(self.slippage) {
            body["slippageToleranceType"] = json!("Percent");
            body["slippageTolerance"] =
                json!((slippage * Decimal::ONE_HUNDRED).normalize().to_string());
        }
        self.submit_order(body).await
    }

    async fn cancel_order(&self, asset: &Asset, order_id: &str) -> ConnectorResult<()> {
        self.call(
            RestRequest::post("/v5/order/cancel")
                .json(json!({
                    "category": CATEGORY,
                    "symbol": bybit_symbol(asset),
                    "orderId": order_id,
                }))
                .signed(),
        )
        .await
        .map(drop)
    }

    async fn get_open_orders(&self, asset: Option<&Asset>) -> ConnectorResult<Vec<Order>> {
        let mut request = RestRequest::get("/v5/order/realtime").query("category", CATEGORY);
        request = match asset {
            Some(asset) => request.query("symbol", bybit_symbol(asset)),
            None => request.query("settleCoin", SETTLE_COIN),
        };
        let rows = self.list(request.signed()).await?;
        Ok(rows
            .iter()
            .map(parse::order)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn get_account_balance(&self) -> ConnectorResult<AccountBalance> {
        let rows = self
            .list(
                RestRequest::get("/v5/account/wallet-balance")
                    .query("accountType", "UNIFIED")
                    .signed(),
            )
            .await?;
        let wallet = rows
            .first()
            .ok_or_else(|| ParseError::MissingField("list[0]".into()))?;
        Ok(parse::wallet(wallet, self.clock.now())?)
    }

    async fn get_positions(&self) -> ConnectorResult<Vec<Position>> {
        let now = self.clock.now();
        let rows = self
            .list(
                RestRequest::get("/v5/position/list")
                    .query("category", CATEGORY)
                    .query("settleCoin", SETTLE_COIN)
                    .signed(),
            )
            .await?;
        let positions = rows
            .iter()
            .map(|p| parse::position(p, now))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(positions.into_iter().filter(|p| !p.size.is_zero()).collect())
    }
}

impl std::fmt::Debug for BybitConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitConnector")
            .field("rest", &self.rest)
            .field("testnet", &self.testnet)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::ManualClock;
    use crate::infrastructure::rest::RetryConfig;
    use crate::infrastructure::venues::bybit::{BybitCredentials, BybitSigner};
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use test_case::test_case;
    use wiremock::matchers::{body_partial_json, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ))
    }

    fn connector(server: &MockServer) -> BybitConnector {
        let signer = BybitSigner::new(BybitCredentials::new("key", "secret"), clock());
        let rest = RestClient::new("bybit", server.uri(), Duration::from_secs(5))
            .unwrap()
            .with_retry(RetryConfig::none())
            .with_signer(Arc::new(signer));
        BybitConnector::new(rest, clock(), true)
    }

    fn ok(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "retCode": 0, "retMsg": "OK", "result": result, "time": 1_700_000_000_000_i64
        }))
    }

    #[test_case(10006, GatewayError::RateLimited ; "rate limit")]
    #[test_case(10003, GatewayError::Auth("bad".into()) ; "invalid key")]
    #[test_case(110_001, GatewayError::NotFound("bad".into()) ; "missing order")]
    #[test_case(110_007, GatewayError::Rejected("110007: bad".into()) ; "insufficient balance")]
    fn maps_ret_codes(code: i64, expected: GatewayError) {
        assert_eq!(ret_code_error(code, "bad"), expected);
    }

    #[tokio::test]
    async fn klines_are_returned_oldest_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/market/kline"))
            .and(query_param("interval", "15"))
            .and(query_param("symbol", "BTCUSDT"))
            .respond_with(ok(json!({
                "symbol": "BTCUSDT", "category": "linear",
                "list": [
                    ["1699999200000", "3", "3", "3", "3", "1", "3"],
                    ["1699998300000", "2", "2", "2", "2", "1", "2"]
                ]
            })))
            .mount(&server)
            .await;
        let klines = connector(&server)
            .fetch_klines(&Asset::new("BTC"), KlineInterval::FifteenMinutes, 200)
            .await
            .unwrap();
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].close, dec!(2));
        assert!(klines.iter().all(|k| k.closed));
    }

    #[tokio::test]
    async fn non_zero_ret_code_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(path("/v5/market/tickers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "retCode": 10001, "retMsg": "params error: symbol invalid", "result": {}
            })))
            .mount(&server)
            .await;
        let err = connector(&server).fetch_price(&Asset::new("NOPE")).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Rejected("10001: params error: symbol invalid".into())
        );
    }

    #[tokio::test]
    async fn market_order_is_signed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v5/order/create"))
            .and(header_exists("X-BAPI-SIGN"))
            .and(header_exists("X-BAPI-TIMESTAMP"))
            .and(body_partial_json(json!({
                "category": "linear", "symbol": "SOLUSDT", "side": "Sell",
                "orderType": "Market", "qty": "3", "slippageTolerance": "0.5"
            })))
            .respond_with(ok(json!({"orderId": "1321003749386327552", "orderLinkId": ""})))
            .expect(1)
            .mount(&server)
            .await;
        let request = MarketOrderRequest::new(Asset::new("SOL"), Side::Sell, dec!(3));
        let ack = connector(&server)
            .with_slippage(dec!(0.005))
            .place_market_order(&request)
            .await
            .unwrap();
        assert_eq!(ack.order_id, "1321003749386327552");
        assert_eq!(ack.client_order_id, None);
    }

    #[tokio::test]
    async fn balance_reads_unified_wallet() {
        let server = MockServer::start().await;
        Mock::given(path("/v5/account/wallet-balance"))
            .and(query_param("accountType", "UNIFIED"))
            .respond_with(ok(json!({"list": [{
                "totalEquity": "1050.5", "totalWalletBalance": "1000",
                "totalAvailableBalance": "800", "totalInitialMargin": "250.5"
            }]})))
            .mount(&server)
            .await;
        let balance = connector(&server).get_account_balance().await.unwrap();
        assert_eq!(balance.total, dec!(1050.5));
        assert_eq!(balance.available, dec!(800));
        assert_eq!(balance.used_margin, dec!(250.5));
    }

    #[tokio::test]
    async fn current_funding_filters_requested_assets() {
        let server = MockServer::start().await;
        Mock::given(path("/v5/market/tickers"))
            .respond_with(ok(json!({"category": "linear", "list": [
                {"symbol": "BTCUSDT", "fundingRate": "0.0001", "nextFundingTime": "1700006400000"},
                {"symbol": "ETHUSDT", "fundingRate": "-0.00005", "nextFundingTime": "1700006400000"},
                {"symbol": "BTCPERP", "fundingRate": "0.0002", "nextFundingTime": "1700006400000"}
            ]})))
            .mount(&server)
            .await;
        let rates = connector(&server)
            .fetch_current_funding_rates(&[Asset::new("BTC")])
            .await
            .unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].rate, dec!(0.0001));
        assert!(rates[0].next_funding_time.is_some());
    }

    #[tokio::test]
    async fn contracts_are_not_implemented() {
        let server = MockServer::start().await;
        assert_eq!(
            connector(&server).fetch_contracts().await.unwrap_err(),
            GatewayError::NotImplemented("fetch_contracts")
        );
    }
}
