//! Connector Ports (Driver Ports)
//!
//! The venue-agnostic capability surface consumed by strategies.
//!
//! - [`Connector`]: REST-shaped queries and order entry
//! - [`WebSocketConnector`]: live feed lifecycle, subscriptions, and
//!   canonical update streams
//!
//! Every venue implements both. Operations a venue does not offer return
//! [`GatewayError::NotImplemented`] instead of failing silently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use rust_decimal::Decimal;

use crate::domain::market::{
    AccountBalance, Asset, ConnectorInfo, FundingRate, Kline, KlineInterval, LimitOrderRequest,
    MarketOrderRequest, Order, OrderAck, OrderBook, Position, Trade,
};
use crate::domain::subscription::SubscriptionId;
use crate::error::GatewayError;

/// Result alias for connector operations.
pub type ConnectorResult<T> = Result<T, GatewayError>;

// =============================================================================
// REST Surface
// =============================================================================

/// REST-shaped venue operations.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Static capabilities of the venue.
    fn connector_info(&self) -> ConnectorInfo;

    /// Historical candles, oldest first.
    async fn fetch_klines(
        &self,
        asset: &Asset,
        interval: KlineInterval,
        limit: usize,
    ) -> ConnectorResult<Vec<Kline>>;

    /// Current mid or last price.
    async fn fetch_price(&self, asset: &Asset) -> ConnectorResult<Decimal>;

    /// Order book snapshot truncated to `depth` levels per side.
    async fn fetch_order_book(&self, asset: &Asset, depth: usize) -> ConnectorResult<OrderBook>;

    /// Current funding rate for each requested asset (all assets when empty).
    async fn fetch_current_funding_rates(
        &self,
        assets: &[Asset],
    ) -> ConnectorResult<Vec<FundingRate>>;

    /// Funding rate history within `[start, end]`.
    async fn fetch_historical_funding_rates(
        &self,
        asset: &Asset,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ConnectorResult<Vec<FundingRate>>;

    /// Submit a limit order.
    async fn place_limit_order(&self, request: &LimitOrderRequest) -> ConnectorResult<OrderAck>;

    /// Submit a market order.
    async fn place_market_order(&self, request: &MarketOrderRequest)
    -> ConnectorResult<OrderAck>;

    /// Cancel a resting order.
    async fn cancel_order(&self, asset: &Asset, order_id: &str) -> ConnectorResult<()>;

    /// Resting orders, optionally filtered by asset.
    async fn get_open_orders(&self, asset: Option<&Asset>) -> ConnectorResult<Vec<Order>>;

    /// Account balance summary.
    async fn get_account_balance(&self) -> ConnectorResult<AccountBalance>;

    /// Open positions.
    async fn get_positions(&self) -> ConnectorResult<Vec<Position>>;

    /// Status of a single order.
    async fn get_order_status(&self, _order_id: &str) -> ConnectorResult<Order> {
        Err(GatewayError::NotImplemented("get_order_status"))
    }

    /// Recent public trades.
    async fn fetch_recent_trades(
        &self,
        _asset: &Asset,
        _limit: usize,
    ) -> ConnectorResult<Vec<Trade>> {
        Err(GatewayError::NotImplemented("fetch_recent_trades"))
    }

    /// Tradable contracts.
    async fn fetch_contracts(&self) -> ConnectorResult<Vec<Asset>> {
        Err(GatewayError::NotImplemented("fetch_contracts"))
    }
}

// =============================================================================
// Streaming Surface
// =============================================================================

/// Live feed lifecycle, subscriptions, and canonical update streams.
///
/// Streams are independent broadcast receivers: each call returns a new
/// reader that sees updates published after it was created. A slow reader
/// skips lagged updates rather than blocking the feed.
#[async_trait]
pub trait WebSocketConnector: Send + Sync {
    /// Connect and start the reconnect monitor.
    async fn start_websocket(&self) -> ConnectorResult<()>;

    /// Stop the feed. Terminal for this connector instance.
    async fn stop_websocket(&self) -> ConnectorResult<()>;

    /// Whether the socket is currently connected.
    fn is_websocket_connected(&self) -> bool;

    /// Subscribe to order book snapshots.
    async fn subscribe_order_book(&self, asset: &Asset) -> ConnectorResult<SubscriptionId>;

    /// Remove the order book subscription.
    async fn unsubscribe_order_book(&self, asset: &Asset) -> ConnectorResult<()>;

    /// Subscribe to public trades.
    async fn subscribe_trades(&self, asset: &Asset) -> ConnectorResult<SubscriptionId>;

    /// Remove the trades subscription.
    async fn unsubscribe_trades(&self, asset: &Asset) -> ConnectorResult<()>;

    /// Subscribe to candles.
    async fn subscribe_klines(
        &self,
        asset: &Asset,
        interval: KlineInterval,
    ) -> ConnectorResult<SubscriptionId>;

    /// Remove the candle subscription.
    async fn unsubscribe_klines(
        &self,
        asset: &Asset,
        interval: KlineInterval,
    ) -> ConnectorResult<()>;

    /// Subscribe to position and balance updates for the configured account.
    async fn subscribe_account(&self) -> ConnectorResult<SubscriptionId>;

    /// Remove the account subscription.
    async fn unsubscribe_account(&self) -> ConnectorResult<()>;

    /// Order book updates.
    fn order_book_updates(&self) -> BoxStream<'static, OrderBook>;

    /// Trade updates.
    fn trade_updates(&self) -> BoxStream<'static, Trade>;

    /// Candle updates.
    fn kline_updates(&self) -> BoxStream<'static, Kline>;

    /// Position updates.
    fn position_updates(&self) -> BoxStream<'static, Position>;

    /// Balance updates.
    fn account_balance_updates(&self) -> BoxStream<'static, AccountBalance>;

    /// Feed errors: parse failures, venue errors, lost connections.
    fn errors(&self) -> BoxStream<'static, GatewayError>;
}
