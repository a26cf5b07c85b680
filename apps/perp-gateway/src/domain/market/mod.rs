//! Canonical Market Types
//!
//! Venue-neutral, decimal-precise records produced by every venue adapter.
//! Monetary quantities are always [`Decimal`]; timestamps are UTC with
//! millisecond resolution.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Asset
// =============================================================================

/// Canonical base symbol (e.g. `BTC`), independent of venue naming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asset(String);

impl Asset {
    /// Create an asset from a base symbol, normalized to upper case.
    #[must_use]
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_uppercase())
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Asset {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// =============================================================================
// Sides
// =============================================================================

/// Order or trade side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy / bid side.
    Buy,
    /// Sell / ask side.
    Sell,
}

impl Side {
    /// Returns `true` for the buy side.
    #[must_use]
    pub const fn is_buy(self) -> bool {
        matches!(self, Self::Buy)
    }

    /// Side name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    /// Net long.
    Long,
    /// Net short.
    Short,
    /// No exposure.
    Flat,
}

impl PositionSide {
    /// Derive the side from a signed size.
    #[must_use]
    pub fn from_signed(size: Decimal) -> Self {
        if size.is_sign_positive() && !size.is_zero() {
            Self::Long
        } else if size.is_sign_negative() && !size.is_zero() {
            Self::Short
        } else {
            Self::Flat
        }
    }
}

// =============================================================================
// Order Book
// =============================================================================

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Resting quantity at the price.
    pub quantity: Decimal,
}

impl PriceLevel {
    /// Create a price level.
    #[must_use]
    pub const fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Order book snapshot with bids descending and asks ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    /// Canonical asset.
    pub asset: Asset,
    /// Bid levels, best (highest) first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best (lowest) first.
    pub asks: Vec<PriceLevel>,
    /// Venue timestamp of the snapshot.
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    /// Build a book, sorting both sides into canonical order.
    #[must_use]
    pub fn new(
        asset: Asset,
        mut bids: Vec<PriceLevel>,
        mut asks: Vec<PriceLevel>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self {
            asset,
            bids,
            asks,
            timestamp,
        }
    }

    /// Highest bid.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Lowest ask.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Midpoint of the best bid and ask.
    ///
    /// `None` when either side is empty or the sum leaves the decimal range.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?.price;
        let ask = self.best_ask()?.price;
        bid.checked_add(ask)?.checked_div(Decimal::TWO)
    }
}

// =============================================================================
// Trades and Klines
// =============================================================================

/// Public trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Canonical asset.
    pub asset: Asset,
    /// Venue trade identifier (empty if the venue sends none).
    pub trade_id: String,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Aggressor side.
    pub side: Side,
    /// Execution time.
    pub timestamp: DateTime<Utc>,
}

/// Candle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KlineInterval {
    /// One minute.
    #[serde(rename = "1m")]
    OneMinute,
    /// Five minutes.
    #[serde(rename = "5m")]
    FiveMinutes,
    /// Fifteen minutes.
    #[serde(rename = "15m")]
    FifteenMinutes,
    /// One hour.
    #[serde(rename = "1h")]
    OneHour,
    /// Four hours.
    #[serde(rename = "4h")]
    FourHours,
    /// One day.
    #[serde(rename = "1d")]
    OneDay,
}

impl KlineInterval {
    /// Intervals synthesized from trade streams.
    pub const AGGREGATED: [Self; 4] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::OneHour,
    ];

    /// Canonical interval label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }

    /// Length of the interval in seconds.
    #[must_use]
    pub const fn seconds(self) -> i64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
            Self::FifteenMinutes => 900,
            Self::OneHour => 3_600,
            Self::FourHours => 14_400,
            Self::OneDay => 86_400,
        }
    }

    /// Length of the interval.
    #[must_use]
    pub const fn duration(self) -> Duration {
        Duration::from_secs(self.seconds().unsigned_abs())
    }

    /// Close time of the bucket opening at `open_time`, `None` past the
    /// representable range.
    #[must_use]
    pub fn close_after(self, open_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        open_time.checked_add_signed(chrono::TimeDelta::seconds(self.seconds()))
    }

    /// Open time of the bucket containing `timestamp`.
    #[must_use]
    pub fn bucket_start(self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let secs = timestamp.timestamp();
        let start = secs - secs.rem_euclid(self.seconds());
        Utc.timestamp_opt(start, 0).single().unwrap_or(timestamp)
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KlineInterval {
    type Err = UnknownInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "1h" => Ok(Self::OneHour),
            "4h" => Ok(Self::FourHours),
            "1d" => Ok(Self::OneDay),
            other => Err(UnknownInterval(other.to_string())),
        }
    }
}

/// Interval label that does not map to a [`KlineInterval`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown kline interval: {0}")]
pub struct UnknownInterval(pub String);

/// OHLCV candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kline {
    /// Canonical asset.
    pub asset: Asset,
    /// Candle interval.
    pub interval: KlineInterval,
    /// Bucket open time (inclusive).
    pub open_time: DateTime<Utc>,
    /// Bucket close time (exclusive).
    pub close_time: DateTime<Utc>,
    /// First traded price.
    pub open: Decimal,
    /// Highest traded price.
    pub high: Decimal,
    /// Lowest traded price.
    pub low: Decimal,
    /// Last traded price.
    pub close: Decimal,
    /// Traded base quantity.
    pub volume: Decimal,
    /// Number of trades in the bucket.
    pub trade_count: u64,
    /// Whether the bucket is complete.
    pub closed: bool,
}

// =============================================================================
// Account State
// =============================================================================

/// Open position on a perpetual market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Canonical asset.
    pub asset: Asset,
    /// Position direction.
    pub side: PositionSide,
    /// Absolute position size.
    pub size: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Mark price, when reported.
    pub mark_price: Option<Decimal>,
    /// Liquidation price, when reported.
    pub liquidation_price: Option<Decimal>,
    /// Unrealized profit and loss.
    pub unrealized_pnl: Decimal,
    /// Realized profit and loss.
    pub realized_pnl: Decimal,
    /// Effective leverage.
    pub leverage: Decimal,
    /// Margin allocated to the position.
    pub margin_used: Decimal,
    /// Time of the snapshot.
    pub timestamp: DateTime<Utc>,
}

impl Position {
    /// Split a signed venue size into side and absolute size.
    #[must_use]
    pub fn split_signed_size(size: Decimal) -> (PositionSide, Decimal) {
        (PositionSide::from_signed(size), size.abs())
    }
}

/// Account-level margin summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Total account equity.
    pub total: Decimal,
    /// Equity available for new positions.
    pub available: Decimal,
    /// Amount that can be withdrawn.
    pub withdrawable: Decimal,
    /// Margin in use.
    pub used_margin: Decimal,
    /// Gross notional of open positions.
    pub notional: Decimal,
    /// Raw USD balance.
    pub raw_usd: Decimal,
    /// Time of the snapshot.
    pub timestamp: DateTime<Utc>,
}

/// Positions and balance delivered together by account channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
    /// Current positions.
    pub positions: Vec<Position>,
    /// Current balance, if the frame carried one.
    pub balance: Option<AccountBalance>,
}

/// Funding rate observation for a perpetual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRate {
    /// Canonical asset.
    pub asset: Asset,
    /// Funding rate for the period (fraction, not percent).
    pub rate: Decimal,
    /// Premium component, when reported.
    pub premium: Option<Decimal>,
    /// Next funding time, when reported.
    pub next_funding_time: Option<DateTime<Utc>>,
    /// Time of the observation.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Orders
// =============================================================================

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Limit order.
    Limit,
    /// Market order.
    Market,
}

/// Time-in-force policy for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good until cancelled.
    #[default]
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Add liquidity only.
    PostOnly,
}

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Resting on the book.
    Open,
    /// Partially executed and still resting.
    PartiallyFilled,
    /// Fully executed.
    Filled,
    /// Cancelled.
    Cancelled,
    /// Rejected by the venue.
    Rejected,
}

/// Limit order request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitOrderRequest {
    /// Canonical asset.
    pub asset: Asset,
    /// Order side.
    pub side: Side,
    /// Base quantity.
    pub quantity: Decimal,
    /// Limit price.
    pub price: Decimal,
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// Only reduce an existing position.
    pub reduce_only: bool,
    /// Caller-supplied client order id.
    pub client_order_id: Option<String>,
}

impl LimitOrderRequest {
    /// Good-until-cancelled limit order.
    #[must_use]
    pub const fn new(asset: Asset, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            asset,
            side,
            quantity,
            price,
            time_in_force: TimeInForce::Gtc,
            reduce_only: false,
            client_order_id: None,
        }
    }

    /// Attach a caller-chosen client order id.
    #[must_use]
    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    /// Attach a random 128-bit client order id as `0x`-prefixed hex, a form
    /// every supported venue accepts.
    #[must_use]
    pub fn with_generated_client_order_id(self) -> Self {
        self.with_client_order_id(format!("0x{}", uuid::Uuid::new_v4().simple()))
    }
}

/// Market order request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketOrderRequest {
    /// Canonical asset.
    pub asset: Asset,
    /// Order side.
    pub side: Side,
    /// Base quantity.
    pub quantity: Decimal,
    /// Slippage override; the connector default applies when `None`.
    pub slippage: Option<Decimal>,
    /// Only reduce an existing position.
    pub reduce_only: bool,
}

impl MarketOrderRequest {
    /// Market order using the connector's default slippage.
    #[must_use]
    pub const fn new(asset: Asset, side: Side, quantity: Decimal) -> Self {
        Self {
            asset,
            side,
            quantity,
            slippage: None,
            reduce_only: false,
        }
    }
}

/// Venue acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    /// Venue order id.
    pub order_id: String,
    /// Client order id, when one was sent.
    pub client_order_id: Option<String>,
    /// Status after submission.
    pub status: OrderStatus,
    /// Quantity filled at submission time.
    pub filled_quantity: Decimal,
    /// Average fill price, when filled.
    pub average_price: Option<Decimal>,
}

/// Working order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Venue order id.
    pub order_id: String,
    /// Client order id.
    pub client_order_id: Option<String>,
    /// Canonical asset.
    pub asset: Asset,
    /// Order side.
    pub side: Side,
    /// Order type.
    pub order_type: OrderType,
    /// Limit price.
    pub price: Option<Decimal>,
    /// Original quantity.
    pub quantity: Decimal,
    /// Executed quantity.
    pub filled_quantity: Decimal,
    /// Current status.
    pub status: OrderStatus,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Connector Capabilities
// =============================================================================

/// Static description of a connector's capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorInfo {
    /// Venue name.
    pub venue: String,
    /// Order types accepted.
    pub supported_order_types: Vec<OrderType>,
    /// Maximum leverage offered.
    pub max_leverage: Decimal,
    /// Perpetual futures support.
    pub supports_perpetuals: bool,
    /// Spot support.
    pub supports_spot: bool,
    /// Quote currency for margin and PnL.
    pub quote_currency: String,
    /// Whether the connector targets testnet.
    pub testnet: bool,
}

// =============================================================================
// Routed Events
// =============================================================================

/// Canonical payload produced by a venue parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    /// Order book snapshot.
    OrderBook(OrderBook),
    /// Batch of trades for one instrument.
    Trades(Vec<Trade>),
    /// Candle update.
    Kline(Kline),
    /// Account positions and balance.
    Account(AccountUpdate),
}

/// Convert venue milliseconds to UTC.
#[must_use]
pub fn timestamp_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn generated_client_order_ids_are_hex_and_unique() {
        let order = |side| LimitOrderRequest::new(Asset::new("BTC"), side, dec!(1), dec!(100));
        let a = order(Side::Buy).with_generated_client_order_id();
        let b = order(Side::Buy).with_generated_client_order_id();
        let id = a.client_order_id.clone().unwrap();
        assert_eq!(id.len(), 34);
        assert!(id.starts_with("0x"));
        assert!(id[2..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.client_order_id, b.client_order_id);
        assert_eq!(
            order(Side::Sell).with_client_order_id("mine").client_order_id.as_deref(),
            Some("mine")
        );
    }

    #[test]
    fn asset_normalizes_case() {
        assert_eq!(Asset::new(" btc ").as_str(), "BTC");
        assert_eq!(Asset::from("eth"), Asset::new("ETH"));
    }

    #[test]
    fn order_book_sorts_sides() {
        let book = OrderBook::new(
            Asset::new("BTC"),
            vec![
                PriceLevel::new(dec!(99), dec!(1)),
                PriceLevel::new(dec!(100), dec!(2)),
            ],
            vec![
                PriceLevel::new(dec!(102), dec!(1)),
                PriceLevel::new(dec!(101), dec!(3)),
            ],
            Utc::now(),
        );
        assert_eq!(book.best_bid().unwrap().price, dec!(100));
        assert_eq!(book.best_ask().unwrap().price, dec!(101));
        assert_eq!(book.mid_price(), Some(dec!(100.5)));
    }

    #[test]
    fn mid_price_outside_decimal_range_is_none() {
        let book = OrderBook::new(
            Asset::new("BTC"),
            vec![PriceLevel::new(Decimal::MAX, dec!(1))],
            vec![PriceLevel::new(Decimal::MAX, dec!(1))],
            Utc::now(),
        );
        assert_eq!(book.mid_price(), None);
    }

    #[test]
    fn position_side_from_signed_size() {
        assert_eq!(PositionSide::from_signed(dec!(1.5)), PositionSide::Long);
        assert_eq!(PositionSide::from_signed(dec!(-0.1)), PositionSide::Short);
        assert_eq!(PositionSide::from_signed(dec!(0)), PositionSide::Flat);
        assert_eq!(
            Position::split_signed_size(dec!(-2)),
            (PositionSide::Short, dec!(2))
        );
    }

    #[test]
    fn interval_bucket_alignment() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 10, 7, 42).unwrap();
        assert_eq!(
            KlineInterval::OneMinute.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 7, 0).unwrap()
        );
        assert_eq!(
            KlineInterval::FiveMinutes.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap()
        );
        assert_eq!(
            KlineInterval::FifteenMinutes.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(
            KlineInterval::OneHour.bucket_start(ts),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn close_after_stops_at_the_end_of_time() {
        let open = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(
            KlineInterval::OneHour.close_after(open),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap())
        );
        assert_eq!(KlineInterval::OneDay.close_after(DateTime::<Utc>::MAX_UTC), None);
    }

    #[test]
    fn interval_round_trips_labels() {
        for interval in KlineInterval::AGGREGATED {
            assert_eq!(interval.as_str().parse::<KlineInterval>(), Ok(interval));
        }
        assert!("7m".parse::<KlineInterval>().is_err());
    }

    #[test]
    fn millis_conversion() {
        let ts = timestamp_from_millis(1_700_000_000_123).unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_123);
    }
}
