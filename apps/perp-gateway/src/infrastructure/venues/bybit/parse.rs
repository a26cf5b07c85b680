//! Bybit V5 payload parsers.
//!
//! Numbers arrive as strings and timestamps as millisecond numbers or
//! numeric strings. Order book pushes are a snapshot followed by deltas
//! that are applied to a [`LocalBook`].

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::market::{
    AccountBalance, Asset, FundingRate, Kline, KlineInterval, Order, OrderBook, OrderStatus,
    OrderType, Position, PositionSide, PriceLevel, Side, Trade,
};
use crate::infrastructure::venues::parse::{
    ParseError, array_field, as_array, decimal, decimal_field, millis, millis_field,
    opt_decimal_field, opt_millis_field, opt_str_field, str_field,
};
use crate::infrastructure::venues::symbols::asset_from_bybit;

/// Venue label for `interval`.
#[must_use]
pub const fn interval_label(interval: KlineInterval) -> &'static str {
    match interval {
        KlineInterval::OneMinute => "1",
        KlineInterval::FiveMinutes => "5",
        KlineInterval::FifteenMinutes => "15",
        KlineInterval::OneHour => "60",
        KlineInterval::FourHours => "240",
        KlineInterval::OneDay => "D",
    }
}

/// Inverse of [`interval_label`].
///
/// # Errors
///
/// `InvalidValue` for labels with no canonical interval.
pub fn interval_from_label(label: &str) -> Result<KlineInterval, ParseError> {
    match label {
        "1" => Ok(KlineInterval::OneMinute),
        "5" => Ok(KlineInterval::FiveMinutes),
        "15" => Ok(KlineInterval::FifteenMinutes),
        "60" => Ok(KlineInterval::OneHour),
        "240" => Ok(KlineInterval::FourHours),
        "D" => Ok(KlineInterval::OneDay),
        other => Err(ParseError::invalid_value("interval", other)),
    }
}

fn side(value: &str) -> Result<Side, ParseError> {
    match value {
        "Buy" => Ok(Side::Buy),
        "Sell" => Ok(Side::Sell),
        other => Err(ParseError::invalid_value("side", other)),
    }
}

fn pairs(data: &Value, name: &str) -> Result<Vec<(Decimal, Decimal)>, ParseError> {
    array_field(data, name)?
        .iter()
        .map(|pair| match as_array(pair, name)? {
            [price, size, ..] => Ok((decimal(price, name)?, decimal(size, name)?)),
            _ => Err(ParseError::invalid_value(name, pair)),
        })
        .collect()
}

/// Order book maintained from snapshot and delta pushes.
#[derive(Debug, Clone, Default)]
pub struct LocalBook {
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    update_id: u64,
}

impl LocalBook {
    /// Replace the book with a snapshot `{b, a, u}`.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for malformed levels; the book is unchanged.
    pub fn apply_snapshot(&mut self, data: &Value) -> Result<(), ParseError> {
        let bids = pairs(data, "b")?;
        let asks = pairs(data, "a")?;
        self.bids = bids
            .into_iter()
            .filter(|(_, size)| !size.is_zero())
            .map(|(price, size)| (Reverse(price), size))
            .collect();
        self.asks = asks.into_iter().filter(|(_, size)| !size.is_zero()).collect();
        self.update_id = data.get("u").and_then(Value::as_u64).unwrap_or_default();
        Ok(())
    }

    /// Apply a delta. A zero size removes the level.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for malformed levels; the book is unchanged.
    pub fn apply_delta(&mut self, data: &Value) -> Result<(), ParseError> {
        let bids = pairs(data, "b")?;
        let asks = pairs(data, "a")?;
        for (price, size) in bids {
            if size.is_zero() {
                self.bids.remove(&Reverse(price));
            } else {
                self.bids.insert(Reverse(price), size);
            }
        }
        for (price, size) in asks {
            if size.is_zero() {
                self.asks.remove(&price);
            } else {
                self.asks.insert(price, size);
            }
        }
        if let Some(u) = data.get("u").and_then(Value::as_u64) {
            self.update_id = u;
        }
        Ok(())
    }

    /// Last applied update id.
    #[must_use]
    pub const fn update_id(&self) -> u64 {
        self.update_id
    }

    /// Canonical snapshot of the current state.
    #[must_use]
    pub fn to_order_book(&self, asset: Asset, timestamp: DateTime<Utc>) -> OrderBook {
        OrderBook::new(
            asset,
            self.bids
                .iter()
                .map(|(Reverse(price), size)| PriceLevel::new(*price, *size))
                .collect(),
            self.asks
                .iter()
                .map(|(price, size)| PriceLevel::new(*price, *size))
                .collect(),
            timestamp,
        )
    }
}

/// REST order book `{s, b, a, ts}`.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed levels.
pub fn book_rest(result: &Value) -> Result<OrderBook, ParseError> {
    let mut book = LocalBook::default();
    book.apply_snapshot(result)?;
    Ok(book.to_order_book(
        asset_from_bybit(str_field(result, "s")?),
        opt_millis_field(result, "ts")?.unwrap_or_else(Utc::now),
    ))
}

/// `publicTrade` element `{T, s, S, v, p, i}`.
///
/// # Errors
///
/// Returns a [`ParseError`] for a missing field or unknown side.
pub fn ws_trade(data: &Value) -> Result<Trade, ParseError> {
    Ok(Trade {
        asset: asset_from_bybit(str_field(data, "s")?),
        trade_id: str_field(data, "i")?.to_string(),
        price: decimal_field(data, "p")?,
        quantity: decimal_field(data, "v")?,
        side: side(str_field(data, "S")?)?,
        timestamp: millis_field(data, "T")?,
    })
}

/// `kline.*` element `{start, interval, open, high, low, close, volume, confirm}`.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed prices or an unknown interval.
pub fn ws_kline(data: &Value, symbol: &str) -> Result<Kline, ParseError> {
    let interval = interval_from_label(str_field(data, "interval")?)?;
    let open_time = millis_field(data, "start")?;
    let close_time = interval
        .close_after(open_time)
        .ok_or_else(|| ParseError::invalid_value("start", open_time))?;
    Ok(Kline {
        asset: asset_from_bybit(symbol),
        interval,
        open_time,
        close_time,
        open: decimal_field(data, "open")?,
        high: decimal_field(data, "high")?,
        low: decimal_field(data, "low")?,
        close: decimal_field(data, "close")?,
        volume: decimal_field(data, "volume")?,
        trade_count: 0,
        closed: data.get("confirm").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// REST kline row `[start, open, high, low, close, volume, turnover]`.
///
/// # Errors
///
/// Returns a [`ParseError`] for short or malformed rows.
pub fn rest_kline(
    row: &Value,
    asset: &Asset,
    interval: KlineInterval,
    now: DateTime<Utc>,
) -> Result<Kline, ParseError> {
    let [start, open, high, low, close, volume, ..] = as_array(row, "list")? else {
        return Err(ParseError::invalid_value("list", row));
    };
    let open_time = millis(start, "start")?;
    let close_time = interval
        .close_after(open_time)
        .ok_or_else(|| ParseError::invalid_value("start", open_time))?;
    Ok(Kline {
        asset: asset.clone(),
        interval,
        open_time,
        close_time,
        open: decimal(open, "open")?,
        high: decimal(high, "high")?,
        low: decimal(low, "low")?,
        close: decimal(close, "close")?,
        volume: decimal(volume, "volume")?,
        trade_count: 0,
        closed: close_time <= now,
    })
}

/// Position from the `position` topic (`entryPrice`) or
/// `GET /v5/position/list` (`avgPrice`).
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed numbers.
pub fn position(data: &Value, fallback_time: DateTime<Utc>) -> Result<Position, ParseError> {
    let size = decimal_field(data, "size")?;
    let side = match opt_str_field(data, "side") {
        _ if size.is_zero() => PositionSide::Flat,
        Some("Buy") => PositionSide::Long,
        Some("Sell") => PositionSide::Short,
        _ => PositionSide::Flat,
    };
    let entry_price = match opt_decimal_field(data, "entryPrice")? {
        Some(price) => price,
        None => opt_decimal_field(data, "avgPrice")?.unwrap_or_default(),
    };
    Ok(Position {
        asset: asset_from_bybit(str_field(data, "symbol")?),
        side,
        size: size.abs(),
        entry_price,
        mark_price: opt_decimal_field(data, "markPrice")?,
        liquidation_price: opt_decimal_field(data, "liqPrice")?.filter(|p| !p.is_zero()),
        unrealized_pnl: opt_decimal_field(data, "unrealisedPnl")?.unwrap_or_default(),
        realized_pnl: opt_decimal_field(data, "cumRealisedPnl")?.unwrap_or_default(),
        leverage: opt_decimal_field(data, "leverage")?.unwrap_or(Decimal::ONE),
        margin_used: opt_decimal_field(data, "positionIM")?.unwrap_or_default(),
        timestamp: opt_millis_field(data, "updatedTime")?.unwrap_or(fallback_time),
    })
}

/// Unified wallet summary from the `wallet` topic or
/// `GET /v5/account/wallet-balance`.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed numbers.
pub fn wallet(data: &Value, timestamp: DateTime<Utc>) -> Result<AccountBalance, ParseError> {
    let available = opt_decimal_field(data, "totalAvailableBalance")?.unwrap_or_default();
    Ok(AccountBalance {
        total: decimal_field(data, "totalEquity")?,
        available,
        withdrawable: available,
        used_margin: opt_decimal_field(data, "totalInitialMargin")?.unwrap_or_default(),
        notional: Decimal::ZERO,
        raw_usd: opt_decimal_field(data, "totalWalletBalance")?.unwrap_or_default(),
        timestamp,
    })
}

/// `GET /v5/market/funding/history` element.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed rates.
pub fn funding(data: &Value) -> Result<FundingRate, ParseError> {
    Ok(FundingRate {
        asset: asset_from_bybit(str_field(data, "symbol")?),
        rate: decimal_field(data, "fundingRate")?,
        premium: None,
        next_funding_time: None,
        timestamp: millis_field(data, "fundingRateTimestamp")?,
    })
}

/// `GET /v5/market/tickers` element as a current funding rate.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed rates.
pub fn ticker_funding(data: &Value, now: DateTime<Utc>) -> Result<FundingRate, ParseError> {
    Ok(FundingRate {
        asset: asset_from_bybit(str_field(data, "symbol")?),
        rate: decimal_field(data, "fundingRate")?,
        premium: None,
        next_funding_time: opt_millis_field(data, "nextFundingTime")?,
        timestamp: now,
    })
}

/// Order from `GET /v5/order/realtime`.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed orders.
pub fn order(data: &Value) -> Result<Order, ParseError> {
    let status = match str_field(data, "orderStatus")? {
        "New" | "Created" | "Untriggered" | "Triggered" => OrderStatus::Open,
        "PartiallyFilled" => OrderStatus::PartiallyFilled,
        "Filled" => OrderStatus::Filled,
        "Cancelled" | "PartiallyFilledCanceled" | "Deactivated" => OrderStatus::Cancelled,
        "Rejected" => OrderStatus::Rejected,
        other => return Err(ParseError::invalid_value("orderStatus", other)),
    };
    let order_type = match str_field(data, "orderType")? {
        "Market" => OrderType::Market,
        _ => OrderType::Limit,
    };
    Ok(Order {
        order_id: str_field(data, "orderId")?.to_string(),
        client_order_id: opt_str_field(data, "orderLinkId")
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        asset: asset_from_bybit(str_field(data, "symbol")?),
        side: side(str_field(data, "side")?)?,
        order_type,
        price: opt_decimal_field(data, "price")?.filter(|p| !p.is_zero()),
        quantity: decimal_field(data, "qty")?,
        filled_quantity: opt_decimal_field(data, "cumExecQty")?.unwrap_or_default(),
        status,
        timestamp: millis_field(data, "createdTime")?,
    })
}
