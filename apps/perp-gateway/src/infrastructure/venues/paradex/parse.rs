//! Paradex payload parsers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::market::{
    AccountBalance, FundingRate, Kline, KlineInterval, Order, OrderBook, OrderStatus, OrderType,
    Position, PositionSide, PriceLevel, Side, Trade,
};
use crate::infrastructure::venues::parse::{
    ParseError, array_field, as_array, decimal, decimal_field, field, millis, millis_field,
    opt_decimal_field, opt_millis_field, opt_str_field, str_field,
};
use crate::infrastructure::venues::symbols::asset_from_paradex;

fn side(value: &str) -> Result<Side, ParseError> {
    match value {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(ParseError::invalid_value("side", other)),
    }
}

/// Order book snapshot pushed on `order_book.*`: `{market, last_updated_at,
/// inserts: [{side, price, size}]}`.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed levels.
pub fn book_snapshot(data: &Value) -> Result<OrderBook, ParseError> {
    let mut bids = Vec::new();
    let mut asks = Vec::new();
    for level in array_field(data, "inserts")? {
        let entry = PriceLevel::new(decimal_field(level, "price")?, decimal_field(level, "size")?);
        match side(str_field(level, "side")?)? {
            Side::Buy => bids.push(entry),
            Side::Sell => asks.push(entry),
        }
    }
    let timestamp = opt_millis_field(data, "last_updated_at")?.unwrap_or_else(Utc::now);
    Ok(OrderBook::new(
        asset_from_paradex(str_field(data, "market")?),
        bids,
        asks,
        timestamp,
    ))
}

/// REST book `{market, bids: [[price, size]], asks: [...], last_updated_at}`.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed pairs.
pub fn book_rest(data: &Value) -> Result<OrderBook, ParseError> {
    let pairs = |name: &str| -> Result<Vec<PriceLevel>, ParseError> {
        array_field(data, name)?
            .iter()
            .map(|pair| {
                let pair = as_array(pair, name)?;
                match pair {
                    [price, size, ..] => Ok(PriceLevel::new(decimal(price, name)?, decimal(size, name)?)),
                    _ => Err(ParseError::invalid_value(name, "level needs price and size")),
                }
            })
            .collect()
    };
    Ok(OrderBook::new(
        asset_from_paradex(str_field(data, "market")?),
        pairs("bids")?,
        pairs("asks")?,
        opt_millis_field(data, "last_updated_at")?.unwrap_or_else(Utc::now),
    ))
}

/// `trades.*` element `{id, market, side, size, price, created_at}`.
///
/// # Errors
///
/// Returns a [`ParseError`] for a missing field or unknown side.
pub fn trade(data: &Value) -> Result<Trade, ParseError> {
    Ok(Trade {
        asset: asset_from_paradex(str_field(data, "market")?),
        trade_id: str_field(data, "id")?.to_string(),
        price: decimal_field(data, "price")?,
        quantity: decimal_field(data, "size")?,
        side: side(str_field(data, "side")?)?,
        timestamp: millis_field(data, "created_at")?,
    })
}

/// Position from the `positions` channel or `GET /positions`.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed numbers.
pub fn position(data: &Value) -> Result<Position, ParseError> {
    let (signed_side, size) = Position::split_signed_size(decimal_field(data, "size")?);
    let side = match opt_str_field(data, "side") {
        _ if size.is_zero() => PositionSide::Flat,
        Some("LONG") => PositionSide::Long,
        Some("SHORT") => PositionSide::Short,
        _ => signed_side,
    };
    Ok(Position {
        asset: asset_from_paradex(str_field(data, "market")?),
        side,
        size,
        entry_price: decimal_field(data, "average_entry_price")?,
        mark_price: opt_decimal_field(data, "mark_price")?,
        liquidation_price: opt_decimal_field(data, "liquidation_price")?,
        unrealized_pnl: opt_decimal_field(data, "unrealized_pnl")?.unwrap_or_default(),
        realized_pnl: opt_decimal_field(data, "realized_positional_pnl")?.unwrap_or_default(),
        leverage: opt_decimal_field(data, "leverage")?.unwrap_or(Decimal::ONE),
        margin_used: opt_decimal_field(data, "cost")?.unwrap_or_default().abs(),
        timestamp: opt_millis_field(data, "last_updated_at")?.unwrap_or_else(Utc::now),
    })
}

/// Account summary from the `account` channel or `GET /account`.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed numbers.
pub fn balance(data: &Value) -> Result<AccountBalance, ParseError> {
    let available = decimal_field(data, "free_collateral")?;
    Ok(AccountBalance {
        total: decimal_field(data, "account_value")?,
        available,
        withdrawable: available,
        used_margin: opt_decimal_field(data, "initial_margin_requirement")?.unwrap_or_default(),
        notional: opt_decimal_field(data, "total_notional")?.unwrap_or_default(),
        raw_usd: opt_decimal_field(data, "total_collateral")?.unwrap_or_default(),
        timestamp: opt_millis_field(data, "updated_at")?.unwrap_or_else(Utc::now),
    })
}

/// `GET /markets/klines` row `[ts, open, high, low, close, volume]`.
///
/// # Errors
///
/// Returns a [`ParseError`] for short or malformed rows.
pub fn kline_row(
    row: &Value,
    market: &str,
    interval: KlineInterval,
    now: DateTime<Utc>,
) -> Result<Kline, ParseError> {
    let [ts, open, high, low, close, volume, ..] = as_array(row, "results")? else {
        return Err(ParseError::invalid_value("results", row));
    };
    let open_time = millis(ts, "results[0]")?;
    let close_time = interval
        .close_after(open_time)
        .ok_or_else(|| ParseError::invalid_value("results[0]", open_time))?;
    Ok(Kline {
        asset: asset_from_paradex(market),
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

/// `GET /funding/data` row `{market, funding_rate, funding_premium, created_at}`.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed rates.
pub fn funding(data: &Value) -> Result<FundingRate, ParseError> {
    Ok(FundingRate {
        asset: asset_from_paradex(str_field(data, "market")?),
        rate: decimal_field(data, "funding_rate")?,
        premium: opt_decimal_field(data, "funding_premium")?,
        next_funding_time: None,
        timestamp: millis_field(data, "created_at")?,
    })
}

/// `GET /orders` element.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed orders.
pub fn order(data: &Value) -> Result<Order, ParseError> {
    let quantity = decimal_field(data, "size")?;
    let remaining = opt_decimal_field(data, "remaining_size")?.unwrap_or(quantity);
    let filled = quantity
        .checked_sub(remaining)
        .ok_or_else(|| ParseError::invalid_value("remaining_size", remaining))?;
    let status = match str_field(data, "status")? {
        "NEW" | "UNTRIGGERED" => OrderStatus::Open,
        "OPEN" if filled.is_zero() => OrderStatus::Open,
        "OPEN" => OrderStatus::PartiallyFilled,
        "CLOSED" if remaining.is_zero() => OrderStatus::Filled,
        "CLOSED" => match opt_str_field(data, "cancel_reason") {
            Some(reason) if reason.contains("REJECT") => OrderStatus::Rejected,
            _ => OrderStatus::Cancelled,
        },
        other => return Err(ParseError::invalid_value("status", other)),
    };
    let order_type = match str_field(data, "type")? {
        "MARKET" => OrderType::Market,
        _ => OrderType::Limit,
    };
    Ok(Order {
        order_id: str_field(data, "id")?.to_string(),
        client_order_id: opt_str_field(data, "client_id")
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        asset: asset_from_paradex(str_field(data, "market")?),
        side: side(str_field(data, "side")?)?,
        order_type,
        price: opt_decimal_field(data, "price")?.filter(|p| !p.is_zero()),
        quantity,
        filled_quantity: filled,
        status,
        timestamp: millis_field(data, "created_at")?,
    })
}

/// `{"results": [...]}` envelope.
///
/// # Errors
///
/// `MissingField` / `WrongType` when absent.
pub fn results(value: &Value) -> Result<&[Value], ParseError> {
    as_array(field(value, "results")?, "results")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Asset;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn snapshot_splits_sides() {
        let data = json!({
            "market": "ETH-USD-PERP", "seq_no": 20, "last_updated_at": 1_700_000_000_000_i64,
            "update_type": "s", "deletes": [],
            "inserts": [
                {"side": "BUY", "price": "1999", "size": "3"},
                {"side": "SELL", "price": "2001", "size": "1"},
                {"side": "BUY", "price": "2000", "size": "2"}
            ]
        });
        let book = book_snapshot(&data).unwrap();
        assert_eq!(book.asset, Asset::new("ETH"));
        assert_eq!(book.best_bid().unwrap().price, dec!(2000));
        assert_eq!(book.best_ask().unwrap().price, dec!(2001));
    }

    #[test]
    fn rest_book_reads_pairs() {
        let data = json!({"market": "BTC-USD-PERP", "bids": [["100", "1"]], "asks": [["101", "2"]]});
        let book = book_rest(&data).unwrap();
        assert_eq!(book.asks, vec![PriceLevel::new(dec!(101), dec!(2))]);
        let short = json!({"market": "BTC-USD-PERP", "bids": [["100"]], "asks": []});
        assert!(book_rest(&short).is_err());
    }

    #[test]
    fn short_position_has_absolute_size() {
        let data = json!({
            "market": "SOL-USD-PERP", "side": "SHORT", "size": "-12.5",
            "average_entry_price": "150.1", "unrealized_pnl": "-3.2",
            "realized_positional_pnl": "1.1", "liquidation_price": "", "leverage": "5",
            "cost": "-1876.25", "last_updated_at": 1_700_000_000_000_i64
        });
        let position = position(&data).unwrap();
        assert_eq!(position.side, PositionSide::Short);
        assert_eq!(position.size, dec!(12.5));
        assert_eq!(position.liquidation_price, None);
        assert_eq!(position.margin_used, dec!(1876.25));
    }

    #[test]
    fn kline_rows_require_six_columns() {
        let now = Utc::now();
        let row = json!([1_700_000_040_000_i64, "100", "102", "99", "101", "4"]);
        let kline = kline_row(&row, "BTC-USD-PERP", KlineInterval::OneMinute, now).unwrap();
        assert_eq!(kline.close, dec!(101));
        assert!(kline.closed);
        assert!(kline_row(&json!([1, "1"]), "BTC-USD-PERP", KlineInterval::OneMinute, now).is_err());
    }

    #[test]
    fn order_status_mapping() {
        let base = |status: &str, remaining: &str| {
            json!({
                "id": "o1", "client_id": "", "market": "BTC-USD-PERP", "side": "BUY",
                "type": "LIMIT", "size": "2", "remaining_size": remaining, "price": "100",
                "status": status, "created_at": 1_700_000_000_000_i64
            })
        };
        assert_eq!(order(&base("NEW", "2")).unwrap().status, OrderStatus::Open);
        assert_eq!(order(&base("OPEN", "1")).unwrap().status, OrderStatus::PartiallyFilled);
        assert_eq!(order(&base("CLOSED", "0")).unwrap().status, OrderStatus::Filled);
        assert_eq!(order(&base("CLOSED", "2")).unwrap().status, OrderStatus::Cancelled);
        assert_eq!(order(&base("NEW", "2")).unwrap().client_order_id, None);
        assert!(order(&base("WEIRD", "2")).is_err());
    }
}
