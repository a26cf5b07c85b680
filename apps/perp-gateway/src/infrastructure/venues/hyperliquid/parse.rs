//! Hyperliquid payload parsers, shared by the WebSocket and REST paths.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::market::{
    AccountBalance, AccountUpdate, Asset, FundingRate, Kline, KlineInterval, Order, OrderBook,
    OrderStatus, OrderType, Position, PriceLevel, Side, Trade,
};
use crate::infrastructure::venues::parse::{
    ParseError, array_field, as_array, decimal_field, field, millis_field, opt_decimal_field,
    opt_millis_field, str_field,
};

/// `[{px, sz, n}, ...]` → levels.
///
/// # Errors
///
/// Any malformed level fails the whole side.
pub fn levels(side: &Value, name: &str) -> Result<Vec<PriceLevel>, ParseError> {
    as_array(side, name)?
        .iter()
        .map(|level| {
            Ok(PriceLevel::new(
                decimal_field(level, "px")?,
                decimal_field(level, "sz")?,
            ))
        })
        .collect()
}

/// `l2Book` data: `{coin, time?, levels: [bids, asks]}`.
///
/// # Errors
///
/// Returns a [`ParseError`] for missing sides or bad numbers.
pub fn order_book(data: &Value) -> Result<OrderBook, ParseError> {
    let coin = str_field(data, "coin")?;
    let sides = array_field(data, "levels")?;
    let bids = levels(
        sides
            .first()
            .ok_or_else(|| ParseError::MissingField("levels[0]".into()))?,
        "levels[0]",
    )?;
    let asks = levels(
        sides
            .get(1)
            .ok_or_else(|| ParseError::MissingField("levels[1]".into()))?,
        "levels[1]",
    )?;
    let timestamp = opt_millis_field(data, "time")?.unwrap_or_else(Utc::now);
    Ok(OrderBook::new(Asset::new(coin), bids, asks, timestamp))
}

/// One element of a `trades` array.
///
/// # Errors
///
/// Returns a [`ParseError`] for a missing field or unknown side.
pub fn trade(data: &Value) -> Result<Trade, ParseError> {
    let side = match str_field(data, "side")? {
        "B" => Side::Buy,
        "A" => Side::Sell,
        other => return Err(ParseError::invalid_value("side", other)),
    };
    let trade_id = match data.get("tid") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => str_field(data, "hash")?.to_string(),
    };
    Ok(Trade {
        asset: Asset::new(str_field(data, "coin")?),
        trade_id,
        price: decimal_field(data, "px")?,
        quantity: decimal_field(data, "sz")?,
        side,
        timestamp: millis_field(data, "time")?,
    })
}

/// Whole `trades` array. One bad element fails the batch.
///
/// # Errors
///
/// Returns the first element's [`ParseError`].
pub fn trades(data: &Value) -> Result<Vec<Trade>, ParseError> {
    as_array(data, "data")?.iter().map(trade).collect()
}

/// Candle `{t, T, s, i, o, c, h, l, v, n}`.
///
/// # Errors
///
/// Returns a [`ParseError`] for missing fields or an unknown interval.
pub fn candle(data: &Value, now: DateTime<Utc>) -> Result<Kline, ParseError> {
    let label = str_field(data, "i")?;
    let interval =
        KlineInterval::from_str(label).map_err(|_| ParseError::invalid_value("i", label))?;
    let open_time = millis_field(data, "t")?;
    let close_time = millis_field(data, "T")?;
    let trade_count = match data.get("n") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or_default(),
        _ => 0,
    };
    Ok(Kline {
        asset: Asset::new(str_field(data, "s")?),
        interval,
        open_time,
        close_time,
        open: decimal_field(data, "o")?,
        high: decimal_field(data, "h")?,
        low: decimal_field(data, "l")?,
        close: decimal_field(data, "c")?,
        volume: decimal_field(data, "v")?,
        trade_count,
        closed: close_time <= now,
    })
}

/// `clearinghouseState` → positions and balance.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed positions or margin summary.
pub fn clearinghouse(state: &Value, fallback_time: DateTime<Utc>) -> Result<AccountUpdate, ParseError> {
    let timestamp = opt_millis_field(state, "time")?.unwrap_or(fallback_time);
    let positions = match state.get("assetPositions") {
        Some(list) => as_array(list, "assetPositions")?
            .iter()
            .map(|entry| position(field(entry, "position")?, timestamp))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let summary = field(state, "marginSummary")?;
    let total = decimal_field(summary, "accountValue")?;
    let used_margin = decimal_field(summary, "totalMarginUsed")?;
    let available = total
        .checked_sub(used_margin)
        .ok_or_else(|| ParseError::invalid_value("totalMarginUsed", used_margin))?;
    let balance = AccountBalance {
        total,
        available,
        withdrawable: opt_decimal_field(state, "withdrawable")?.unwrap_or_default(),
        used_margin,
        notional: decimal_field(summary, "totalNtlPos")?,
        raw_usd: decimal_field(summary, "totalRawUsd")?,
        timestamp,
    };

    Ok(AccountUpdate {
        positions,
        balance: Some(balance),
    })
}

fn position(data: &Value, timestamp: DateTime<Utc>) -> Result<Position, ParseError> {
    let signed = decimal_field(data, "szi")?;
    let (side, size) = Position::split_signed_size(signed);
    let mark_price = match opt_decimal_field(data, "positionValue")? {
        Some(value) if !size.is_zero() => Some(
            value
                .checked_div(size)
                .ok_or_else(|| ParseError::invalid_value("positionValue", value))?,
        ),
        _ => None,
    };
    let leverage = data
        .get("leverage")
        .map(|lev| decimal_field(lev, "value"))
        .transpose()?
        .unwrap_or(Decimal::ONE);
    Ok(Position {
        asset: Asset::new(str_field(data, "coin")?),
        side,
        size,
        entry_price: opt_decimal_field(data, "entryPx")?.unwrap_or_default(),
        mark_price,
        liquidation_price: opt_decimal_field(data, "liquidationPx")?,
        unrealized_pnl: decimal_field(data, "unrealizedPnl")?,
        realized_pnl: Decimal::ZERO,
        leverage,
        margin_used: opt_decimal_field(data, "marginUsed")?.unwrap_or_default(),
        timestamp,
    })
}

/// `fundingHistory` element `{coin, fundingRate, premium, time}`.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed rates.
pub fn funding(data: &Value) -> Result<FundingRate, ParseError> {
    Ok(FundingRate {
        asset: Asset::new(str_field(data, "coin")?),
        rate: decimal_field(data, "fundingRate")?,
        premium: opt_decimal_field(data, "premium")?,
        next_funding_time: None,
        timestamp: millis_field(data, "time")?,
    })
}

/// `openOrders` element `{coin, side, limitPx, sz, oid, timestamp, origSz, cloid?}`.
///
/// # Errors
///
/// Returns a [`ParseError`] for malformed orders.
pub fn open_order(data: &Value) -> Result<Order, ParseError> {
    let side = match str_field(data, "side")? {
        "B" => Side::Buy,
        "A" => Side::Sell,
        other => return Err(ParseError::invalid_value("side", other)),
    };
    let remaining = decimal_field(data, "sz")?;
    let original = opt_decimal_field(data, "origSz")?.unwrap_or(remaining);
    let filled = original
        .checked_sub(remaining)
        .ok_or_else(|| ParseError::invalid_value("origSz", original))?;
    let order_id = match field(data, "oid")? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => return Err(ParseError::invalid_value("oid", other)),
    };
    Ok(Order {
        order_id,
        client_order_id: data.get("cloid").and_then(Value::as_str).map(str::to_string),
        asset: Asset::new(str_field(data, "coin")?),
        side,
        order_type: OrderType::Limit,
        price: Some(decimal_field(data, "limitPx")?),
        quantity: original,
        filled_quantity: filled,
        status: if filled.is_zero() {
            OrderStatus::Open
        } else {
            OrderStatus::PartiallyFilled
        },
        timestamp: millis_field(data, "timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::PositionSide;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn parses_book_without_time() {
        let data = json!({
            "coin": "BTC",
            "levels": [[{"px": "30000.5", "sz": "0.1", "n": 1}], [{"px": "30001.0", "sz": "0.2", "n": 2}]]
        });
        let book = order_book(&data).unwrap();
        assert_eq!(book.asset, Asset::new("BTC"));
        assert_eq!(book.bids, vec![PriceLevel::new(dec!(30000.5), dec!(0.1))]);
        assert_eq!(book.asks, vec![PriceLevel::new(dec!(30001.0), dec!(0.2))]);
    }

    #[test]
    fn invalid_price_fails_book() {
        let data = json!({"coin": "BTC", "levels": [[{"px": "oops", "sz": "0.1"}]]});
        assert!(matches!(
            order_book(&data),
            Err(ParseError::InvalidDecimal { field, .. }) if field == "px"
        ));
    }

    #[test]
    fn missing_ask_side_is_reported() {
        let data = json!({"coin": "BTC", "levels": [[]]});
        assert_eq!(
            order_book(&data),
            Err(ParseError::MissingField("levels[1]".into()))
        );
    }

    #[test]
    fn parses_trade_batch() {
        let data = json!([
            {"coin": "ETH", "side": "B", "px": "2000.1", "sz": "1.5", "time": 1_700_000_000_000_i64, "hash": "0xabc", "tid": 7},
            {"coin": "ETH", "side": "A", "px": "2000.0", "sz": "0.5", "time": 1_700_000_000_001_i64, "hash": "0xdef"}
        ]);
        let batch = trades(&data).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].side, Side::Buy);
        assert_eq!(batch[0].trade_id, "7");
        assert_eq!(batch[1].side, Side::Sell);
        assert_eq!(batch[1].trade_id, "0xdef");
    }

    #[test]
    fn unknown_trade_side_is_rejected() {
        let data = json!({"coin": "ETH", "side": "X", "px": "1", "sz": "1", "time": 1, "tid": 1});
        assert!(matches!(trade(&data), Err(ParseError::InvalidValue { .. })));
    }

    #[test]
    fn parses_candle_and_closed_flag() {
        let data = json!({
            "t": 1_700_000_040_000_i64, "T": 1_700_000_100_000_i64, "s": "BTC", "i": "1m",
            "o": "100", "c": "101", "h": "102", "l": "99", "v": "4", "n": 3
        });
        let open = DateTime::from_timestamp_millis(1_700_000_050_000).unwrap();
        let kline = candle(&data, open).unwrap();
        assert_eq!(kline.interval, KlineInterval::OneMinute);
        assert_eq!(kline.high, dec!(102));
        assert_eq!(kline.trade_count, 3);
        assert!(!kline.closed);

        let later = DateTime::from_timestamp_millis(1_700_000_100_000).unwrap();
        assert!(candle(&data, later).unwrap().closed);
    }

    #[test]
    fn parses_clearinghouse_state() {
        let state = json!({
            "assetPositions": [{
                "type": "oneWay",
                "position": {
                    "coin": "BTC", "szi": "-0.5", "entryPx": "30000", "positionValue": "15500",
                    "unrealizedPnl": "-500", "liquidationPx": null,
                    "leverage": {"type": "cross", "value": 10}, "marginUsed": "1550"
                }
            }],
            "marginSummary": {"accountValue": "10000", "totalNtlPos": "15500", "totalRawUsd": "25500", "totalMarginUsed": "1550"},
            "withdrawable": "8450",
            "time": 1_700_000_000_000_i64
        });
        let update = clearinghouse(&state, Utc::now()).unwrap();
        let position = &update.positions[0];
        assert_eq!(position.side, PositionSide::Short);
        assert_eq!(position.size, dec!(0.5));
        assert_eq!(position.mark_price, Some(dec!(31000)));
        assert_eq!(position.liquidation_price, None);
        assert_eq!(position.leverage, dec!(10));

        let balance = update.balance.unwrap();
        assert_eq!(balance.available, dec!(8450));
        assert_eq!(balance.withdrawable, dec!(8450));
        assert_eq!(balance.raw_usd, dec!(25500));
    }

    #[test]
    fn parses_open_order() {
        let data = json!({
            "coin": "SOL", "side": "A", "limitPx": "150.25", "sz": "2", "origSz": "5",
            "oid": 91, "timestamp": 1_700_000_000_000_i64
        });
        let order = open_order(&data).unwrap();
        assert_eq!(order.order_id, "91");
        assert_eq!(order.quantity, dec!(5));
        assert_eq!(order.filled_quantity, dec!(3));
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
    }
}
