//! Symbol normalization and price ticks.
//!
//! | Venue       | Wire symbol      |
//! |-------------|------------------|
//! | Hyperliquid | `BTC`            |
//! | Paradex     | `BTC-USD-PERP`   |
//! | Bybit       | `BTCUSDT`        |

use rust_decimal::Decimal;

use crate::domain::market::Asset;
use crate::error::GatewayError;

const PARADEX_SUFFIX: &str = "-USD-PERP";
const BYBIT_QUOTE: &str = "USDT";

/// Default price tick for an asset family: BTC and ETH trade in whole
/// dollars, everything else in cents.
#[must_use]
pub fn default_tick(asset: &Asset) -> Decimal {
    match asset.as_str() {
        "BTC" | "ETH" => Decimal::ONE,
        _ => Decimal::new(1, 2),
    }
}

/// Tick as it appears in Paradex channel names: `1`, `0_01`.
#[must_use]
pub fn paradex_tick_label(tick: Decimal) -> String {
    tick.normalize().to_string().replace('.', "_")
}

/// `BTC` → `BTC-USD-PERP`.
#[must_use]
pub fn paradex_market(asset: &Asset) -> String {
    format!("{asset}{PARADEX_SUFFIX}")
}

/// `BTC-USD-PERP` → `BTC`. Unknown shapes keep their full text.
#[must_use]
pub fn asset_from_paradex(market: &str) -> Asset {
    Asset::new(market.strip_suffix(PARADEX_SUFFIX).unwrap_or(market))
}

/// `BTC` → `BTCUSDT`.
#[must_use]
pub fn bybit_symbol(asset: &Asset) -> String {
    format!("{asset}{BYBIT_QUOTE}")
}

/// `BTCUSDT` → `BTC`.
#[must_use]
pub fn asset_from_bybit(symbol: &str) -> Asset {
    Asset::new(symbol.strip_suffix(BYBIT_QUOTE).unwrap_or(symbol))
}

/// Round to `figures` significant figures, keeping at most `max_decimals`
/// decimal places.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] when the rounded value leaves the
/// decimal range.
pub fn round_significant(
    value: Decimal,
    figures: u32,
    max_decimals: u32,
) -> Result<Decimal, GatewayError> {
    if value.is_zero() {
        return Ok(value);
    }
    let integer_digits = {
        let mut digits = 0_u32;
        let mut whole = value.abs().trunc();
        while whole >= Decimal::ONE {
            whole /= Decimal::TEN;
            whole = whole.trunc();
            digits += 1;
        }
        digits
    };
    let decimals = if integer_digits >= figures {
        0
    } else if integer_digits == 0 {
        let mut leading_zeros = 0_u32;
        let mut scaled = value.abs();
        while scaled < Decimal::new(1, 1) && leading_zeros < max_decimals {
            scaled *= Decimal::TEN;
            leading_zeros += 1;
        }
        figures + leading_zeros
    } else {
        figures - integer_digits
    };
    let rounded = value.round_dp(decimals.min(max_decimals));
    if integer_digits <= figures {
        return Ok(rounded.normalize());
    }
    let out_of_range =
        || GatewayError::InvalidRequest(format!("{value} cannot be rounded to {figures} figures"));
    let factor = 10_i128
        .checked_pow(integer_digits - figures)
        .and_then(|pow| Decimal::try_from_i128_with_scale(pow, 0).ok())
        .ok_or_else(out_of_range)?;
    rounded
        .checked_div(factor)
        .and_then(|scaled| scaled.round().checked_mul(factor))
        .map(|rounded| rounded.normalize())
        .ok_or_else(out_of_range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test_case("BTC", dec!(1) ; "btc")]
    #[test_case("ETH", dec!(1) ; "eth")]
    #[test_case("SOL", dec!(0.01) ; "sol")]
    #[test_case("DOGE", dec!(0.01) ; "default")]
    fn tick_table(symbol: &str, expected: Decimal) {
        assert_eq!(default_tick(&Asset::new(symbol)), expected);
    }

    #[test_case(dec!(1), "1" ; "whole")]
    #[test_case(dec!(0.01), "0_01" ; "cents")]
    #[test_case(dec!(0.10), "0_1" ; "trailing zero")]
    fn paradex_tick_labels(tick: Decimal, expected: &str) {
        assert_eq!(paradex_tick_label(tick), expected);
    }

    #[test]
    fn symbol_round_trips() {
        let btc = Asset::new("BTC");
        assert_eq!(paradex_market(&btc), "BTC-USD-PERP");
        assert_eq!(asset_from_paradex("BTC-USD-PERP"), btc);
        assert_eq!(bybit_symbol(&btc), "BTCUSDT");
        assert_eq!(asset_from_bybit("BTCUSDT"), btc);
        assert_eq!(asset_from_bybit("weird"), Asset::new("WEIRD"));
    }

    #[test_case(dec!(30123.456), dec!(30123) ; "large")]
    #[test_case(dec!(123456.7), dec!(123460) ; "above figures")]
    #[test_case(dec!(1.234567), dec!(1.2346) ; "small")]
    #[test_case(dec!(0.0123456), dec!(0.012346) ; "fractional")]
    #[test_case(dec!(0), dec!(0) ; "zero")]
    fn five_significant_figures(input: Decimal, expected: Decimal) {
        assert_eq!(round_significant(input, 5, 6).unwrap(), expected);
    }

    #[test]
    fn rounding_past_the_decimal_range_is_rejected() {
        let result = round_significant(Decimal::MAX, 4, 6);
        assert!(matches!(result, Err(GatewayError::InvalidRequest(_))));

        let wide = dec!(12345678901234567890123456.7);
        assert_eq!(
            round_significant(wide, 5, 6).unwrap(),
            dec!(12346000000000000000000000)
        );
    }
}
