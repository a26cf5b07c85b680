//! Application Services
//!
//! - [`KlineAggregator`]: synthesizes candles from trades for venues that
//!   lack a native candle channel

mod kline_aggregator;

pub use kline_aggregator::{KLINE_BUFFER, KlineAggregator};
