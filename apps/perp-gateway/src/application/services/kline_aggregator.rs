//! Kline Aggregator
//!
//! Builds OHLCV candles from a trade stream for venues without a native
//! candle channel.
//!
//! # Buckets
//!
//! A trade lands in the bucket whose open time is its timestamp truncated
//! to the interval. Open is the first observed price, close the last, high
//! and low the extremes; volume sums quantities and the trade count
//! increments per trade.
//!
//! # Emission
//!
//! A bucket is emitted, marked closed, and evicted once the clock reaches
//! its close time. Expiry is checked on every trade and on explicit
//! [`KlineAggregator::flush_expired`] calls. The output channel is bounded;
//! when it is full the newest kline is dropped.
//!
//! Each (asset, interval) remembers the close time of its last emitted
//! bucket. A trade belonging to that bucket or an earlier one is late and
//! is discarded rather than reopening a candle that was already published.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::application::ports::Clock;
use crate::domain::market::{Asset, Kline, KlineInterval, Trade};

/// Output buffer capacity.
pub const KLINE_BUFFER: usize = 100;

type SeriesKey = (Asset, KlineInterval);
type BucketKey = (Asset, KlineInterval, DateTime<Utc>);

#[derive(Default)]
struct Buckets {
    open: BTreeMap<BucketKey, Kline>,
    /// Close time of the last emitted bucket per series.
    emitted: BTreeMap<SeriesKey, DateTime<Utc>>,
}

/// Trade-to-candle aggregator.
pub struct KlineAggregator {
    clock: Arc<dyn Clock>,
    intervals: Vec<KlineInterval>,
    buckets: Mutex<Buckets>,
    tx: mpsc::Sender<Kline>,
    dropped: AtomicU64,
    late: AtomicU64,
}

impl std::fmt::Debug for KlineAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KlineAggregator")
            .field("intervals", &self.intervals)
            .field("open_buckets", &self.buckets.lock().open.len())
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .field("late", &self.late.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl KlineAggregator {
    /// Aggregate the default interval set into a buffer of [`KLINE_BUFFER`].
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::Receiver<Kline>) {
        Self::with_intervals(clock, KlineInterval::AGGREGATED.to_vec(), KLINE_BUFFER)
    }

    /// Aggregate `intervals` into a buffer of `capacity`.
    #[must_use]
    pub fn with_intervals(
        clock: Arc<dyn Clock>,
        intervals: Vec<KlineInterval>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Kline>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let aggregator = Self {
            clock,
            intervals,
            buckets: Mutex::new(Buckets::default()),
            tx,
            dropped: AtomicU64::new(0),
            late: AtomicU64::new(0),
        };
        (aggregator, rx)
    }

    /// Fold a trade into every interval's bucket, then emit expired buckets.
    ///
    /// Late trades are counted in [`KlineAggregator::late_trades`] and
    /// otherwise ignored for the affected interval.
    pub fn on_trade(&self, trade: &Trade) {
        {
            let mut buckets = self.buckets.lock();
            for &interval in &self.intervals {
                self.fold(&mut buckets, interval, trade);
            }
        }
        self.flush_expired();
    }

    fn fold(&self, buckets: &mut Buckets, interval: KlineInterval, trade: &Trade) {
        let open_time = interval.bucket_start(trade.timestamp);
        let Some(close_time) = interval.close_after(open_time) else {
            tracing::warn!(asset = %trade.asset, %interval, timestamp = %trade.timestamp, "Trade outside kline range");
            return;
        };

        let series = (trade.asset.clone(), interval);
        if buckets.emitted.get(&series).is_some_and(|&last| close_time <= last) {
            self.late.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                asset = %trade.asset,
                %interval,
                timestamp = %trade.timestamp,
                "Dropping trade for an already emitted kline"
            );
            return;
        }

        let kline = match buckets.open.entry((trade.asset.clone(), interval, open_time)) {
            Entry::Vacant(slot) => {
                slot.insert(Kline {
                    asset: trade.asset.clone(),
                    interval,
                    open_time,
                    close_time,
                    open: trade.price,
                    high: trade.price,
                    low: trade.price,
                    close: trade.price,
                    volume: trade.quantity,
                    trade_count: 1,
                    closed: false,
                });
                return;
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };
        let Some(volume) = kline.volume.checked_add(trade.quantity) else {
            tracing::warn!(asset = %trade.asset, %interval, quantity = %trade.quantity, "Kline volume overflow, skipping trade");
            return;
        };
        kline.high = kline.high.max(trade.price);
        kline.low = kline.low.min(trade.price);
        kline.close = trade.price;
        kline.volume = volume;
        kline.trade_count += 1;
    }

    /// Emit and evict every bucket whose close time has passed.
    ///
    /// Returns the number of klines handed to the output channel.
    pub fn flush_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<Kline> = {
            let mut buckets = self.buckets.lock();
            let keys: Vec<BucketKey> = buckets
                .open
                .iter()
                .filter(|(_, kline)| kline.close_time <= now)
                .map(|(key, _)| key.clone())
                .collect();
            let expired: Vec<Kline> =
                keys.iter().filter_map(|key| buckets.open.remove(key)).collect();
            for kline in &expired {
                let last = buckets
                    .emitted
                    .entry((kline.asset.clone(), kline.interval))
                    .or_insert(kline.close_time);
                *last = (*last).max(kline.close_time);
            }
            expired
        };

        let mut emitted = 0;
        for mut kline in expired {
            kline.closed = true;
            match self.tx.try_send(kline) {
                Ok(()) => emitted += 1,
                Err(mpsc::error::TrySendError::Full(kline)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        asset = %kline.asset,
                        interval = %kline.interval,
                        open_time = %kline.open_time,
                        "Kline buffer full, dropping kline"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("Kline receiver closed");
                }
            }
        }
        emitted
    }

    /// Number of open buckets.
    #[must_use]
    pub fn open_buckets(&self) -> usize {
        self.buckets.lock().open.len()
    }

    /// Trades discarded because their bucket was already emitted.
    #[must_use]
    pub fn late_trades(&self) -> u64 {
        self.late.load(Ordering::Relaxed)
    }

    /// Klines dropped on a full buffer.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::ManualClock;
    use crate::domain::market::Side;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    fn trade(ts: DateTime<Utc>, price: Decimal, quantity: Decimal) -> Trade {
        Trade {
            asset: Asset::new("BTC"),
            trade_id: ts.timestamp().to_string(),
            price,
            quantity,
            side: Side::Buy,
            timestamp: ts,
        }
    }

    #[test]
    fn synthesizes_one_minute_kline() {
        let clock = Arc::new(ManualClock::new(at(10, 0, 15)));
        let (aggregator, mut rx) = KlineAggregator::new(clock.clone());

        aggregator.on_trade(&trade(at(10, 0, 15), dec!(100), dec!(1)));
        clock.set(at(10, 0, 30));
        aggregator.on_trade(&trade(at(10, 0, 30), dec!(102), dec!(2)));
        clock.set(at(10, 0, 59));
        aggregator.on_trade(&trade(at(10, 0, 59), dec!(101), dec!(1)));
        assert!(rx.try_recv().is_err());

        clock.set(at(10, 1, 0));
        assert_eq!(aggregator.flush_expired(), 1);

        let kline = rx.try_recv().unwrap();
        assert_eq!(kline.interval, KlineInterval::OneMinute);
        assert_eq!(kline.open, dec!(100));
        assert_eq!(kline.high, dec!(102));
        assert_eq!(kline.low, dec!(100));
        assert_eq!(kline.close, dec!(101));
        assert_eq!(kline.volume, dec!(4));
        assert_eq!(kline.trade_count, 3);
        assert_eq!(kline.open_time, at(10, 0, 0));
        assert_eq!(kline.close_time, at(10, 1, 0));
        assert!(kline.closed);
        assert!(rx.try_recv().is_err());

        // 5m, 15m, and 1h buckets are still open.
        assert_eq!(aggregator.open_buckets(), 3);
    }

    #[test]
    fn hour_bucket_is_hour_aligned() {
        let clock = Arc::new(ManualClock::new(at(10, 59, 0)));
        let (aggregator, mut rx) =
            KlineAggregator::with_intervals(clock.clone(), vec![KlineInterval::OneHour], 10);
        aggregator.on_trade(&trade(at(10, 37, 12), dec!(5), dec!(1)));

        clock.set(at(11, 0, 0));
        aggregator.flush_expired();
        let kline = rx.try_recv().unwrap();
        assert_eq!(kline.open_time, at(10, 0, 0));
        assert_eq!(kline.close_time, at(11, 0, 0));
    }

    #[test]
    fn full_buffer_drops_newest() {
        let clock = Arc::new(ManualClock::new(at(10, 0, 0)));
        let (aggregator, mut rx) =
            KlineAggregator::with_intervals(clock.clone(), vec![KlineInterval::OneMinute], 1);

        aggregator.on_trade(&trade(at(10, 0, 1), dec!(1), dec!(1)));
        aggregator.on_trade(&trade(at(10, 1, 1), dec!(2), dec!(1)));
        clock.set(at(10, 5, 0));
        aggregator.flush_expired();

        assert_eq!(aggregator.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().open, dec!(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn trade_before_close_does_not_emit() {
        let clock = Arc::new(ManualClock::new(at(10, 0, 0)));
        let (aggregator, mut rx) = KlineAggregator::new(clock.clone());
        aggregator.on_trade(&trade(at(10, 0, 0), dec!(1), dec!(1)));
        clock.set(at(10, 0, 59));
        assert_eq!(aggregator.flush_expired(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn late_trade_after_emission_is_dropped() {
        let clock = Arc::new(ManualClock::new(at(10, 0, 30)));
        let (aggregator, mut rx) =
            KlineAggregator::with_intervals(clock.clone(), vec![KlineInterval::OneMinute], 10);

        aggregator.on_trade(&trade(at(10, 0, 30), dec!(100), dec!(1)));
        clock.set(at(10, 1, 0));
        assert_eq!(aggregator.flush_expired(), 1);
        let first = rx.try_recv().unwrap();
        assert_eq!(first.open_time, at(10, 0, 0));
        assert_eq!(first.volume, dec!(1));

        // Delivered after the 10:00 candle went out.
        clock.set(at(10, 1, 5));
        aggregator.on_trade(&trade(at(10, 0, 59), dec!(105), dec!(3)));
        assert_eq!(aggregator.late_trades(), 1);
        assert_eq!(aggregator.open_buckets(), 0);
        assert!(rx.try_recv().is_err());

        // The next bucket still aggregates normally.
        aggregator.on_trade(&trade(at(10, 1, 10), dec!(106), dec!(2)));
        clock.set(at(10, 2, 0));
        assert_eq!(aggregator.flush_expired(), 1);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.open_time, at(10, 1, 0));
        assert_eq!(second.open, dec!(106));
        assert_eq!(second.volume, dec!(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn volume_overflow_skips_the_trade() {
        let clock = Arc::new(ManualClock::new(at(10, 0, 0)));
        let (aggregator, mut rx) =
            KlineAggregator::with_intervals(clock.clone(), vec![KlineInterval::OneMinute], 10);

        aggregator.on_trade(&trade(at(10, 0, 1), dec!(1), Decimal::MAX));
        aggregator.on_trade(&trade(at(10, 0, 2), dec!(2), Decimal::MAX));
        clock.set(at(10, 1, 0));
        aggregator.flush_expired();

        let kline = rx.try_recv().unwrap();
        assert_eq!(kline.volume, Decimal::MAX);
        assert_eq!(kline.trade_count, 1);
        assert_eq!(kline.close, dec!(1));
    }

    fn replay(trades: &[(u32, i64, i64)]) -> Vec<Kline> {
        let clock = Arc::new(ManualClock::new(at(9, 0, 0)));
        let (aggregator, mut rx) = KlineAggregator::new(clock.clone());
        for &(offset, price, qty) in trades {
            let ts = at(9, 0, 0) + chrono::Duration::seconds(i64::from(offset));
            clock.set(ts);
            aggregator.on_trade(&trade(ts, Decimal::new(price, 2), Decimal::new(qty, 3)));
        }
        clock.set(at(12, 0, 0));
        aggregator.flush_expired();

        let mut out = Vec::new();
        while let Ok(kline) = rx.try_recv() {
            out.push(kline);
        }
        out
    }

    proptest! {
        #[test]
        fn replay_is_deterministic(
            mut trades in prop::collection::vec((0u32..7_200, 1i64..1_000_000, 1i64..10_000), 0..40)
        ) {
            trades.sort_by_key(|t| t.0);
            let first = serde_json::to_vec(&replay(&trades)).unwrap();
            let second = serde_json::to_vec(&replay(&trades)).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
