//! Broadcast Channel Adapters
//!
//! Fan-out of canonical updates to any number of in-process readers using
//! tokio broadcast channels.
//!
//! # Architecture
//!
//! The `BroadcastHub` provides one channel per canonical record type:
//! - Order books, trades, and klines from public venue streams
//! - Positions and balances from account streams
//! - Feed errors from every stream of a venue
//!
//! Readers either hold a raw receiver (`*_rx`) or a boxed stream
//! (`*_stream`). Streams skip lagged updates instead of failing.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::domain::market::{AccountBalance, AccountUpdate, Kline, OrderBook, Position, Trade};
use crate::error::GatewayError;

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Configuration for broadcast channel capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Capacity for order book channel.
    pub order_books_capacity: usize,
    /// Capacity for trade channel.
    pub trades_capacity: usize,
    /// Capacity for kline channel.
    pub klines_capacity: usize,
    /// Capacity for position channel.
    pub positions_capacity: usize,
    /// Capacity for balance channel.
    pub balances_capacity: usize,
    /// Capacity for error channel.
    pub errors_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            order_books_capacity: 1_000,
            trades_capacity: 10_000,
            klines_capacity: 1_000,
            positions_capacity: 1_000,
            balances_capacity: 1_000,
            errors_capacity: 1_000,
        }
    }
}

/// Central hub for all canonical update channels of a venue.
///
/// # Example
///
/// ```rust
/// use perp_gateway::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
/// let mut rx = hub.order_books_rx();
/// assert_eq!(hub.stats().order_books_receivers, 1);
/// # drop(rx);
/// ```
#[derive(Debug)]
#[allow(clippy::struct_field_names)]
pub struct BroadcastHub {
    order_books_tx: broadcast::Sender<OrderBook>,
    trades_tx: broadcast::Sender<Trade>,
    klines_tx: broadcast::Sender<Kline>,
    positions_tx: broadcast::Sender<Position>,
    balances_tx: broadcast::Sender<AccountBalance>,
    errors_tx: broadcast::Sender<GatewayError>,
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            order_books_tx: broadcast::channel(config.order_books_capacity.max(1)).0,
            trades_tx: broadcast::channel(config.trades_capacity.max(1)).0,
            klines_tx: broadcast::channel(config.klines_capacity.max(1)).0,
            positions_tx: broadcast::channel(config.positions_capacity.max(1)).0,
            balances_tx: broadcast::channel(config.balances_capacity.max(1)).0,
            errors_tx: broadcast::channel(config.errors_capacity.max(1)).0,
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Publish an order book. Returns the number of receivers reached.
    pub fn publish_order_book(&self, book: OrderBook) -> usize {
        self.order_books_tx.send(book).unwrap_or(0)
    }

    /// Publish a batch of trades one by one.
    pub fn publish_trades(&self, trades: &[Trade]) -> usize {
        trades
            .iter()
            .map(|trade| self.trades_tx.send(trade.clone()).unwrap_or(0))
            .sum()
    }

    /// Publish a kline.
    pub fn publish_kline(&self, kline: Kline) -> usize {
        self.klines_tx.send(kline).unwrap_or(0)
    }

    /// Publish the positions and balance of an account update.
    pub fn publish_account(&self, update: &AccountUpdate) -> usize {
        let mut reached: usize = update
            .positions
            .iter()
            .map(|position| self.positions_tx.send(position.clone()).unwrap_or(0))
            .sum();
        if let Some(balance) = &update.balance {
            reached += self.balances_tx.send(balance.clone()).unwrap_or(0);
        }
        reached
    }

    /// Publish a feed error.
    pub fn publish_error(&self, error: GatewayError) -> usize {
        self.errors_tx.send(error).unwrap_or(0)
    }

    // =========================================================================
    // Receivers
    // =========================================================================

    /// New receiver for order books.
    #[must_use]
    pub fn order_books_rx(&self) -> broadcast::Receiver<OrderBook> {
        self.order_books_tx.subscribe()
    }

    /// New receiver for trades.
    #[must_use]
    pub fn trades_rx(&self) -> broadcast::Receiver<Trade> {
        self.trades_tx.subscribe()
    }

    /// New receiver for klines.
    #[must_use]
    pub fn klines_rx(&self) -> broadcast::Receiver<Kline> {
        self.klines_tx.subscribe()
    }

    /// New receiver for positions.
    #[must_use]
    pub fn positions_rx(&self) -> broadcast::Receiver<Position> {
        self.positions_tx.subscribe()
    }

    /// New receiver for balances.
    #[must_use]
    pub fn balances_rx(&self) -> broadcast::Receiver<AccountBalance> {
        self.balances_tx.subscribe()
    }

    /// New receiver for errors.
    #[must_use]
    pub fn errors_rx(&self) -> broadcast::Receiver<GatewayError> {
        self.errors_tx.subscribe()
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Order book stream.
    #[must_use]
    pub fn order_books_stream(&self) -> BoxStream<'static, OrderBook> {
        lossy_stream(self.order_books_rx(), "order_books")
    }

    /// Trade stream.
    #[must_use]
    pub fn trades_stream(&self) -> BoxStream<'static, Trade> {
        lossy_stream(self.trades_rx(), "trades")
    }

    /// Kline stream.
    #[must_use]
    pub fn klines_stream(&self) -> BoxStream<'static, Kline> {
        lossy_stream(self.klines_rx(), "klines")
    }

    /// Position stream.
    #[must_use]
    pub fn positions_stream(&self) -> BoxStream<'static, Position> {
        lossy_stream(self.positions_rx(), "positions")
    }

    /// Balance stream.
    #[must_use]
    pub fn balances_stream(&self) -> BoxStream<'static, AccountBalance> {
        lossy_stream(self.balances_rx(), "balances")
    }

    /// Error stream.
    #[must_use]
    pub fn errors_stream(&self) -> BoxStream<'static, GatewayError> {
        lossy_stream(self.errors_rx(), "errors")
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Get statistics about all channels.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            order_books_receivers: self.order_books_tx.receiver_count(),
            trades_receivers: self.trades_tx.receiver_count(),
            klines_receivers: self.klines_tx.receiver_count(),
            positions_receivers: self.positions_tx.receiver_count(),
            balances_receivers: self.balances_tx.receiver_count(),
            errors_receivers: self.errors_tx.receiver_count(),
        }
    }
}

fn lossy_stream<T>(rx: broadcast::Receiver<T>, channel: &'static str) -> BoxStream<'static, T>
where
    T: Clone + Send + 'static,
{
    BroadcastStream::new(rx)
        .filter_map(move |item| async move {
            match item {
                Ok(value) => Some(value),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(channel, skipped, "Stream reader lagged, skipping updates");
                    None
                }
            }
        })
        .boxed()
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about broadcast channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Number of order book receivers.
    pub order_books_receivers: usize,
    /// Number of trade receivers.
    pub trades_receivers: usize,
    /// Number of kline receivers.
    pub klines_receivers: usize,
    /// Number of position receivers.
    pub positions_receivers: usize,
    /// Number of balance receivers.
    pub balances_receivers: usize,
    /// Number of error receivers.
    pub errors_receivers: usize,
}

impl BroadcastStats {
    /// Get total number of receivers across all channels.
    #[must_use]
    pub const fn total_receivers(&self) -> usize {
        self.order_books_receivers
            + self.trades_receivers
            + self.klines_receivers
            + self.positions_receivers
            + self.balances_receivers
            + self.errors_receivers
    }
}

// =============================================================================
// Tests
// =============================================================================
