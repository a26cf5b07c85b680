//! Subscription Types
//!
//! Identity and routing key for live venue subscriptions.
//!
//! # Design
//!
//! A subscription is addressed two ways:
//! - by its [`SubscriptionId`], assigned once and kept across reconnects
//! - by its [`SubscriptionKey`] `(channel, instrument, interval)`, which is
//!   what inbound messages are routed on
//!
//! Several subscriptions may share a key; each of them receives every
//! message routed to that key.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// =============================================================================
// Identity
// =============================================================================

/// Process-unique subscription identifier.
pub type SubscriptionId = u64;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next subscription id. Ids increase monotonically.
#[must_use]
pub fn next_subscription_id() -> SubscriptionId {
    NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed)
}

// =============================================================================
// Channel and Key
// =============================================================================

/// Logical stream on a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Order book snapshots.
    OrderBook,
    /// Public trades.
    Trades,
    /// Candles.
    Candle,
    /// Account positions and balances.
    Account,
}

impl Channel {
    /// Channel name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderBook => "orderbook",
            Self::Trades => "trades",
            Self::Candle => "candle",
            Self::Account => "account",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Literal instrument used by account channels without a user address.
pub const ACCOUNT_INSTRUMENT: &str = "account";

/// Routing key `(channel, instrument, interval)`.
///
/// `instrument` is the venue's wire symbol (e.g. `BTC`, `BTC-USD-PERP`,
/// `BTCUSDT`) or a user address for account channels. `interval` is empty
/// unless the channel is [`Channel::Candle`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// Logical channel.
    pub channel: Channel,
    /// Venue instrument or account identifier.
    pub instrument: String,
    /// Venue interval label for candles.
    pub interval: String,
}

impl SubscriptionKey {
    /// Build a key.
    #[must_use]
    pub fn new(channel: Channel, instrument: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            channel,
            instrument: instrument.into(),
            interval: interval.into(),
        }
    }

    /// Order book key.
    #[must_use]
    pub fn order_book(instrument: impl Into<String>) -> Self {
        Self::new(Channel::OrderBook, instrument, "")
    }

    /// Trades key.
    #[must_use]
    pub fn trades(instrument: impl Into<String>) -> Self {
        Self::new(Channel::Trades, instrument, "")
    }

    /// Candle key.
    #[must_use]
    pub fn candle(instrument: impl Into<String>, interval: impl Into<String>) -> Self {
        Self::new(Channel::Candle, instrument, interval)
    }

    /// Account key for a user address, or the literal `account`.
    #[must_use]
    pub fn account(user: Option<&str>) -> Self {
        Self::new(
            Channel::Account,
            user.map_or_else(|| ACCOUNT_INSTRUMENT.to_string(), str::to_lowercase),
            "",
        )
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.interval.is_empty() {
            write!(f, "{}:{}", self.channel, self.instrument)
        } else {
            write!(f, "{}:{}:{}", self.channel, self.instrument, self.interval)
        }
    }
}

// =============================================================================
// Subscription Record
// =============================================================================

/// Delivery status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    /// Recorded, subscribe frame not yet acknowledged by a live socket.
    Pending,
    /// Subscribe frame written to the current socket.
    Subscribed,
    /// Removed by the caller.
    Unsubscribed,
    /// The venue rejected the subscription.
    Error,
}

/// Snapshot of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Stable identifier.
    pub id: SubscriptionId,
    /// Routing key.
    pub key: SubscriptionKey,
    /// Current status.
    pub status: SubscriptionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let first = next_subscription_id();
        let second = next_subscription_id();
        assert!(second > first);
    }

    #[test]
    fn account_key_defaults_to_literal() {
        assert_eq!(SubscriptionKey::account(None).instrument, "account");
        assert_eq!(
            SubscriptionKey::account(Some("0xABCdef")).instrument,
            "0xabcdef"
        );
    }

    #[test]
    fn key_display() {
        assert_eq!(SubscriptionKey::order_book("BTC").to_string(), "orderbook:BTC");
        assert_eq!(
            SubscriptionKey::candle("ETH", "1m").to_string(),
            "candle:ETH:1m"
        );
    }

    #[test]
    fn keys_with_same_parts_are_equal() {
        assert_eq!(
            SubscriptionKey::candle("ETH", "1m"),
            SubscriptionKey::new(Channel::Candle, "ETH", "1m")
        );
        assert_ne!(
            SubscriptionKey::candle("ETH", "1m"),
            SubscriptionKey::candle("ETH", "5m")
        );
    }
}
