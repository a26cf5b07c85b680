//! Subscription Router
//!
//! Tracks live subscriptions for one venue socket and delivers routed
//! events to their typed callbacks.
//!
//! # Index
//!
//! - `by_id`: every subscription, ordered by id (insertion order)
//! - `by_key`: `(channel, instrument, interval)` to the ids sharing it
//! - `routes`: channels with at least one subscription
//!
//! Only the first subscription on a key sends the subscribe frame and only
//! the last one to leave sends the unsubscribe frame. Records survive
//! disconnects; `resubscribe_all` replays one frame set per key in id order.
//!
//! Callbacks run under the index read lock and must return quickly.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::connection::ConnectionManager;
use super::error::ConnectionError;
use super::protocol::{RequestIds, Routed, VenueProtocol};
use super::state::ConnectionState;
use crate::domain::market::{AccountUpdate, Kline, MarketEvent, OrderBook, Trade};
use crate::domain::subscription::{
    Channel, Subscription, SubscriptionId, SubscriptionKey, SubscriptionStatus,
    next_subscription_id,
};
use crate::error::GatewayError;
use crate::infrastructure::metrics;

/// Typed receiver.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Callback bound to one channel's payload type.
#[derive(Clone)]
pub enum Handler {
    /// Order book snapshots.
    OrderBook(Callback<OrderBook>),
    /// Trade batches.
    Trades(Callback<Vec<Trade>>),
    /// Candles.
    Kline(Callback<Kline>),
    /// Account updates.
    Account(Callback<AccountUpdate>),
}

impl Handler {
    /// Order book handler.
    pub fn order_book(f: impl Fn(&OrderBook) + Send + Sync + 'static) -> Self {
        Self::OrderBook(Arc::new(f))
    }

    /// Trades handler.
    pub fn trades(f: impl Fn(&Vec<Trade>) + Send + Sync + 'static) -> Self {
        Self::Trades(Arc::new(f))
    }

    /// Candle handler.
    pub fn kline(f: impl Fn(&Kline) + Send + Sync + 'static) -> Self {
        Self::Kline(Arc::new(f))
    }

    /// Account handler.
    pub fn account(f: impl Fn(&AccountUpdate) + Send + Sync + 'static) -> Self {
        Self::Account(Arc::new(f))
    }

    /// Channel this handler accepts.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        match self {
            Self::OrderBook(_) => Channel::OrderBook,
            Self::Trades(_) => Channel::Trades,
            Self::Kline(_) => Channel::Candle,
            Self::Account(_) => Channel::Account,
        }
    }

    fn deliver(&self, event: &MarketEvent) -> bool {
        match (self, event) {
            (Self::OrderBook(f), MarketEvent::OrderBook(book)) => f(book),
            (Self::Trades(f), MarketEvent::Trades(trades)) => f(trades),
            (Self::Kline(f), MarketEvent::Kline(kline)) => f(kline),
            (Self::Account(f), MarketEvent::Account(update)) => f(update),
            _ => return false,
        }
        true
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handler({})", self.channel())
    }
}

/// Router errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// Handler type does not match the key's channel.
    #[error("handler for {handler} cannot subscribe to {key}")]
    HandlerMismatch {
        /// Requested key.
        key: SubscriptionKey,
        /// Handler channel.
        handler: Channel,
    },

    /// Venue does not offer this subscription.
    #[error("unsupported subscription {0}")]
    Unsupported(SubscriptionKey),

    /// Unknown subscription id.
    #[error("subscription {0} not found")]
    NotFound(SubscriptionId),
}

impl From<RouterError> for GatewayError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::NotFound(_) => Self::NotFound(err.to_string()),
            RouterError::HandlerMismatch { .. } | RouterError::Unsupported(_) => {
                Self::InvalidRequest(err.to_string())
            }
        }
    }
}

struct Entry {
    key: SubscriptionKey,
    status: SubscriptionStatus,
    handler: Handler,
}

#[derive(Default)]
struct Index {
    by_id: BTreeMap<SubscriptionId, Entry>,
    by_key: HashMap<SubscriptionKey, Vec<SubscriptionId>>,
    routes: HashSet<Channel>,
}

impl Index {
    fn set_status(&mut self, key: &SubscriptionKey, status: SubscriptionStatus) {
        if let Some(ids) = self.by_key.get(key) {
            for id in ids {
                if let Some(entry) = self.by_id.get_mut(id) {
                    entry.status = status;
                }
            }
        }
    }
}

/// Per-venue subscription index and dispatcher.
pub struct SubscriptionRouter<P> {
    protocol: Arc<P>,
    connection: Arc<ConnectionManager>,
    ids: RequestIds,
    index: RwLock<Index>,
}

impl<P: VenueProtocol> SubscriptionRouter<P> {
    /// Create an empty router.
    #[must_use]
    pub fn new(protocol: Arc<P>, connection: Arc<ConnectionManager>) -> Self {
        Self {
            protocol,
            connection,
            ids: RequestIds::new(),
            index: RwLock::new(Index::default()),
        }
    }

    /// Request id source shared with auth frames.
    #[must_use]
    pub const fn request_ids(&self) -> &RequestIds {
        &self.ids
    }

    /// Record a subscription and send its frame if it is the first on `key`.
    ///
    /// While disconnected the subscription stays `Pending` and is sent by
    /// the next [`Self::resubscribe_all`].
    ///
    /// # Errors
    ///
    /// `HandlerMismatch` if `handler` does not fit the key's channel;
    /// `Unsupported` if the venue has no frame for `key`.
    pub async fn subscribe(
        &self,
        key: SubscriptionKey,
        handler: Handler,
    ) -> Result<SubscriptionId, RouterError> {
        if handler.channel() != key.channel {
            return Err(RouterError::HandlerMismatch {
                handler: handler.channel(),
                key,
            });
        }

        let (id, frames, first, count) = {
            let mut index = self.index.write();
            let sibling_status = index
                .by_key
                .get(&key)
                .and_then(|ids| ids.first())
                .and_then(|first| index.by_id.get(first))
                .map(|entry| entry.status);

            let frames = match sibling_status {
                Some(_) => Vec::new(),
                None => self
                    .protocol
                    .subscribe_frames(&key, &self.ids)
                    .ok_or_else(|| RouterError::Unsupported(key.clone()))?,
            };

            let id = next_subscription_id();
            index.routes.insert(key.channel);
            index.by_key.entry(key.clone()).or_default().push(id);
            index.by_id.insert(
                id,
                Entry {
                    key: key.clone(),
                    status: sibling_status.unwrap_or(SubscriptionStatus::Pending),
                    handler,
                },
            );
            (id, frames, sibling_status.is_none(), index.by_id.len())
        };

        metrics::set_subscriptions(self.protocol.venue(), count);
        tracing::debug!(venue = self.protocol.venue(), id, %key, "Subscription added");

        if first
            && self.send_frames(&frames).await.is_ok()
            && self.connection.state() == ConnectionState::Connected
        {
            self.index.write().set_status(&key, SubscriptionStatus::Subscribed);
        }
        Ok(id)
    }

    /// Remove a subscription and send the unsubscribe frame if it was the
    /// last on its key.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), RouterError> {
        let (key, frames, count) = {
            let mut index = self.index.write();
            let entry = index.by_id.remove(&id).ok_or(RouterError::NotFound(id))?;

            let emptied = index.by_key.get_mut(&entry.key).is_some_and(|ids| {
                ids.retain(|other| *other != id);
                ids.is_empty()
            });

            let mut frames = Vec::new();
            if emptied {
                index.by_key.remove(&entry.key);
                frames = self
                    .protocol
                    .unsubscribe_frames(&entry.key, &self.ids)
                    .unwrap_or_default();
            }
            if !index.by_id.values().any(|e| e.key.channel == entry.key.channel) {
                index.routes.remove(&entry.key.channel);
            }
            (entry.key, frames, index.by_id.len())
        };

        metrics::set_subscriptions(self.protocol.venue(), count);
        tracing::debug!(venue = self.protocol.venue(), id, %key, "Subscription removed");
        let _ = self.send_frames(&frames).await;
        Ok(())
    }

    /// Re-send one subscribe frame set per key, in subscription order.
    ///
    /// Returns the number of keys sent. Stops at the first send failure.
    pub async fn resubscribe_all(&self) -> usize {
        let plan: Vec<(SubscriptionKey, Vec<Value>)> = {
            let index = self.index.read();
            let mut seen = HashSet::new();
            index
                .by_id
                .values()
                .filter(|entry| seen.insert(entry.key.clone()))
                .filter_map(|entry| {
                    self.protocol
                        .subscribe_frames(&entry.key, &self.ids)
                        .map(|frames| (entry.key.clone(), frames))
                })
                .collect()
        };

        let mut sent = 0;
        for (key, frames) in plan {
            if let Err(e) = self.send_frames(&frames).await {
                tracing::warn!(venue = self.protocol.venue(), %key, error = %e, "Resubscribe interrupted");
                break;
            }
            self.index.write().set_status(&key, SubscriptionStatus::Subscribed);
            sent += 1;
        }

        tracing::info!(venue = self.protocol.venue(), keys = sent, "Resubscribed");
        sent
    }

    /// Mark every subscription `Pending` after the socket is lost.
    pub fn mark_pending(&self) {
        for entry in self.index.write().by_id.values_mut() {
            entry.status = SubscriptionStatus::Pending;
        }
    }

    /// Deliver `routed` to every subscription on its key.
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch(&self, routed: &Routed) -> usize {
        let index = self.index.read();
        if !index.routes.contains(&routed.key.channel) {
            return 0;
        }
        let Some(ids) = index.by_key.get(&routed.key) else {
            return 0;
        };
        ids.iter()
            .filter_map(|id| index.by_id.get(id))
            .filter(|entry| entry.handler.deliver(&routed.event))
            .count()
    }

    /// Snapshot of every subscription in id order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.index
            .read()
            .by_id
            .iter()
            .map(|(id, entry)| Subscription {
                id: *id,
                key: entry.key.clone(),
                status: entry.status,
            })
            .collect()
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().by_id.len()
    }

    /// Whether there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.read().by_id.is_empty()
    }

    async fn send_frames(&self, frames: &[Value]) -> Result<(), ConnectionError> {
        for frame in frames {
            match self.connection.send_json(frame).await {
                Ok(()) => {}
                Err(ConnectionError::NotConnected) => {
                    tracing::debug!(venue = self.protocol.venue(), "Not connected, subscription left pending");
                    return Err(ConnectionError::NotConnected);
                }
                Err(e) => {
                    tracing::warn!(venue = self.protocol.venue(), error = %e, "Subscription frame not sent");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

impl<P> std::fmt::Debug for SubscriptionRouter<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.read();
        f.debug_struct("SubscriptionRouter")
            .field("subscriptions", &index.by_id.len())
            .field("keys", &index.by_key.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{Asset, KlineInterval};
    use crate::infrastructure::venues::parse::ParseError;
    use crate::infrastructure::websocket::config::ConnectionConfig;
    use crate::infrastructure::websocket::protocol::Inbound;
    use crate::infrastructure::websocket::transport::TungsteniteDialer;
    use crate::infrastructure::websocket::validator::ValidatorConfig;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProtocol;

    impl VenueProtocol for StubProtocol {
        fn venue(&self) -> &'static str {
            "stub"
        }

        fn instrument(&self, asset: &Asset) -> String {
            asset.to_string()
        }

        fn asset(&self, instrument: &str) -> Asset {
            Asset::new(instrument)
        }

        fn candle_interval(&self, interval: KlineInterval) -> Option<String> {
            (interval == KlineInterval::OneMinute).then(|| "1m".to_string())
        }

        fn account_key(&self) -> Option<SubscriptionKey> {
            None
        }

        fn subscribe_frames(&self, key: &SubscriptionKey, _ids: &RequestIds) -> Option<Vec<Value>> {
            (key.channel != Channel::Account)
                .then(|| vec![serde_json::json!({"op": "subscribe", "key": key.to_string()})])
        }

        fn unsubscribe_frames(&self, key: &SubscriptionKey, _ids: &RequestIds) -> Option<Vec<Value>> {
            Some(vec![serde_json::json!({"op": "unsubscribe", "key": key.to_string()})])
        }

        fn route(&self, _frame: &Value) -> Result<Inbound, ParseError> {
            Ok(Inbound::Unknown(String::new()))
        }

        fn validator_config(&self) -> ValidatorConfig {
            ValidatorConfig::default()
        }
    }

    fn router() -> SubscriptionRouter<StubProtocol> {
        let connection = Arc::new(ConnectionManager::new(
            ConnectionConfig::new("wss://mock/ws"),
            "stub",
            Arc::new(TungsteniteDialer),
        ));
        SubscriptionRouter::new(Arc::new(StubProtocol), connection)
    }

    fn book(asset: &str) -> Routed {
        Routed {
            key: SubscriptionKey::order_book(asset),
            event: MarketEvent::OrderBook(OrderBook::new(
                Asset::new(asset),
                Vec::new(),
                Vec::new(),
                Utc::now(),
            )),
        }
    }

    fn counting_handler(counter: &Arc<AtomicUsize>) -> Handler {
        let counter = Arc::clone(counter);
        Handler::order_book(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn subscribe_while_disconnected_stays_pending() {
        let router = router();
        let id = router
            .subscribe(SubscriptionKey::order_book("BTC"), Handler::order_book(|_| {}))
            .await
            .unwrap();

        let subs = router.subscriptions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].id, id);
        assert_eq!(subs[0].status, SubscriptionStatus::Pending);
    }

    #[tokio::test]
    async fn every_subscriber_on_a_key_receives_the_event() {
        let router = router();
        let counter = Arc::new(AtomicUsize::new(0));
        router
            .subscribe(SubscriptionKey::order_book("BTC"), counting_handler(&counter))
            .await
            .unwrap();
        router
            .subscribe(SubscriptionKey::order_book("BTC"), counting_handler(&counter))
            .await
            .unwrap();
        router
            .subscribe(SubscriptionKey::order_book("ETH"), counting_handler(&counter))
            .await
            .unwrap();

        assert_eq!(router.dispatch(&book("BTC")), 2);
        assert_eq!(router.dispatch(&book("SOL")), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn handler_must_match_channel() {
        let router = router();
        let err = router
            .subscribe(SubscriptionKey::trades("BTC"), Handler::order_book(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::HandlerMismatch { .. }));
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn unsupported_key_is_rejected() {
        let router = router();
        let err = router
            .subscribe(SubscriptionKey::account(None), Handler::account(|_| {}))
            .await
            .unwrap_err();
        assert_eq!(err, RouterError::Unsupported(SubscriptionKey::account(None)));
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_keeps_other_subscribers() {
        let router = router();
        let counter = Arc::new(AtomicUsize::new(0));
        let first = router
            .subscribe(SubscriptionKey::order_book("BTC"), counting_handler(&counter))
            .await
            .unwrap();
        router
            .subscribe(SubscriptionKey::order_book("BTC"), counting_handler(&counter))
            .await
            .unwrap();

        router.unsubscribe(first).await.unwrap();
        assert_eq!(router.len(), 1);
        assert_eq!(router.dispatch(&book("BTC")), 1);

        assert_eq!(
            router.unsubscribe(first).await,
            Err(RouterError::NotFound(first))
        );
    }

    #[tokio::test]
    async fn ids_survive_mark_pending() {
        let router = router();
        let a = router
            .subscribe(SubscriptionKey::order_book("BTC"), Handler::order_book(|_| {}))
            .await
            .unwrap();
        let b = router
            .subscribe(SubscriptionKey::candle("ETH", "1m"), Handler::kline(|_| {}))
            .await
            .unwrap();

        router.mark_pending();
        let ids: Vec<_> = router.subscriptions().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(router.resubscribe_all().await, 0);
    }

    #[test]
    fn router_errors_map_to_gateway_kinds() {
        use crate::error::ErrorKind;
        assert_eq!(
            GatewayError::from(RouterError::NotFound(7)).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            GatewayError::from(RouterError::Unsupported(SubscriptionKey::account(None))).kind(),
            ErrorKind::InvalidRequest
        );
    }
}
