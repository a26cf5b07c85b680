//! Venue Stream
//!
//! Composes connection, reconnect monitor, message pipeline, protocol, and
//! router into the [`WebSocketConnector`] surface of one venue socket.
//!
//! # Flow
//!
//! ```text
//! socket ─▶ ConnectionManager ─▶ MessageService ─▶ VenueProtocol::route
//!                                                        │
//!                               SubscriptionRouter::dispatch ─▶ BroadcastHub
//! ```
//!
//! Canonical subscriptions (`subscribe_order_book`, ...) register router
//! callbacks that publish into the shared [`BroadcastHub`]; the `*_updates`
//! streams read from it. Venues without a candle channel get klines from a
//! [`KlineAggregator`] fed by the trade channel.
//!
//! After every reconnect the auth frame (if any) is sent again and every
//! subscription is replayed.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::auth::AuthManager;
use super::config::ConnectionConfig;
use super::connection::{ConnectionCallbacks, ConnectionManager, ConnectionStats};
use super::error::ReconnectError;
use super::protocol::{Control, Inbound, Routed, VenueProtocol};
use super::reconnect::{ReconnectConfig, ReconnectHooks, ReconnectManager};
use super::router::{Handler, SubscriptionRouter};
use super::service::MessageService;
use super::state::ConnectionState;
use super::transport::Dialer;
use super::validator::MessageValidator;
use crate::application::ports::{Clock, ConnectorResult, WebSocketConnector};
use crate::application::services::KlineAggregator;
use crate::domain::market::{
    AccountBalance, Asset, Kline, KlineInterval, MarketEvent, OrderBook, Position, Trade,
};
use crate::domain::subscription::{SubscriptionId, SubscriptionKey};
use crate::error::GatewayError;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig,
};

/// Settings for one venue stream.
#[derive(Debug, Clone)]
pub struct VenueStreamConfig {
    /// Socket settings.
    pub connection: ConnectionConfig,
    /// Backoff settings.
    pub reconnect: ReconnectConfig,
    /// Inbound message budget.
    pub rate_limit: RateLimiterConfig,
    /// Dial breaker settings.
    pub breaker: CircuitBreakerConfig,
    /// Background token refresh period.
    pub auth_refresh_interval: Duration,
}

impl VenueStreamConfig {
    /// Defaults for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::trading(url),
            reconnect: ReconnectConfig::default(),
            rate_limit: RateLimiterConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            auth_refresh_interval: Duration::from_secs(60),
        }
    }
}

/// One venue socket behind the canonical streaming surface.
pub struct VenueStream<P: VenueProtocol> {
    protocol: Arc<P>,
    connection: Arc<ConnectionManager>,
    reconnect: Arc<ReconnectManager>,
    router: Arc<SubscriptionRouter<P>>,
    service: MessageService,
    hub: SharedBroadcastHub,
    auth: Option<Arc<AuthManager>>,
    auth_refresh_interval: Duration,
    aggregator: Option<Arc<KlineAggregator>>,
    aggregator_rx: Mutex<Option<mpsc::Receiver<Kline>>>,
    subscriptions: tokio::sync::Mutex<HashMap<SubscriptionKey, SubscriptionId>>,
    trade_feeds: tokio::sync::Mutex<HashMap<SubscriptionKey, (SubscriptionId, usize)>>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl<P: VenueProtocol> VenueStream<P> {
    /// Wire up a stream. Nothing connects until [`Self::start`].
    #[must_use]
    pub fn new(
        protocol: Arc<P>,
        config: VenueStreamConfig,
        dialer: Arc<dyn Dialer>,
        hub: SharedBroadcastHub,
        auth: Option<Arc<AuthManager>>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let venue = protocol.venue();
        let validator_config = protocol
            .validator_config()
            .with_max_message_size(config.connection.max_message_size);
        let connection_config = config
            .connection
            .with_ping_payload(protocol.ping_payload());

        let mut connection = ConnectionManager::new(connection_config, venue, dialer)
            .with_breaker(Arc::new(CircuitBreaker::new(format!("{venue}-ws"), config.breaker)));
        if let Some(auth) = &auth {
            connection = connection.with_auth(Arc::clone(auth));
        }
        let connection = Arc::new(connection);

        let service = MessageService::new(
            RateLimiter::new(config.rate_limit),
            MessageValidator::new(validator_config),
            Arc::clone(connection.metrics()),
        );
        let reconnect = Arc::new(ReconnectManager::new(
            Arc::clone(&connection),
            config.reconnect,
        ));
        let router = Arc::new(SubscriptionRouter::new(
            Arc::clone(&protocol),
            Arc::clone(&connection),
        ));

        let (aggregator, aggregator_rx) = if protocol.native_klines() {
            (None, None)
        } else {
            let (aggregator, rx) = KlineAggregator::new(clock);
            (Some(Arc::new(aggregator)), Some(rx))
        };

        Arc::new_cyclic(|weak: &Weak<Self>| {
            connection.set_callbacks(Self::connection_callbacks(weak));
            reconnect.set_hooks(Self::reconnect_hooks(weak));
            Self {
                protocol,
                connection,
                reconnect,
                router,
                service,
                hub,
                auth,
                auth_refresh_interval: config.auth_refresh_interval,
                aggregator,
                aggregator_rx: Mutex::new(aggregator_rx),
                subscriptions: tokio::sync::Mutex::new(HashMap::new()),
                trade_feeds: tokio::sync::Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
            }
        })
    }

    fn connection_callbacks(weak: &Weak<Self>) -> ConnectionCallbacks {
        let on_message = weak.clone();
        let on_disconnect = weak.clone();
        let on_error = weak.clone();
        ConnectionCallbacks::new()
            .on_message(move |raw| {
                on_message
                    .upgrade()
                    .map_or(Ok(()), |stream| stream.handle_frame(raw))
            })
            .on_disconnect(move || {
                if let Some(stream) = on_disconnect.upgrade() {
                    stream.router.mark_pending();
                }
            })
            .on_error(move |err| {
                if let Some(stream) = on_error.upgrade() {
                    stream.hub.publish_error(err);
                }
            })
    }

    fn reconnect_hooks(weak: &Weak<Self>) -> ReconnectHooks {
        let on_success = weak.clone();
        let on_fail = weak.clone();
        ReconnectHooks::new()
            .on_success(move |_| {
                if let Some(stream) = on_success.upgrade() {
                    tokio::spawn(async move { stream.begin_session().await });
                }
            })
            .on_fail(move |_, err| {
                if let (Some(stream), ReconnectError::MaxAttemptsReached { .. }) =
                    (on_fail.upgrade(), err)
                {
                    stream.hub.publish_error(err.clone().into());
                }
            })
    }

    /// Venue label.
    #[must_use]
    pub fn venue(&self) -> &'static str {
        self.protocol.venue()
    }

    /// Wire protocol.
    #[must_use]
    pub const fn protocol(&self) -> &Arc<P> {
        &self.protocol
    }

    /// Subscription router, for callback-based subscriptions.
    #[must_use]
    pub const fn router(&self) -> &Arc<SubscriptionRouter<P>> {
        &self.router
    }

    /// Underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Connection state and counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.connection.stats()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect, authenticate, replay subscriptions, and start the
    /// background tasks.
    ///
    /// # Errors
    ///
    /// Returns the dial error; background tasks start only after a
    /// successful dial.
    pub async fn start(self: &Arc<Self>) -> ConnectorResult<()> {
        self.connection.connect().await?;
        self.begin_session().await;

        if !self.started.swap(true, Ordering::AcqRel) {
            self.reconnect.start(self.cancel.child_token());
            if let Some(auth) = &self.auth {
                auth.spawn_refresh_loop(self.auth_refresh_interval, self.cancel.child_token());
            }
            self.spawn_kline_forwarder();
        }
        Ok(())
    }

    /// Stop every task and close the socket. Terminal.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.connection.disconnect().await;
    }

    /// Whether the socket is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.state() == ConnectionState::Connected
    }

    async fn begin_session(&self) {
        if let Err(e) = self.authenticate().await {
            tracing::error!(venue = self.venue(), error = %e, "Session authentication failed");
            self.hub.publish_error(e);
        }
        self.router.resubscribe_all().await;
    }

    async fn authenticate(&self) -> ConnectorResult<()> {
        let token = match &self.auth {
            Some(auth) => Some(auth.token().await?),
            None => None,
        };
        if let Some(frame) = self
            .protocol
            .auth_frame(token.as_ref(), self.router.request_ids())
        {
            self.connection.send_json(&frame).await?;
            tracing::debug!(venue = self.venue(), "Auth frame sent");
        }
        Ok(())
    }

    fn spawn_kline_forwarder(self: &Arc<Self>) {
        let Some(mut rx) = self.aggregator_rx.lock().take() else {
            return;
        };
        let weak = Arc::downgrade(self);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            loop {
                let kline = tokio::select! {
                    () = cancel.cancelled() => break,
                    kline = rx.recv() => match kline {
                        Some(kline) => kline,
                        None => break,
                    },
                };
                let Some(stream) = weak.upgrade() else {
                    break;
                };
                if let Some(key) = stream.protocol.candle_key(&kline.asset, kline.interval) {
                    stream.router.dispatch(&Routed {
                        key,
                        event: MarketEvent::Kline(kline),
                    });
                }
            }
        });
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    fn handle_frame(&self, raw: &str) -> Result<(), GatewayError> {
        self.service
            .process(raw, |value| match self.protocol.route(&value)? {
                Inbound::Data(routed) => {
                    for item in &routed {
                        self.router.dispatch(item);
                    }
                    Ok(())
                }
                Inbound::Control(control) => {
                    self.handle_control(control);
                    Ok(())
                }
                Inbound::Unknown(channel) => Err(GatewayError::Protocol(format!(
                    "unknown channel '{channel}'"
                ))),
            })
            .map(|_| ())
    }

    fn handle_control(&self, control: Control) {
        let venue = self.venue();
        match control {
            Control::Ack(detail) => tracing::debug!(venue, %detail, "Subscription acknowledged"),
            Control::Pong => tracing::trace!(venue, "Pong"),
            Control::AuthResult { success: true, .. } => {
                tracing::info!(venue, "Authenticated");
            }
            Control::AuthResult {
                success: false,
                message,
            } => {
                tracing::error!(venue, %message, "Authentication rejected");
                self.hub.publish_error(GatewayError::Auth(message));
            }
            Control::VenueError(message) => {
                tracing::warn!(venue, %message, "Venue error");
                self.hub.publish_error(GatewayError::Rejected(message));
            }
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    async fn subscribe_key(
        &self,
        key: SubscriptionKey,
        handler: Handler,
    ) -> ConnectorResult<SubscriptionId> {
        let mut subscriptions = self.subscriptions.lock().await;
        if let Some(id) = subscriptions.get(&key) {
            return Ok(*id);
        }
        let id = self.router.subscribe(key.clone(), handler).await?;
        subscriptions.insert(key, id);
        Ok(id)
    }

    async fn unsubscribe_key(&self, key: &SubscriptionKey) -> ConnectorResult<()> {
        let id = self
            .subscriptions
            .lock()
            .await
            .remove(key)
            .ok_or_else(|| GatewayError::NotFound(format!("no subscription for {key}")))?;
        self.router.unsubscribe(id).await?;
        Ok(())
    }

    async fn subscribe_order_book(&self, asset: &Asset) -> ConnectorResult<SubscriptionId> {
        let hub = Arc::clone(&self.hub);
        self.subscribe_key(
            self.protocol.order_book_key(asset),
            Handler::order_book(move |book| {
                hub.publish_order_book(book.clone());
            }),
        )
        .await
    }

    async fn subscribe_trades(&self, asset: &Asset) -> ConnectorResult<SubscriptionId> {
        let hub = Arc::clone(&self.hub);
        self.subscribe_key(
            self.protocol.trades_key(asset),
            Handler::trades(move |trades| {
                hub.publish_trades(trades);
            }),
        )
        .await
    }

    async fn subscribe_klines(
        &self,
        asset: &Asset,
        interval: KlineInterval,
    ) -> ConnectorResult<SubscriptionId> {
        let key = self.candle_key(asset, interval)?;
        let hub = Arc::clone(&self.hub);
        let handler = Handler::kline(move |kline| {
            hub.publish_kline(kline.clone());
        });

        let Some(aggregator) = &self.aggregator else {
            return self.subscribe_key(key, handler).await;
        };

        if !KlineInterval::AGGREGATED.contains(&interval) {
            return Err(GatewayError::InvalidRequest(format!(
                "{} synthesizes only 1m/5m/15m/1h candles, not {interval}",
                self.venue()
            )));
        }
        let already = self.subscriptions.lock().await.contains_key(&key);
        let id = self.subscribe_key(key, handler).await?;
        if !already {
            self.acquire_trade_feed(asset, aggregator).await?;
        }
        Ok(id)
    }

    async fn unsubscribe_klines(&self, asset: &Asset, interval: KlineInterval) -> ConnectorResult<()> {
        let key = self.candle_key(asset, interval)?;
        self.unsubscribe_key(&key).await?;
        if self.aggregator.is_some() {
            self.release_trade_feed(asset).await?;
        }
        Ok(())
    }

    fn candle_key(&self, asset: &Asset, interval: KlineInterval) -> ConnectorResult<SubscriptionKey> {
        self.protocol.candle_key(asset, interval).ok_or_else(|| {
            GatewayError::InvalidRequest(format!(
                "{} does not offer {interval} candles",
                self.venue()
            ))
        })
    }

    async fn acquire_trade_feed(
        &self,
        asset: &Asset,
        aggregator: &Arc<KlineAggregator>,
    ) -> ConnectorResult<()> {
        let key = self.protocol.trades_key(asset);
        let mut feeds = self.trade_feeds.lock().await;
        match feeds.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().1 += 1,
            Entry::Vacant(entry) => {
                let aggregator = Arc::clone(aggregator);
                let id = self
                    .router
                    .subscribe(
                        entry.key().clone(),
                        Handler::trades(move |trades| {
                            for trade in trades {
                                aggregator.on_trade(trade);
                            }
                        }),
                    )
                    .await?;
                entry.insert((id, 1));
            }
        }
        Ok(())
    }

    async fn release_trade_feed(&self, asset: &Asset) -> ConnectorResult<()> {
        let key = self.protocol.trades_key(asset);
        let mut feeds = self.trade_feeds.lock().await;
        let Entry::Occupied(mut entry) = feeds.entry(key) else {
            return Ok(());
        };
        entry.get_mut().1 -= 1;
        if entry.get().1 == 0 {
            let (id, _) = entry.remove();
            self.router.unsubscribe(id).await?;
        }
        Ok(())
    }

    async fn subscribe_account(&self) -> ConnectorResult<SubscriptionId> {
        let key = self.account_key()?;
        let hub = Arc::clone(&self.hub);
        self.subscribe_key(
            key,
            Handler::account(move |update| {
                hub.publish_account(update);
            }),
        )
        .await
    }

    fn account_key(&self) -> ConnectorResult<SubscriptionKey> {
        self.protocol.account_key().ok_or_else(|| {
            GatewayError::InvalidRequest(format!(
                "{} account stream requires credentials",
                self.venue()
            ))
        })
    }
}

impl<P: VenueProtocol> std::fmt::Debug for VenueStream<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueStream")
            .field("venue", &self.venue())
            .field("connection", &self.connection)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

/// Owning handle that implements [`WebSocketConnector`] for one socket.
#[derive(Debug)]
pub struct VenueStreamHandle<P: VenueProtocol>(pub Arc<VenueStream<P>>);

impl<P: VenueProtocol> Clone for VenueStreamHandle<P> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

#[async_trait]
impl<P: VenueProtocol> WebSocketConnector for VenueStreamHandle<P> {
    async fn start_websocket(&self) -> ConnectorResult<()> {
        self.0.start().await
    }

    async fn stop_websocket(&self) -> ConnectorResult<()> {
        self.0.stop().await;
        Ok(())
    }

    fn is_websocket_connected(&self) -> bool {
        self.0.is_connected()
    }

    async fn subscribe_order_book(&self, asset: &Asset) -> ConnectorResult<SubscriptionId> {
        self.0.subscribe_order_book(asset).await
    }

    async fn unsubscribe_order_book(&self, asset: &Asset) -> ConnectorResult<()> {
        self.0
            .unsubscribe_key(&self.0.protocol.order_book_key(asset))
            .await
    }

    async fn subscribe_trades(&self, asset: &Asset) -> ConnectorResult<SubscriptionId> {
        self.0.subscribe_trades(asset).await
    }

    async fn unsubscribe_trades(&self, asset: &Asset) -> ConnectorResult<()> {
        self.0.unsubscribe_key(&self.0.protocol.trades_key(asset)).await
    }

    async fn subscribe_klines(
        &self,
        asset: &Asset,
        interval: KlineInterval,
    ) -> ConnectorResult<SubscriptionId> {
        self.0.subscribe_klines(asset, interval).await
    }

    async fn unsubscribe_klines(
        &self,
        asset: &Asset,
        interval: KlineInterval,
    ) -> ConnectorResult<()> {
        self.0.unsubscribe_klines(asset, interval).await
    }

    async fn subscribe_account(&self) -> ConnectorResult<SubscriptionId> {
        self.0.subscribe_account().await
    }

    async fn unsubscribe_account(&self) -> ConnectorResult<()> {
        let key = self.0.account_key()?;
        self.0.unsubscribe_key(&key).await
    }

    fn order_book_updates(&self) -> BoxStream<'static, OrderBook> {
        self.0.hub.order_books_stream()
    }

    fn trade_updates(&self) -> BoxStream<'static, Trade> {
        self.0.hub.trades_stream()
    }

    fn kline_updates(&self) -> BoxStream<'static, Kline> {
        self.0.hub.klines_stream()
    }

    fn position_updates(&self) -> BoxStream<'static, Position> {
        self.0.hub.positions_stream()
    }

    fn account_balance_updates(&self) -> BoxStream<'static, AccountBalance> {
        self.0.hub.balances_stream()
    }

    fn errors(&self) -> BoxStream<'static, GatewayError> {
        self.0.hub.errors_stream()
    }
}
