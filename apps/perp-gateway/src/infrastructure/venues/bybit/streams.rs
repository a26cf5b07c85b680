//! Bybit public and private sockets behind one streaming surface.

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::protocol::BybitProtocol;
use crate::application::ports::{ConnectorResult, WebSocketConnector};
use crate::domain::market::{AccountBalance, Asset, Kline, KlineInterval, OrderBook, Position, Trade};
use crate::domain::subscription::SubscriptionId;
use crate::error::GatewayError;
use crate::infrastructure::websocket::VenueStreamHandle;

/// Market data on the public socket, account data on the private one.
///
/// Both sockets publish into the same hub, so every `*_updates` stream
/// sees events from either.
#[derive(Debug, Clone)]
pub struct BybitStreams {
    public: VenueStreamHandle<BybitProtocol>,
    private: Option<VenueStreamHandle<BybitProtocol>>,
}

impl BybitStreams {
    /// Combine the sockets. `private` is `None` without API credentials.
    #[must_use]
    pub const fn new(
        public: VenueStreamHandle<BybitProtocol>,
        private: Option<VenueStreamHandle<BybitProtocol>>,
    ) -> Self {
        Self { public, private }
    }

    fn private(&self) -> ConnectorResult<&VenueStreamHandle<BybitProtocol>> {
        self.private.as_ref().ok_or_else(|| {
            GatewayError::InvalidRequest("bybit account stream requires credentials".into())
        })
    }
}

#[async_trait]
impl WebSocketConnector for BybitStreams {
    async fn start_websocket(&self) -> ConnectorResult<()> {
        self.public.start_websocket().await?;
        if let Some(private) = &self.private {
            private.start_websocket().await?;
        }
        Ok(())
    }

    async fn stop_websocket(&self) -> ConnectorResult<()> {
        self.public.stop_websocket().await?;
        if let Some(private) = &self.private {
            private.stop_websocket().await?;
        }
        Ok(())
    }

    fn is_websocket_connected(&self) -> bool {
        self.public.is_websocket_connected()
            && self
                .private
                .as_ref()
                .is_none_or(WebSocketConnector::is_websocket_connected)
    }

    async fn subscribe_order_book(&self, asset: &Asset) -> ConnectorResult<SubscriptionId> {
        self.public.subscribe_order_book(asset).await
    }

    async fn unsubscribe_order_book(&self, asset: &Asset) -> ConnectorResult<()> {
        self.public.unsubscribe_order_book(asset).await
    }

    async fn subscribe_trades(&self, asset: &Asset) -> ConnectorResult<SubscriptionId> {
        self.public.subscribe_trades(asset).await
    }

    async fn unsubscribe_trades(&self, asset: &Asset) -> ConnectorResult<()> {
        self.public.unsubscribe_trades(asset).await
    }

    async fn subscribe_klines(
        &self,
        asset: &Asset,
        interval: KlineInterval,
    ) -> ConnectorResult<SubscriptionId> {
        self.public.subscribe_klines(asset, interval).await
    }

    async fn unsubscribe_klines(
        &self,
        asset: &Asset,
        interval: KlineInterval,
    ) -> ConnectorResult<()> {
        self.public.unsubscribe_klines(asset, interval).await
    }

    async fn subscribe_account(&self) -> ConnectorResult<SubscriptionId> {
        self.private()?.subscribe_account().await
    }

    async fn unsubscribe_account(&self) -> ConnectorResult<()> {
        self.private()?.unsubscribe_account().await
    }

    fn order_book_updates(&self) -> BoxStream<'static, OrderBook> {
        self.public.order_book_updates()
    }

    fn trade_updates(&self) -> BoxStream<'static, Trade> {
        self.public.trade_updates()
    }

    fn kline_updates(&self) -> BoxStream<'static, Kline> {
        self.public.kline_updates()
    }

    fn position_updates(&self) -> BoxStream<'static, Position> {
        self.public.position_updates()
    }

    fn account_balance_updates(&self) -> BoxStream<'static, AccountBalance> {
        self.public.account_balance_updates()
    }

    fn errors(&self) -> BoxStream<'static, GatewayError> {
        self.public.errors()
    }
}
