//! WebSocket End-to-End Scenarios
//!
//! Drives venue streams and the connection manager against an in-memory
//! peer: delivery, malformed and oversized frames, scheme checks, reconnect
//! replay, control frames, read deadlines, and terminal disconnect.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use perp_gateway::application::ports::SystemClock;
use perp_gateway::domain::market::{Asset, KlineInterval, PriceLevel};
use perp_gateway::infrastructure::broadcast::BroadcastHub;
use perp_gateway::infrastructure::venues::hyperliquid::HyperliquidProtocol;
use perp_gateway::infrastructure::websocket::{
    ConnectionCallbacks, ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState,
    ReconnectConfig, VenueStream, VenueStreamConfig, VenueStreamHandle,
};
use perp_gateway::{ErrorKind, WebSocketConnector};
use rust_decimal_macros::dec;
use serde_json::json;
use support::{DuplexDialer, MockVenue, next_json, next_message, push, within};
use tokio_tungstenite::tungstenite::{Bytes, Message};

const URL: &str = "wss://mock/ws";

fn stream_config() -> VenueStreamConfig {
    let mut config = VenueStreamConfig::new(URL);
    config.connection = config.connection.without_health_monitor();
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(200),
        monitor_interval: Duration::from_millis(10),
        max_attempts: 5,
        ..ReconnectConfig::default()
    };
    config
}

fn hyperliquid() -> (VenueStreamHandle<HyperliquidProtocol>, Arc<DuplexDialer>, MockVenue) {
    hyperliquid_with(stream_config())
}

fn hyperliquid_with(
    config: VenueStreamConfig,
) -> (VenueStreamHandle<HyperliquidProtocol>, Arc<DuplexDialer>, MockVenue) {
    let (dialer, venue) = DuplexDialer::pair();
    let stream = VenueStream::new(
        Arc::new(HyperliquidProtocol::new()),
        config,
        dialer.clone(),
        Arc::new(BroadcastHub::with_defaults()),
        None,
        Arc::new(SystemClock),
    );
    (VenueStreamHandle(stream), dialer, venue)
}

fn l2_subscribe(coin: &str) -> serde_json::Value {
    json!({"method": "subscribe", "subscription": {"type": "l2Book", "coin": coin}})
}

#[tokio::test]
async fn order_book_frame_is_delivered_once() {
    let (handle, _, venue) = hyperliquid();
    let mut books = handle.order_book_updates();

    handle.start_websocket().await.unwrap();
    let mut server = venue.accept().await;
    handle.subscribe_order_book(&Asset::new("BTC")).await.unwrap();
    assert_eq!(next_json(&mut server).await, l2_subscribe("BTC"));

    push(
        &mut server,
        &json!({"channel": "l2Book", "data": {"coin": "BTC", "levels": [
            [{"px": "30000.5", "sz": "0.1"}],
            [{"px": "30001.0", "sz": "0.2"}]
        ]}}),
    )
    .await;

    let book = within(books.next()).await.unwrap();
    assert_eq!(book.asset, Asset::new("BTC"));
    assert_eq!(book.bids, vec![PriceLevel::new(dec!(30000.5), dec!(0.1))]);
    assert_eq!(book.asks, vec![PriceLevel::new(dec!(30001.0), dec!(0.2))]);

    assert!(
        tokio::time::timeout(Duration::from_millis(100), books.next())
            .await
            .is_err(),
        "book delivered more than once"
    );
    handle.stop_websocket().await.unwrap();
}

#[tokio::test]
async fn malformed_frame_is_dropped_and_reported() {
    let (handle, _, venue) = hyperliquid();
    let mut books = handle.order_book_updates();
    let mut errors = handle.errors();

    handle.start_websocket().await.unwrap();
    let mut server = venue.accept().await;
    handle.subscribe_order_book(&Asset::new("BTC")).await.unwrap();
    next_json(&mut server).await;

    push(
        &mut server,
        &json!({"channel": "l2Book", "data": {"coin": "BTC", "levels": [
            [{"px": "oops", "sz": "0.1"}]
        ]}}),
    )
    .await;

    let error = within(errors.next()).await.unwrap();
    assert_eq!(error.kind(), ErrorKind::Parse);
    assert_eq!(handle.0.stats().metrics.dropped, 1);

    push(
        &mut server,
        &json!({"channel": "l2Book", "data": {"coin": "BTC", "levels": [
            [{"px": "29999", "sz": "1"}],
            [{"px": "30002", "sz": "2"}]
        ]}}),
    )
    .await;
    let book = within(books.next()).await.unwrap();
    assert_eq!(book.best_bid().unwrap().price, dec!(29999));
    assert_eq!(handle.0.stats().metrics.dropped, 1);
    handle.stop_websocket().await.unwrap();
}

#[tokio::test]
async fn overflowing_account_frame_does_not_stall_the_feed() {
    let (handle, _, venue) = hyperliquid();
    let mut books = handle.order_book_updates();
    let mut errors = handle.errors();

    handle.start_websocket().await.unwrap();
    let mut server = venue.accept().await;
    handle.subscribe_order_book(&Asset::new("BTC")).await.unwrap();
    next_json(&mut server).await;

    push(
        &mut server,
        &json!({"channel": "webData2", "data": {
            "user": "0xabc",
            "clearinghouseState": {
                "assetPositions": [{"position": {
                    "coin": "BTC", "szi": "0.5",
                    "positionValue": "79228162514264337593543950335", "unrealizedPnl": "0"
                }}],
                "marginSummary": {
                    "accountValue": "0", "totalMarginUsed": "0",
                    "totalNtlPos": "0", "totalRawUsd": "0"
                }
            }
        }}),
    )
    .await;
    let error = within(errors.next()).await.unwrap();
    assert_eq!(error.kind(), ErrorKind::Parse);

    push(
        &mut server,
        &json!({"channel": "l2Book", "data": {"coin": "BTC", "levels": [
            [{"px": "29999", "sz": "1"}],
            [{"px": "30002", "sz": "2"}]
        ]}}),
    )
    .await;
    let book = within(books.next()).await.unwrap();
    assert_eq!(book.best_ask().unwrap().price, dec!(30002));
    assert!(handle.is_websocket_connected());
    handle.stop_websocket().await.unwrap();
}

#[tokio::test]
async fn frame_within_connection_limit_passes_validation() {
    let (handle, _, venue) = hyperliquid();
    let mut books = handle.order_book_updates();

    handle.start_websocket().await.unwrap();
    let mut server = venue.accept().await;
    handle.subscribe_order_book(&Asset::new("BTC")).await.unwrap();
    next_json(&mut server).await;

    // 1.5 MiB: above the validator's standalone default, below the 2 MiB socket limit.
    push(
        &mut server,
        &json!({"channel": "l2Book", "data": {
            "coin": "BTC",
            "levels": [[{"px": "30000", "sz": "1"}], [{"px": "30001", "sz": "1"}]],
            "padding": "x".repeat(1_536 * 1024)
        }}),
    )
    .await;

    let book = within(books.next()).await.unwrap();
    assert_eq!(book.best_bid().unwrap().price, dec!(30000));
    assert_eq!(handle.0.stats().metrics.dropped, 0);
    handle.stop_websocket().await.unwrap();
}

#[tokio::test]
async fn plaintext_url_is_refused() {
    let (dialer, _venue) = DuplexDialer::pair();
    let manager = Arc::new(ConnectionManager::new(
        ConnectionConfig::new("ws://x/ws").without_health_monitor(),
        "test",
        dialer.clone(),
    ));

    assert_eq!(
        manager.connect().await,
        Err(ConnectionError::InsecureScheme("ws".into()))
    );
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(dialer.dials(), 0);
}

#[tokio::test]
async fn reconnect_replays_subscriptions_in_order() {
    let (handle, dialer, venue) = hyperliquid();
    handle.start_websocket().await.unwrap();
    let mut server = venue.accept().await;

    handle.subscribe_order_book(&Asset::new("BTC")).await.unwrap();
    handle
        .subscribe_klines(&Asset::new("ETH"), KlineInterval::OneMinute)
        .await
        .unwrap();
    let candle = json!({
        "method": "subscribe",
        "subscription": {"type": "candle", "coin": "ETH", "interval": "1m"}
    });
    assert_eq!(next_json(&mut server).await, l2_subscribe("BTC"));
    assert_eq!(next_json(&mut server).await, candle);

    let before: Vec<_> = handle
        .0
        .router()
        .subscriptions()
        .into_iter()
        .map(|s| (s.id, s.key))
        .collect();

    server.close(None).await.unwrap();
    drop(server);

    let mut server = venue.accept().await;
    assert_eq!(next_json(&mut server).await, l2_subscribe("BTC"));
    assert_eq!(next_json(&mut server).await, candle);
    assert_eq!(dialer.dials(), 2);

    let after: Vec<_> = handle
        .0
        .router()
        .subscriptions()
        .into_iter()
        .map(|s| (s.id, s.key))
        .collect();
    assert_eq!(before, after);
    within(async {
        while !handle.is_websocket_connected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    handle.stop_websocket().await.unwrap();
}

fn counting_manager(dialer: Arc<DuplexDialer>) -> (Arc<ConnectionManager>, Arc<AtomicUsize>) {
    let manager = Arc::new(ConnectionManager::new(
        ConnectionConfig::new(URL).without_health_monitor(),
        "test",
        dialer,
    ));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&disconnects);
    manager.set_callbacks(ConnectionCallbacks::new().on_disconnect(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    (manager, disconnects)
}

#[tokio::test]
async fn user_disconnect_is_terminal() {
    let (dialer, venue) = DuplexDialer::pair();
    let (manager, disconnects) = counting_manager(dialer.clone());

    manager.connect().await.unwrap();
    let _server = venue.accept().await;
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::Stopped);
    assert_eq!(manager.connect().await, Err(ConnectionError::Stopped));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(disconnects.load(Ordering::SeqCst), 0);
    assert_eq!(dialer.dials(), 1);
}

#[tokio::test]
async fn network_loss_invokes_on_disconnect() {
    let (dialer, venue) = DuplexDialer::pair();
    let (manager, disconnects) = counting_manager(dialer);

    manager.connect().await.unwrap();
    let mut server = venue.accept().await;
    server.close(None).await.unwrap();

    within(async {
        while disconnects.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn concurrent_writes_arrive_as_whole_frames() {
    let (dialer, venue) = DuplexDialer::pair();
    let (manager, _) = counting_manager(dialer);
    manager.connect().await.unwrap();
    let mut server = venue.accept().await;

    let a = json!({"side": "a", "payload": "x".repeat(200_000)});
    let b = json!({"side": "b", "payload": "y".repeat(200_000)});
    let (ra, rb) = tokio::join!(manager.send_json(&a), manager.send_json(&b));
    ra.unwrap();
    rb.unwrap();

    let mut received = vec![next_json(&mut server).await, next_json(&mut server).await];
    received.sort_by(|l, r| l["side"].as_str().cmp(&r["side"].as_str()));
    assert_eq!(received, vec![a, b]);

    manager.disconnect().await;
}

#[tokio::test]
async fn panicking_handler_is_reported_and_reading_continues() {
    let (dialer, venue) = DuplexDialer::pair();
    let manager = Arc::new(ConnectionManager::new(
        ConnectionConfig::new(URL).without_health_monitor(),
        "test",
        dialer,
    ));
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let (seen, failed) = (Arc::clone(&delivered), Arc::clone(&errors));
    manager.set_callbacks(
        ConnectionCallbacks::new()
            .on_message(move |raw| {
                assert!(raw != "\"boom\"", "handler blew up");
                seen.lock().unwrap().push(raw.to_string());
                Ok(())
            })
            .on_error(move |err| failed.lock().unwrap().push(err)),
    );

    manager.connect().await.unwrap();
    let mut server = venue.accept().await;
    push(&mut server, &json!("boom")).await;
    push(&mut server, &json!("fine")).await;

    within(async {
        while delivered.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert_eq!(*delivered.lock().unwrap(), vec!["\"fine\"".to_string()]);
    let errors = errors.lock().unwrap().clone();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::Protocol);
    assert_eq!(manager.state(), ConnectionState::Connected);
    manager.disconnect().await;
}

#[tokio::test]
async fn server_ping_is_answered_with_the_same_payload() {
    let (dialer, venue) = DuplexDialer::pair();
    let (manager, _) = counting_manager(dialer);
    manager.connect().await.unwrap();
    let mut server = venue.accept().await;

    server
        .send(Message::Ping(Bytes::from_static(b"x")))
        .await
        .unwrap();

    let pong = within(async {
        loop {
            if let Message::Pong(payload) = next_message(&mut server).await {
                return payload;
            }
        }
    })
    .await;
    assert_eq!(pong.as_ref(), b"x");
    manager.disconnect().await;
}

#[tokio::test]
async fn silent_peer_hits_the_read_deadline() {
    let (dialer, venue) = DuplexDialer::pair();
    let manager = Arc::new(ConnectionManager::new(
        ConnectionConfig::new(URL)
            .without_health_monitor()
            .with_read_deadline(Duration::from_millis(100)),
        "test",
        dialer,
    ));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&disconnects);
    manager.set_callbacks(ConnectionCallbacks::new().on_disconnect(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    manager.connect().await.unwrap();
    let _server = venue.accept().await;

    within(async {
        while disconnects.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn read_deadline_expiry_redials() {
    let mut config = stream_config();
    config.connection = config
        .connection
        .with_read_deadline(Duration::from_millis(150));
    let (handle, dialer, venue) = hyperliquid_with(config);

    handle.start_websocket().await.unwrap();
    let _first = venue.accept().await;
    let _second = venue.accept().await;
    within(async {
        while dialer.dials() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    handle.stop_websocket().await.unwrap();
}
