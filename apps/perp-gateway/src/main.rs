//! Perp Gateway Binary
//!
//! Connects every configured venue, subscribes to a watch list, and logs
//! the canonical updates until shutdown.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin perp-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Per venue (`HYPERLIQUID_`, `PARADEX_`, `BYBIT_` prefixes)
//! - `ACCOUNT_ADDRESS`: enables Hyperliquid and Paradex
//! - `API_KEY` / `API_SECRET`: enable Bybit
//! - `JWT`: Paradex bearer token for private channels
//! - `VAULT_ADDRESS`, `PRIVATE_KEY`: order entry details
//! - `USE_TESTNET`: select testnet endpoints (default: false)
//! - `BASE_URL`, `WS_URL`, `PRIVATE_WS_URL`: endpoint overrides
//! - `TIMEOUT_SECS`: REST timeout (default: 10)
//! - `MARKET_SLIPPAGE`: market order price band (default: 0.005)
//!
//! ## Gateway
//! - `GATEWAY_WATCH_ASSETS`: comma-separated assets (default: BTC,ETH)
//! - `GATEWAY_*`: socket tuning, see `ConnectionTuning`
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter

use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use perp_gateway::application::ports::SystemClock;
use perp_gateway::domain::market::{Asset, KlineInterval};
use perp_gateway::infrastructure::broadcast::BroadcastConfig;
use perp_gateway::infrastructure::telemetry;
use perp_gateway::infrastructure::venues::{RegistryDeps, Signers, Venue, VenueHandle};
use perp_gateway::infrastructure::websocket::TungsteniteDialer;
use perp_gateway::{GatewayConfig, build_registry, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

const DEFAULT_WATCH_ASSETS: &str = "BTC,ETH";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting perp gateway");

    let _metrics_handle = init_metrics().context("metrics recorder")?;

    let config = GatewayConfig::from_env().context("configuration")?;
    log_config(&config);

    let deps = RegistryDeps {
        dialer: Arc::new(TungsteniteDialer),
        clock: Arc::new(SystemClock),
        broadcast: BroadcastConfig::default(),
        signers: Signers::default(),
    };
    let registry = build_registry(&config, &deps)?;
    if registry.is_empty() {
        tracing::warn!("No venue has credentials configured; nothing to do");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    for (venue, handle) in registry.iter() {
        spawn_update_logger(venue, handle, shutdown.clone());
    }

    for (venue, error) in registry.start_all().await {
        tracing::error!(venue = %venue, error = %error, "Venue unavailable; reconnect monitor not started");
    }

    let assets = watch_assets();
    for (venue, handle) in registry.iter() {
        subscribe_watch_list(venue, handle, &assets).await;
    }

    tracing::info!(venues = registry.len(), "Perp gateway ready");

    await_shutdown().await;
    shutdown.cancel();
    registry.stop_all().await;

    tracing::info!("Perp gateway stopped");
    Ok(())
}

fn watch_assets() -> Vec<Asset> {
    std::env::var("GATEWAY_WATCH_ASSETS")
        .unwrap_or_else(|_| DEFAULT_WATCH_ASSETS.to_string())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Asset::new)
        .collect()
}

async fn subscribe_watch_list(venue: Venue, handle: &VenueHandle, assets: &[Asset]) {
    let stream = &handle.stream;
    for asset in assets {
        let results = [
            ("order_book", stream.subscribe_order_book(asset).await.map(|_| ())),
            ("trades", stream.subscribe_trades(asset).await.map(|_| ())),
            (
                "klines",
                stream
                    .subscribe_klines(asset, KlineInterval::OneMinute)
                    .await
                    .map(|_| ()),
            ),
        ];
        for (channel, result) in results {
            if let Err(e) = result {
                tracing::warn!(venue = %venue, asset = %asset, channel, error = %e, "Subscribe failed");
            }
        }
    }
    if let Err(e) = stream.subscribe_account().await {
        tracing::info!(venue = %venue, error = %e, "Account stream not subscribed");
    }
}

fn spawn_update_logger(venue: Venue, handle: &VenueHandle, shutdown: CancellationToken) {
    let mut books = handle.stream.order_book_updates();
    let mut trades = handle.stream.trade_updates();
    let mut klines = handle.stream.kline_updates();
    let mut positions = handle.stream.position_updates();
    let mut balances = handle.stream.account_balance_updates();
    let mut errors = handle.stream.errors();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                Some(book) = books.next() => tracing::debug!(
                    venue = %venue,
                    asset = %book.asset,
                    bid = ?book.best_bid().map(|l| l.price),
                    ask = ?book.best_ask().map(|l| l.price),
                    "Order book"
                ),
                Some(trade) = trades.next() => tracing::debug!(
                    venue = %venue,
                    asset = %trade.asset,
                    price = %trade.price,
                    quantity = %trade.quantity,
                    "Trade"
                ),
                Some(kline) = klines.next() => tracing::info!(
                    venue = %venue,
                    asset = %kline.asset,
                    interval = %kline.interval,
                    close = %kline.close,
                    closed = kline.closed,
                    "Kline"
                ),
                Some(position) = positions.next() => tracing::info!(
                    venue = %venue,
                    asset = %position.asset,
                    size = %position.size,
                    pnl = %position.unrealized_pnl,
                    "Position"
                ),
                Some(balance) = balances.next() => tracing::info!(
                    venue = %venue,
                    total = %balance.total,
                    available = %balance.available,
                    "Balance"
                ),
                Some(error) = errors.next() => tracing::warn!(
                    venue = %venue,
                    kind = ?error.kind(),
                    error = %error,
                    "Venue error"
                ),
                else => break,
            }
        }
    });
}

fn log_config(config: &GatewayConfig) {
    for venue in Venue::ALL {
        match config.venue(venue) {
            Some(settings) => tracing::info!(
                venue = %venue,
                testnet = settings.testnet,
                base_url = %settings.base_url,
                ws_url = %settings.ws_url,
                slippage = %settings.market_slippage,
                "Venue enabled"
            ),
            None => tracing::info!(venue = %venue, "Venue disabled"),
        }
    }
    tracing::debug!(tuning = ?config.tuning, "Connection tuning");
}

/// Load .env from the working directory or the nearest ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }
    let Ok(cwd) = std::env::current_dir() else {
        return;
    };
    for dir in cwd.ancestors().skip(1) {
        let env_path = dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
            return;
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
