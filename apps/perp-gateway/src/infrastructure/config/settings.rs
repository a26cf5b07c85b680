//! Gateway Configuration Settings
//!
//! Per-venue endpoints and credentials plus connection tuning shared by
//! every venue socket, loaded from environment variables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::infrastructure::resilience::RateLimiterConfig;
use crate::infrastructure::venues::Venue;
use crate::infrastructure::websocket::{ReconnectConfig, VenueStreamConfig};

/// Market order slippage when `<VENUE>_MARKET_SLIPPAGE` is unset (0.5%).
pub const DEFAULT_MARKET_SLIPPAGE: Decimal = Decimal::from_parts(5, 0, 0, false, 3);

/// Venue credentials. Every field is optional; which ones a venue needs
/// is decided by [`Venue::has_required_credentials`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct VenueCredentials {
    /// Wallet or account address.
    pub account_address: Option<String>,
    /// Signing key material, handed to the injected action signer.
    pub private_key: Option<String>,
    /// Vault to trade on behalf of.
    pub vault_address: Option<String>,
    /// HMAC API key.
    pub api_key: Option<String>,
    /// HMAC API secret.
    pub api_secret: Option<String>,
    /// Pre-issued bearer token.
    pub jwt: Option<String>,
}

fn redact(value: Option<&String>) -> &'static str {
    if value.is_some() { "[REDACTED]" } else { "None" }
}

impl fmt::Debug for VenueCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VenueCredentials")
            .field("account_address", &self.account_address)
            .field("private_key", &redact(self.private_key.as_ref()))
            .field("vault_address", &self.vault_address)
            .field("api_key", &redact(self.api_key.as_ref()))
            .field("api_secret", &redact(self.api_secret.as_ref()))
            .field("jwt", &redact(self.jwt.as_ref()))
            .finish()
    }
}

/// Settings for one enabled venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueSettings {
    /// Venue these settings belong to.
    pub venue: Venue,
    /// REST base URL.
    pub base_url: String,
    /// Market data socket.
    pub ws_url: String,
    /// Account socket, for venues that split public and private feeds.
    pub private_ws_url: Option<String>,
    /// Testnet endpoints selected.
    pub testnet: bool,
    /// REST request timeout.
    pub timeout: Duration,
    /// Fractional price band for market orders.
    pub market_slippage: Decimal,
    /// Credentials.
    pub credentials: VenueCredentials,
}

impl VenueSettings {
    /// REST and WebSocket endpoints for `venue`.
    #[must_use]
    pub const fn default_urls(venue: Venue, testnet: bool) -> (&'static str, &'static str) {
        match (venue, testnet) {
            (Venue::Hyperliquid, false) => {
                ("https://api.hyperliquid.xyz", "wss://api.hyperliquid.xyz/ws")
            }
            (Venue::Hyperliquid, true) => (
                "https://api.hyperliquid-testnet.xyz",
                "wss://api.hyperliquid-testnet.xyz/ws",
            ),
            (Venue::Paradex, false) => (
                "https://api.prod.paradex.trade/v1",
                "wss://ws.api.prod.paradex.trade/v1",
            ),
            (Venue::Paradex, true) => (
                "https://api.testnet.paradex.trade/v1",
                "wss://ws.api.testnet.paradex.trade/v1",
            ),
            (Venue::Bybit, false) => (
                "https://api.bybit.com",
                "wss://stream.bybit.com/v5/public/linear",
            ),
            (Venue::Bybit, true) => (
                "https://api-testnet.bybit.com",
                "wss://stream-testnet.bybit.com/v5/public/linear",
            ),
        }
    }

    /// Account socket for venues that serve it separately.
    #[must_use]
    pub const fn default_private_ws_url(venue: Venue, testnet: bool) -> Option<&'static str> {
        match (venue, testnet) {
            (Venue::Bybit, false) => Some("wss://stream.bybit.com/v5/private"),
            (Venue::Bybit, true) => Some("wss://stream-testnet.bybit.com/v5/private"),
            _ => None,
        }
    }
}

/// Socket tuning applied to every venue stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionTuning {
    /// Bound on the whole dial.
    pub connect_timeout: Duration,
    /// Bound on the WebSocket upgrade.
    pub handshake_timeout: Duration,
    /// Idle time after which the socket is unhealthy.
    pub read_timeout: Duration,
    /// Silence after which the peer is declared dead.
    pub read_deadline: Duration,
    /// Per-write deadline.
    pub write_timeout: Duration,
    /// Health monitor tick.
    pub health_check_interval: Duration,
    /// Health warning threshold.
    pub health_check_timeout: Duration,
    /// Delay before the first reconnect attempt.
    pub reconnect_initial_delay: Duration,
    /// Upper bound on reconnect delays.
    pub reconnect_max_delay: Duration,
    /// Backoff growth factor.
    pub reconnect_multiplier: f64,
    /// Attempts per reconnect sequence (0 = unlimited).
    pub reconnect_max_attempts: u32,
    /// Inbound frames admitted per refill window.
    pub rate_limit_capacity: u32,
    /// Rate limiter window.
    pub rate_limit_refill: Duration,
    /// Largest accepted frame.
    pub max_message_size: usize,
}

impl Default for ConnectionTuning {
    fn default() -> Self {
        let stream = VenueStreamConfig::new("");
        Self {
            connect_timeout: stream.connection.connect_timeout,
            handshake_timeout: stream.connection.handshake_timeout,
            read_timeout: stream.connection.read_timeout,
            read_deadline: stream.connection.read_deadline,
            write_timeout: stream.connection.write_timeout,
            health_check_interval: stream.connection.health_check_interval,
            health_check_timeout: stream.connection.health_check_timeout,
            reconnect_initial_delay: stream.reconnect.initial_delay,
            reconnect_max_delay: stream.reconnect.max_delay,
            reconnect_multiplier: stream.reconnect.multiplier,
            reconnect_max_attempts: stream.reconnect.max_attempts,
            rate_limit_capacity: stream.rate_limit.capacity,
            rate_limit_refill: stream.rate_limit.refill_interval,
            max_message_size: stream.connection.max_message_size,
        }
    }
}

impl ConnectionTuning {
    /// Stream settings for `url` with this tuning applied.
    #[must_use]
    pub fn stream_config(&self, url: &str) -> VenueStreamConfig {
        let mut config = VenueStreamConfig::new(url);
        config.connection.connect_timeout = self.connect_timeout;
        config.connection.handshake_timeout = self.handshake_timeout;
        config.connection.read_timeout = self.read_timeout;
        config.connection.read_deadline = self.read_deadline;
        config.connection.write_timeout = self.write_timeout;
        config.connection.health_check_interval = self.health_check_interval;
        config.connection.health_check_timeout = self.health_check_timeout;
        config.connection.max_message_size = self.max_message_size;
        config.reconnect = ReconnectConfig {
            initial_delay: self.reconnect_initial_delay,
            max_delay: self.reconnect_max_delay,
            multiplier: self.reconnect_multiplier,
            max_attempts: self.reconnect_max_attempts,
            ..config.reconnect
        };
        config.rate_limit = RateLimiterConfig {
            capacity: self.rate_limit_capacity,
            refill_interval: self.rate_limit_refill,
        };
        config
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Hyperliquid, `None` when disabled.
    pub hyperliquid: Option<VenueSettings>,
    /// Paradex, `None` when disabled.
    pub paradex: Option<VenueSettings>,
    /// Bybit, `None` when disabled.
    pub bybit: Option<VenueSettings>,
    /// Shared socket tuning.
    pub tuning: ConnectionTuning,
}

impl GatewayConfig {
    /// Load `.env` (if present) and read the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error for an insecure or empty endpoint override.
    /// Missing credentials only disable the affected venue.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "Failed to load .env file");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);
        Ok(Self {
            hyperliquid: env.venue(Venue::Hyperliquid)?,
            paradex: env.venue(Venue::Paradex)?,
            bybit: env.venue(Venue::Bybit)?,
            tuning: env.tuning(),
        })
    }

    /// Settings for `venue` if it is enabled.
    #[must_use]
    pub const fn venue(&self, venue: Venue) -> Option<&VenueSettings> {
        match venue {
            Venue::Hyperliquid => self.hyperliquid.as_ref(),
            Venue::Paradex => self.paradex.as_ref(),
            Venue::Bybit => self.bybit.as_ref(),
        }
    }

    /// Enabled venues.
    pub fn enabled(&self) -> impl Iterator<Item = &VenueSettings> {
        [&self.hyperliquid, &self.paradex, &self.bybit]
            .into_iter()
            .flatten()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has an empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Endpoint override uses a plaintext scheme.
    #[error("{key} must use {scheme}://, got {url}")]
    InsecureUrl {
        /// Offending variable.
        key: String,
        /// Required scheme.
        scheme: &'static str,
        /// Rejected value.
        url: String,
    },
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn flag(&self, key: &str) -> bool {
        self.string(key)
            .is_some_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
    }

    fn url(&self, key: &str, scheme: &'static str) -> Result<Option<String>, ConfigError> {
        match (self.0)(key) {
            None => Ok(None),
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(v) if !v.trim().starts_with(&format!("{scheme}://")) => {
                Err(ConfigError::InsecureUrl {
                    key: key.to_string(),
                    scheme,
                    url: v,
                })
            }
            Some(v) => Ok(Some(v.trim().to_string())),
        }
    }

    fn venue(&self, venue: Venue) -> Result<Option<VenueSettings>, ConfigError> {
        let key = |name: &str| format!("{}_{name}", venue.env_prefix());

        let credentials = VenueCredentials {
            account_address: self.string(&key("ACCOUNT_ADDRESS")),
            private_key: self.string(&key("PRIVATE_KEY")),
            vault_address: self.string(&key("VAULT_ADDRESS")),
            api_key: self.string(&key("API_KEY")),
            api_secret: self.string(&key("API_SECRET")),
            jwt: self.string(&key("JWT")),
        };
        if !venue.has_required_credentials(&credentials) {
            tracing::warn!(venue = %venue, "Required credentials missing; venue disabled");
            return Ok(None);
        }

        let testnet = self.flag(&key("USE_TESTNET"));
        let (base_url, ws_url) = VenueSettings::default_urls(venue, testnet);
        let private_ws_url = match self.url(&key("PRIVATE_WS_URL"), "wss")? {
            Some(url) => Some(url),
            None => VenueSettings::default_private_ws_url(venue, testnet).map(str::to_string),
        };
        let market_slippage = self
            .parse(&key("MARKET_SLIPPAGE"), DEFAULT_MARKET_SLIPPAGE)
            .abs();

        Ok(Some(VenueSettings {
            venue,
            base_url: self
                .url(&key("BASE_URL"), "https")?
                .unwrap_or_else(|| base_url.to_string()),
            ws_url: self
                .url(&key("WS_URL"), "wss")?
                .unwrap_or_else(|| ws_url.to_string()),
            private_ws_url,
            testnet,
            timeout: self.secs(&key("TIMEOUT_SECS"), Duration::from_secs(10)),
            market_slippage,
            credentials,
        }))
    }

    fn tuning(&self) -> ConnectionTuning {
        let d = ConnectionTuning::default();
        ConnectionTuning {
            connect_timeout: self.secs("GATEWAY_CONNECT_TIMEOUT_SECS", d.connect_timeout),
            handshake_timeout: self.secs("GATEWAY_HANDSHAKE_TIMEOUT_SECS", d.handshake_timeout),
            read_timeout: self.secs("GATEWAY_READ_TIMEOUT_SECS", d.read_timeout),
            read_deadline: self.secs("GATEWAY_READ_DEADLINE_SECS", d.read_deadline),
            write_timeout: self.secs("GATEWAY_WRITE_TIMEOUT_SECS", d.write_timeout),
            health_check_interval: self
                .secs("GATEWAY_HEALTH_INTERVAL_SECS", d.health_check_interval),
            health_check_timeout: self.secs("GATEWAY_HEALTH_TIMEOUT_SECS", d.health_check_timeout),
            reconnect_initial_delay: self
                .millis("GATEWAY_RECONNECT_INITIAL_MS", d.reconnect_initial_delay),
            reconnect_max_delay: self.secs("GATEWAY_RECONNECT_MAX_SECS", d.reconnect_max_delay),
            reconnect_multiplier: self
                .parse("GATEWAY_RECONNECT_MULTIPLIER", d.reconnect_multiplier)
                .max(1.0),
            reconnect_max_attempts: self
                .parse("GATEWAY_RECONNECT_MAX_ATTEMPTS", d.reconnect_max_attempts),
            rate_limit_capacity: self.parse("GATEWAY_RATE_LIMIT_CAPACITY", d.rate_limit_capacity),
            rate_limit_refill: self.millis("GATEWAY_RATE_LIMIT_REFILL_MS", d.rate_limit_refill),
            max_message_size: self.parse("GATEWAY_MAX_MESSAGE_BYTES", d.max_message_size),
        }
    }
}
