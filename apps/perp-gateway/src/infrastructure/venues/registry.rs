//! Connector Registry
//!
//! Explicit map from [`Venue`] to its REST connector and stream surface.
//! [`build_registry`] constructs every venue enabled in the configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::bybit::{BybitConnector, BybitCredentials, BybitProtocol, BybitSigner, BybitStreams};
use super::hyperliquid::{HyperliquidConnector, HyperliquidProtocol};
use super::paradex::{ParadexConnector, ParadexProtocol};
use crate::application::ports::{
    ActionSigner, AuthToken, Clock, Connector, ConnectorResult, StaticTokenProvider,
    WebSocketConnector,
};
use crate::error::GatewayError;
use crate::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
use crate::infrastructure::config::{ConnectionTuning, GatewayConfig, VenueCredentials, VenueSettings};
use crate::infrastructure::rest::RestClient;
use crate::infrastructure::websocket::{AuthManager, Dialer, VenueStream, VenueStreamHandle};

/// Supported venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Venue {
    /// Hyperliquid perpetuals.
    Hyperliquid,
    /// Paradex perpetuals.
    Paradex,
    /// Bybit USDT linear perpetuals.
    Bybit,
}

impl Venue {
    /// Every venue.
    pub const ALL: [Self; 3] = [Self::Hyperliquid, Self::Paradex, Self::Bybit];

    /// Lowercase venue name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hyperliquid => "hyperliquid",
            Self::Paradex => "paradex",
            Self::Bybit => "bybit",
        }
    }

    /// Environment variable prefix.
    #[must_use]
    pub const fn env_prefix(&self) -> &'static str {
        match self {
            Self::Hyperliquid => "HYPERLIQUID",
            Self::Paradex => "PARADEX",
            Self::Bybit => "BYBIT",
        }
    }

    /// Whether `credentials` are enough to enable the venue.
    ///
    /// Hyperliquid and Paradex need an account address; Bybit needs an
    /// API key and secret.
    #[must_use]
    pub const fn has_required_credentials(&self, credentials: &VenueCredentials) -> bool {
        match self {
            Self::Hyperliquid | Self::Paradex => credentials.account_address.is_some(),
            Self::Bybit => credentials.api_key.is_some() && credentials.api_secret.is_some(),
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized venue name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown venue: {0}")]
pub struct UnknownVenue(pub String);

impl FromStr for Venue {
    type Err = UnknownVenue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|venue| venue.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVenue(s.to_string()))
    }
}

/// Both capability surfaces of one venue.
#[derive(Clone)]
pub struct VenueHandle {
    /// REST queries and order entry.
    pub rest: Arc<dyn Connector>,
    /// Live feed and update streams.
    pub stream: Arc<dyn WebSocketConnector>,
}

impl fmt::Debug for VenueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VenueHandle")
            .field("venue", &self.rest.connector_info().venue)
            .field("connected", &self.stream.is_websocket_connected())
            .finish()
    }
}

/// Registry of enabled venues.
#[derive(Debug, Clone, Default)]
pub struct ConnectorRegistry {
    venues: BTreeMap<Venue, VenueHandle>,
}

impl ConnectorRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle`, replacing any previous entry for `venue`.
    pub fn insert(&mut self, venue: Venue, handle: VenueHandle) {
        self.venues.insert(venue, handle);
    }

    /// Handle for `venue`.
    #[must_use]
    pub fn get(&self, venue: Venue) -> Option<&VenueHandle> {
        self.venues.get(&venue)
    }

    /// Handle by venue name.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for an unknown name, `NotFound` for a known but
    /// disabled venue.
    pub fn lookup(&self, name: &str) -> ConnectorResult<&VenueHandle> {
        let venue: Venue = name
            .parse()
            .map_err(|e: UnknownVenue| GatewayError::InvalidRequest(e.to_string()))?;
        self.get(venue)
            .ok_or_else(|| GatewayError::NotFound(format!("venue {venue} is not enabled")))
    }

    /// Enabled venues in declaration order.
    pub fn venues(&self) -> impl Iterator<Item = Venue> + '_ {
        self.venues.keys().copied()
    }

    /// Enabled venues with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (Venue, &VenueHandle)> {
        self.venues.iter().map(|(venue, handle)| (*venue, handle))
    }

    /// Number of enabled venues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.venues.len()
    }

    /// Whether no venue is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }

    /// Start every venue's feed. A venue that fails to connect is
    /// reported and does not stop the others.
    pub async fn start_all(&self) -> Vec<(Venue, GatewayError)> {
        let mut failures = Vec::new();
        for (venue, handle) in self.iter() {
            match handle.stream.start_websocket().await {
                Ok(()) => tracing::info!(venue = %venue, "WebSocket started"),
                Err(e) => {
                    tracing::error!(venue = %venue, error = %e, "WebSocket start failed");
                    failures.push((venue, e));
                }
            }
        }
        failures
    }

    /// Stop every venue's feed.
    pub async fn stop_all(&self) {
        for (venue, handle) in self.iter() {
            if let Err(e) = handle.stream.stop_websocket().await {
                tracing::warn!(venue = %venue, error = %e, "WebSocket stop failed");
            }
        }
    }
}

/// Order signers. Key material stays outside the gateway.
#[derive(Clone, Default)]
pub struct Signers {
    /// Hyperliquid action signer.
    pub hyperliquid: Option<Arc<dyn ActionSigner>>,
    /// Paradex order signer.
    pub paradex: Option<Arc<dyn ActionSigner>>,
}

/// Collaborators shared by every venue.
#[derive(Clone)]
pub struct RegistryDeps {
    /// Socket factory.
    pub dialer: Arc<dyn Dialer>,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
    /// Per-venue update channel capacities.
    pub broadcast: BroadcastConfig,
    /// Order signers.
    pub signers: Signers,
}

/// Construct every enabled venue. Nothing connects until
/// [`ConnectorRegistry::start_all`].
///
/// # Errors
///
/// Returns an error if an HTTP client cannot be built.
pub fn build_registry(
    config: &GatewayConfig,
    deps: &RegistryDeps,
) -> ConnectorResult<ConnectorRegistry> {
    let mut registry = ConnectorRegistry::new();
    for settings in config.enabled() {
        let handle = match settings.venue {
            Venue::Hyperliquid => hyperliquid(settings, &config.tuning, deps)?,
            Venue::Paradex => paradex(settings, &config.tuning, deps)?,
            Venue::Bybit => bybit(settings, &config.tuning, deps)?,
        };
        tracing::info!(
            venue = %settings.venue,
            testnet = settings.testnet,
            ws_url = %settings.ws_url,
            "Venue configured"
        );
        registry.insert(settings.venue, handle);
    }
    Ok(registry)
}

fn rest_client(settings: &VenueSettings) -> ConnectorResult<RestClient> {
    Ok(RestClient::new(
        settings.venue.as_str(),
        settings.base_url.as_str(),
        settings.timeout,
    )?)
}

fn hyperliquid(
    settings: &VenueSettings,
    tuning: &ConnectionTuning,
    deps: &RegistryDeps,
) -> ConnectorResult<VenueHandle> {
    let credentials = &settings.credentials;
    let mut connector = HyperliquidConnector::new(
        rest_client(settings)?,
        Arc::clone(&deps.clock),
        settings.market_slippage,
        settings.testnet,
    );
    let mut protocol = HyperliquidProtocol::new();
    if let Some(address) = &credentials.account_address {
        connector = connector.with_user(address.as_str());
        protocol = protocol.with_user(address);
    }
    if let Some(vault) = &credentials.vault_address {
        connector = connector.with_vault(vault.as_str());
    }
    if let Some(signer) = &deps.signers.hyperliquid {
        connector = connector.with_signer(Arc::clone(signer));
    }

    let stream = VenueStream::new(
        Arc::new(protocol),
        tuning.stream_config(&settings.ws_url),
        Arc::clone(&deps.dialer),
        Arc::new(BroadcastHub::new(deps.broadcast)),
        None,
        Arc::clone(&deps.clock),
    );
    Ok(VenueHandle {
        rest: Arc::new(connector),
        stream: Arc::new(VenueStreamHandle(stream)),
    })
}

fn paradex(
    settings: &VenueSettings,
    tuning: &ConnectionTuning,
    deps: &RegistryDeps,
) -> ConnectorResult<VenueHandle> {
    let auth = settings.credentials.jwt.as_ref().map(|jwt| {
        Arc::new(AuthManager::new(
            Arc::new(StaticTokenProvider::new(AuthToken::new(jwt.as_str(), None))),
            Arc::clone(&deps.clock),
        ))
    });

    let mut connector = ParadexConnector::new(
        rest_client(settings)?,
        Arc::clone(&deps.clock),
        settings.testnet,
    );
    let mut protocol = ParadexProtocol::new();
    if let Some(auth) = &auth {
        connector = connector.with_auth(Arc::clone(auth));
        protocol = protocol.authenticated();
    }
    if let Some(signer) = &deps.signers.paradex {
        connector = connector.with_signer(Arc::clone(signer));
    }

    let stream = VenueStream::new(
        Arc::new(protocol),
        tuning.stream_config(&settings.ws_url),
        Arc::clone(&deps.dialer),
        Arc::new(BroadcastHub::new(deps.broadcast)),
        auth,
        Arc::clone(&deps.clock),
    );
    Ok(VenueHandle {
        rest: Arc::new(connector),
        stream: Arc::new(VenueStreamHandle(stream)),
    })
}

fn bybit(
    settings: &VenueSettings,
    tuning: &ConnectionTuning,
    deps: &RegistryDeps,
) -> ConnectorResult<VenueHandle> {
    let (Some(api_key), Some(api_secret)) =
        (&settings.credentials.api_key, &settings.credentials.api_secret)
    else {
        return Err(GatewayError::Auth("bybit requires an API key and secret".into()));
    };
    let credentials = BybitCredentials::new(api_key.as_str(), api_secret.as_str());

    let rest = rest_client(settings)?.with_signer(Arc::new(BybitSigner::new(
        credentials.clone(),
        Arc::clone(&deps.clock),
    )));
    let connector = BybitConnector::new(rest, Arc::clone(&deps.clock), settings.testnet)
        .with_slippage(settings.market_slippage);

    let hub = Arc::new(BroadcastHub::new(deps.broadcast));
    let public = VenueStream::new(
        Arc::new(BybitProtocol::public(Arc::clone(&deps.clock))),
        tuning.stream_config(&settings.ws_url),
        Arc::clone(&deps.dialer),
        Arc::clone(&hub),
        None,
        Arc::clone(&deps.clock),
    );
    let private = settings.private_ws_url.as_ref().map(|url| {
        VenueStreamHandle(VenueStream::new(
            Arc::new(BybitProtocol::private(credentials, Arc::clone(&deps.clock))),
            tuning.stream_config(url),
            Arc::clone(&deps.dialer),
            Arc::clone(&hub),
            None,
            Arc::clone(&deps.clock),
        ))
    });

    Ok(VenueHandle {
        rest: Arc::new(connector),
        stream: Arc::new(BybitStreams::new(VenueStreamHandle(public), private)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::SystemClock;
    use crate::infrastructure::websocket::TungsteniteDialer;
    use std::collections::HashMap;
    use test_case::test_case;

    fn deps() -> RegistryDeps {
        RegistryDeps {
            dialer: Arc::new(TungsteniteDialer),
            clock: Arc::new(SystemClock),
            broadcast: BroadcastConfig::default(),
            signers: Signers::default(),
        }
    }

    fn config(vars: &[(&str, &str)]) -> GatewayConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[test_case("hyperliquid", Venue::Hyperliquid)]
    #[test_case("Paradex", Venue::Paradex)]
    #[test_case(" BYBIT ", Venue::Bybit)]
    fn venue_names_parse(name: &str, expected: Venue) {
        assert_eq!(name.parse::<Venue>().unwrap(), expected);
    }

    #[test]
    fn unknown_venue_name_is_rejected() {
        assert_eq!(
            "binance".parse::<Venue>().unwrap_err(),
            UnknownVenue("binance".into())
        );
    }

    #[tokio::test]
    async fn builds_only_enabled_venues() {
        let config = config(&[
            ("HYPERLIQUID_ACCOUNT_ADDRESS", "0xAbC"),
            ("BYBIT_API_KEY", "key"),
            ("BYBIT_API_SECRET", "secret"),
            ("BYBIT_USE_TESTNET", "true"),
        ]);
        let registry = build_registry(&config, &deps()).unwrap();

        assert_eq!(
            registry.venues().collect::<Vec<_>>(),
            vec![Venue::Hyperliquid, Venue::Bybit]
        );
        let bybit = registry.get(Venue::Bybit).unwrap();
        let info = bybit.rest.connector_info();
        assert_eq!(info.venue, "bybit");
        assert!(info.testnet);
        assert!(!bybit.stream.is_websocket_connected());
    }

    #[tokio::test]
    async fn lookup_distinguishes_unknown_and_disabled() {
        let registry = build_registry(
            &config(&[("PARADEX_ACCOUNT_ADDRESS", "0x1"), ("PARADEX_JWT", "jwt")]),
            &deps(),
        )
        .unwrap();

        assert!(registry.lookup("paradex").is_ok());
        assert!(matches!(
            registry.lookup("bybit"),
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            registry.lookup("kraken"),
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn empty_configuration_builds_empty_registry() {
        let registry = build_registry(&config(&[]), &deps()).unwrap();
        assert!(registry.is_empty());
        assert!(registry.start_all().await.is_empty());
    }
}
