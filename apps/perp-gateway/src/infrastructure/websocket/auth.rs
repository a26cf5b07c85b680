//! WebSocket Authentication Manager
//!
//! Wraps an [`AuthProvider`] with a cached token that is refreshed when it
//! is within five minutes of expiry.
//!
//! # Refresh Flow
//!
//! 1. `token()` returns the cached token if it is still fresh
//! 2. Otherwise one caller refreshes while the others wait on the refresh lock
//! 3. A failed refresh fails the current call only; nothing is cached, so the
//!    next call tries again
//!
//! A background loop (`spawn_refresh_loop`) keeps the cache warm so dials
//! rarely wait on the issuer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{AuthError, AuthProvider, AuthToken, Clock};

/// Refresh when the token expires within this window.
pub const REFRESH_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Cached bearer token with refresh-on-expiry.
pub struct AuthManager {
    provider: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
    cached: RwLock<Option<AuthToken>>,
    refresh_lock: tokio::sync::Mutex<()>,
    threshold: chrono::Duration,
}

impl AuthManager {
    /// Create a manager with the default five minute threshold.
    #[must_use]
    pub fn new(provider: Arc<dyn AuthProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            clock,
            cached: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            threshold: chrono::Duration::from_std(REFRESH_THRESHOLD)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        }
    }

    /// Whether the cached token is missing or about to expire.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.cached
            .read()
            .as_ref()
            .is_none_or(|token| self.is_stale(token))
    }

    fn is_stale(&self, token: &AuthToken) -> bool {
        token
            .expires_at
            .is_some_and(|expires| self.clock.now() + self.threshold > expires)
    }

    /// Current token, refreshing first if needed.
    ///
    /// # Errors
    ///
    /// Returns the provider error when a refresh was needed and failed.
    pub async fn token(&self) -> Result<AuthToken, AuthError> {
        if let Some(token) = self.fresh_cached() {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(token) = self.fresh_cached() {
            return Ok(token);
        }
        self.fetch_and_store().await
    }

    /// Force a refresh.
    ///
    /// # Errors
    ///
    /// Returns the provider error; the previous token stays cached.
    pub async fn refresh(&self) -> Result<AuthToken, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        self.fetch_and_store().await
    }

    fn fresh_cached(&self) -> Option<AuthToken> {
        self.cached
            .read()
            .as_ref()
            .filter(|token| !self.is_stale(token))
            .cloned()
    }

    async fn fetch_and_store(&self) -> Result<AuthToken, AuthError> {
        let token = self.provider.fetch_token().await.map_err(|e| {
            tracing::warn!(error = %e, "Auth token refresh failed");
            e
        })?;

        if token.expires_at.is_some_and(|expires| expires <= self.clock.now()) {
            return Err(AuthError::Expired);
        }

        tracing::debug!(expires_at = ?token.expires_at, "Auth token refreshed");
        *self.cached.write() = Some(token.clone());
        Ok(token)
    }

    /// Upgrade headers for the socket dial.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be obtained or cannot be carried
    /// in a header.
    pub async fn headers(&self) -> Result<Vec<(String, String)>, AuthError> {
        let token = self.token().await?;
        if token.token.is_empty() {
            return Err(AuthError::InvalidHeader("empty token".to_string()));
        }
        if token.token.contains(['\r', '\n']) {
            return Err(AuthError::InvalidHeader(
                "token contains line breaks".to_string(),
            ));
        }
        Ok(vec![(
            "Authorization".to_string(),
            format!("Bearer {}", token.token),
        )])
    }

    /// Refresh the token every `interval` until cancelled.
    pub fn spawn_refresh_loop(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if manager.needs_refresh() {
                            if let Err(e) = manager.refresh().await {
                                tracing::warn!(error = %e, "Background token refresh failed");
                            }
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("cached", &self.cached.read().is_some())
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}
