//! Auth Ports (Driven Ports)
//!
//! Credentials are owned by external collaborators. The gateway only asks
//! for a bearer token ([`AuthProvider`]) or a signature over a payload
//! ([`ActionSigner`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Bearer token with optional expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    /// Token value.
    pub token: String,
    /// Expiry time; `None` means the token never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    /// Create a token.
    #[must_use]
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Auth port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No credentials configured.
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// Token expired and could not be replaced.
    #[error("token expired")]
    Expired,

    /// Provider failed to issue a token.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// Token cannot be carried in a header.
    #[error("invalid auth header: {0}")]
    InvalidHeader(String),

    /// Signer failed to sign a payload.
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// Source of bearer tokens (e.g. a venue JWT issuer).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Issue a fresh token.
    async fn fetch_token(&self) -> Result<AuthToken, AuthError>;
}

/// Provider serving a fixed, pre-issued token.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: AuthToken,
}

impl StaticTokenProvider {
    /// Wrap a pre-issued token.
    #[must_use]
    pub const fn new(token: AuthToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn fetch_token(&self) -> Result<AuthToken, AuthError> {
        if self.token.token.is_empty() {
            return Err(AuthError::MissingCredentials("empty token".to_string()));
        }
        Ok(self.token.clone())
    }
}

/// Signs venue actions (orders, cancels) with the account's private key.
///
/// The payload and returned signature shapes are venue-specific:
/// Hyperliquid expects `{r, s, v}` over an action hash, Paradex expects a
/// `signature` plus `signature_timestamp` for an order.
#[async_trait]
pub trait ActionSigner: Send + Sync {
    /// Sign a venue payload.
    async fn sign(&self, payload: &Value) -> Result<Value, AuthError>;
}
