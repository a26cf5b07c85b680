//! Bybit V5 HMAC-SHA256 signing.
//!
//! REST: `sign = hex(hmac(secret, timestamp + api_key + recv_window + payload))`
//! where the payload is the query string for GET and the JSON body
//! otherwise.
//!
//! WebSocket: `sign = hex(hmac(secret, "GET/realtime" + expires))`.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::Sha256;

use crate::application::ports::Clock;
use crate::infrastructure::rest::{RequestSigner, RestError};

type HmacSha256 = Hmac<Sha256>;

/// Receive window sent with every signed REST call, in milliseconds.
pub const RECV_WINDOW_MS: i64 = 5_000;

/// Lifetime of a WebSocket auth signature, in milliseconds.
pub const WS_AUTH_TTL_MS: i64 = 10_000;

/// API key pair.
#[derive(Clone)]
pub struct BybitCredentials {
    api_key: String,
    api_secret: String,
}

impl BybitCredentials {
    /// Key pair.
    #[must_use]
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Public key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    fn hmac_hex(&self, message: &str) -> Result<String, RestError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| RestError::Unauthorized(format!("invalid bybit secret: {e}")))?;
        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signature for a REST request.
    ///
    /// # Errors
    ///
    /// `Unauthorized` if the secret cannot key the MAC.
    pub fn rest_signature(
        &self,
        timestamp_ms: i64,
        recv_window_ms: i64,
        payload: &str,
    ) -> Result<String, RestError> {
        self.hmac_hex(&format!(
            "{timestamp_ms}{}{recv_window_ms}{payload}",
            self.api_key
        ))
    }

    /// Signature for the WebSocket `auth` op.
    ///
    /// # Errors
    ///
    /// `Unauthorized` if the secret cannot key the MAC.
    pub fn ws_signature(&self, expires_ms: i64) -> Result<String, RestError> {
        self.hmac_hex(&format!("GET/realtime{expires_ms}"))
    }
}

impl std::fmt::Debug for BybitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// [`RequestSigner`] producing the `X-BAPI-*` headers.
#[derive(Clone)]
pub struct BybitSigner {
    credentials: BybitCredentials,
    clock: Arc<dyn Clock>,
}

impl BybitSigner {
    /// Signer using `clock` for request timestamps.
    #[must_use]
    pub fn new(credentials: BybitCredentials, clock: Arc<dyn Clock>) -> Self {
        Self { credentials, clock }
    }
}

impl RequestSigner for BybitSigner {
    fn sign(
        &self,
        method: &Method,
        query: &str,
        body: &str,
    ) -> Result<Vec<(String, String)>, RestError> {
        let timestamp = self.clock.now().timestamp_millis();
        let payload = if *method == Method::GET { query } else { body };
        let signature = self
            .credentials
            .rest_signature(timestamp, RECV_WINDOW_MS, payload)?;
        Ok(vec![
            ("X-BAPI-API-KEY".to_string(), self.credentials.api_key.clone()),
            ("X-BAPI-TIMESTAMP".to_string(), timestamp.to_string()),
            ("X-BAPI-RECV-WINDOW".to_string(), RECV_WINDOW_MS.to_string()),
            ("X-BAPI-SIGN".to_string(), signature),
        ])
    }
}

impl std::fmt::Debug for BybitSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitSigner")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::ManualClock;
    use chrono::DateTime;

    fn credentials() -> BybitCredentials {
        BybitCredentials::new("key", "secret")
    }

    #[test]
    fn hmac_matches_reference_vector() {
        let mac = BybitCredentials::new("", "key")
            .hmac_hex("The quick brown fox jumps over the lazy dog")
            .unwrap();
        assert_eq!(
            mac,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn ws_signature_is_hex_hmac() {
        let signature = credentials().ws_signature(1_700_000_010_000).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(signature, credentials().ws_signature(1_700_000_010_000).unwrap());
        assert_ne!(signature, credentials().ws_signature(1_700_000_010_001).unwrap());
    }

    #[test]
    fn get_signs_query_and_post_signs_body() {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        ));
        let signer = BybitSigner::new(credentials(), clock);

        let get = signer.sign(&Method::GET, "category=linear", "ignored").unwrap();
        let expected = credentials()
            .rest_signature(1_700_000_000_000, RECV_WINDOW_MS, "category=linear")
            .unwrap();
        assert_eq!(get[3], ("X-BAPI-SIGN".to_string(), expected));
        assert_eq!(get[1].1, "1700000000000");

        let post = signer.sign(&Method::POST, "", r#"{"a":1}"#).unwrap();
        let expected = credentials()
            .rest_signature(1_700_000_000_000, RECV_WINDOW_MS, r#"{"a":1}"#)
            .unwrap();
        assert_eq!(post[3].1, expected);
    }

    #[test]
    fn debug_redacts_secret() {
        let rendered = format!("{:?}", credentials());
        assert!(rendered.contains("key"));
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("REDACTED"));
    }
}
