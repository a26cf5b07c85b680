//! HTTP client wrapper with retry logic.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{RestError, RetryConfig};
use crate::infrastructure::metrics::{self, RestOutcome};
use crate::infrastructure::resilience::{CircuitBreaker, CircuitBreakerConfig};

const MAX_ERROR_BODY: usize = 512;

/// Produces authentication headers for a signed request.
///
/// Called on every attempt so timestamps in the signature stay fresh.
pub trait RequestSigner: Send + Sync {
    /// Headers for `method` with the encoded `query` and raw `body`.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Unauthorized`] when signing is impossible.
    fn sign(&self, method: &Method, query: &str, body: &str)
    -> Result<Vec<(String, String)>, RestError>;
}

/// One REST call.
#[derive(Debug, Clone)]
pub struct RestRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    headers: Vec<(String, String)>,
    signed: bool,
}

impl RestRequest {
    /// Request for `path` relative to the client's base URL.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
            signed: false,
        }
    }

    /// `GET path`.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path`.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `DELETE path`.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    #[must_use]
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Extra header.
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// `Authorization: Bearer <token>`.
    #[must_use]
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    /// Sign through the client's [`RequestSigner`].
    #[must_use]
    pub const fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Path relative to the base URL.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// HTTP client for one venue with retry logic and a circuit breaker.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    venue: &'static str,
    base_url: String,
    retry: RetryConfig,
    breaker: Arc<CircuitBreaker>,
    signer: Option<Arc<dyn RequestSigner>>,
}

impl RestClient {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Network`] if the HTTP client cannot be built.
    pub fn new(
        venue: &'static str,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RestError::Network(e.to_string()))?;

        Ok(Self {
            client,
            venue,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
            breaker: Arc::new(CircuitBreaker::new(
                format!("{venue}-rest"),
                CircuitBreakerConfig::rest(),
            )),
            signer: None,
        })
    }

    /// Override the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Share an existing breaker.
    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    /// Install a signer for [`RestRequest::signed`] calls.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Venue label.
    #[must_use]
    pub const fn venue(&self) -> &'static str {
        self.venue
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Breaker guarding this client.
    #[must_use]
    pub const fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Send `request` and decode the JSON response.
    ///
    /// # Errors
    ///
    /// - `CircuitOpen` without touching the network while the breaker is open
    /// - `RateLimited` / `MaxRetriesExceeded` once retries are exhausted
    /// - `Unauthorized`, `NotFound`, `Rejected`, `Http` for other statuses
    /// - `Decode` if the body is not the expected JSON
    pub async fn send<T: DeserializeOwned>(&self, request: &RestRequest) -> Result<T, RestError> {
        if !self.breaker.is_call_permitted() {
            metrics::record_rest_request(self.venue, RestOutcome::Failure);
            return Err(RestError::CircuitOpen(self.breaker.name().to_string()));
        }

        let url = self.url(request)?;
        let body = request
            .body
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RestError::InvalidRequest(e.to_string()))?;
        let mut backoff = ExponentialBackoff::new(&self.retry);

        loop {
            let mut builder = self.client.request(request.method.clone(), url.clone());
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if request.signed {
                let signer = self.signer.as_ref().ok_or_else(|| {
                    RestError::Unauthorized(format!("{} has no signing credentials", self.venue))
                })?;
                let headers = signer.sign(
                    &request.method,
                    url.query().unwrap_or_default(),
                    body.as_deref().unwrap_or_default(),
                )?;
                for (name, value) in headers {
                    builder = builder.header(name, value);
                }
            }
            if let Some(body) = &body {
                builder = builder
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone());
            }

            let response = match builder.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            venue = self.venue,
                            path = %request.path,
                            error = %e,
                            delay_ms = delay.as_millis(),
                            attempt = backoff.attempt,
                            "Network error, retrying"
                        );
                        metrics::record_rest_request(self.venue, RestOutcome::Retry);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    self.fail();
                    return Err(if backoff.attempt > 1 {
                        RestError::MaxRetriesExceeded {
                            attempts: backoff.attempt,
                        }
                    } else {
                        RestError::Network(e.to_string())
                    });
                }
            };

            let status = response.status();

            if status.is_success() {
                let text = response
                    .text()
                    .await
                    .map_err(|e| RestError::Network(e.to_string()))?;
                self.breaker.record_success();
                let text = if text.trim().is_empty() { "null" } else { text.as_str() };
                return match serde_json::from_str(text) {
                    Ok(value) => {
                        metrics::record_rest_request(self.venue, RestOutcome::Success);
                        Ok(value)
                    }
                    Err(e) => {
                        metrics::record_rest_request(self.venue, RestOutcome::Failure);
                        Err(RestError::Decode(e.to_string()))
                    }
                };
            }

            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let message = error_message(&response.text().await.unwrap_or_default());

            match categorize_status(status) {
                ErrorCategory::RateLimited => {
                    if let Some(delay) = backoff.next_backoff() {
                        let delay = retry_after.map_or(delay, Duration::from_secs);
                        tracing::warn!(
                            venue = self.venue,
                            path = %request.path,
                            delay_ms = delay.as_millis(),
                            "Rate limited, retrying"
                        );
                        metrics::record_rest_request(self.venue, RestOutcome::Retry);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    self.fail();
                    return Err(RestError::RateLimited {
                        retry_after_secs: retry_after.unwrap_or(60),
                    });
                }
                ErrorCategory::Retryable => {
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            venue = self.venue,
                            path = %request.path,
                            status = status.as_u16(),
                            %message,
                            delay_ms = delay.as_millis(),
                            "Retryable error, retrying"
                        );
                        metrics::record_rest_request(self.venue, RestOutcome::Retry);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    self.fail();
                    return Err(if backoff.attempt > 1 {
                        RestError::MaxRetriesExceeded {
                            attempts: backoff.attempt,
                        }
                    } else {
                        RestError::Http {
                            status: status.as_u16(),
                            message,
                        }
                    });
                }
                ErrorCategory::NonRetryable => {
                    // Venue is reachable.
                    self.breaker.record_success();
                    metrics::record_rest_request(self.venue, RestOutcome::Failure);
                    return Err(match status {
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                            RestError::Unauthorized(message)
                        }
                        StatusCode::NOT_FOUND => {
                            RestError::NotFound(format!("{}: {message}", request.path))
                        }
                        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                            RestError::Rejected(message)
                        }
                        _ => RestError::Http {
                            status: status.as_u16(),
                            message,
                        },
                    });
                }
            }
        }
    }

    fn url(&self, request: &RestRequest) -> Result<Url, RestError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|e| RestError::InvalidRequest(format!("{}: {e}", request.path)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }

    fn fail(&self) {
        self.breaker.record_failure();
        metrics::record_rest_request(self.venue, RestOutcome::Failure);
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("venue", &self.venue)
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .field("breaker", &self.breaker.state())
            .field("signed", &self.signer.is_some())
            .finish()
    }
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        ["message", "msg", "error", "retMsg"]
            .iter()
            .find_map(|key| v.get(*key).and_then(Value::as_str))
    });
    let text = from_json.unwrap_or(body).trim();
    text.chars().take(MAX_ERROR_BODY).collect()
}

/// Error category for determining retry behavior.
enum ErrorCategory {
    RateLimited,
    Retryable,
    NonRetryable,
}

/// Categorize HTTP status code for retry handling.
const fn categorize_status(status: StatusCode) -> ErrorCategory {
    match status.as_u16() {
        429 => ErrorCategory::RateLimited,
        408 | 500 | 502 | 503 | 504 => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

/// Exponential backoff calculator.
struct ExponentialBackoff {
    attempt: u32,
    max_attempts: u32,
    current_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    const fn new(config: &RetryConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts,
            current_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier,
        }
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }

        let backoff = self.current_backoff;
        self.current_backoff = Duration::from_secs_f64(
            (self.current_backoff.as_secs_f64() * self.multiplier)
                .min(self.max_backoff.as_secs_f64()),
        );

        Some(backoff)
    }
}
