//! Transport Port
//!
//! The connection manager never opens sockets itself. It hands a validated
//! [`DialRequest`] to a [`Dialer`] and receives a boxed frame sink and
//! stream. Production uses [`TungsteniteDialer`] (rustls); tests plug in an
//! in-memory peer.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, Stream, StreamExt};
use reqwest::Url;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::ConnectionError;
use crate::application::ports::AuthError;

/// Outbound half of a socket.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Inbound half of a socket.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Everything needed to open one socket.
#[derive(Debug, Clone)]
pub struct DialRequest {
    /// Validated `wss` URL.
    pub url: Url,
    /// Extra upgrade headers (e.g. `Authorization`).
    pub headers: Vec<(String, String)>,
    /// Bound on the WebSocket upgrade.
    pub handshake_timeout: Duration,
    /// Socket read buffer size.
    pub read_buffer_size: usize,
    /// Socket write buffer size.
    pub write_buffer_size: usize,
    /// Largest accepted frame.
    pub max_message_size: usize,
}

/// Opens sockets.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dial and complete the WebSocket handshake.
    async fn dial(&self, request: DialRequest) -> Result<(FrameSink, FrameStream), ConnectionError>;
}

/// `tokio-tungstenite` dialer over rustls.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteDialer;

#[async_trait]
impl Dialer for TungsteniteDialer {
    async fn dial(&self, request: DialRequest) -> Result<(FrameSink, FrameStream), ConnectionError> {
        let mut upgrade = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ConnectionError::AuthHeader(AuthError::InvalidHeader(e.to_string()))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                ConnectionError::AuthHeader(AuthError::InvalidHeader(e.to_string()))
            })?;
            upgrade.headers_mut().insert(name, value);
        }

        let config = WebSocketConfig::default()
            .read_buffer_size(request.read_buffer_size)
            .write_buffer_size(request.write_buffer_size)
            .max_message_size(Some(request.max_message_size))
            .max_frame_size(Some(request.max_message_size));

        let (socket, response) = tokio::time::timeout(
            request.handshake_timeout,
            tokio_tungstenite::connect_async_with_config(upgrade, Some(config), false),
        )
        .await
        .map_err(|_| ConnectionError::Timeout("handshake"))?
        .map_err(|e| ConnectionError::Dial(e.to_string()))?;

        tracing::debug!(
            url = %request.url,
            status = %response.status(),
            "WebSocket handshake complete"
        );

        let (sink, stream) = socket.split();
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
