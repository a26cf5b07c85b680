//! Gateway error type.
//!
//! Component errors (`ConnectionError`, `AuthError`, `ParseError`, ...) stay
//! local to their modules. Everything that crosses the connector surface is
//! converted into [`GatewayError`], whose [`ErrorKind`] is stable enough for
//! callers to branch on.
//!
//! | Kind | Raised by |
//! |------|-----------|
//! | `Transport` | dial, read, write, handshake failures |
//! | `Auth` | missing, expired, or unrefreshable credentials |
//! | `Protocol` | invalid frames, unknown channels, oversized messages |
//! | `RateLimited` | inbound token bucket exhausted, venue 429 |
//! | `Parse` | decimal and timestamp decoding |
//! | `Timeout` | operation deadlines |
//! | `CircuitOpen` | breaker rejecting calls |
//! | `NotImplemented` | operations a venue does not offer |

use thiserror::Error;

use crate::application::ports::AuthError;
use crate::infrastructure::config::ConfigError;
use crate::infrastructure::rest::RestError;
use crate::infrastructure::venues::parse::ParseError;
use crate::infrastructure::websocket::{ConnectionError, ReconnectError, ValidationError};

/// Coarse classification of a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Socket or HTTP transport failure.
    Transport,
    /// Authentication failure.
    Auth,
    /// Malformed or unexpected venue frame.
    Protocol,
    /// Dropped by a rate limit.
    RateLimited,
    /// Payload decoding failure.
    Parse,
    /// Deadline exceeded.
    Timeout,
    /// Circuit breaker open.
    CircuitOpen,
    /// Connect called on a live connection.
    AlreadyConnected,
    /// Send attempted without a live connection.
    NotConnected,
    /// Unknown subscription or order.
    NotFound,
    /// Non-TLS URL rejected.
    InsecureScheme,
    /// Reconnect attempts exhausted.
    MaxAttemptsReached,
    /// Operation not offered by the venue.
    NotImplemented,
    /// Venue rejected the request.
    Rejected,
    /// Caller supplied invalid arguments or configuration.
    InvalidRequest,
}

/// Error surfaced by connectors and the WebSocket subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Socket or HTTP transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Authentication failure.
    #[error("auth error: {0}")]
    Auth(String),

    /// Malformed, oversized, or unexpected frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Dropped or refused because of a rate limit.
    #[error("rate limited")]
    RateLimited,

    /// Payload decoding failure.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Deadline exceeded.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Circuit breaker open for the named service.
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// Connect called on a live connection.
    #[error("already connected")]
    AlreadyConnected,

    /// Send attempted without a live connection.
    #[error("not connected")]
    NotConnected,

    /// Unknown subscription, order, or instrument.
    #[error("not found: {0}")]
    NotFound(String),

    /// URL scheme other than `wss`.
    #[error("insecure scheme: {0}")]
    InsecureScheme(String),

    /// Reconnect attempts exhausted.
    #[error("max reconnect attempts reached ({attempts})")]
    MaxAttemptsReached {
        /// Attempts made.
        attempts: u32,
    },

    /// Operation not offered by the venue.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// Venue rejected the request.
    #[error("rejected by venue: {0}")]
    Rejected(String),

    /// Invalid arguments or configuration.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// Classification of the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::CircuitOpen(_) => ErrorKind::CircuitOpen,
            Self::AlreadyConnected => ErrorKind::AlreadyConnected,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InsecureScheme(_) => ErrorKind::InsecureScheme,
            Self::MaxAttemptsReached { .. } => ErrorKind::MaxAttemptsReached,
            Self::NotImplemented(_) => ErrorKind::NotImplemented,
            Self::Rejected(_) => ErrorKind::Rejected,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }
}

impl From<ConnectionError> for GatewayError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::AlreadyConnected => Self::AlreadyConnected,
            ConnectionError::NotConnected => Self::NotConnected,
            ConnectionError::InsecureScheme(scheme) => Self::InsecureScheme(scheme),
            ConnectionError::InvalidUrl(msg) | ConnectionError::Serialize(msg) => {
                Self::InvalidRequest(msg)
            }
            ConnectionError::AuthHeader(err) => Self::Auth(err.to_string()),
            ConnectionError::CircuitOpen(name) => Self::CircuitOpen(name),
            ConnectionError::Timeout(operation) => Self::Timeout(operation.to_string()),
            ConnectionError::WriteDeadline => Self::Timeout("write".to_string()),
            ConnectionError::Dial(_)
            | ConnectionError::Write(_)
            | ConnectionError::Read(_)
            | ConnectionError::Closed { .. }
            | ConnectionError::Stopped => Self::Transport(err.to_string()),
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err.to_string())
    }
}

impl From<ValidationError> for GatewayError {
    fn from(err: ValidationError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<ReconnectError> for GatewayError {
    fn from(err: ReconnectError) -> Self {
        match err {
            ReconnectError::MaxAttemptsReached { attempts } => Self::MaxAttemptsReached { attempts },
            ReconnectError::Connect(inner) => inner.into(),
            ReconnectError::Cancelled => Self::Transport("reconnect cancelled".to_string()),
        }
    }
}

impl From<RestError> for GatewayError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::RateLimited { .. } => Self::RateLimited,
            RestError::Unauthorized(msg) => Self::Auth(msg),
            RestError::NotFound(msg) => Self::NotFound(msg),
            RestError::Rejected(msg) => Self::Rejected(msg),
            RestError::CircuitOpen(name) => Self::CircuitOpen(name),
            RestError::Decode(msg) => Self::Protocol(msg),
            RestError::InvalidRequest(msg) => Self::InvalidRequest(msg),
            RestError::Network(_)
            | RestError::Http { .. }
            | RestError::MaxRetriesExceeded { .. } => Self::Transport(err.to_string()),
        }
    }
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_map_to_kinds() {
        assert_eq!(
            GatewayError::from(ConnectionError::InsecureScheme("ws".into())).kind(),
            ErrorKind::InsecureScheme
        );
        assert_eq!(
            GatewayError::from(ConnectionError::AlreadyConnected).kind(),
            ErrorKind::AlreadyConnected
        );
        assert_eq!(
            GatewayError::from(ConnectionError::Dial("refused".into())).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            GatewayError::from(ConnectionError::WriteDeadline).kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn reconnect_exhaustion_maps_to_kind() {
        let err: GatewayError = ReconnectError::MaxAttemptsReached { attempts: 5 }.into();
        assert_eq!(err.kind(), ErrorKind::MaxAttemptsReached);
        assert_eq!(err.to_string(), "max reconnect attempts reached (5)");
    }

    #[test]
    fn rest_errors_map_to_kinds() {
        assert_eq!(
            GatewayError::from(RestError::RateLimited {
                retry_after_secs: 1
            })
            .kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            GatewayError::from(RestError::Http {
                status: 502,
                message: "bad gateway".into()
            })
            .kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn parse_errors_keep_message() {
        let err: GatewayError = ParseError::MissingField("coin".into()).into();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.to_string().contains("coin"));
    }
}
