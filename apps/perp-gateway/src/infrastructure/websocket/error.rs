//! Connection and reconnect errors.

use crate::application::ports::AuthError;

/// Errors raised by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// `connect` called while connected or connecting.
    #[error("already connected")]
    AlreadyConnected,

    /// Send attempted without a live socket.
    #[error("not connected")]
    NotConnected,

    /// URL scheme other than `wss`.
    #[error("insecure scheme '{0}', only wss is accepted")]
    InsecureScheme(String),

    /// URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Outbound value could not be serialized.
    #[error("serialize failed: {0}")]
    Serialize(String),

    /// Auth headers could not be produced.
    #[error("auth header failure: {0}")]
    AuthHeader(AuthError),

    /// Circuit breaker rejected the dial.
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// Operation deadline exceeded.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// Write did not complete before the write deadline.
    #[error("write deadline exceeded")]
    WriteDeadline,

    /// Dial or handshake failed.
    #[error("dial failed: {0}")]
    Dial(String),

    /// Frame write failed.
    #[error("write failed: {0}")]
    Write(String),

    /// Frame read failed.
    #[error("read failed: {0}")]
    Read(String),

    /// Peer closed the connection.
    #[error("connection closed (code {code:?}): {reason}")]
    Closed {
        /// Close code sent by the peer.
        code: Option<u16>,
        /// Close reason sent by the peer.
        reason: String,
    },

    /// Manager was stopped by the user.
    #[error("connection manager stopped")]
    Stopped,
}

impl ConnectionError {
    /// Whether this error ends the current socket.
    #[must_use]
    pub const fn is_fatal_to_socket(&self) -> bool {
        matches!(
            self,
            Self::WriteDeadline | Self::Write(_) | Self::Read(_) | Self::Closed { .. }
        )
    }
}

/// Errors raised by a reconnect sequence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// All attempts failed.
    #[error("maximum reconnect attempts ({attempts}) reached")]
    MaxAttemptsReached {
        /// Attempts made.
        attempts: u32,
    },

    /// A single attempt failed.
    #[error("reconnect attempt failed: {0}")]
    Connect(ConnectionError),

    /// Cancelled or stopped by the user.
    #[error("reconnect cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_fatal_errors() {
        assert!(ConnectionError::WriteDeadline.is_fatal_to_socket());
        assert!(ConnectionError::Read("reset".into()).is_fatal_to_socket());
        assert!(!ConnectionError::NotConnected.is_fatal_to_socket());
        assert!(!ConnectionError::Serialize("bad".into()).is_fatal_to_socket());
    }
}
