//! Connection State Machine
//!
//! ```text
//! Disconnected ──Connect──▶ Connecting ──DialSucceeded──▶ Connected
//!      ▲                        │                            │
//!      │                   DialFailed                 ConnectionLost
//!      │                        ▼                            │
//!      │                      Failed ──Connect──▶ Connecting  │
//!      └─────────────────────────────────────────────────────┘
//!
//! UserDisconnect from any state ──▶ Stopped (terminal)
//! ```
//!
//! Events that do not apply to a state leave it unchanged.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a single socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket; may connect.
    Disconnected,
    /// Dial in progress.
    Connecting,
    /// Socket open.
    Connected,
    /// Last dial failed; may connect again.
    Failed,
    /// Stopped by the user. Terminal.
    Stopped,
}

impl ConnectionState {
    /// All states.
    pub const ALL: [Self; 5] = [
        Self::Disconnected,
        Self::Connecting,
        Self::Connected,
        Self::Failed,
        Self::Stopped,
    ];

    /// State name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the state has no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Apply an event.
    #[must_use]
    pub const fn on(self, event: ConnectionEvent) -> Self {
        use ConnectionEvent as E;
        match (self, event) {
            (Self::Stopped, _) => Self::Stopped,
            (_, E::UserDisconnect) => Self::Stopped,
            (Self::Disconnected | Self::Failed, E::Connect) => Self::Connecting,
            (Self::Connecting, E::DialSucceeded) => Self::Connected,
            (Self::Connecting, E::DialFailed) => Self::Failed,
            (Self::Connected, E::ConnectionLost) => Self::Disconnected,
            (state, _) => state,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// Dial requested.
    Connect,
    /// Dial and handshake completed.
    DialSucceeded,
    /// Dial or handshake failed.
    DialFailed,
    /// Read or write error, or server close.
    ConnectionLost,
    /// User requested termination.
    UserDisconnect,
}

impl ConnectionEvent {
    /// All events.
    pub const ALL: [Self; 5] = [
        Self::Connect,
        Self::DialSucceeded,
        Self::DialFailed,
        Self::ConnectionLost,
        Self::UserDisconnect,
    ];
}
