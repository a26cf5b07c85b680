//! Connection settings.

use std::time::Duration;

/// Settings for one venue socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// `wss://` endpoint.
    pub url: String,
    /// Bound on the whole dial, including TLS and handshake.
    pub connect_timeout: Duration,
    /// Bound on the WebSocket upgrade.
    pub handshake_timeout: Duration,
    /// Idle time after which the connection is reported unhealthy.
    pub read_timeout: Duration,
    /// Silence after which the read loop declares the peer dead. Restarted
    /// by every inbound frame, pongs included.
    pub read_deadline: Duration,
    /// Per-write deadline.
    pub write_timeout: Duration,
    /// Deadline for answering a server ping.
    pub pong_timeout: Duration,
    /// Health monitor tick.
    pub health_check_interval: Duration,
    /// Idle time after which the health monitor warns.
    pub health_check_timeout: Duration,
    /// Run the health monitor.
    pub enable_health_monitor: bool,
    /// Send a ping on every health monitor tick.
    pub enable_health_pings: bool,
    /// Socket read buffer size.
    pub read_buffer_size: usize,
    /// Socket write buffer size.
    pub write_buffer_size: usize,
    /// Largest accepted frame.
    pub max_message_size: usize,
    /// Application-level ping text; control pings are used when `None`.
    pub ping_payload: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(45),
            read_timeout: Duration::from_secs(60),
            read_deadline: Duration::from_secs(300),
            write_timeout: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(10),
            enable_health_monitor: true,
            enable_health_pings: true,
            read_buffer_size: 128 * 1024,
            write_buffer_size: 128 * 1024,
            max_message_size: 1024 * 1024,
            ping_payload: None,
        }
    }
}

impl ConnectionConfig {
    /// Default settings for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Trading profile: 15 s pings, 5 s pong deadline, 2 MiB frames.
    #[must_use]
    pub fn trading(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            health_check_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(5),
            max_message_size: 2 * 1024 * 1024,
            ..Self::default()
        }
    }

    /// Use an application-level ping.
    #[must_use]
    pub fn with_ping_payload(mut self, payload: Option<String>) -> Self {
        self.ping_payload = payload;
        self
    }

    /// Override the dead-peer read deadline.
    #[must_use]
    pub const fn with_read_deadline(mut self, deadline: Duration) -> Self {
        self.read_deadline = deadline;
        self
    }

    /// Disable the health monitor.
    #[must_use]
    pub const fn without_health_monitor(mut self) -> Self {
        self.enable_health_monitor = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.handshake_timeout, Duration::from_secs(45));
        assert_eq!(config.read_timeout, Duration::from_secs(60));
        assert_eq!(config.read_deadline, Duration::from_secs(300));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.health_check_timeout, Duration::from_secs(10));
    }

    #[test]
    fn trading_profile_overrides() {
        let config = ConnectionConfig::trading("wss://api.hyperliquid.xyz/ws");
        assert_eq!(config.health_check_interval, Duration::from_secs(15));
        assert_eq!(config.pong_timeout, Duration::from_secs(5));
        assert_eq!(config.max_message_size, 2 * 1024 * 1024);
        assert_eq!(config.url, "wss://api.hyperliquid.xyz/ws");
    }
}
