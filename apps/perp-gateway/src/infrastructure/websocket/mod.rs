//! Generic WebSocket Machinery
//!
//! Building blocks shared by every venue adapter:
//!
//! - [`ConnectionManager`]: socket lifecycle, ping/pong, read loop, write
//!   serialization, health monitor, five-state machine
//! - [`ReconnectManager`]: exponential backoff with jitter driven by state
//!   transitions
//! - [`AuthManager`]: bearer headers with refresh ahead of expiry
//! - [`MessageValidator`] and [`MessageService`]: inbound pipeline
//! - [`SubscriptionRouter`]: `(channel, instrument, interval)` index with
//!   replay after reconnect
//! - [`VenueStream`]: the composed per-venue facade
//!
//! Venue specifics live behind [`VenueProtocol`].

mod auth;
mod config;
mod connection;
mod error;
mod facade;
mod health;
mod protocol;
mod reconnect;
mod router;
mod service;
mod state;
mod transport;
mod validator;

pub use auth::{AuthManager, REFRESH_THRESHOLD};
pub use config::ConnectionConfig;
pub use connection::{
    ConnectionCallbacks, ConnectionManager, ConnectionStats, OnConnect, OnDisconnect, OnError,
    OnMessage,
};
pub use error::{ConnectionError, ReconnectError};
pub use facade::{VenueStream, VenueStreamConfig, VenueStreamHandle};
pub use health::{ActivityTracker, HealthConfig, HealthEvent, HealthMonitor};
pub use protocol::{Control, Inbound, RequestIds, Routed, VenueProtocol};
pub use reconnect::{
    AttemptHook, FailHook, ReconnectConfig, ReconnectHooks, ReconnectManager, ReconnectStrategy,
};
pub use router::{Callback, Handler, RouterError, SubscriptionRouter};
pub use service::{MessageService, Outcome, SLOW_PROCESSING_THRESHOLD};
pub use state::{ConnectionEvent, ConnectionState};
pub use transport::{DialRequest, Dialer, FrameSink, FrameStream, TungsteniteDialer};
pub use validator::{DEFAULT_MAX_MESSAGE_SIZE, MessageValidator, ValidationError, ValidatorConfig};
