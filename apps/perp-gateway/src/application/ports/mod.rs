//! Port Interfaces
//!
//! Contracts between the gateway core and the outside world.
//!
//! ## Driver Ports (Inbound)
//!
//! - [`Connector`]: REST-shaped venue operations
//! - [`WebSocketConnector`]: live feed and canonical update streams
//!
//! ## Driven Ports (Outbound)
//!
//! - [`AuthProvider`]: bearer token issuer
//! - [`ActionSigner`]: order and cancel signing
//! - [`Clock`]: wall-clock time

mod auth_port;
mod clock;
mod connector_port;

pub use auth_port::{ActionSigner, AuthError, AuthProvider, AuthToken, StaticTokenProvider};
#[cfg(test)]
pub use auth_port::MockAuthProvider;
pub use clock::{Clock, ManualClock, SystemClock};
pub use connector_port::{Connector, ConnectorResult, WebSocketConnector};
