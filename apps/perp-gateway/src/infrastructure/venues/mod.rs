//! Venue Adapters
//!
//! One module per venue, each pairing a [`VenueProtocol`] for the socket
//! with a [`Connector`] for REST. Shared parsing helpers live in
//! [`parse`], symbol mapping in [`symbols`].
//!
//! [`VenueProtocol`]: crate::infrastructure::websocket::VenueProtocol
//! [`Connector`]: crate::application::ports::Connector

pub mod bybit;
pub mod hyperliquid;
pub mod paradex;
pub mod parse;
pub mod registry;
pub mod symbols;

pub use parse::ParseError;
pub use registry::{
    ConnectorRegistry, RegistryDeps, Signers, UnknownVenue, Venue, VenueHandle, build_registry,
};
