//! Paradex adapter.

mod client;
pub mod parse;
mod protocol;

pub use client::ParadexConnector;
pub use protocol::ParadexProtocol;
