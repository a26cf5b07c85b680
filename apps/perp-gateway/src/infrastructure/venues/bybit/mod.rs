//! Bybit V5 adapter (USDT linear perpetuals).

mod client;
pub mod parse;
mod protocol;
mod signer;
mod streams;

pub use client::BybitConnector;
pub use protocol::{BOOK_DEPTH, BybitProtocol, PING};
pub use signer::{BybitCredentials, BybitSigner, RECV_WINDOW_MS, WS_AUTH_TTL_MS};
pub use streams::BybitStreams;
