//! Application Layer - Ports and services.
//!
//! Ports define how the gateway core talks to venues, credential holders,
//! and time. Services hold venue-independent logic built on top of them.

/// Port interfaces for connectors, auth, and time.
pub mod ports;

/// Venue-independent services.
pub mod services;
