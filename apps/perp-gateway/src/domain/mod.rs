//! Domain Layer - Canonical market types and subscription identity.
//!
//! Pure Rust types with serialization support and no I/O.

/// Canonical market, account, and order types.
pub mod market;

/// Subscription identity and routing keys.
pub mod subscription;
