//! Veil Common Library
//!
//! Shared types, wire protocol, and envelope crypto for the Veil chat broker.
//! The broker relays envelopes without ever decrypting them; the [`envelope`]
//! module is the client-side contract, kept here so server integration tests
//! can verify interoperability byte-for-byte.

pub mod envelope;
pub mod names;
pub mod protocol;
pub mod time;
pub mod validators;

/// Default port for broker WebSocket connections
pub const DEFAULT_PORT: u16 = 3001;
