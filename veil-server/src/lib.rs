//! Veil Broker Server Library
//!
//! This library exposes the broker's internal modules for integration testing.

pub mod args;
pub mod broker;
pub mod config;
pub mod connection;
pub mod connection_tracker;
pub mod message_store;
pub mod presence;
pub mod rate_limiter;
