//! Broker tunables
//!
//! All limits share one convention: 0 disables the limit.

use std::time::Duration;

pub const DEFAULT_MAX_CONNECTIONS: usize = 100;
pub const DEFAULT_MAX_CONNECTIONS_PER_ORIGIN: usize = 10;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 10;
pub const DEFAULT_RATE_LIMIT_MAX_MESSAGES: u32 = 20;
pub const DEFAULT_MAX_BUCKET_SIZE: usize = 100;
pub const DEFAULT_MAX_BUCKETS: usize = 50;

/// Runtime limits for admission, rate limiting, and history retention
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Maximum live connections across all origins (0 = unlimited)
    pub max_connections: usize,
    /// Maximum live connections per origin address (0 = unlimited)
    pub max_connections_per_origin: usize,
    /// Length of one rate-limit window
    pub rate_limit_window: Duration,
    /// Messages allowed per connection per window (0 = unlimited)
    pub rate_limit_max_messages: u32,
    /// Messages retained per history partition (0 = unlimited)
    pub max_bucket_size: usize,
    /// Concurrent non-public history partitions (0 = unlimited)
    pub max_buckets: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_connections_per_origin: DEFAULT_MAX_CONNECTIONS_PER_ORIGIN,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            rate_limit_max_messages: DEFAULT_RATE_LIMIT_MAX_MESSAGES,
            max_bucket_size: DEFAULT_MAX_BUCKET_SIZE,
            max_buckets: DEFAULT_MAX_BUCKETS,
        }
    }
}
