//! Command-line argument parsing

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;

use veil_common::DEFAULT_PORT;

use crate::config::{
    BrokerConfig, DEFAULT_MAX_BUCKET_SIZE, DEFAULT_MAX_BUCKETS, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MAX_CONNECTIONS_PER_ORIGIN, DEFAULT_RATE_LIMIT_MAX_MESSAGES,
    DEFAULT_RATE_LIMIT_WINDOW_SECS,
};

/// Veil Broker Server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// IP address to bind to (IPv4 or IPv6)
    #[arg(short, long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum concurrent connections, 0 for unlimited
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Maximum concurrent connections per client address, 0 for unlimited
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS_PER_ORIGIN)]
    pub max_connections_per_origin: usize,

    /// Rate-limit window length in seconds
    #[arg(long, default_value_t = DEFAULT_RATE_LIMIT_WINDOW_SECS)]
    pub rate_limit_window: u64,

    /// Messages allowed per connection per window, 0 for unlimited
    #[arg(long, default_value_t = DEFAULT_RATE_LIMIT_MAX_MESSAGES)]
    pub rate_limit_max: u32,

    /// Messages retained per history partition, 0 for unlimited
    #[arg(long, default_value_t = DEFAULT_MAX_BUCKET_SIZE)]
    pub max_bucket_size: usize,

    /// Concurrent encrypted history partitions, 0 for unlimited
    #[arg(long, default_value_t = DEFAULT_MAX_BUCKETS)]
    pub max_buckets: usize,

    /// Enable debug logging (shows connect/disconnect and dropped messages)
    #[arg(long, default_value = "false")]
    pub debug: bool,
}

impl Args {
    /// Build the broker configuration from the parsed arguments
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            max_connections: self.max_connections,
            max_connections_per_origin: self.max_connections_per_origin,
            rate_limit_window: Duration::from_secs(self.rate_limit_window),
            rate_limit_max_messages: self.rate_limit_max,
            max_bucket_size: self.max_bucket_size,
            max_buckets: self.max_buckets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_config_defaults() {
        let args = Args::parse_from(["veild"]);
        let config = args.broker_config();
        let defaults = BrokerConfig::default();

        assert_eq!(config.max_connections, defaults.max_connections);
        assert_eq!(
            config.max_connections_per_origin,
            defaults.max_connections_per_origin
        );
        assert_eq!(config.rate_limit_window, defaults.rate_limit_window);
        assert_eq!(
            config.rate_limit_max_messages,
            defaults.rate_limit_max_messages
        );
        assert_eq!(config.max_bucket_size, defaults.max_bucket_size);
        assert_eq!(config.max_buckets, defaults.max_buckets);
        assert_eq!(args.port, DEFAULT_PORT);
        assert!(!args.debug);
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "veild",
            "--port",
            "9000",
            "--max-connections",
            "5",
            "--rate-limit-window",
            "2",
            "--rate-limit-max",
            "3",
            "--debug",
        ]);

        assert_eq!(args.port, 9000);
        assert!(args.debug);

        let config = args.broker_config();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.rate_limit_window, Duration::from_secs(2));
        assert_eq!(config.rate_limit_max_messages, 3);
    }
}
