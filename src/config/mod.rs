/// Configuration management for the stageline engine
///
/// Handles server binding, database location, broker lease timing and
/// subscriber health policy. A single `Config` is built at startup and handed
/// to every component; nothing reads the environment after that.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Lease queue timing
    pub broker: BrokerConfig,
    /// Subscriber lifecycle policy
    pub subscriber: SubscriberConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// SQLite storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding `stageline.db` (default: "data")
    pub data_dir: String,
    /// Upper bound on pooled SQLite connections
    pub max_connections: u32,
}

/// Lease queue timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// How long a leased message stays invisible before it is reclaimed
    pub lease_duration: Duration,
    /// Period of the expired-lease sweep
    pub reclaim_interval: Duration,
    /// Fallback wake-up for blocked dequeues when no notification arrives
    pub poll_interval: Duration,
}

/// Subscriber health and delivery policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// Period of the per-subscriber health probe
    pub health_check_interval: Duration,
    /// Consecutive failed probes before a subscriber is dropped
    pub failure_threshold: u32,
    /// Timeout applied to health probes and delivery POSTs
    pub http_timeout: Duration,
    /// TTL applied when a subscribe request carries none (`None` = never expires)
    pub default_ttl: Option<Duration>,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_string("STAGELINE_HOST", "0.0.0.0"),
                port: env_parse("STAGELINE_PORT", 8888),
            },
            database: DatabaseConfig {
                data_dir: env_string("STAGELINE_DATA_DIR", "data"),
                max_connections: env_parse("STAGELINE_DB_MAX_CONNECTIONS", 8),
            },
            broker: BrokerConfig {
                lease_duration: env_secs("STAGELINE_LEASE_SECS", 30),
                reclaim_interval: env_secs("STAGELINE_RECLAIM_INTERVAL_SECS", 5),
                poll_interval: Duration::from_millis(env_parse("STAGELINE_POLL_INTERVAL_MS", 500)),
            },
            subscriber: SubscriberConfig {
                health_check_interval: env_secs("STAGELINE_HEALTH_CHECK_INTERVAL_SECS", 10),
                failure_threshold: env_parse("STAGELINE_HEALTH_FAILURE_THRESHOLD", 3),
                http_timeout: env_secs("STAGELINE_HTTP_TIMEOUT_SECS", 10),
                default_ttl: match env_parse::<u64>("STAGELINE_DEFAULT_TTL_SECS", 1800) {
                    0 => None,
                    secs => Some(Duration::from_secs(secs)),
                },
            },
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse(key, default))
}
