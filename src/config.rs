// Application configuration.
// Logging is verbose in debug builds and quieter in release; RUST_LOG overrides both.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Args;

use crate::peer::types::ServerConfig;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Session lifetime, counted from creation
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Relay poll period for descriptions and candidates
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Responder backoff while the offer is not published yet
pub const OFFER_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Delay before re-sending messages whose send failed right after open
pub const FLUSH_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Upper bound for one HTTP round trip to the relay
pub const RELAY_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_CHANNEL_LABEL: &str = "datematch";

/// Relay server settings
#[derive(Args, Debug, Clone)]
pub struct RelayConfig {
    /// Address the HTTP relay listens on
    #[arg(long, env = "SIGNAL_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// Redis holding the session records
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Seconds a session stays reachable after creation
    #[arg(
        long,
        env = "SIGNAL_SESSION_TTL_SECS",
        default_value_t = DEFAULT_SESSION_TTL.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub session_ttl_secs: u64,

    /// Prefix for every Redis key written by the relay
    #[arg(long, env = "SIGNAL_KEY_PREFIX", default_value = "signal")]
    pub key_prefix: String,

    /// Upper bound for a single Redis round trip
    #[arg(long, env = "SIGNAL_STORE_TIMEOUT_MS", default_value_t = 500)]
    pub store_timeout_ms: u64,

    /// CORS preflight cache lifetime
    #[arg(long, env = "SIGNAL_CORS_MAX_AGE_SECS", default_value_t = 3600)]
    pub cors_max_age_secs: u64,
}

impl RelayConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn cors_max_age(&self) -> Duration {
        Duration::from_secs(self.cors_max_age_secs)
    }
}

/// Per-attempt handshake client settings
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub poll_interval: Duration,
    pub offer_retry_interval: Duration,
    pub flush_retry_delay: Duration,
    pub request_timeout: Duration,
    pub channel_label: String,
    pub ice_servers: Vec<ServerConfig>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            offer_retry_interval: OFFER_RETRY_INTERVAL,
            flush_retry_delay: FLUSH_RETRY_DELAY,
            request_timeout: RELAY_REQUEST_TIMEOUT,
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            ice_servers: ServerConfig::defaults(),
        }
    }
}
