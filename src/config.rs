use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

/// Runtime tunables for the transaction core. Every value has a default; the
/// environment only needs to name what it wants to change.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Delay between status polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Polling attempts before a transaction is reported timed out.
    pub max_poll_attempts: u32,
    /// Per-request timeout for terminal HTTP calls, in seconds.
    pub http_timeout_secs: u64,
    /// Age after which persisted snapshots are pruned, in hours.
    pub state_retention_hours: i64,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            poll_interval_ms: env::var("TERMINAL_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            max_poll_attempts: env::var("TERMINAL_MAX_POLL_ATTEMPTS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            http_timeout_secs: env::var("TERMINAL_HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            state_retention_hours: env::var("TERMINAL_STATE_RETENTION_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()?,
            event_capacity: env::var("TERMINAL_EVENT_CAPACITY")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_poll_attempts: 60,
            http_timeout_secs: 30,
            state_retention_hours: 24,
            event_capacity: 100,
        }
    }
}
