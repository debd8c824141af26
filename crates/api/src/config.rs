//! Application configuration loaded from environment variables.

use std::time::Duration;

use common::RetryPolicy;
use order::BridgeConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `FIND_ITEM_TIMEOUT_SECS` — bridge timeout for item lookups (default: `30`)
/// - `CHECKOUT_TIMEOUT_SECS` — bridge timeout for checkouts (default: `500`)
/// - `STORE_RETRY_ATTEMPTS` — transient-failure retry budget (default: `5`)
/// - `STORE_RETRY_BACKOFF_MS` — fixed retry backoff (default: `500`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub find_item_timeout: Duration,
    pub checkout_timeout: Duration,
    pub store_retry_attempts: u32,
    pub store_retry_backoff: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            find_item_timeout: std::env::var("FIND_ITEM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.find_item_timeout),
            checkout_timeout: std::env::var("CHECKOUT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.checkout_timeout),
            store_retry_attempts: std::env::var("STORE_RETRY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.store_retry_attempts),
            store_retry_backoff: std::env::var("STORE_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_retry_backoff),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The retry policy shared by the services.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.store_retry_attempts, self.store_retry_backoff)
    }

    /// The bridge's tunables.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            find_item_timeout: self.find_item_timeout,
            checkout_timeout: self.checkout_timeout,
            retry: self.retry_policy(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            find_item_timeout: Duration::from_secs(30),
            checkout_timeout: Duration::from_secs(500),
            store_retry_attempts: 5,
            store_retry_backoff: Duration::from_millis(500),
        }
    }
}
