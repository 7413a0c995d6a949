//! Configuration types for the relay channel

use crate::backoff::ReconnectPolicy;
use crate::queue::QueuePolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Environment variable holding the relay base URL
pub const RELAY_URL_ENV: &str = "PAIRLINK_RELAY_URL";

/// Relay base URL used when nothing is configured
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:8080";

/// Main configuration for RelayChannel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay base URL (ws:// or wss://)
    pub relay_url: String,

    /// Endpoint path appended to the base URL (default: /ws)
    pub path: String,

    /// Reconnect delay policy
    pub reconnect: ReconnectPolicy,

    /// Heartbeat interval in milliseconds (default: 25000ms)
    pub heartbeat_interval_ms: u64,

    /// Connection attempt timeout in milliseconds (default: 10000ms)
    pub connect_timeout_ms: u64,

    /// Outbound queue sizing and expiry
    pub queue: QueuePolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            path: "/ws".to_string(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval_ms: 25000,
            connect_timeout_ms: 10000,
            queue: QueuePolicy::default(),
        }
    }
}

impl RelayConfig {
    /// Default configuration with the relay URL taken from `PAIRLINK_RELAY_URL`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(RELAY_URL_ENV) {
            if !url.trim().is_empty() {
                config.relay_url = url.trim().to_string();
            }
        }
        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay_url must start with ws:// or wss://, got {}",
                self.relay_url
            )));
        }

        Url::parse(&self.relay_url)
            .map_err(|e| Error::InvalidConfig(format!("relay_url is not a valid URL: {}", e)))?;

        if self.heartbeat_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        self.reconnect.validate()?;
        self.queue.validate()?;

        Ok(())
    }

    /// Endpoint for `identity`: `<relay_url><path>?userId=<identity>`
    pub fn endpoint_for(&self, identity: &str) -> Result<Url> {
        let base = self.relay_url.trim_end_matches('/');
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        let mut url = Url::parse(&format!("{}{}", base, path))
            .map_err(|e| Error::InvalidConfig(format!("Invalid relay endpoint: {}", e)))?;
        url.query_pairs_mut().append_pair("userId", identity);
        Ok(url)
    }

    /// Heartbeat interval as a duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Set the relay base URL
    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }

    /// Set the reconnect policy
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the outbound queue policy
    pub fn with_queue(mut self, queue: QueuePolicy) -> Self {
        self.queue = queue;
        self
    }
}
