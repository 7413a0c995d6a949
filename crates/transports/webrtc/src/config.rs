//! Configuration types for call negotiation

use crate::media::MediaConstraints;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// STUN servers used when none are configured
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Main configuration for CallEngine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Caller waits this long before the first offer (default: 1500ms)
    pub offer_grace_ms: u64,

    /// Window between offer attempts (default: 3000ms)
    pub offer_retry_interval_ms: u64,

    /// Maximum offers per call (default: 3)
    pub max_offer_attempts: u32,

    /// Local capture preferences
    pub media: MediaConstraints,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_servers: Vec::new(),
            offer_grace_ms: 1500,
            offer_retry_interval_ms: 3000,
            max_offer_attempts: 3,
            media: MediaConstraints::default(),
        }
    }
}

impl CallConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.stun_servers.is_empty() && self.turn_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN or TURN server is required".to_string(),
            ));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        if self.max_offer_attempts == 0 {
            return Err(Error::InvalidConfig(
                "max_offer_attempts must be at least 1".to_string(),
            ));
        }

        if self.offer_retry_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "offer_retry_interval_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Grace period before the first offer
    pub fn offer_grace(&self) -> Duration {
        Duration::from_millis(self.offer_grace_ms)
    }

    /// Window between offer attempts
    pub fn offer_retry_interval(&self) -> Duration {
        Duration::from_millis(self.offer_retry_interval_ms)
    }

    /// Replace the STUN servers
    pub fn with_stun_servers(mut self, servers: Vec<String>) -> Self {
        self.stun_servers = servers;
        self
    }

    /// Add a TURN server
    pub fn with_turn_server(mut self, turn: TurnServerConfig) -> Self {
        self.turn_servers.push(turn);
        self
    }
}

/// Configuration for RoomCoordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Seconds to wait for an unreachable partner before ending (default: 30)
    pub partner_timeout_secs: u32,

    /// Start the call automatically once the relay is connected (default: true)
    pub auto_start: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            partner_timeout_secs: 30,
            auto_start: true,
        }
    }
}

impl RoomConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.partner_timeout_secs == 0 {
            return Err(crate::Error::InvalidConfig(
                "partner_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
