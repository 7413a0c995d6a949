//! Reconnect delay policy for the relay channel
//!
//! The delay starts at `initial_delay_ms`, grows by `multiplier` after every
//! scheduled reconnect and is capped at `max_delay_ms`. A successful open
//! resets it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// First delay after a close (default: 1000ms)
    pub initial_delay_ms: u64,
    /// Upper bound for the delay (default: 30000ms)
    pub max_delay_ms: u64,
    /// Growth factor applied after each reconnect (default: 1.5)
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            multiplier: 1.5,
        }
    }
}

impl ReconnectPolicy {
    /// Validate the policy
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.initial_delay_ms == 0 {
            return Err(Error::InvalidConfig(
                "initial_delay_ms must be greater than 0".to_string(),
            ));
        }

        if self.max_delay_ms < self.initial_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "max_delay_ms ({}) must not be below initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }

        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "multiplier must be a finite value >= 1.0, got {}",
                self.multiplier
            )));
        }

        Ok(())
    }

    /// Delay following `current`, never exceeding the cap
    pub fn next_delay_ms(&self, current: u64) -> u64 {
        let grown = (current as f64 * self.multiplier) as u64;
        grown.max(current).min(self.max_delay_ms)
    }
}

/// Mutable backoff state owned by a channel
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    current_ms: u64,
}

impl Backoff {
    /// Create a backoff starting at the policy's initial delay
    pub fn new(policy: ReconnectPolicy) -> Self {
        let current_ms = policy.initial_delay_ms;
        Self { policy, current_ms }
    }

    /// Delay that the next reconnect will wait
    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }

    /// Take the delay for the reconnect being scheduled now and grow the next one
    pub fn advance(&mut self) -> Duration {
        let delay = self.current_ms;
        self.current_ms = self.policy.next_delay_ms(delay);
        Duration::from_millis(delay)
    }

    /// Back to the initial delay
    pub fn reset(&mut self) {
        self.current_ms = self.policy.initial_delay_ms;
    }

    /// The policy driving this backoff
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}
