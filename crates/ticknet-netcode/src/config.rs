//! Netcode configuration - tick rate, reliability, and prediction tuning
//!
//! Every tunable the netcode uses lives here so it can be adjusted per game
//! mode instead of being baked in. Configurations are plain serde structs and
//! load from RON text:
//!
//! ```ron
//! (
//!     tick_interval_ms: 16,
//!     reliable: (base_retry_delay_ms: 100, max_retries: 5),
//!     vault_capacity: 120,
//!     reconciliation_threshold: 30.0,
//! )
//! ```
//!
//! Omitted fields take their defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use ticknet_core::{Millis, TickClock};

/// Retry and de-duplication settings for reliable messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliableConfig {
    /// Delay before the first retransmission; doubles after every attempt
    pub base_retry_delay_ms: Millis,
    /// Total transmissions of one message, the first send included
    pub max_retries: u32,
    /// How long a receiver remembers delivered message ids
    pub seen_id_window_ms: Millis,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            base_retry_delay_ms: 100,
            max_retries: 5,
            seen_id_window_ms: 30_000,
        }
    }
}

impl ReliableConfig {
    /// Delay to wait after the given transmission before retrying
    ///
    /// `attempt` is 1 for the first send.
    pub fn retry_delay(&self, attempt: u32) -> Millis {
        let doublings = attempt.saturating_sub(1).min(16);
        self.base_retry_delay_ms.saturating_mul(1 << doublings)
    }

    /// Time from first send until a never-acknowledged message is dropped
    pub fn give_up_after_ms(&self) -> Millis {
        (1..=self.max_retries).fold(0, |total: Millis, attempt| {
            total.saturating_add(self.retry_delay(attempt))
        })
    }
}

/// Configuration for client and server netcode
///
/// # Example
///
/// ```
/// use ticknet_netcode::NetcodeConfig;
///
/// let config = NetcodeConfig::from_ron_str("(tick_interval_ms: 50)").unwrap();
/// assert_eq!(config.tick_interval_ms, 50);
/// assert_eq!(config.vault_capacity, 120);
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetcodeConfig {
    /// Duration of one simulation tick
    pub tick_interval_ms: Millis,
    /// Reliable message settings
    pub reliable: ReliableConfig,
    /// Inputs retained per player on the server
    pub input_buffer_size: usize,
    /// Predicted snapshots retained by the client
    pub vault_capacity: usize,
    /// Divergence (world units) at which the client snaps to server state
    pub reconciliation_threshold: f32,
    /// Time remote entities take to glide to a new authoritative position
    pub interpolation_duration_ms: Millis,
    /// Worst round trip the vault must still be able to cover
    pub max_expected_rtt_ms: Millis,
}

impl Default for NetcodeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            reliable: ReliableConfig::default(),
            input_buffer_size: 64,
            vault_capacity: 120,
            reconciliation_threshold: 30.0,
            interpolation_duration_ms: 100,
            max_expected_rtt_ms: 1000,
        }
    }
}

impl NetcodeConfig {
    /// Parse a configuration from RON text
    pub fn from_ron_str(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Serialize the configuration to pretty RON text
    pub fn to_ron_string(&self) -> Result<String> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Build a tick clock running at the configured rate
    pub fn tick_clock(&self) -> Result<TickClock> {
        Ok(TickClock::new(self.tick_interval_ms)?)
    }

    /// Check the configuration for values the netcode cannot run with
    ///
    /// Besides rejecting zeros, this verifies the vault still covers
    /// `max_expected_rtt_ms` at the configured tick rate, and that receivers
    /// remember delivered ids for longer than a sender keeps retrying.
    pub fn validate(&self) -> Result<()> {
        let clock = self.tick_clock()?;

        if self.reliable.max_retries == 0 {
            return Err(Error::InvalidConfig(
                "reliable.max_retries must be at least 1".to_string(),
            ));
        }
        if self.reliable.base_retry_delay_ms == 0 {
            return Err(Error::InvalidConfig(
                "reliable.base_retry_delay_ms must be greater than 0".to_string(),
            ));
        }
        let give_up = self.reliable.give_up_after_ms();
        if self.reliable.seen_id_window_ms <= give_up {
            return Err(Error::InvalidConfig(format!(
                "reliable.seen_id_window_ms {} must exceed the {} ms a sender keeps retrying",
                self.reliable.seen_id_window_ms, give_up
            )));
        }
        if self.input_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "input_buffer_size must be greater than 0".to_string(),
            ));
        }
        if !(self.reconciliation_threshold.is_finite() && self.reconciliation_threshold > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "reconciliation_threshold must be a positive number, got {}",
                self.reconciliation_threshold
            )));
        }

        let required = clock.recommended_vault_capacity(self.max_expected_rtt_ms);
        if self.vault_capacity < required {
            return Err(Error::InvalidConfig(format!(
                "vault_capacity {} covers {} ms at {} ms/tick, need {} entries for {} ms round trips",
                self.vault_capacity,
                clock.ticks_to_ms(self.vault_capacity as u64),
                self.tick_interval_ms,
                required,
                self.max_expected_rtt_ms
            )));
        }

        Ok(())
    }
}
