//! Supervisor tuning, loadable from a JSON file.
//!
//! Every field has a default, so a partial file (or `{}`) is valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Timing of individual transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Pause after every successful transfer (device-side debounce).
    pub post_transfer_delay_ms: u64,
    /// Backoff unit between retries; attempt `n` waits `n` units.
    pub retry_backoff_ms: u64,
    /// Timeout for interrupt and control transfers.
    pub transfer_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            post_transfer_delay_ms: 50,
            retry_backoff_ms: 100,
            transfer_timeout_ms: 1000,
        }
    }
}

impl DispatchConfig {
    pub fn post_transfer_delay(&self) -> Duration {
        Duration::from_millis(self.post_transfer_delay_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

/// Connection supervision policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub health_check_interval_ms: u64,
    /// Consecutive failed commands that trigger a reconnect.
    pub max_consecutive_errors: u32,
    pub auto_reconnect: bool,
    /// Attempts per command before it is reported as failed.
    pub command_retries: u32,
    /// Wait after a forced USB reset.
    pub reset_settle_ms: u64,
    pub dispatch: DispatchConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 2000,
            health_check_interval_ms: 30_000,
            max_consecutive_errors: 3,
            auto_reconnect: true,
            command_retries: 3,
            reset_settle_ms: 500,
            dispatch: DispatchConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }
}
