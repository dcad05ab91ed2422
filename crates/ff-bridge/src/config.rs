//! Relay and monitor settings.
//!
//! Every field has a default, so a settings file only needs to name what it
//! overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Timeouts and retry policy of the message relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Deadline for a business message attempt.
    pub request_timeout_ms: u64,
    /// Deadline for a health probe.
    pub probe_timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff unit after a timed out attempt, scaled by attempt number.
    pub retry_base_delay_ms: u64,
    /// Fixed backoff after a transient remote error.
    pub transient_retry_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            probe_timeout_ms: 2_000,
            max_retries: 2,
            retry_base_delay_ms: 1_000,
            transient_retry_delay_ms: 2_000,
        }
    }
}

impl RelayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Delay before re-issuing after `attempt` (0-based) failed with `error`.
    pub fn retry_delay(&self, attempt: u32, error: &RelayError) -> Duration {
        match error {
            RelayError::Timeout { .. } => {
                Duration::from_millis(self.retry_base_delay_ms.saturating_mul(u64::from(attempt) + 1))
            }
            _ => Duration::from_millis(self.transient_retry_delay_ms),
        }
    }
}

/// Cadence of the reconnection probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub probe_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 15_000,
        }
    }
}

impl MonitorConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}
