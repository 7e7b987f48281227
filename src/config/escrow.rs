//! Escrow and release-scheduler configuration.

use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;

/// Longest accepted delay between shipping and automatic release.
pub const MAX_AUTO_RELEASE_DAYS: u32 = 3650;

/// Escrow manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    /// Days between shipping and automatic release. Default: 7.
    pub auto_release_days: u32,
    /// Rows fetched per page by `ready_for_release`. Default: 100.
    pub page_size: usize,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            auto_release_days: 7,
            page_size: 100,
        }
    }
}

impl EscrowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid(
                "escrow.page_size must be positive".to_string(),
            ));
        }
        if self.auto_release_days > MAX_AUTO_RELEASE_DAYS {
            return Err(ConfigError::Invalid(format!(
                "escrow.auto_release_days must be at most {MAX_AUTO_RELEASE_DAYS}, got {}",
                self.auto_release_days
            )));
        }
        Ok(())
    }
}

/// Release scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between scans for due escrows. Default: 60.
    pub interval_secs: u64,
    /// Upper bound on releases per scan. `None` drains everything due.
    pub max_per_run: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_per_run: None,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}
