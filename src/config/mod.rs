//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod escrow;
mod rewards;
mod storage;

pub use escrow::{EscrowConfig, SchedulerConfig, MAX_AUTO_RELEASE_DAYS};
pub use rewards::{LevelPercentageTable, RewardsConfig, ShareRates, UnlockConfig};
pub use storage::{SqliteConfig, StorageConfig, StorageType};

use serde::Deserialize;

use crate::utils::retry::RetryConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "REWARDS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "REWARDS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "REWARDS_LOG";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Distribution rates and rounding.
    pub rewards: RewardsConfig,
    /// Level unlock tiering.
    pub unlock: UnlockConfig,
    /// Escrow timing and paging.
    pub escrow: EscrowConfig,
    /// Release scheduler loop.
    pub scheduler: SchedulerConfig,
    /// Storage backend.
    pub storage: StorageConfig,
    /// Backoff for optimistic-concurrency conflicts.
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject rate and tier combinations the engine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rewards.validate()?;
        self.unlock.validate()?;
        self.escrow.validate()?;
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig {
                storage_type: StorageType::Memory,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(
            config.rewards.default_reward_budget_percent,
            Decimal::from(10)
        );
        assert_eq!(config.escrow.auto_release_days, 7);
        assert_eq!(config.unlock.levels_per_tier, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_for_test() {
        let config = Config::for_test();
        assert_eq!(config.storage.storage_type, StorageType::Memory);
    }

    #[test]
    fn test_from_yaml_overrides() {
        let config = Config::from_yaml(
            r#"
rewards:
  default_reward_budget_percent: 12.5
  shares:
    personal: 35
    referral: 15
unlock:
  referrals_per_tier: 3
escrow:
  auto_release_days: 14
storage:
  type: memory
"#,
        )
        .unwrap();

        assert_eq!(
            config.rewards.default_reward_budget_percent,
            Decimal::new(125, 1)
        );
        assert_eq!(config.rewards.shares.personal, Decimal::from(35));
        assert_eq!(config.rewards.shares.community, Decimal::from(40));
        assert_eq!(config.unlock.referrals_per_tier, 3);
        assert_eq!(config.unlock.levels_per_tier, 5);
        assert_eq!(config.escrow.auto_release_days, 14);
        assert_eq!(config.storage.storage_type, StorageType::Memory);
    }

    #[test]
    fn test_from_yaml_rejects_invalid_shares() {
        let err = Config::from_yaml(
            r#"
rewards:
  shares:
    personal: 90
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_yaml_rejects_unbounded_release_delay() {
        let err = Config::from_yaml(
            r#"
escrow:
  auto_release_days: 4294967295
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = Config::from_yaml("escrow:\n  auto_release_days: 3650\n").unwrap();
        assert_eq!(config.escrow.auto_release_days, MAX_AUTO_RELEASE_DAYS);
    }
}
