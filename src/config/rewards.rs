//! Reward distribution configuration.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;

use super::ConfigError;
use crate::error::EngineError;
use crate::model::{Points, MAX_COMMUNITY_LEVEL};

/// Share rates applied independently to the distribution pool.
///
/// Each rate is a percentage of the pool. They may sum to less than 100, in
/// which case the residual is simply not distributed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShareRates {
    /// Buyer's personal points.
    pub personal: Decimal,
    /// Direct sponsor's referral points.
    pub referral: Decimal,
    /// Amount handed to the 30-level community walk.
    pub community: Decimal,
    /// Company reserve.
    pub reserve: Decimal,
}

impl Default for ShareRates {
    fn default() -> Self {
        Self {
            personal: Decimal::from(30),
            referral: Decimal::from(20),
            community: Decimal::from(40),
            reserve: Decimal::from(10),
        }
    }
}

impl ShareRates {
    pub fn total(&self) -> Decimal {
        self.personal + self.referral + self.community + self.reserve
    }
}

/// Per-level percentages of the community amount, index 0 = level 1.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct LevelPercentageTable(Vec<Decimal>);

impl Default for LevelPercentageTable {
    /// Levels 1-5 at 5%, 6-10 at 4%, 11-15 at 4%, 16-20 at 3%, 21-25 at 3%,
    /// 26-30 at 1%. Sums to 100.
    fn default() -> Self {
        let tiers = [5, 4, 4, 3, 3, 1];
        Self(
            tiers
                .iter()
                .flat_map(|pct| std::iter::repeat(Decimal::from(*pct)).take(5))
                .collect(),
        )
    }
}

impl LevelPercentageTable {
    pub fn new(percentages: Vec<Decimal>) -> Result<Self, ConfigError> {
        let table = Self(percentages);
        table.validate()?;
        Ok(table)
    }

    /// Percentage for a 1-based level; `None` outside 1..=30.
    pub fn percent(&self, level: u8) -> Option<Decimal> {
        if level == 0 {
            return None;
        }
        self.0.get(usize::from(level) - 1).copied()
    }

    pub fn total(&self) -> Decimal {
        self.0.iter().copied().sum()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.0.len() != usize::from(MAX_COMMUNITY_LEVEL) {
            return Err(ConfigError::Invalid(format!(
                "level_percentages must have {} entries, got {}",
                MAX_COMMUNITY_LEVEL,
                self.0.len()
            )));
        }
        if let Some(negative) = self.0.iter().find(|pct| pct.is_sign_negative()) {
            return Err(ConfigError::Invalid(format!(
                "level percentage must not be negative: {}",
                negative
            )));
        }
        if self.total() > Decimal::ONE_HUNDRED {
            return Err(ConfigError::Invalid(format!(
                "level_percentages sum to {}, above 100",
                self.total()
            )));
        }
        Ok(())
    }
}

/// Distribution engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    /// Reward budget for merchants without an override. Default: 10.
    pub default_reward_budget_percent: Decimal,
    /// Points per currency unit of reward budget. Default: 1.
    pub points_per_currency_unit: Decimal,
    pub shares: ShareRates,
    pub level_percentages: LevelPercentageTable,
    /// Decimal places kept on computed amounts; extra precision is truncated
    /// so distributed shares never exceed the pool. Default: 2.
    pub points_scale: u32,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            default_reward_budget_percent: Decimal::from(10),
            points_per_currency_unit: Decimal::ONE,
            shares: ShareRates::default(),
            level_percentages: LevelPercentageTable::default(),
            points_scale: 2,
        }
    }
}

impl RewardsConfig {
    /// `amount × percent / 100`, truncated to `points_scale`.
    ///
    /// Fails with [`EngineError::InvalidInput`] when the product overflows.
    pub fn percent_of(&self, amount: Points, percent: Decimal) -> crate::error::Result<Points> {
        amount
            .checked_mul(percent)
            .and_then(|product| product.checked_div(Decimal::ONE_HUNDRED))
            .map(|share| self.round(share))
            .ok_or_else(|| {
                EngineError::InvalidInput(format!("{percent}% of {amount} is out of range"))
            })
    }

    /// Convert a currency amount to points, truncated to `points_scale`.
    pub fn to_points(&self, amount: Decimal) -> crate::error::Result<Points> {
        amount
            .checked_mul(self.points_per_currency_unit)
            .map(|points| self.round(points))
            .ok_or_else(|| {
                EngineError::InvalidInput(format!("{amount} in points is out of range"))
            })
    }

    pub fn round(&self, amount: Points) -> Points {
        amount.round_dp_with_strategy(self.points_scale, RoundingStrategy::ToZero)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_percent("default_reward_budget_percent", self.default_reward_budget_percent)?;
        if self.points_per_currency_unit.is_sign_negative() {
            return Err(ConfigError::Invalid(format!(
                "points_per_currency_unit must not be negative: {}",
                self.points_per_currency_unit
            )));
        }
        for (name, rate) in [
            ("shares.personal", self.shares.personal),
            ("shares.referral", self.shares.referral),
            ("shares.community", self.shares.community),
            ("shares.reserve", self.shares.reserve),
        ] {
            check_percent(name, rate)?;
        }
        if self.shares.total() > Decimal::ONE_HUNDRED {
            return Err(ConfigError::Invalid(format!(
                "share rates sum to {}, above 100",
                self.shares.total()
            )));
        }
        self.level_percentages.validate()
    }
}

/// Unlock tiering.
///
/// `unlocked_level = min(floor(referrals / referrals_per_tier) × levels_per_tier, 30)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UnlockConfig {
    pub referrals_per_tier: u32,
    pub levels_per_tier: u8,
}

impl Default for UnlockConfig {
    fn default() -> Self {
        Self {
            referrals_per_tier: 1,
            levels_per_tier: 5,
        }
    }
}

impl UnlockConfig {
    pub fn unlocked_level_for(&self, referrals: u32) -> u8 {
        let tiers = referrals / self.referrals_per_tier.max(1);
        let level = u64::from(tiers) * u64::from(self.levels_per_tier);
        level.min(u64::from(MAX_COMMUNITY_LEVEL)) as u8
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.referrals_per_tier == 0 {
            return Err(ConfigError::Invalid(
                "unlock.referrals_per_tier must be positive".to_string(),
            ));
        }
        if self.levels_per_tier == 0 || self.levels_per_tier > MAX_COMMUNITY_LEVEL {
            return Err(ConfigError::Invalid(format!(
                "unlock.levels_per_tier must be within 1..={}",
                MAX_COMMUNITY_LEVEL
            )));
        }
        Ok(())
    }
}

fn check_percent(name: &str, value: Decimal) -> Result<(), ConfigError> {
    if value.is_sign_negative() || value > Decimal::ONE_HUNDRED {
        return Err(ConfigError::Invalid(format!(
            "{} must be within 0..=100, got {}",
            name, value
        )));
    }
    Ok(())
}
