//! Merchant accounts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{CorporateId, MerchantId};

/// A merchant and the corporate account that funds its rewards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantAccount {
    pub id: MerchantId,
    pub corporate_id: CorporateId,
    /// Share of each order total spent on rewards. `None` uses the
    /// configured default.
    pub reward_budget_percent: Option<Decimal>,
    pub version: u64,
}

impl MerchantAccount {
    pub fn new(id: MerchantId, corporate_id: CorporateId) -> Self {
        Self {
            id,
            corporate_id,
            reward_budget_percent: None,
            version: 0,
        }
    }

    pub fn with_reward_budget(mut self, percent: Decimal) -> Self {
        self.reward_budget_percent = Some(percent);
        self
    }
}
