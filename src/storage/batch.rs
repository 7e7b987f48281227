//! Unit of work committed atomically by a [`LedgerStore`](super::LedgerStore).

use crate::model::{
    CommunityPointLevel, MerchantAccount, OnholdPoint, Order, ReferralEdge, Transaction,
    UnlockHistory, Wallet,
};

/// All rows written by one ledger operation.
///
/// Versioned rows carry their *new* version: a row whose version is 1 is
/// inserted and must not exist yet; any other row replaces the stored row
/// whose version is exactly one less. If any check fails the store applies
/// nothing.
#[derive(Debug, Clone, Default)]
pub struct LedgerBatch {
    pub wallets: Vec<Wallet>,
    pub orders: Vec<Order>,
    pub onholds: Vec<OnholdPoint>,
    pub merchants: Vec<MerchantAccount>,
    pub community_levels: Vec<CommunityPointLevel>,
    /// Insert-only; a child that already has a sponsor is a duplicate.
    pub referrals: Vec<ReferralEdge>,
    /// Appended in order; sequences are assigned by the store.
    pub transactions: Vec<Transaction>,
    pub unlock_history: Vec<UnlockHistory>,
}

impl LedgerBatch {
    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
            && self.orders.is_empty()
            && self.onholds.is_empty()
            && self.merchants.is_empty()
            && self.community_levels.is_empty()
            && self.referrals.is_empty()
            && self.transactions.is_empty()
            && self.unlock_history.is_empty()
    }
}

/// Version a stored row must currently have for `new_version` to apply.
pub(crate) fn expected_version(new_version: u64) -> u64 {
    new_version.saturating_sub(1)
}
