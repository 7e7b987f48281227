//! Rebuild wallet balances from the transaction log.

use serde::Serialize;

use crate::error::LedgerError;
use crate::model::{Balances, CommunityPointLevel, Points, Transaction, Wallet, WalletOwner};

/// Replay a wallet's transactions in sequence order.
///
/// Every transaction's recorded snapshot must match the running balances
/// after it is applied.
pub fn replay(owner: &WalletOwner, transactions: &[Transaction]) -> Result<Balances, LedgerError> {
    let mut balances = Balances::default();
    for tx in transactions {
        balances.apply(owner, &tx.posting())?;
        if balances.available_points != tx.available_after
            || balances.onhold_points != tx.onhold_after
            || balances.total_rp != tx.total_rp_after
        {
            return Err(LedgerError::SnapshotMismatch {
                sequence: tx.sequence,
            });
        }
    }
    Ok(balances)
}

/// Result of checking a wallet's cached columns against its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub owner: WalletOwner,
    pub stored: Balances,
    pub replayed: Balances,
    pub transactions: usize,
    /// For members: `Σ total_cp` over level rows.
    pub level_total_cp: Points,
    /// For members: `Σ onhold_cp` over level rows.
    pub level_onhold_cp: Points,
    /// Every level row satisfies `total = available + onhold`.
    pub levels_balanced: bool,
}

impl Reconciliation {
    pub fn new(
        wallet: &Wallet,
        replayed: Balances,
        transactions: usize,
        levels: &[CommunityPointLevel],
    ) -> Self {
        Self {
            owner: wallet.owner,
            stored: wallet.balances,
            replayed,
            transactions,
            level_total_cp: levels.iter().map(|row| row.total_cp).sum(),
            level_onhold_cp: levels.iter().map(|row| row.onhold_cp).sum(),
            levels_balanced: levels.iter().all(CommunityPointLevel::is_balanced),
        }
    }

    /// The wallet's cached balances equal its replayed ledger.
    pub fn ledger_matches(&self) -> bool {
        self.stored == self.replayed
    }

    /// Level rows agree with the wallet's community columns.
    pub fn levels_match(&self) -> bool {
        if self.owner.as_member().is_none() {
            return true;
        }
        self.levels_balanced
            && self.level_total_cp == self.stored.total_cp
            && self.level_onhold_cp == self.stored.onhold_points
    }

    pub fn is_consistent(&self) -> bool {
        self.ledger_matches() && self.levels_match()
    }
}
