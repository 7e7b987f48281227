//! In-memory LedgerStore implementation.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{expected_version, LedgerBatch, LedgerStore, Result, StorageError};
use crate::distribution::SponsorLookup;
use crate::model::{
    CommunityPointLevel, MemberId, MerchantAccount, MerchantId, OnholdId, OnholdPoint, Order,
    OrderId, ReferralEdge, Transaction, UnlockHistory, Wallet, WalletOwner,
};

#[derive(Default)]
struct MemoryState {
    wallets: HashMap<WalletOwner, Wallet>,
    orders: HashMap<OrderId, Order>,
    onholds: BTreeMap<OnholdId, OnholdPoint>,
    merchants: HashMap<MerchantId, MerchantAccount>,
    levels: BTreeMap<(MemberId, u8), CommunityPointLevel>,
    referrals: HashMap<MemberId, ReferralEdge>,
    transactions: Vec<Transaction>,
    unlock_history: Vec<UnlockHistory>,
}

/// Ledger store that keeps everything in memory.
///
/// Commits take a single write lock, validate every versioned row, and only
/// then apply the batch.
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: RwLock<MemoryState>,
    fail_on_commit: RwLock<bool>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail, for exercising rollback paths.
    pub async fn set_fail_on_commit(&self, fail: bool) {
        *self.fail_on_commit.write().await = fail;
    }

    /// Every stored wallet.
    pub async fn wallets(&self) -> Vec<Wallet> {
        self.state.read().await.wallets.values().cloned().collect()
    }

    /// Every stored community level row.
    pub async fn all_community_levels(&self) -> Vec<CommunityPointLevel> {
        self.state.read().await.levels.values().cloned().collect()
    }

    /// Number of transactions in the log.
    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.transactions.len()
    }
}

fn check_version(
    entity: &'static str,
    key: impl ToString,
    stored: Option<u64>,
    new_version: u64,
) -> Result<()> {
    let expected = expected_version(new_version);
    if new_version == 0 || stored.unwrap_or(0) != expected {
        return Err(StorageError::VersionConflict {
            entity,
            key: key.to_string(),
            expected,
        });
    }
    Ok(())
}

impl MemoryState {
    fn validate(&self, batch: &LedgerBatch) -> Result<()> {
        for wallet in &batch.wallets {
            let stored = self.wallets.get(&wallet.owner).map(|w| w.version);
            check_version("wallet", wallet.owner, stored, wallet.version)?;
        }
        for order in &batch.orders {
            let stored = self.orders.get(&order.id).map(|o| o.version);
            check_version("order", order.id, stored, order.version)?;
        }
        for onhold in &batch.onholds {
            let stored = self.onholds.get(&onhold.id).map(|o| o.version);
            check_version("onhold", onhold.id, stored, onhold.version)?;
            let taken = self
                .onholds
                .values()
                .any(|other| other.order_id == onhold.order_id && other.id != onhold.id);
            if taken {
                return Err(StorageError::Duplicate {
                    entity: "onhold",
                    key: onhold.order_id.to_string(),
                });
            }
        }
        for merchant in &batch.merchants {
            let stored = self.merchants.get(&merchant.id).map(|m| m.version);
            check_version("merchant", merchant.id, stored, merchant.version)?;
        }
        for row in &batch.community_levels {
            let stored = self.levels.get(&(row.member, row.level)).map(|r| r.version);
            check_version(
                "community_level",
                format!("{}/{}", row.member, row.level),
                stored,
                row.version,
            )?;
        }
        for edge in &batch.referrals {
            if self.referrals.contains_key(&edge.child) {
                return Err(StorageError::Duplicate {
                    entity: "referral",
                    key: edge.child.to_string(),
                });
            }
        }
        Ok(())
    }

    fn apply(&mut self, batch: LedgerBatch) -> Vec<Transaction> {
        for wallet in batch.wallets {
            self.wallets.insert(wallet.owner, wallet);
        }
        for order in batch.orders {
            self.orders.insert(order.id, order);
        }
        for onhold in batch.onholds {
            self.onholds.insert(onhold.id, onhold);
        }
        for merchant in batch.merchants {
            self.merchants.insert(merchant.id, merchant);
        }
        for row in batch.community_levels {
            self.levels.insert((row.member, row.level), row);
        }
        for edge in batch.referrals {
            self.referrals.insert(edge.child, edge);
        }
        self.unlock_history.extend(batch.unlock_history);

        let mut committed = Vec::with_capacity(batch.transactions.len());
        for mut tx in batch.transactions {
            tx.sequence = self.transactions.len() as u64 + 1;
            committed.push(tx.clone());
            self.transactions.push(tx);
        }
        committed
    }
}

#[async_trait]
impl SponsorLookup for MemoryLedgerStore {
    async fn sponsor_of(&self, member: MemberId) -> Result<Option<MemberId>> {
        Ok(self
            .state
            .read()
            .await
            .referrals
            .get(&member)
            .map(|edge| edge.sponsor))
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn wallet(&self, owner: &WalletOwner) -> Result<Option<Wallet>> {
        Ok(self.state.read().await.wallets.get(owner).cloned())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn onhold(&self, id: OnholdId) -> Result<Option<OnholdPoint>> {
        Ok(self.state.read().await.onholds.get(&id).cloned())
    }

    async fn onhold_for_order(&self, order_id: OrderId) -> Result<Option<OnholdPoint>> {
        Ok(self
            .state
            .read()
            .await
            .onholds
            .values()
            .find(|onhold| onhold.order_id == order_id)
            .cloned())
    }

    async fn due_onholds(
        &self,
        now: DateTime<Utc>,
        after: Option<OnholdId>,
        limit: usize,
    ) -> Result<Vec<OnholdPoint>> {
        let state = self.state.read().await;
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        Ok(state
            .onholds
            .range((lower, Bound::Unbounded))
            .map(|(_, onhold)| onhold)
            .filter(|onhold| onhold.is_ready_for_release(now))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn merchant(&self, id: MerchantId) -> Result<Option<MerchantAccount>> {
        Ok(self.state.read().await.merchants.get(&id).cloned())
    }

    async fn community_level(
        &self,
        member: MemberId,
        level: u8,
    ) -> Result<Option<CommunityPointLevel>> {
        Ok(self.state.read().await.levels.get(&(member, level)).cloned())
    }

    async fn community_levels(&self, member: MemberId) -> Result<Vec<CommunityPointLevel>> {
        Ok(self
            .state
            .read()
            .await
            .levels
            .range((member, 0)..=(member, u8::MAX))
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn transactions(&self, owner: &WalletOwner) -> Result<Vec<Transaction>> {
        Ok(self
            .state
            .read()
            .await
            .transactions
            .iter()
            .filter(|tx| tx.wallet == *owner)
            .cloned()
            .collect())
    }

    async fn unlock_history(&self, member: MemberId) -> Result<Vec<UnlockHistory>> {
        Ok(self
            .state
            .read()
            .await
            .unlock_history
            .iter()
            .filter(|row| row.member == member)
            .cloned()
            .collect())
    }

    async fn commit(&self, batch: LedgerBatch) -> Result<Vec<Transaction>> {
        if *self.fail_on_commit.read().await {
            return Err(StorageError::Unavailable(
                "memory store commit disabled".to_string(),
            ));
        }
        let mut state = self.state.write().await;
        state.validate(&batch)?;
        Ok(state.apply(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemberId;
    use rust_decimal::Decimal;

    fn wallet(version: u64) -> Wallet {
        let mut wallet = Wallet::open(WalletOwner::Member(MemberId::new()), Utc::now());
        wallet.version = version;
        wallet
    }

    #[tokio::test]
    async fn test_failed_check_applies_nothing() {
        let store = MemoryLedgerStore::new();
        let mut good = wallet(1);
        good.balances.available_points = Decimal::from(5);
        let stale = wallet(3);

        let err = store
            .commit(LedgerBatch {
                wallets: vec![good.clone(), stale],
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(store.wallet(&good.owner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryLedgerStore::new();
        store.set_fail_on_commit(true).await;
        let err = store
            .commit(LedgerBatch {
                wallets: vec![wallet(1)],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert!(store.wallets().await.is_empty());

        store.set_fail_on_commit(false).await;
        store
            .commit(LedgerBatch {
                wallets: vec![wallet(1)],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(store.wallets().await.len(), 1);
    }
}
