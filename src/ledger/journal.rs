//! Unit-of-work builder.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::model::{
    CommunityPointLevel, MemberId, MerchantAccount, OnholdPoint, Order, Posting, ReferralEdge,
    Transaction, UnlockHistory, Wallet, WalletOwner,
};
use crate::storage::{LedgerBatch, LedgerStore};

/// Working set for one ledger operation.
///
/// Rows are read through the journal once and cached; every change is made
/// against the cached copy. [`Journal::commit`] bumps the version of each
/// touched row and hands the whole set to the store as one batch, so the
/// store rejects it if anything read here has moved since.
pub struct Journal<'a> {
    store: &'a dyn LedgerStore,
    now: DateTime<Utc>,
    wallets: BTreeMap<WalletOwner, Wallet>,
    dirty_wallets: BTreeSet<WalletOwner>,
    levels: BTreeMap<(MemberId, u8), CommunityPointLevel>,
    dirty_levels: BTreeSet<(MemberId, u8)>,
    orders: Vec<Order>,
    onholds: Vec<OnholdPoint>,
    merchants: Vec<MerchantAccount>,
    referrals: Vec<ReferralEdge>,
    unlock_history: Vec<UnlockHistory>,
    transactions: Vec<Transaction>,
}

impl<'a> Journal<'a> {
    pub fn new(store: &'a dyn LedgerStore, now: DateTime<Utc>) -> Self {
        Self {
            store,
            now,
            wallets: BTreeMap::new(),
            dirty_wallets: BTreeSet::new(),
            levels: BTreeMap::new(),
            dirty_levels: BTreeSet::new(),
            orders: Vec::new(),
            onholds: Vec::new(),
            merchants: Vec::new(),
            referrals: Vec::new(),
            unlock_history: Vec::new(),
            transactions: Vec::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn store(&self) -> &'a dyn LedgerStore {
        self.store
    }

    /// Load a wallet into the working set. `None` if it does not exist.
    pub async fn wallet(&mut self, owner: WalletOwner) -> Result<Option<&Wallet>> {
        if !self.wallets.contains_key(&owner) {
            if let Some(wallet) = self.store.wallet(&owner).await? {
                self.wallets.insert(owner, wallet);
            }
        }
        Ok(self.wallets.get(&owner))
    }

    /// Load a wallet, opening an empty one if it does not exist yet.
    pub async fn wallet_or_open(&mut self, owner: WalletOwner) -> Result<&Wallet> {
        if self.wallet(owner).await?.is_none() {
            self.wallets.insert(owner, Wallet::open(owner, self.now));
            self.dirty_wallets.insert(owner);
        }
        Ok(self
            .wallets
            .get(&owner)
            .ok_or(LedgerError::WalletNotLoaded(owner))?)
    }

    /// Load a wallet and keep it in the batch even if nothing changes, so the
    /// commit is rejected if another writer moves it first. `false` if the
    /// wallet does not exist.
    pub async fn guard_wallet(&mut self, owner: WalletOwner) -> Result<bool> {
        if self.wallet(owner).await?.is_none() {
            return Ok(false);
        }
        self.dirty_wallets.insert(owner);
        Ok(true)
    }

    /// Mutable access to a loaded wallet's non-balance columns.
    pub fn wallet_mut(&mut self, owner: WalletOwner) -> Result<&mut Wallet> {
        let wallet = self
            .wallets
            .get_mut(&owner)
            .ok_or(LedgerError::WalletNotLoaded(owner))?;
        self.dirty_wallets.insert(owner);
        Ok(wallet)
    }

    /// Apply a posting to a loaded wallet and record its transaction.
    ///
    /// The wallet is left untouched if the posting is rejected.
    pub fn post(&mut self, owner: WalletOwner, posting: Posting) -> Result<()> {
        let wallet = self
            .wallets
            .get_mut(&owner)
            .ok_or(LedgerError::WalletNotLoaded(owner))?;
        wallet.balances.apply(&owner, &posting)?;
        self.dirty_wallets.insert(owner);

        let balances = wallet.balances;
        self.transactions.push(Transaction {
            id: Uuid::new_v4(),
            sequence: 0,
            wallet: owner,
            direction: posting.direction,
            bucket: posting.bucket,
            category: posting.category,
            amount: posting.amount,
            context: posting.context,
            available_after: balances.available_points,
            onhold_after: balances.onhold_points,
            total_rp_after: balances.total_rp,
            created_at: self.now,
        });
        Ok(())
    }

    /// A member's level row, created empty if it does not exist.
    pub async fn level(&mut self, member: MemberId, level: u8) -> Result<&mut CommunityPointLevel> {
        let key = (member, level);
        if !self.levels.contains_key(&key) {
            let row = self
                .store
                .community_level(member, level)
                .await?
                .unwrap_or_else(|| CommunityPointLevel::new(member, level));
            self.levels.insert(key, row);
        }
        self.dirty_levels.insert(key);
        Ok(self
            .levels
            .entry(key)
            .or_insert_with(|| CommunityPointLevel::new(member, level)))
    }

    /// Load every level row of a member and return the locked levels in order.
    pub async fn locked_levels(&mut self, member: MemberId) -> Result<Vec<u8>> {
        for row in self.store.community_levels(member).await? {
            self.levels.entry((member, row.level)).or_insert(row);
        }
        Ok(self
            .levels
            .range((member, 0)..=(member, u8::MAX))
            .filter(|(_, row)| row.is_locked)
            .map(|(&(_, level), _)| level)
            .collect())
    }

    pub fn put_order(&mut self, order: Order) {
        self.orders.push(order);
    }

    pub fn put_onhold(&mut self, onhold: OnholdPoint) {
        self.onholds.push(onhold);
    }

    pub fn put_merchant(&mut self, merchant: MerchantAccount) {
        self.merchants.push(merchant);
    }

    pub fn add_referral(&mut self, edge: ReferralEdge) {
        self.referrals.push(edge);
    }

    pub fn record_unlock(&mut self, history: UnlockHistory) {
        self.unlock_history.push(history);
    }

    /// Transactions recorded so far, in posting order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Turn the working set into a batch, bumping every touched row's version.
    pub fn into_batch(mut self) -> LedgerBatch {
        let now = self.now;
        let wallets = self
            .dirty_wallets
            .iter()
            .filter_map(|owner| self.wallets.remove(owner))
            .map(|mut wallet| {
                wallet.version += 1;
                wallet.updated_at = now;
                wallet
            })
            .collect();
        let community_levels = self
            .dirty_levels
            .iter()
            .filter_map(|key| self.levels.remove(key))
            .map(|mut row| {
                row.version += 1;
                row
            })
            .collect();

        LedgerBatch {
            wallets,
            orders: bump(self.orders, |order| &mut order.version),
            onholds: bump(self.onholds, |onhold| &mut onhold.version),
            merchants: bump(self.merchants, |merchant| &mut merchant.version),
            community_levels,
            referrals: self.referrals,
            transactions: self.transactions,
            unlock_history: self.unlock_history,
        }
    }

    /// Commit the working set. Returns the transactions with their sequences.
    pub async fn commit(self) -> Result<Vec<Transaction>> {
        let store = self.store;
        Ok(store.commit(self.into_batch()).await?)
    }
}

fn bump<T>(mut rows: Vec<T>, version: impl Fn(&mut T) -> &mut u64) -> Vec<T> {
    for row in &mut rows {
        *version(row) += 1;
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bucket, Category, Points};
    use crate::storage::MemoryLedgerStore;

    #[tokio::test]
    async fn test_commit_bumps_versions_and_snapshots() {
        let store = MemoryLedgerStore::new();
        let owner = WalletOwner::Member(MemberId::new());
        let now = Utc::now();

        let mut journal = Journal::new(&store, now);
        journal.wallet_or_open(owner).await.unwrap();
        journal
            .post(
                owner,
                Posting::credit(Bucket::Available, Category::Personal, Points::from(30)),
            )
            .unwrap();
        let committed = journal.commit().await.unwrap();

        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].sequence, 1);
        assert_eq!(committed[0].available_after, Points::from(30));

        let wallet = store.wallet(&owner).await.unwrap().unwrap();
        assert_eq!(wallet.version, 1);
        assert_eq!(wallet.balances.total_pp, Points::from(30));
    }

    #[tokio::test]
    async fn test_rejected_posting_records_nothing() {
        let store = MemoryLedgerStore::new();
        let owner = WalletOwner::Company;
        let mut journal = Journal::new(&store, Utc::now());
        journal.wallet_or_open(owner).await.unwrap();

        let err = journal
            .post(
                owner,
                Posting::debit(Bucket::Available, Category::DebitAdjust, Points::ONE),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::EngineError::Ledger(LedgerError::InsufficientBalance { .. })
        ));
        assert!(journal.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_posting_to_unloaded_wallet_fails() {
        let store = MemoryLedgerStore::new();
        let mut journal = Journal::new(&store, Utc::now());
        let err = journal
            .post(
                WalletOwner::Company,
                Posting::credit(Bucket::Available, Category::Reserve, Points::ONE),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::EngineError::Ledger(LedgerError::WalletNotLoaded(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_journal_conflicts() {
        let store = MemoryLedgerStore::new();
        let owner = WalletOwner::Company;
        let now = Utc::now();

        let mut first = Journal::new(&store, now);
        first.wallet_or_open(owner).await.unwrap();
        let mut second = Journal::new(&store, now);
        second.wallet_or_open(owner).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(err.is_conflict());
    }
}
