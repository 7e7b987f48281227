//! Wallet operations outside the order flow.

use std::sync::Arc;

use tracing::{info, warn};

use super::{replay, Journal, Reconciliation};
use crate::clock::Clock;
use crate::error::{EngineError, IntegrityError, Result};
use crate::model::{Bucket, Category, Direction, Points, Posting, Transaction, Wallet, WalletOwner};
use crate::storage::LedgerStore;
use crate::utils::retry::{run_with_retry, RetryConfig};

/// Opens wallets, applies operator adjustments and audits balances.
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, retry: RetryConfig) -> Self {
        Self {
            store,
            clock,
            retry,
        }
    }

    pub async fn wallet(&self, owner: WalletOwner) -> Result<Option<Wallet>> {
        Ok(self.store.wallet(&owner).await?)
    }

    /// Create an empty wallet. Returns the existing one if already open.
    #[tracing::instrument(name = "ledger.open_wallet", skip(self), fields(owner = %owner))]
    pub async fn open_wallet(&self, owner: WalletOwner) -> Result<Wallet> {
        run_with_retry(&self.retry, "ledger.open_wallet", || self.try_open_wallet(owner)).await
    }

    async fn try_open_wallet(&self, owner: WalletOwner) -> Result<Wallet> {
        if let Some(wallet) = self.store.wallet(&owner).await? {
            return Ok(wallet);
        }
        let mut journal = Journal::new(self.store.as_ref(), self.clock.now());
        journal.wallet_or_open(owner).await?;
        let batch = journal.into_batch();
        let wallet = batch
            .wallets
            .first()
            .cloned()
            .ok_or(IntegrityError::MissingWallet(owner))?;
        // A concurrent open wins.
        match self.store.commit(batch).await {
            Ok(_) => {
                info!("Wallet opened");
                Ok(wallet)
            }
            Err(e) if e.is_conflict() => self
                .store
                .wallet(&owner)
                .await?
                .ok_or_else(|| EngineError::Storage(e)),
            Err(e) => Err(e.into()),
        }
    }

    /// Operator credit or debit on the available bucket.
    ///
    /// Debits that would take `available_points` below zero are rejected with
    /// [`crate::error::LedgerError::InsufficientBalance`].
    #[tracing::instrument(
        name = "ledger.adjust",
        skip(self, note),
        fields(owner = %owner, direction = %direction, amount = %amount)
    )]
    pub async fn adjust(
        &self,
        owner: WalletOwner,
        direction: Direction,
        amount: Points,
        note: Option<String>,
    ) -> Result<Transaction> {
        run_with_retry(&self.retry, "ledger.adjust", || {
            self.try_adjust(owner, direction, amount, note.clone())
        })
        .await
    }

    async fn try_adjust(
        &self,
        owner: WalletOwner,
        direction: Direction,
        amount: Points,
        note: Option<String>,
    ) -> Result<Transaction> {
        let mut journal = Journal::new(self.store.as_ref(), self.clock.now());
        if journal.wallet(owner).await?.is_none() {
            return Err(IntegrityError::MissingWallet(owner).into());
        }

        let mut posting = match direction {
            Direction::Credit => Posting::credit(Bucket::Available, Category::CreditAdjust, amount),
            Direction::Debit => Posting::debit(Bucket::Available, Category::DebitAdjust, amount),
        };
        if let Some(note) = note {
            posting = posting.with_note(note);
        }
        journal.post(owner, posting)?;

        let committed = journal.commit().await?;
        let tx = committed
            .into_iter()
            .next()
            .ok_or(IntegrityError::MissingWallet(owner))?;
        info!(sequence = tx.sequence, "Adjustment posted");
        Ok(tx)
    }

    /// Replay a wallet's ledger and compare it with the cached columns.
    #[tracing::instrument(name = "ledger.reconcile", skip(self), fields(owner = %owner))]
    pub async fn reconcile(&self, owner: WalletOwner) -> Result<Reconciliation> {
        let wallet = self
            .store
            .wallet(&owner)
            .await?
            .ok_or(IntegrityError::MissingWallet(owner))?;
        let transactions = self.store.transactions(&owner).await?;
        let replayed = replay(&owner, &transactions)?;
        let levels = match owner.as_member() {
            Some(member) => self.store.community_levels(member).await?,
            None => Vec::new(),
        };

        let report = Reconciliation::new(&wallet, replayed, transactions.len(), &levels);
        if !report.is_consistent() {
            warn!(
                stored = ?report.stored,
                replayed = ?report.replayed,
                "Wallet drifted from its ledger"
            );
        }
        Ok(report)
    }

    /// A wallet's transactions in sequence order.
    pub async fn history(&self, owner: WalletOwner) -> Result<Vec<Transaction>> {
        Ok(self.store.transactions(&owner).await?)
    }
}
