//! Rewards engine facade for in-process library usage.
//!
//! Wires the ledger services around one store, clock and notification sink.
//!
//! # Example
//!
//! ```ignore
//! use rewards_ledger::{Config, RewardsEngine};
//!
//! let engine = RewardsEngine::builder(Config::load(None)?)
//!     .with_sink(my_sink)
//!     .build()
//!     .await?;
//!
//! let outcome = engine.create_escrow(order).await?;
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::distribution::{DistributionEngine, ReleaseOutcome};
use crate::error::Result;
use crate::escrow::{EscrowManager, EscrowOutcome};
use crate::ledger::{LedgerService, Reconciliation};
use crate::merchant::MerchantRegistry;
use crate::model::{
    Direction, MemberId, MerchantAccount, OnholdId, OnholdPoint, Order, Points, Transaction,
    Wallet, WalletOwner,
};
use crate::notify::{NotificationSink, TracingSink};
use crate::referral::{LinkOutcome, ReferralService};
use crate::scheduler::ReleaseScheduler;
use crate::storage::{init_storage, LedgerStore};
use crate::unlock::{UnlockEvaluator, UnlockOutcome};

/// Builder for [`RewardsEngine`].
pub struct RewardsEngineBuilder {
    config: Config,
    store: Option<Arc<dyn LedgerStore>>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
}

impl RewardsEngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            clock: Arc::new(SystemClock),
            sink: Arc::new(TracingSink),
        }
    }

    /// Use an existing store instead of the one named in the config.
    pub fn with_store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub async fn build(self) -> Result<RewardsEngine> {
        self.config.validate()?;
        let store = match self.store {
            Some(store) => store,
            None => init_storage(&self.config.storage).await?,
        };
        let Self {
            config,
            clock,
            sink,
            ..
        } = self;
        let retry = config.retry.clone();

        let escrow = Arc::new(EscrowManager::new(
            store.clone(),
            clock.clone(),
            config.escrow.clone(),
            retry.clone(),
            sink.clone(),
        ));
        let distribution = Arc::new(DistributionEngine::new(
            store.clone(),
            clock.clone(),
            config.rewards.clone(),
            retry.clone(),
            sink.clone(),
        ));
        let unlock = UnlockEvaluator::new(
            store.clone(),
            clock.clone(),
            config.unlock.clone(),
            retry.clone(),
            sink.clone(),
        );
        let referrals = ReferralService::new(
            store.clone(),
            clock.clone(),
            config.unlock.clone(),
            retry.clone(),
            sink,
        );
        let scheduler = ReleaseScheduler::new(
            escrow.clone(),
            distribution.clone(),
            clock.clone(),
            config.scheduler.clone(),
        );
        let merchants = MerchantRegistry::new(store.clone(), clock.clone(), retry.clone());
        let ledger = LedgerService::new(store.clone(), clock.clone(), retry);

        Ok(RewardsEngine {
            config,
            store,
            clock,
            ledger,
            escrow,
            distribution,
            unlock,
            referrals,
            merchants,
            scheduler,
        })
    }
}

/// All ledger operations behind one handle.
pub struct RewardsEngine {
    config: Config,
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    ledger: LedgerService,
    escrow: Arc<EscrowManager>,
    distribution: Arc<DistributionEngine>,
    unlock: UnlockEvaluator,
    referrals: ReferralService,
    merchants: MerchantRegistry,
    scheduler: ReleaseScheduler,
}

impl RewardsEngine {
    pub fn builder(config: Config) -> RewardsEngineBuilder {
        RewardsEngineBuilder::new(config)
    }

    /// Build an engine on the storage backend named in `config`.
    pub async fn from_config(config: Config) -> Result<Self> {
        Self::builder(config).build().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn ledger(&self) -> &LedgerService {
        &self.ledger
    }

    pub fn escrow(&self) -> &EscrowManager {
        &self.escrow
    }

    pub fn distribution(&self) -> &DistributionEngine {
        &self.distribution
    }

    pub fn unlock(&self) -> &UnlockEvaluator {
        &self.unlock
    }

    pub fn referrals(&self) -> &ReferralService {
        &self.referrals
    }

    pub fn merchants(&self) -> &MerchantRegistry {
        &self.merchants
    }

    /// Scheduler over this engine's escrow manager and distribution engine.
    pub fn scheduler(&self) -> &ReleaseScheduler {
        &self.scheduler
    }

    pub async fn create_escrow(&self, order: Order) -> Result<EscrowOutcome> {
        self.escrow.create_escrow(order).await
    }

    pub async fn mark_shipped(
        &self,
        onhold_id: OnholdId,
        auto_release_days: Option<u32>,
    ) -> Result<EscrowOutcome> {
        self.escrow.mark_shipped(onhold_id, auto_release_days).await
    }

    pub async fn refund(
        &self,
        onhold_id: OnholdId,
        reason: impl Into<String>,
    ) -> Result<EscrowOutcome> {
        self.escrow.refund(onhold_id, reason).await
    }

    pub fn ready_for_release(&self, now: DateTime<Utc>) -> BoxStream<'static, Result<OnholdPoint>> {
        self.escrow.ready_for_release(now)
    }

    pub async fn release(&self, onhold_id: OnholdId) -> Result<ReleaseOutcome> {
        self.distribution.release(onhold_id).await
    }

    pub async fn evaluate_unlock(&self, member: MemberId) -> Result<UnlockOutcome> {
        self.unlock.evaluate(member).await
    }

    pub async fn link_referral(&self, child: MemberId, sponsor: MemberId) -> Result<LinkOutcome> {
        self.referrals.link(child, sponsor).await
    }

    pub async fn register_merchant(&self, account: MerchantAccount) -> Result<MerchantAccount> {
        self.merchants.register(account).await
    }

    pub async fn open_wallet(&self, owner: WalletOwner) -> Result<Wallet> {
        self.ledger.open_wallet(owner).await
    }

    pub async fn wallet(&self, owner: WalletOwner) -> Result<Option<Wallet>> {
        self.ledger.wallet(owner).await
    }

    pub async fn adjust(
        &self,
        owner: WalletOwner,
        direction: Direction,
        amount: Points,
        note: Option<String>,
    ) -> Result<Transaction> {
        self.ledger.adjust(owner, direction, amount, note).await
    }

    pub async fn reconcile(&self, owner: WalletOwner) -> Result<Reconciliation> {
        self.ledger.reconcile(owner).await
    }

    pub async fn history(&self, owner: WalletOwner) -> Result<Vec<Transaction>> {
        self.ledger.history(owner).await
    }
}
