//! Test harness.
//!
//! Wires a [`RewardsEngine`] to a store, a manual clock and a broadcast sink,
//! with shortcuts for building merchants, members and shipped orders. The
//! store defaults to the in-memory one; [`Harness::sqlite`] runs the same
//! engine over an in-memory SQLite database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::clock::ManualClock;
use crate::config::Config;
use crate::escrow::EscrowOutcome;
use crate::facade::RewardsEngine;
use crate::model::{
    CorporateId, Direction, MemberId, MerchantAccount, MerchantId, OnholdPoint, Order, OrderId,
    Points, Wallet, WalletOwner,
};
use crate::notify::ChannelSink;
use crate::referral::LinkOutcome;
#[cfg(feature = "sqlite")]
use crate::config::SqliteConfig;
#[cfg(feature = "sqlite")]
use crate::storage::SqliteLedgerStore;
use crate::storage::{LedgerStore, MemoryLedgerStore};

/// Fixed starting instant so tests are reproducible.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Whole-store reads the ledger trait does not offer.
#[async_trait]
pub trait InspectStore: LedgerStore + 'static {
    async fn all_wallets(&self) -> Vec<Wallet>;

    async fn total_transactions(&self) -> usize;
}

#[async_trait]
impl InspectStore for MemoryLedgerStore {
    async fn all_wallets(&self) -> Vec<Wallet> {
        self.wallets().await
    }

    async fn total_transactions(&self) -> usize {
        self.transaction_count().await
    }
}

#[cfg(feature = "sqlite")]
#[async_trait]
impl InspectStore for SqliteLedgerStore {
    async fn all_wallets(&self) -> Vec<Wallet> {
        self.wallets().await.expect("list wallets")
    }

    async fn total_transactions(&self) -> usize {
        self.transaction_count().await.expect("count transactions")
    }
}

pub struct Harness<S = MemoryLedgerStore> {
    pub store: Arc<S>,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<ChannelSink>,
    pub engine: RewardsEngine,
}

impl Harness<MemoryLedgerStore> {
    pub async fn new() -> Self {
        Self::with_config(Config::for_test()).await
    }

    pub async fn with_config(config: Config) -> Self {
        Self::with_store(Arc::new(MemoryLedgerStore::new()), config).await
    }
}

#[cfg(feature = "sqlite")]
impl Harness<SqliteLedgerStore> {
    /// Harness over a fresh in-memory SQLite database.
    pub async fn sqlite(config: Config) -> Self {
        let store = SqliteLedgerStore::connect(&SqliteConfig {
            path: ":memory:".to_string(),
            ..SqliteConfig::default()
        })
        .await
        .expect("open sqlite");
        store.init().await.expect("migrate sqlite");
        Self::with_store(Arc::new(store), config).await
    }
}

impl<S: InspectStore> Harness<S> {
    pub async fn with_store(store: Arc<S>, config: Config) -> Self {
        let clock = Arc::new(ManualClock::new(epoch()));
        let sink = Arc::new(ChannelSink::new());
        let engine = RewardsEngine::builder(config)
            .with_store(store.clone())
            .with_clock(clock.clone())
            .with_sink(sink.clone())
            .build()
            .await
            .expect("test config is valid");
        Self {
            store,
            clock,
            sink,
            engine,
        }
    }

    /// Register a merchant whose corporate account holds `float` points.
    pub async fn merchant(&self, float: Points) -> MerchantAccount {
        let account = self
            .engine
            .register_merchant(MerchantAccount::new(MerchantId::new(), CorporateId::new()))
            .await
            .expect("register merchant");
        if float > Points::ZERO {
            self.engine
                .adjust(
                    WalletOwner::Corporate(account.corporate_id),
                    Direction::Credit,
                    float,
                    Some("float top-up".to_string()),
                )
                .await
                .expect("fund corporate float");
        }
        account
    }

    /// Open a wallet for a new member.
    pub async fn member(&self) -> MemberId {
        let member = MemberId::new();
        self.engine
            .open_wallet(WalletOwner::Member(member))
            .await
            .expect("open member wallet");
        member
    }

    /// Open a wallet for a new member and link them under `sponsor`.
    pub async fn member_under(&self, sponsor: MemberId) -> MemberId {
        let member = self.member().await;
        self.link(member, sponsor).await;
        member
    }

    pub async fn link(&self, child: MemberId, sponsor: MemberId) {
        let outcome = self
            .engine
            .link_referral(child, sponsor)
            .await
            .expect("link referral");
        assert!(
            matches!(outcome, LinkOutcome::Linked { .. }),
            "link rejected: {:?}",
            outcome
        );
    }

    /// `len` sponsors stacked above `buyer`; index 0 is the direct sponsor.
    pub async fn upline(&self, buyer: MemberId, len: usize) -> Vec<MemberId> {
        let mut chain = Vec::with_capacity(len);
        let mut child = buyer;
        for _ in 0..len {
            let sponsor = self.member().await;
            self.link(child, sponsor).await;
            chain.push(sponsor);
            child = sponsor;
        }
        chain
    }

    /// Create an escrow for a one-line order and return its onhold row.
    pub async fn escrow(
        &self,
        merchant: &MerchantAccount,
        buyer: MemberId,
        total: Decimal,
    ) -> OnholdPoint {
        let order = Order::new(OrderId::new(), merchant.id, buyer, total)
            .with_line(total, 1);
        match self.engine.create_escrow(order).await.expect("create escrow") {
            EscrowOutcome::Created(onhold) => onhold,
            other => panic!("escrow not created: {:?}", other),
        }
    }

    /// Create an escrow and mark it shipped with the default release delay.
    pub async fn shipped(
        &self,
        merchant: &MerchantAccount,
        buyer: MemberId,
        total: Decimal,
    ) -> OnholdPoint {
        let onhold = self.escrow(merchant, buyer, total).await;
        match self
            .engine
            .mark_shipped(onhold.id, None)
            .await
            .expect("mark shipped")
        {
            EscrowOutcome::Shipped(onhold) => onhold,
            other => panic!("escrow not shipped: {:?}", other),
        }
    }

    /// Move the clock past the default auto-release delay.
    pub fn pass_release_delay(&self) {
        let days = i64::from(self.engine.config().escrow.auto_release_days);
        self.clock.advance(Duration::days(days) + Duration::seconds(1));
    }

    pub async fn wallet(&self, owner: WalletOwner) -> Wallet {
        self.engine
            .wallet(owner)
            .await
            .expect("read wallet")
            .expect("wallet exists")
    }

    pub async fn member_wallet(&self, member: MemberId) -> Wallet {
        self.wallet(WalletOwner::Member(member)).await
    }

    pub async fn transaction_count(&self) -> usize {
        self.store.total_transactions().await
    }

    /// Assert every wallet reconciles against its ledger and level rows.
    pub async fn assert_reconciled(&self) {
        for wallet in self.store.all_wallets().await {
            let report = self
                .engine
                .reconcile(wallet.owner)
                .await
                .expect("reconcile");
            assert!(report.is_consistent(), "wallet drifted: {:?}", report);
        }
    }
}
