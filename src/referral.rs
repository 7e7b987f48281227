//! Sponsor tree maintenance.
//!
//! Linking a new member under a sponsor raises the sponsor's referral count
//! and re-evaluates their unlocked level in the same commit.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::clock::Clock;
use crate::config::UnlockConfig;
use crate::error::{EngineError, IntegrityError, Result};
use crate::ledger::Journal;
use crate::model::{MemberId, ReferralEdge, UnlockHistory, WalletOwner};
use crate::notify::{publish_all, NotificationSink};
use crate::storage::{LedgerStore, StorageError};
use crate::unlock::{reevaluate, unlocked_event};
use crate::utils::retry::{run_with_retry, RetryConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum LinkRejection {
    SelfReferral,
    AlreadyLinked { sponsor: MemberId },
    /// The sponsor sits below the child in the tree.
    WouldCycle,
    UnknownMember { member: MemberId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LinkOutcome {
    Linked {
        edge: ReferralEdge,
        sponsor_referrals: u32,
        unlock: Option<UnlockHistory>,
    },
    Rejected(LinkRejection),
}

pub struct ReferralService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    unlock: UnlockConfig,
    retry: RetryConfig,
    sink: Arc<dyn NotificationSink>,
}

impl ReferralService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        unlock: UnlockConfig,
        retry: RetryConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            clock,
            unlock,
            retry,
            sink,
        }
    }

    /// Record `sponsor` as `child`'s direct sponsor.
    ///
    /// Both members need a wallet. A child keeps its first sponsor for good.
    #[tracing::instrument(name = "referral.link", skip(self), fields(child = %child, sponsor = %sponsor))]
    pub async fn link(&self, child: MemberId, sponsor: MemberId) -> Result<LinkOutcome> {
        if child == sponsor {
            return Ok(LinkOutcome::Rejected(LinkRejection::SelfReferral));
        }
        let outcome = run_with_retry(&self.retry, "referral.link", || {
            self.try_link(child, sponsor)
        })
        .await?;

        if let LinkOutcome::Linked {
            sponsor_referrals,
            unlock,
            ..
        } = &outcome
        {
            info!(sponsor_referrals, "Referral linked");
            if let Some(history) = unlock {
                publish_all(self.sink.as_ref(), vec![unlocked_event(history)]).await;
            }
        }
        Ok(outcome)
    }

    async fn try_link(&self, child: MemberId, sponsor: MemberId) -> Result<LinkOutcome> {
        let store = self.store.as_ref();
        let mut journal = Journal::new(store, self.clock.now());
        // Every link bumps the child's wallet, so guarding a wallet before
        // reading its sponsor edge pins that edge until commit.
        for member in [child, sponsor] {
            if !journal.guard_wallet(WalletOwner::Member(member)).await? {
                return Ok(LinkOutcome::Rejected(LinkRejection::UnknownMember {
                    member,
                }));
            }
        }
        if let Some(existing) = store.sponsor_of(child).await? {
            return Ok(LinkOutcome::Rejected(LinkRejection::AlreadyLinked {
                sponsor: existing,
            }));
        }
        if reaches(&mut journal, sponsor, child).await? {
            return Ok(LinkOutcome::Rejected(LinkRejection::WouldCycle));
        }

        let edge = ReferralEdge {
            child,
            sponsor,
            created_at: journal.now(),
        };
        journal.add_referral(edge.clone());
        let sponsor_wallet = journal.wallet_mut(WalletOwner::Member(sponsor))?;
        sponsor_wallet.total_referrals += 1;
        let sponsor_referrals = sponsor_wallet.total_referrals;
        let unlock = reevaluate(&mut journal, &self.unlock, sponsor).await?;

        match journal.commit().await {
            Ok(_) => Ok(LinkOutcome::Linked {
                edge,
                sponsor_referrals,
                unlock,
            }),
            Err(EngineError::Storage(StorageError::Duplicate { .. })) => {
                let existing = store.sponsor_of(child).await?.unwrap_or(sponsor);
                Ok(LinkOutcome::Rejected(LinkRejection::AlreadyLinked {
                    sponsor: existing,
                }))
            }
            Err(e) => Err(e),
        }
    }
}

/// Whether `target` is `member` or sits on the sponsor chain above it.
///
/// Each wallet on the walked chain is guarded in `journal`, so an edge added
/// to the chain before commit turns the commit into a version conflict.
async fn reaches(journal: &mut Journal<'_>, member: MemberId, target: MemberId) -> Result<bool> {
    let store = journal.store();
    let mut visited = HashSet::from([member]);
    let mut current = member;
    while current != target {
        journal.guard_wallet(WalletOwner::Member(current)).await?;
        let Some(next) = store.sponsor_of(current).await? else {
            return Ok(false);
        };
        if !visited.insert(next) {
            let depth = u8::try_from(visited.len()).unwrap_or(u8::MAX);
            error!(member = %next, depth, "Sponsor cycle in stored tree");
            return Err(IntegrityError::SponsorCycle {
                member: next,
                level: depth,
            }
            .into());
        }
        current = next;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::clock::SystemClock;
    use crate::distribution::SponsorLookup;
    use crate::model::{
        CommunityPointLevel, MerchantAccount, MerchantId, OnholdId, OnholdPoint, Order, OrderId,
        Transaction, Wallet,
    };
    use crate::notify::TracingSink;
    use crate::storage::{self, LedgerBatch, MemoryLedgerStore};

    /// Hands control back to the runtime before every call so concurrent
    /// links interleave their reads and commits.
    struct InterleavedStore(Arc<MemoryLedgerStore>);

    #[async_trait]
    impl SponsorLookup for InterleavedStore {
        async fn sponsor_of(&self, member: MemberId) -> storage::Result<Option<MemberId>> {
            tokio::task::yield_now().await;
            self.0.sponsor_of(member).await
        }
    }

    #[async_trait]
    impl LedgerStore for InterleavedStore {
        async fn wallet(&self, owner: &WalletOwner) -> storage::Result<Option<Wallet>> {
            tokio::task::yield_now().await;
            self.0.wallet(owner).await
        }

        async fn order(&self, id: OrderId) -> storage::Result<Option<Order>> {
            self.0.order(id).await
        }

        async fn onhold(&self, id: OnholdId) -> storage::Result<Option<OnholdPoint>> {
            self.0.onhold(id).await
        }

        async fn onhold_for_order(&self, order_id: OrderId) -> storage::Result<Option<OnholdPoint>> {
            self.0.onhold_for_order(order_id).await
        }

        async fn due_onholds(
            &self,
            now: DateTime<Utc>,
            after: Option<OnholdId>,
            limit: usize,
        ) -> storage::Result<Vec<OnholdPoint>> {
            self.0.due_onholds(now, after, limit).await
        }

        async fn merchant(&self, id: MerchantId) -> storage::Result<Option<MerchantAccount>> {
            self.0.merchant(id).await
        }

        async fn community_level(
            &self,
            member: MemberId,
            level: u8,
        ) -> storage::Result<Option<CommunityPointLevel>> {
            self.0.community_level(member, level).await
        }

        async fn community_levels(
            &self,
            member: MemberId,
        ) -> storage::Result<Vec<CommunityPointLevel>> {
            tokio::task::yield_now().await;
            self.0.community_levels(member).await
        }

        async fn transactions(&self, owner: &WalletOwner) -> storage::Result<Vec<Transaction>> {
            self.0.transactions(owner).await
        }

        async fn unlock_history(&self, member: MemberId) -> storage::Result<Vec<UnlockHistory>> {
            self.0.unlock_history(member).await
        }

        async fn commit(&self, batch: LedgerBatch) -> storage::Result<Vec<Transaction>> {
            tokio::task::yield_now().await;
            self.0.commit(batch).await
        }
    }

    fn interleaved(store: &Arc<MemoryLedgerStore>) -> ReferralService {
        ReferralService::new(
            Arc::new(InterleavedStore(store.clone())),
            Arc::new(SystemClock),
            UnlockConfig::default(),
            RetryConfig::default(),
            Arc::new(TracingSink),
        )
    }

    /// Follow sponsors up from `member` and fail if the chain loops.
    async fn assert_acyclic(store: &MemoryLedgerStore, member: MemberId) {
        let mut seen = HashSet::from([member]);
        let mut current = member;
        while let Some(next) = store.sponsor_of(current).await.unwrap() {
            assert!(seen.insert(next), "sponsor chain above {member} loops");
            current = next;
        }
    }

    struct Setup {
        store: Arc<MemoryLedgerStore>,
        service: ReferralService,
    }

    fn setup() -> Setup {
        let store = Arc::new(MemoryLedgerStore::new());
        let service = ReferralService::new(
            store.clone(),
            Arc::new(SystemClock),
            UnlockConfig::default(),
            RetryConfig::default(),
            Arc::new(TracingSink),
        );
        Setup { store, service }
    }

    async fn members(store: &MemoryLedgerStore, n: usize) -> Vec<MemberId> {
        let mut journal = Journal::new(store, Utc::now());
        let mut ids = Vec::new();
        for _ in 0..n {
            let member = MemberId::new();
            journal
                .wallet_or_open(WalletOwner::Member(member))
                .await
                .unwrap();
            ids.push(member);
        }
        journal.commit().await.unwrap();
        ids
    }

    #[tokio::test]
    async fn test_link_counts_referral_and_unlocks() {
        let s = setup();
        let ids = members(&s.store, 2).await;

        let outcome = s.service.link(ids[0], ids[1]).await.unwrap();
        let LinkOutcome::Linked {
            sponsor_referrals,
            unlock,
            ..
        } = outcome
        else {
            panic!("expected link, got {:?}", outcome);
        };
        assert_eq!(sponsor_referrals, 1);
        assert_eq!(unlock.map(|h| h.new_unlocked_level), Some(5));
        assert_eq!(s.store.sponsor_of(ids[0]).await.unwrap(), Some(ids[1]));

        let sponsor = s
            .store
            .wallet(&WalletOwner::Member(ids[1]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sponsor.total_referrals, 1);
        assert_eq!(sponsor.unlocked_level, 5);
    }

    #[tokio::test]
    async fn test_second_sponsor_rejected() {
        let s = setup();
        let ids = members(&s.store, 3).await;
        s.service.link(ids[0], ids[1]).await.unwrap();

        let outcome = s.service.link(ids[0], ids[2]).await.unwrap();
        assert_eq!(
            outcome,
            LinkOutcome::Rejected(LinkRejection::AlreadyLinked { sponsor: ids[1] })
        );
        let other = s
            .store
            .wallet(&WalletOwner::Member(ids[2]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(other.total_referrals, 0);
    }

    #[tokio::test]
    async fn test_cycle_rejected() {
        let s = setup();
        let ids = members(&s.store, 3).await;
        s.service.link(ids[0], ids[1]).await.unwrap();
        s.service.link(ids[1], ids[2]).await.unwrap();

        assert_eq!(
            s.service.link(ids[2], ids[0]).await.unwrap(),
            LinkOutcome::Rejected(LinkRejection::WouldCycle)
        );
        assert_eq!(
            s.service.link(ids[0], ids[0]).await.unwrap(),
            LinkOutcome::Rejected(LinkRejection::SelfReferral)
        );
    }

    #[tokio::test]
    async fn test_unknown_member_rejected() {
        let s = setup();
        let ids = members(&s.store, 1).await;
        let stranger = MemberId::new();

        assert_eq!(
            s.service.link(ids[0], stranger).await.unwrap(),
            LinkOutcome::Rejected(LinkRejection::UnknownMember { member: stranger })
        );
    }

    #[tokio::test]
    async fn test_concurrent_opposite_links_cannot_cycle() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ids = members(&store, 2).await;
        let service = interleaved(&store);

        let (forward, backward) = tokio::join!(
            service.link(ids[0], ids[1]),
            service.link(ids[1], ids[0])
        );
        let outcomes = [forward.unwrap(), backward.unwrap()];

        let linked = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, LinkOutcome::Linked { .. }))
            .count();
        assert_eq!(linked, 1, "outcomes: {:?}", outcomes);
        assert!(outcomes
            .iter()
            .any(|outcome| *outcome == LinkOutcome::Rejected(LinkRejection::WouldCycle)));
        assert_acyclic(&store, ids[0]).await;
        assert_acyclic(&store, ids[1]).await;
    }

    #[tokio::test]
    async fn test_concurrent_links_closing_longer_loop() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ids = members(&store, 3).await;
        let service = interleaved(&store);
        service.link(ids[0], ids[1]).await.unwrap();

        // 1 under 2 and 2 under 0 would close 0 -> 1 -> 2 -> 0.
        let (upper, lower) = tokio::join!(
            service.link(ids[1], ids[2]),
            service.link(ids[2], ids[0])
        );
        let outcomes = [upper.unwrap(), lower.unwrap()];

        let linked = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, LinkOutcome::Linked { .. }))
            .count();
        assert_eq!(linked, 1, "outcomes: {:?}", outcomes);
        for member in &ids {
            assert_acyclic(&store, *member).await;
        }
    }
}
