//! Distribution engine.
//!
//! Releases an escrow by fanning the order's reward pool out to the merchant
//! and corporate pass-through, the buyer, the direct sponsor, the community
//! tree and the company reserve. Everything is posted in one journal and
//! committed as one batch; a conflicting commit re-runs the whole release.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::config::RewardsConfig;
use crate::error::{EngineError, IntegrityError, Result};
use crate::ledger::Journal;
use crate::model::{
    Bucket, Category, CorporateId, MemberId, OnholdId, OnholdStatus, OrderId, OrderStatus,
    Points, Posting, Transaction, WalletOwner,
};
use crate::notify::{publish_all, LedgerEvent, NotificationSink};
use crate::storage::LedgerStore;
use crate::utils::retry::{run_with_retry, RetryConfig};

mod tree;

pub use tree::{CommunityDistribution, CommunityTreeWalker, LevelCredit, SponsorLookup};

/// Why an escrow cannot be released right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotEligibleReason {
    OnholdNotFound,
    AlreadyReleased,
    Refunded,
    /// No release deadline yet; the order has not shipped.
    NotShipped,
    NotDue { auto_release_at: DateTime<Utc> },
    OrderNotShipped { status: OrderStatus },
}

/// Amounts posted by one release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionSummary {
    pub onhold_id: OnholdId,
    pub order_id: OrderId,
    pub buyer: MemberId,
    /// `order_total × budget% / 100`, in currency units.
    pub reward: Points,
    /// Reward converted to points.
    pub pool: Points,
    pub personal: Points,
    /// Sponsor credited with the referral share, if any.
    pub sponsor: Option<MemberId>,
    pub referral: Points,
    pub community: CommunityDistribution,
    pub reserve: Points,
    /// Committed transactions, in posting order.
    pub transactions: Vec<Transaction>,
}

impl DistributionSummary {
    fn events(&self) -> Vec<LedgerEvent> {
        let mut events = Vec::new();
        if self.personal > Points::ZERO {
            events.push(LedgerEvent::MemberCredited {
                member: self.buyer,
                order_id: self.order_id,
                amount: self.personal,
            });
        }
        if let Some(sponsor) = self.sponsor {
            events.push(LedgerEvent::SponsorCredited {
                sponsor,
                buyer: self.buyer,
                order_id: self.order_id,
                amount: self.referral,
            });
        }
        events.extend(
            self.community
                .credits
                .iter()
                .map(|credit| LedgerEvent::CommunityCredited {
                    member: credit.member,
                    order_id: self.order_id,
                    level: credit.level,
                    amount: credit.amount,
                    locked: credit.locked,
                }),
        );
        events.push(LedgerEvent::OrderCompleted {
            order_id: self.order_id,
            onhold_id: self.onhold_id,
            pool: self.pool,
        });
        events
    }
}

/// Result of a release attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Released(DistributionSummary),
    NotEligible(NotEligibleReason),
    /// The corporate account cannot cover the pool. Nothing was posted.
    InsufficientFloat {
        corporate: CorporateId,
        required: Points,
        available: Points,
    },
}

pub struct DistributionEngine {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    rewards: RewardsConfig,
    retry: RetryConfig,
    sink: Arc<dyn NotificationSink>,
}

impl DistributionEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        rewards: RewardsConfig,
        retry: RetryConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            clock,
            rewards,
            retry,
            sink,
        }
    }

    /// Release an escrow and distribute its reward pool.
    ///
    /// Safe to call repeatedly: once released, later calls report
    /// [`NotEligibleReason::AlreadyReleased`] and post nothing.
    #[tracing::instrument(name = "distribution.release", skip(self), fields(onhold_id = %onhold_id))]
    pub async fn release(&self, onhold_id: OnholdId) -> Result<ReleaseOutcome> {
        let result = run_with_retry(&self.retry, "distribution.release", || {
            self.try_release(onhold_id)
        })
        .await;

        match &result {
            Ok(ReleaseOutcome::Released(summary)) => {
                info!(
                    order_id = %summary.order_id,
                    pool = %summary.pool,
                    transactions = summary.transactions.len(),
                    "Escrow released"
                );
                publish_all(self.sink.as_ref(), summary.events()).await;
            }
            Ok(ReleaseOutcome::NotEligible(reason)) => {
                debug!(?reason, "Escrow not eligible for release");
            }
            Ok(ReleaseOutcome::InsufficientFloat {
                corporate,
                required,
                available,
            }) => {
                info!(
                    corporate = %corporate,
                    required = %required,
                    available = %available,
                    "Corporate float too low, release deferred"
                );
            }
            Err(EngineError::Integrity(e)) => {
                error!(error = %e, "Integrity failure, release aborted");
            }
            Err(_) => {}
        }
        result
    }

    async fn try_release(&self, onhold_id: OnholdId) -> Result<ReleaseOutcome> {
        let now = self.clock.now();
        let store = self.store.as_ref();

        let Some(mut onhold) = store.onhold(onhold_id).await? else {
            return Ok(ReleaseOutcome::NotEligible(NotEligibleReason::OnholdNotFound));
        };
        match onhold.status {
            OnholdStatus::Onhold => {}
            OnholdStatus::Released => {
                return Ok(ReleaseOutcome::NotEligible(NotEligibleReason::AlreadyReleased))
            }
            OnholdStatus::Refunded => {
                return Ok(ReleaseOutcome::NotEligible(NotEligibleReason::Refunded))
            }
        }
        let Some(auto_release_at) = onhold.auto_release_at else {
            return Ok(ReleaseOutcome::NotEligible(NotEligibleReason::NotShipped));
        };
        if now < auto_release_at {
            return Ok(ReleaseOutcome::NotEligible(NotEligibleReason::NotDue {
                auto_release_at,
            }));
        }

        let mut order = store
            .order(onhold.order_id)
            .await?
            .ok_or(IntegrityError::MissingOrder {
                onhold_id,
                order_id: onhold.order_id,
            })?;
        if order.status != OrderStatus::Shipped {
            return Ok(ReleaseOutcome::NotEligible(
                NotEligibleReason::OrderNotShipped {
                    status: order.status,
                },
            ));
        }
        let merchant = store
            .merchant(order.merchant_id)
            .await?
            .ok_or(IntegrityError::MissingMerchant(order.merchant_id))?;

        let budget = merchant
            .reward_budget_percent
            .unwrap_or(self.rewards.default_reward_budget_percent);
        let reward = self.rewards.percent_of(order.total_amount, budget)?;
        let pool = self.rewards.to_points(reward)?;

        let mut journal = Journal::new(store, now);
        let merchant_wallet = WalletOwner::Merchant(merchant.id);
        let corporate_wallet = WalletOwner::Corporate(merchant.corporate_id);
        let buyer_wallet = WalletOwner::Member(order.buyer_id);
        for owner in [merchant_wallet, corporate_wallet, buyer_wallet] {
            if journal.wallet(owner).await?.is_none() {
                return Err(IntegrityError::MissingWallet(owner).into());
            }
        }

        let float = journal
            .wallet(corporate_wallet)
            .await?
            .map(|wallet| wallet.available_points())
            .unwrap_or(Points::ZERO);
        if float < pool {
            return Ok(ReleaseOutcome::InsufficientFloat {
                corporate: merchant.corporate_id,
                required: pool,
                available: float,
            });
        }

        if pool > Points::ZERO {
            for owner in [merchant_wallet, corporate_wallet] {
                let settle = |posting: Posting| posting.for_order(order.id);
                journal.post(
                    owner,
                    settle(Posting::credit(Bucket::Available, Category::Settlement, pool)),
                )?;
                journal.post(
                    owner,
                    settle(Posting::debit(Bucket::Available, Category::Settlement, pool)),
                )?;
            }
        }

        let shares = &self.rewards.shares;
        let personal = self.rewards.percent_of(pool, shares.personal)?;
        let referral_share = self.rewards.percent_of(pool, shares.referral)?;
        let community_share = self.rewards.percent_of(pool, shares.community)?;
        let reserve = self.rewards.percent_of(pool, shares.reserve)?;

        credit_available(&mut journal, buyer_wallet, Category::Personal, personal, order.id)?;

        let mut sponsor = None;
        let mut referral = Points::ZERO;
        if let Some(direct) = store.sponsor_of(order.buyer_id).await? {
            let owner = WalletOwner::Member(direct);
            if journal.wallet(owner).await?.is_none() {
                debug!(sponsor = %direct, "Sponsor has no wallet, referral share not posted");
            } else if credit_available(
                &mut journal,
                owner,
                Category::Referral,
                referral_share,
                order.id,
            )? {
                sponsor = Some(direct);
                referral = referral_share;
            }
        }

        let community = CommunityTreeWalker::new(&self.rewards)
            .distribute(store, &mut journal, order.buyer_id, order.id, community_share)
            .await?;

        journal.wallet_or_open(WalletOwner::Company).await?;
        credit_available(&mut journal, WalletOwner::Company, Category::Reserve, reserve, order.id)?;

        onhold.status = OnholdStatus::Released;
        onhold.released_at = Some(now);
        order.status = OrderStatus::Completed;
        order.completed_at = Some(now);
        let order_id = order.id;
        let buyer = order.buyer_id;
        journal.put_onhold(onhold);
        journal.put_order(order);

        let transactions = journal.commit().await?;
        Ok(ReleaseOutcome::Released(DistributionSummary {
            onhold_id,
            order_id,
            buyer,
            reward,
            pool,
            personal,
            sponsor,
            referral,
            community,
            reserve,
            transactions,
        }))
    }
}

/// Credit `amount` to a wallet's available bucket unless it is zero.
fn credit_available(
    journal: &mut Journal<'_>,
    owner: WalletOwner,
    category: Category,
    amount: Points,
    order_id: OrderId,
) -> Result<bool> {
    if amount <= Points::ZERO {
        return Ok(false);
    }
    journal.post(
        owner,
        Posting::credit(Bucket::Available, category, amount).for_order(order_id),
    )?;
    Ok(true)
}

#[cfg(test)]
mod tests;
