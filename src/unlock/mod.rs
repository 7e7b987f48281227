//! Unlock evaluator.
//!
//! A member's unlocked level is a step function of their referral count.
//! When it rises, community points held at levels that are now unlocked move
//! from on hold to available. Nothing is ever re-locked.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::UnlockConfig;
use crate::error::{IntegrityError, Result};
use crate::ledger::Journal;
use crate::model::{Bucket, Category, MemberId, Points, Posting, UnlockHistory, WalletOwner};
use crate::notify::{publish_all, LedgerEvent, NotificationSink};
use crate::storage::LedgerStore;
use crate::utils::retry::{run_with_retry, RetryConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnlockOutcome {
    /// The unlocked level rose; the history row describes what moved.
    Unlocked(UnlockHistory),
    /// The referral count does not reach a higher tier.
    Unchanged { unlocked_level: u8, referrals: u32 },
    WalletNotFound,
}

pub struct UnlockEvaluator {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    config: UnlockConfig,
    retry: RetryConfig,
    sink: Arc<dyn NotificationSink>,
}

impl UnlockEvaluator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        config: UnlockConfig,
        retry: RetryConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            retry,
            sink,
        }
    }

    /// Recompute a member's unlocked level from their referral count.
    #[tracing::instrument(name = "unlock.evaluate", skip(self), fields(member = %member))]
    pub async fn evaluate(&self, member: MemberId) -> Result<UnlockOutcome> {
        let outcome = run_with_retry(&self.retry, "unlock.evaluate", || {
            self.try_evaluate(member)
        })
        .await?;
        if let UnlockOutcome::Unlocked(history) = &outcome {
            publish_all(self.sink.as_ref(), vec![unlocked_event(history)]).await;
        }
        Ok(outcome)
    }

    async fn try_evaluate(&self, member: MemberId) -> Result<UnlockOutcome> {
        let mut journal = Journal::new(self.store.as_ref(), self.clock.now());
        let Some(wallet) = journal.wallet(WalletOwner::Member(member)).await? else {
            return Ok(UnlockOutcome::WalletNotFound);
        };
        let (unlocked_level, referrals) = (wallet.unlocked_level, wallet.total_referrals);
        let stale = wallet.evaluated_referrals != referrals;

        match reevaluate(&mut journal, &self.config, member).await? {
            Some(history) => {
                journal.commit().await?;
                Ok(UnlockOutcome::Unlocked(history))
            }
            None => {
                if stale {
                    journal.commit().await?;
                }
                Ok(UnlockOutcome::Unchanged {
                    unlocked_level,
                    referrals,
                })
            }
        }
    }
}

pub(crate) fn unlocked_event(history: &UnlockHistory) -> LedgerEvent {
    LedgerEvent::LevelsUnlocked {
        member: history.member,
        previous_level: history.previous_unlocked_level,
        new_level: history.new_unlocked_level,
        released_cp: history.released_cp,
    }
}

/// Raise `member`'s unlocked level inside `journal` if their referral count
/// now reaches a higher tier.
///
/// Every locked level row at or below the new level is released in full and
/// the same amount is moved from the wallet's on-hold bucket to available,
/// one debit and one credit per level. `total_cp` is unchanged. Returns the
/// history row recorded, or `None` when the level stays where it is.
///
/// The wallet's `evaluated_referrals` is brought up to date whenever it
/// lags, so the next history row starts from the count seen here.
pub(crate) async fn reevaluate(
    journal: &mut Journal<'_>,
    config: &UnlockConfig,
    member: MemberId,
) -> Result<Option<UnlockHistory>> {
    let owner = WalletOwner::Member(member);
    let (referrals, previous_referrals, previous_level) = journal
        .wallet(owner)
        .await?
        .map(|wallet| {
            (
                wallet.total_referrals,
                wallet.evaluated_referrals,
                wallet.unlocked_level,
            )
        })
        .ok_or(IntegrityError::MissingWallet(owner))?;
    if referrals != previous_referrals {
        journal.wallet_mut(owner)?.evaluated_referrals = referrals;
    }

    let new_level = config.unlocked_level_for(referrals);
    if new_level <= previous_level {
        return Ok(None);
    }

    let mut released_cp = Points::ZERO;
    let locked = journal.locked_levels(member).await?;
    for level in locked.into_iter().filter(|level| *level <= new_level) {
        let moved = journal.level(member, level).await?.release();
        if moved <= Points::ZERO {
            continue;
        }
        journal.post(
            owner,
            Posting::debit(Bucket::Onhold, Category::Community, moved).at_level(level),
        )?;
        journal.post(
            owner,
            Posting::credit(Bucket::Available, Category::Community, moved).at_level(level),
        )?;
        released_cp += moved;
    }

    journal.wallet_mut(owner)?.unlocked_level = new_level;

    let history = UnlockHistory {
        id: Uuid::new_v4(),
        member,
        previous_referrals,
        new_referrals: referrals,
        previous_unlocked_level: previous_level,
        new_unlocked_level: new_level,
        released_cp,
        created_at: journal.now(),
    };
    journal.record_unlock(history.clone());
    info!(
        member = %member,
        previous_level,
        new_level,
        released_cp = %released_cp,
        "Community levels unlocked"
    );
    Ok(Some(history))
}
