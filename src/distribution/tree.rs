//! Community tree walker.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error};

use crate::config::RewardsConfig;
use crate::error::{IntegrityError, Result};
use crate::ledger::Journal;
use crate::model::{
    Bucket, Category, MemberId, OrderId, Points, Posting, WalletOwner, MAX_COMMUNITY_LEVEL,
};
use crate::storage::StorageError;

/// Resolves a member's direct sponsor.
#[async_trait]
pub trait SponsorLookup: Send + Sync {
    async fn sponsor_of(&self, member: MemberId) -> std::result::Result<Option<MemberId>, StorageError>;
}

/// One community credit posted by the walker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelCredit {
    pub level: u8,
    pub member: MemberId,
    pub amount: Points,
    pub locked: bool,
}

/// What the walker did with a community share.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommunityDistribution {
    pub credits: Vec<LevelCredit>,
    /// Levels whose sponsor has no wallet.
    pub skipped_levels: Vec<u8>,
    /// Share left over from short chains, skipped levels, unallocated
    /// percentages and truncation. Not posted anywhere.
    pub undistributed: Points,
}

impl CommunityDistribution {
    pub fn distributed(&self) -> Points {
        self.credits.iter().map(|credit| credit.amount).sum()
    }
}

/// Walks the sponsor chain above a buyer and credits each level its share.
pub struct CommunityTreeWalker<'a> {
    rewards: &'a RewardsConfig,
}

impl<'a> CommunityTreeWalker<'a> {
    pub fn new(rewards: &'a RewardsConfig) -> Self {
        Self { rewards }
    }

    /// Post level credits for `community_amount` into `journal`.
    ///
    /// Level 1 is the buyer's direct sponsor. A level at or below the
    /// sponsor's unlocked level is credited as available; deeper levels are
    /// credited on hold and their level row is locked. Meeting a member twice
    /// fails the walk with [`IntegrityError::SponsorCycle`].
    pub async fn distribute<L>(
        &self,
        lookup: &L,
        journal: &mut Journal<'_>,
        buyer: MemberId,
        order_id: OrderId,
        community_amount: Points,
    ) -> Result<CommunityDistribution>
    where
        L: SponsorLookup + ?Sized,
    {
        let mut distribution = CommunityDistribution::default();
        let mut visited = HashSet::from([buyer]);
        let mut current = buyer;

        for level in 1..=MAX_COMMUNITY_LEVEL {
            let Some(sponsor) = lookup.sponsor_of(current).await? else {
                break;
            };
            if !visited.insert(sponsor) {
                error!(
                    buyer = %buyer,
                    member = %sponsor,
                    level,
                    "Sponsor cycle in community tree"
                );
                return Err(IntegrityError::SponsorCycle {
                    member: sponsor,
                    level,
                }
                .into());
            }
            current = sponsor;

            let owner = WalletOwner::Member(sponsor);
            let unlocked_level = match journal.wallet(owner).await? {
                Some(wallet) => wallet.unlocked_level,
                None => {
                    debug!(member = %sponsor, level, "Sponsor has no wallet, skipping level");
                    distribution.skipped_levels.push(level);
                    continue;
                }
            };

            let percent = self
                .rewards
                .level_percentages
                .percent(level)
                .unwrap_or(Points::ZERO);
            let amount = self.rewards.percent_of(community_amount, percent)?;
            if amount <= Points::ZERO {
                continue;
            }

            let locked = level > unlocked_level;
            let row = journal.level(sponsor, level).await?;
            let bucket = if locked {
                row.credit_locked(amount);
                Bucket::Onhold
            } else {
                row.credit_available(amount);
                Bucket::Available
            };
            journal.post(
                owner,
                Posting::credit(bucket, Category::Community, amount)
                    .for_order(order_id)
                    .at_level(level),
            )?;

            distribution.credits.push(LevelCredit {
                level,
                member: sponsor,
                amount,
                locked,
            });
        }

        distribution.undistributed = community_amount - distribution.distributed();
        Ok(distribution)
    }
}
