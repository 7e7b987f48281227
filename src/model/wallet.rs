//! Wallet balances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Bucket, Category, Direction, Points, Posting, WalletOwner};
use crate::error::LedgerError;

/// The balance columns of a wallet.
///
/// Every column is derivable from the wallet's transactions; see
/// [`crate::ledger::replay`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub available_points: Points,
    pub onhold_points: Points,
    /// Net ledger sum: every credit minus every debit, across both buckets.
    ///
    /// Settlement pass-through and unlock moves post a debit next to their
    /// credit, so this can dip within a commit and ends where it started for
    /// those legs. Earned points only ever raise it.
    pub total_points: Points,
    pub total_pp: Points,
    pub total_rp: Points,
    pub total_cp: Points,
}

impl Balances {
    /// Apply a posting, rejecting it before mutation if it would drive the
    /// debited bucket negative.
    pub fn apply(&mut self, owner: &WalletOwner, posting: &Posting) -> Result<(), LedgerError> {
        let amount = posting.amount;
        if amount <= Points::ZERO {
            return Err(LedgerError::NonPositiveAmount {
                owner: *owner,
                amount,
            });
        }

        let signed = match posting.direction {
            Direction::Credit => amount,
            Direction::Debit => {
                let held = self.bucket(posting.bucket);
                if held < amount {
                    return Err(LedgerError::InsufficientBalance {
                        owner: *owner,
                        bucket: posting.bucket,
                        requested: amount,
                        available: held,
                    });
                }
                -amount
            }
        };

        match posting.bucket {
            Bucket::Available => self.available_points += signed,
            Bucket::Onhold => self.onhold_points += signed,
        }
        self.total_points += signed;
        match posting.category {
            Category::Personal => self.total_pp += signed,
            Category::Referral => self.total_rp += signed,
            Category::Community => self.total_cp += signed,
            Category::Reserve
            | Category::Settlement
            | Category::DebitAdjust
            | Category::CreditAdjust => {}
        }
        Ok(())
    }

    pub fn bucket(&self, bucket: Bucket) -> Points {
        match bucket {
            Bucket::Available => self.available_points,
            Bucket::Onhold => self.onhold_points,
        }
    }
}

/// A wallet row.
///
/// `version` is 0 for a wallet that has never been persisted. Every commit
/// that touches the wallet writes `version + 1` and is rejected if the stored
/// version moved in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub owner: WalletOwner,
    pub balances: Balances,
    pub total_referrals: u32,
    /// Referral count as of the last unlock evaluation.
    pub evaluated_referrals: u32,
    /// Highest community level credited as available; one of 0, 5, ..., 30.
    pub unlocked_level: u8,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn open(owner: WalletOwner, now: DateTime<Utc>) -> Self {
        Self {
            owner,
            balances: Balances::default(),
            total_referrals: 0,
            evaluated_referrals: 0,
            unlocked_level: 0,
            version: 0,
            updated_at: now,
        }
    }

    pub fn available_points(&self) -> Points {
        self.balances.available_points
    }

    pub fn onhold_points(&self) -> Points {
        self.balances.onhold_points
    }

    pub fn total_points(&self) -> Points {
        self.balances.total_points
    }
}
