//! Sponsor tree, per-level community balances and unlock history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MemberId, Points};

/// Deepest sponsor level that receives community points.
pub const MAX_COMMUNITY_LEVEL: u8 = 30;

/// Directed `child → sponsor` edge. A child has at most one sponsor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralEdge {
    pub child: MemberId,
    pub sponsor: MemberId,
    pub created_at: DateTime<Utc>,
}

/// Community points a member holds at one sponsor level.
///
/// Invariant: `total_cp == available_cp + onhold_cp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityPointLevel {
    pub member: MemberId,
    pub level: u8,
    pub total_cp: Points,
    pub available_cp: Points,
    pub onhold_cp: Points,
    pub is_locked: bool,
    pub version: u64,
}

impl CommunityPointLevel {
    pub fn new(member: MemberId, level: u8) -> Self {
        Self {
            member,
            level,
            total_cp: Points::ZERO,
            available_cp: Points::ZERO,
            onhold_cp: Points::ZERO,
            is_locked: false,
            version: 0,
        }
    }

    pub fn credit_available(&mut self, amount: Points) {
        self.available_cp += amount;
        self.total_cp += amount;
    }

    pub fn credit_locked(&mut self, amount: Points) {
        self.onhold_cp += amount;
        self.total_cp += amount;
        self.is_locked = true;
    }

    /// Move everything on hold to available and unlock the row.
    ///
    /// Returns the amount moved. `total_cp` is unchanged.
    pub fn release(&mut self) -> Points {
        let moved = self.onhold_cp;
        self.available_cp += moved;
        self.onhold_cp = Points::ZERO;
        self.is_locked = false;
        moved
    }

    pub fn is_balanced(&self) -> bool {
        self.total_cp == self.available_cp + self.onhold_cp
    }
}

/// Audit row written whenever a member's unlocked level rises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockHistory {
    pub id: Uuid,
    pub member: MemberId,
    pub previous_referrals: u32,
    pub new_referrals: u32,
    pub previous_unlocked_level: u8,
    pub new_unlocked_level: u8,
    pub released_cp: Points,
    pub created_at: DateTime<Utc>,
}
