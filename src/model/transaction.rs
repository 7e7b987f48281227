//! Ledger transaction records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{OrderId, Points, WalletOwner};

/// Whether a transaction adds to or removes from a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Credit,
    Debit,
}

/// Which balance a transaction moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// Spendable now.
    Available,
    /// Locked pending a level unlock.
    Onhold,
}

/// Why points moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Buyer's own share of a released order.
    Personal,
    /// Direct sponsor's share.
    Referral,
    /// One level of the sponsor tree.
    Community,
    /// Platform reserve.
    Reserve,
    /// Merchant/corporate pass-through legs of a release.
    Settlement,
    /// Operator correction removing points.
    DebitAdjust,
    /// Operator correction adding points.
    CreditAdjust,
}

str_enum!(Direction { Credit => "credit", Debit => "debit" });
str_enum!(Bucket { Available => "available", Onhold => "onhold" });
str_enum!(Category {
    Personal => "personal",
    Referral => "referral",
    Community => "community",
    Reserve => "reserve",
    Settlement => "settlement",
    DebitAdjust => "debit_adjust",
    CreditAdjust => "credit_adjust",
});

/// Typed context carried by a transaction in place of a free-text reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingContext {
    pub order_id: Option<OrderId>,
    pub level: Option<u8>,
    pub note: Option<String>,
}

/// A single requested balance movement, before it is applied to a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub direction: Direction,
    pub bucket: Bucket,
    pub category: Category,
    pub amount: Points,
    pub context: PostingContext,
}

impl Posting {
    pub fn credit(bucket: Bucket, category: Category, amount: Points) -> Self {
        Self {
            direction: Direction::Credit,
            bucket,
            category,
            amount,
            context: PostingContext::default(),
        }
    }

    pub fn debit(bucket: Bucket, category: Category, amount: Points) -> Self {
        Self {
            direction: Direction::Debit,
            bucket,
            category,
            amount,
            context: PostingContext::default(),
        }
    }

    pub fn for_order(mut self, order_id: OrderId) -> Self {
        self.context.order_id = Some(order_id);
        self
    }

    pub fn at_level(mut self, level: u8) -> Self {
        self.context.level = Some(level);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.context.note = Some(note.into());
        self
    }
}

/// An immutable ledger entry.
///
/// `available_after`, `onhold_after` and `total_rp_after` snapshot the owning
/// wallet immediately after this entry was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    /// Global creation order; assigned by the store at commit (0 before).
    pub sequence: u64,
    pub wallet: WalletOwner,
    pub direction: Direction,
    pub bucket: Bucket,
    pub category: Category,
    pub amount: Points,
    pub context: PostingContext,
    pub available_after: Points,
    pub onhold_after: Points,
    pub total_rp_after: Points,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// The posting this transaction recorded.
    pub fn posting(&self) -> Posting {
        Posting {
            direction: self.direction,
            bucket: self.bucket,
            category: self.category,
            amount: self.amount,
            context: self.context.clone(),
        }
    }

    /// Render a human-readable reason.
    pub fn reason(&self) -> String {
        let mut reason = match (self.category, self.direction) {
            (Category::Personal, _) => "Personal points".to_string(),
            (Category::Referral, _) => "Referral points".to_string(),
            (Category::Community, Direction::Credit) if self.bucket == Bucket::Onhold => {
                "Community points (locked)".to_string()
            }
            (Category::Community, Direction::Debit) => "Community points unlocked".to_string(),
            (Category::Community, _) => "Community points".to_string(),
            (Category::Reserve, _) => "Company reserve".to_string(),
            (Category::Settlement, Direction::Credit) => "Settlement received".to_string(),
            (Category::Settlement, Direction::Debit) => "Settlement paid out".to_string(),
            (Category::DebitAdjust, _) => "Manual debit adjustment".to_string(),
            (Category::CreditAdjust, _) => "Manual credit adjustment".to_string(),
        };
        if let Some(level) = self.context.level {
            reason.push_str(&format!(" level {}", level));
        }
        if let Some(order_id) = self.context.order_id {
            reason.push_str(&format!(" for order {}", order_id));
        }
        if let Some(note) = &self.context.note {
            reason.push_str(&format!(": {}", note));
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemberId;

    fn community_tx(direction: Direction, bucket: Bucket) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            sequence: 1,
            wallet: WalletOwner::Member(MemberId::new()),
            direction,
            bucket,
            category: Category::Community,
            amount: Points::from(5),
            context: PostingContext {
                order_id: None,
                level: Some(3),
                note: None,
            },
            available_after: Points::ZERO,
            onhold_after: Points::from(5),
            total_rp_after: Points::ZERO,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_reason_renders_level() {
        let tx = community_tx(Direction::Credit, Bucket::Onhold);
        assert_eq!(tx.reason(), "Community points (locked) level 3");
    }

    #[test]
    fn test_reason_renders_order_and_note() {
        let order_id = OrderId::new();
        let mut tx = community_tx(Direction::Credit, Bucket::Available);
        tx.category = Category::Personal;
        tx.context.level = None;
        tx.context.order_id = Some(order_id);
        tx.context.note = Some("promo".to_string());
        assert_eq!(
            tx.reason(),
            format!("Personal points for order {}: promo", order_id)
        );
    }

    #[test]
    fn test_category_parse() {
        for category in [
            Category::Personal,
            Category::Referral,
            Category::Community,
            Category::Reserve,
            Category::Settlement,
            Category::DebitAdjust,
            Category::CreditAdjust,
        ] {
            assert_eq!(Category::parse(category.as_str()), Some(category));
        }
        assert_eq!(Category::parse("bonus"), None);
    }
}
