//! Orders and their escrowed points.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{MemberId, MerchantId, OnholdId, OrderId, Points};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Shipped,
    Completed,
    Cancelled,
}

/// One purchased line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub points: Points,
    pub quantity: u32,
}

/// Local mirror of an order owned by the order lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub merchant_id: MerchantId,
    pub buyer_id: MemberId,
    /// Order total in currency units; the reward budget is taken from this.
    pub total_amount: Decimal,
    pub lines: Vec<OrderLine>,
    pub shipping_points: Points,
    pub status: OrderStatus,
    pub shipped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Order {
    pub fn new(
        id: OrderId,
        merchant_id: MerchantId,
        buyer_id: MemberId,
        total_amount: Decimal,
    ) -> Self {
        Self {
            id,
            merchant_id,
            buyer_id,
            total_amount,
            lines: Vec::new(),
            shipping_points: Points::ZERO,
            status: OrderStatus::Pending,
            shipped_at: None,
            completed_at: None,
            version: 0,
        }
    }

    pub fn with_line(mut self, points: Points, quantity: u32) -> Self {
        self.lines.push(OrderLine { points, quantity });
        self
    }

    pub fn with_shipping(mut self, shipping_points: Points) -> Self {
        self.shipping_points = shipping_points;
        self
    }

    /// Σ(line.points × line.qty), or `None` if it does not fit in `Points`.
    pub fn items_points(&self) -> Option<Points> {
        self.lines.iter().try_fold(Points::ZERO, |sum, line| {
            line.points
                .checked_mul(Points::from(line.quantity))
                .and_then(|points| sum.checked_add(points))
        })
    }

    /// Items plus shipping, or `None` on overflow.
    pub fn total_points(&self) -> Option<Points> {
        self.items_points()?.checked_add(self.shipping_points)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnholdStatus {
    Onhold,
    Released,
    Refunded,
}

/// Points held for an order until release or refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnholdPoint {
    pub id: OnholdId,
    pub order_id: OrderId,
    pub total_points: Points,
    pub items_points: Points,
    pub shipping_points: Points,
    pub status: OnholdStatus,
    pub shipped_at: Option<DateTime<Utc>>,
    pub auto_release_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl OnholdPoint {
    /// `None` when the order's points overflow.
    pub fn for_order(order: &Order, now: DateTime<Utc>) -> Option<Self> {
        let items_points = order.items_points()?;
        Some(Self {
            id: OnholdId::new(),
            order_id: order.id,
            total_points: order.total_points()?,
            items_points,
            shipping_points: order.shipping_points,
            status: OnholdStatus::Onhold,
            shipped_at: None,
            auto_release_at: None,
            released_at: None,
            refunded_at: None,
            refund_reason: None,
            created_at: now,
            version: 0,
        })
    }

    /// Still on hold and past its release deadline.
    pub fn is_ready_for_release(&self, now: DateTime<Utc>) -> bool {
        self.status == OnholdStatus::Onhold
            && self.auto_release_at.is_some_and(|deadline| deadline <= now)
    }
}

str_enum!(OrderStatus {
    Pending => "pending",
    Shipped => "shipped",
    Completed => "completed",
    Cancelled => "cancelled",
});
str_enum!(OnholdStatus {
    Onhold => "onhold",
    Released => "released",
    Refunded => "refunded",
});
