//! Ledger notifications.
//!
//! Events are published only after their batch has committed. Delivery is
//! best effort: a sink that cannot deliver logs and drops the event, it never
//! fails the ledger operation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::model::{MemberId, OnholdId, OrderId, Points};

/// Default channel capacity for broadcast sinks.
const CHANNEL_CAPACITY: usize = 1024;

/// Something a downstream consumer may want to tell a member about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    MemberCredited {
        member: MemberId,
        order_id: OrderId,
        amount: Points,
    },
    SponsorCredited {
        sponsor: MemberId,
        buyer: MemberId,
        order_id: OrderId,
        amount: Points,
    },
    CommunityCredited {
        member: MemberId,
        order_id: OrderId,
        level: u8,
        amount: Points,
        locked: bool,
    },
    OrderCompleted {
        order_id: OrderId,
        onhold_id: OnholdId,
        pool: Points,
    },
    LevelsUnlocked {
        member: MemberId,
        previous_level: u8,
        new_level: u8,
        released_cp: Points,
    },
    EscrowRefunded {
        order_id: OrderId,
        onhold_id: OnholdId,
        reason: String,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MemberCredited { .. } => "member_credited",
            Self::SponsorCredited { .. } => "sponsor_credited",
            Self::CommunityCredited { .. } => "community_credited",
            Self::OrderCompleted { .. } => "order_completed",
            Self::LevelsUnlocked { .. } => "levels_unlocked",
            Self::EscrowRefunded { .. } => "escrow_refunded",
        }
    }
}

/// Receiver of committed ledger events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: Arc<LedgerEvent>);
}

/// Publish events in order.
pub(crate) async fn publish_all(sink: &dyn NotificationSink, events: Vec<LedgerEvent>) {
    for event in events {
        sink.publish(Arc::new(event)).await;
    }
}

/// Writes each event to the log as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn publish(&self, event: Arc<LedgerEvent>) {
        match serde_json::to_string(event.as_ref()) {
            Ok(payload) => info!(event = event.name(), %payload, "Ledger event"),
            Err(e) => warn!(event = event.name(), error = %e, "Failed to encode ledger event"),
        }
    }
}

/// Fans events out to in-process subscribers over a tokio broadcast channel.
pub struct ChannelSink {
    sender: broadcast::Sender<Arc<LedgerEvent>>,
}

impl ChannelSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<LedgerEvent>> {
        self.sender.subscribe()
    }
}

impl Default for ChannelSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn publish(&self, event: Arc<LedgerEvent>) {
        let name = event.name();
        // Send fails only when nobody is listening.
        match self.sender.send(event) {
            Ok(receivers) => debug!(event = name, receivers, "Published ledger event"),
            Err(_) => debug!(event = name, "No subscribers for ledger event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let sink = ChannelSink::new();
        let mut rx = sink.subscribe();
        let order_id = OrderId::new();
        let onhold_id = OnholdId::new();

        publish_all(
            &sink,
            vec![
                LedgerEvent::MemberCredited {
                    member: MemberId::new(),
                    order_id,
                    amount: Points::from(30),
                },
                LedgerEvent::OrderCompleted {
                    order_id,
                    onhold_id,
                    pool: Points::from(100),
                },
            ],
        )
        .await;

        assert_eq!(rx.recv().await.unwrap().name(), "member_credited");
        assert_eq!(rx.recv().await.unwrap().name(), "order_completed");
    }

    #[tokio::test]
    async fn test_channel_sink_without_subscribers() {
        let sink = ChannelSink::new();
        sink.publish(Arc::new(LedgerEvent::EscrowRefunded {
            order_id: OrderId::new(),
            onhold_id: OnholdId::new(),
            reason: "cancelled".to_string(),
        }))
        .await;
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = LedgerEvent::LevelsUnlocked {
            member: MemberId::new(),
            previous_level: 0,
            new_level: 5,
            released_cp: Points::from(4),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "levels_unlocked");
        assert_eq!(json["new_level"], 5);
    }
}
