//! Escrow manager.
//!
//! Holds an order's points on hold from payment until release or refund,
//! and stamps the release deadline when the order ships.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::{EscrowConfig, MAX_AUTO_RELEASE_DAYS};
use crate::error::{EngineError, IntegrityError, Result};
use crate::ledger::Journal;
use crate::model::{OnholdId, OnholdPoint, OnholdStatus, Order, OrderId, OrderStatus, Points};
use crate::notify::{publish_all, LedgerEvent, NotificationSink};
use crate::storage::{LedgerStore, StorageError};
use crate::utils::retry::{run_with_retry, RetryConfig};

/// Why an escrow request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EscrowRejection {
    AlreadyExists {
        order_id: OrderId,
        onhold_id: OnholdId,
    },
    InvalidOrder {
        detail: String,
    },
    OrderNotPending {
        status: OrderStatus,
    },
    NotFound,
    NotOnhold {
        status: OnholdStatus,
    },
    AlreadyShipped {
        shipped_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EscrowOutcome {
    Created(OnholdPoint),
    Shipped(OnholdPoint),
    Refunded(OnholdPoint),
    Rejected(EscrowRejection),
}

pub struct EscrowManager {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    config: EscrowConfig,
    retry: RetryConfig,
    sink: Arc<dyn NotificationSink>,
}

impl EscrowManager {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        config: EscrowConfig,
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

    /// Mirror `order` and put its points on hold.
    #[tracing::instrument(name = "escrow.create", skip_all, fields(order_id = %order.id))]
    pub async fn create_escrow(&self, order: Order) -> Result<EscrowOutcome> {
        if let Some(detail) = invalid_order(&order) {
            return Ok(EscrowOutcome::Rejected(EscrowRejection::InvalidOrder { detail }));
        }
        if order.status != OrderStatus::Pending {
            return Ok(EscrowOutcome::Rejected(EscrowRejection::OrderNotPending {
                status: order.status,
            }));
        }

        let outcome = run_with_retry(&self.retry, "escrow.create", || {
            self.try_create(order.clone())
        })
        .await?;
        if let EscrowOutcome::Created(onhold) = &outcome {
            info!(
                onhold_id = %onhold.id,
                total_points = %onhold.total_points,
                "Escrow created"
            );
        }
        Ok(outcome)
    }

    async fn try_create(&self, mut order: Order) -> Result<EscrowOutcome> {
        let store = self.store.as_ref();
        if let Some(existing) = store.onhold_for_order(order.id).await? {
            return Ok(already_exists(&existing));
        }
        order.version = store
            .order(order.id)
            .await?
            .map(|stored| stored.version)
            .unwrap_or(0);

        let mut journal = Journal::new(store, self.clock.now());
        let Some(onhold) = OnholdPoint::for_order(&order, journal.now()) else {
            return Ok(EscrowOutcome::Rejected(EscrowRejection::InvalidOrder {
                detail: "order points overflow".to_string(),
            }));
        };
        journal.put_order(order);
        journal.put_onhold(onhold.clone());

        match journal.commit().await {
            Ok(_) => Ok(EscrowOutcome::Created(OnholdPoint {
                version: onhold.version + 1,
                ..onhold
            })),
            Err(EngineError::Storage(StorageError::Duplicate { .. })) => {
                match store.onhold_for_order(onhold.order_id).await? {
                    Some(existing) => Ok(already_exists(&existing)),
                    None => Ok(EscrowOutcome::Rejected(EscrowRejection::NotFound)),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Record shipment and schedule the automatic release.
    ///
    /// `auto_release_days` falls back to the configured default.
    #[tracing::instrument(name = "escrow.mark_shipped", skip(self), fields(onhold_id = %onhold_id))]
    pub async fn mark_shipped(
        &self,
        onhold_id: OnholdId,
        auto_release_days: Option<u32>,
    ) -> Result<EscrowOutcome> {
        let days = auto_release_days.unwrap_or(self.config.auto_release_days);
        if days > MAX_AUTO_RELEASE_DAYS {
            return Err(EngineError::InvalidInput(format!(
                "auto_release_days must be at most {MAX_AUTO_RELEASE_DAYS}, got {days}"
            )));
        }
        let outcome = run_with_retry(&self.retry, "escrow.mark_shipped", || {
            self.try_mark_shipped(onhold_id, days)
        })
        .await?;
        if let EscrowOutcome::Shipped(onhold) = &outcome {
            info!(auto_release_at = ?onhold.auto_release_at, "Escrow shipped");
        }
        Ok(outcome)
    }

    async fn try_mark_shipped(&self, onhold_id: OnholdId, days: u32) -> Result<EscrowOutcome> {
        let store = self.store.as_ref();
        let Some(mut onhold) = store.onhold(onhold_id).await? else {
            return Ok(EscrowOutcome::Rejected(EscrowRejection::NotFound));
        };
        if onhold.status != OnholdStatus::Onhold {
            return Ok(EscrowOutcome::Rejected(EscrowRejection::NotOnhold {
                status: onhold.status,
            }));
        }
        if let Some(shipped_at) = onhold.shipped_at {
            return Ok(EscrowOutcome::Rejected(EscrowRejection::AlreadyShipped {
                shipped_at,
            }));
        }
        let mut order = store
            .order(onhold.order_id)
            .await?
            .ok_or(IntegrityError::MissingOrder {
                onhold_id,
                order_id: onhold.order_id,
            })?;

        let now = self.clock.now();
        let Some(deadline) = Duration::try_days(i64::from(days))
            .and_then(|delay| now.checked_add_signed(delay))
        else {
            return Err(EngineError::InvalidInput(format!(
                "auto release in {days} days is out of range"
            )));
        };
        onhold.shipped_at = Some(now);
        onhold.auto_release_at = Some(deadline);
        order.status = OrderStatus::Shipped;
        order.shipped_at = Some(now);

        let mut journal = Journal::new(store, now);
        journal.put_order(order);
        journal.put_onhold(onhold.clone());
        journal.commit().await?;

        Ok(EscrowOutcome::Shipped(OnholdPoint {
            version: onhold.version + 1,
            ..onhold
        }))
    }

    /// Escrows on hold whose release deadline has passed.
    ///
    /// Pages are fetched lazily in id order, so rows released while the
    /// stream is consumed do not shift later pages. Calling again starts over.
    pub fn ready_for_release(
        &self,
        now: DateTime<Utc>,
    ) -> BoxStream<'static, Result<OnholdPoint>> {
        self.ready_for_release_after(now, None)
    }

    /// Like [`Self::ready_for_release`], starting strictly after `after`.
    pub fn ready_for_release_after(
        &self,
        now: DateTime<Utc>,
        after: Option<OnholdId>,
    ) -> BoxStream<'static, Result<OnholdPoint>> {
        let store = Arc::clone(&self.store);
        let page_size = self.config.page_size.max(1);

        stream::try_unfold(Some(after), move |cursor| {
            let store = Arc::clone(&store);
            async move {
                let Some(after) = cursor else {
                    return Ok::<_, EngineError>(None);
                };
                let page = store.due_onholds(now, after, page_size).await?;
                if page.is_empty() {
                    return Ok(None);
                }
                debug!(rows = page.len(), "Fetched page of due escrows");
                let next = if page.len() < page_size {
                    None
                } else {
                    page.last().map(|onhold| Some(onhold.id))
                };
                Ok(Some((page, next)))
            }
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }

    /// Cancel an escrow that is still on hold.
    #[tracing::instrument(name = "escrow.refund", skip(self, reason), fields(onhold_id = %onhold_id))]
    pub async fn refund(
        &self,
        onhold_id: OnholdId,
        reason: impl Into<String>,
    ) -> Result<EscrowOutcome> {
        let reason = reason.into();
        let outcome = run_with_retry(&self.retry, "escrow.refund", || {
            self.try_refund(onhold_id, reason.clone())
        })
        .await?;
        if let EscrowOutcome::Refunded(onhold) = &outcome {
            info!(order_id = %onhold.order_id, "Escrow refunded");
            publish_all(
                self.sink.as_ref(),
                vec![LedgerEvent::EscrowRefunded {
                    order_id: onhold.order_id,
                    onhold_id,
                    reason,
                }],
            )
            .await;
        }
        Ok(outcome)
    }

    async fn try_refund(&self, onhold_id: OnholdId, reason: String) -> Result<EscrowOutcome> {
        let store = self.store.as_ref();
        let Some(mut onhold) = store.onhold(onhold_id).await? else {
            return Ok(EscrowOutcome::Rejected(EscrowRejection::NotFound));
        };
        if onhold.status != OnholdStatus::Onhold {
            return Ok(EscrowOutcome::Rejected(EscrowRejection::NotOnhold {
                status: onhold.status,
            }));
        }
        let mut order = store
            .order(onhold.order_id)
            .await?
            .ok_or(IntegrityError::MissingOrder {
                onhold_id,
                order_id: onhold.order_id,
            })?;

        let now = self.clock.now();
        onhold.status = OnholdStatus::Refunded;
        onhold.refunded_at = Some(now);
        onhold.refund_reason = Some(reason);
        order.status = OrderStatus::Cancelled;

        let mut journal = Journal::new(store, now);
        journal.put_order(order);
        journal.put_onhold(onhold.clone());
        journal.commit().await?;

        Ok(EscrowOutcome::Refunded(OnholdPoint {
            version: onhold.version + 1,
            ..onhold
        }))
    }
}

fn already_exists(existing: &OnholdPoint) -> EscrowOutcome {
    EscrowOutcome::Rejected(EscrowRejection::AlreadyExists {
        order_id: existing.order_id,
        onhold_id: existing.id,
    })
}

fn invalid_order(order: &Order) -> Option<String> {
    if order.total_amount.is_sign_negative() {
        return Some(format!("negative order total {}", order.total_amount));
    }
    if order.shipping_points < Points::ZERO {
        return Some(format!("negative shipping points {}", order.shipping_points));
    }
    if let Some(line) = order.lines.iter().find(|line| line.points < Points::ZERO) {
        return Some(format!("negative line points {}", line.points));
    }
    if order.total_points().is_none() {
        return Some("order points overflow".to_string());
    }
    None
}
