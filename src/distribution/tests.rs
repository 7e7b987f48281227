use chrono::Duration;
use rust_decimal::Decimal;

use super::*;
use crate::model::{MerchantAccount, ReferralEdge};
use crate::test_utils::Harness;

fn released(outcome: ReleaseOutcome) -> DistributionSummary {
    match outcome {
        ReleaseOutcome::Released(summary) => summary,
        other => panic!("expected release, got {:?}", other),
    }
}

#[tokio::test]
async fn test_release_before_shipping() {
    let h = Harness::new().await;
    let merchant = h.merchant(Points::from(500)).await;
    let buyer = h.member().await;
    let onhold = h.escrow(&merchant, buyer, Decimal::from(100)).await;

    assert_eq!(
        h.engine.release(onhold.id).await.unwrap(),
        ReleaseOutcome::NotEligible(NotEligibleReason::NotShipped)
    );
}

#[tokio::test]
async fn test_release_before_deadline() {
    let h = Harness::new().await;
    let merchant = h.merchant(Points::from(500)).await;
    let buyer = h.member().await;
    let onhold = h.shipped(&merchant, buyer, Decimal::from(100)).await;
    h.clock.advance(Duration::days(6));

    let outcome = h.engine.release(onhold.id).await.unwrap();
    assert_eq!(
        outcome,
        ReleaseOutcome::NotEligible(NotEligibleReason::NotDue {
            auto_release_at: onhold.auto_release_at.unwrap(),
        })
    );
    let stored = h.store.onhold(onhold.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OnholdStatus::Onhold);
}

#[tokio::test]
async fn test_release_unknown_onhold() {
    let h = Harness::new().await;
    assert_eq!(
        h.engine.release(OnholdId::new()).await.unwrap(),
        ReleaseOutcome::NotEligible(NotEligibleReason::OnholdNotFound)
    );
}

#[tokio::test]
async fn test_reward_overflow_fails_without_posting() {
    let h = Harness::new().await;
    let merchant = h.merchant(Points::from(500)).await;
    let buyer = h.member().await;
    let onhold = h.shipped(&merchant, buyer, Decimal::MAX).await;
    h.pass_release_delay();
    let before = h.transaction_count().await;

    let err = h.engine.release(onhold.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)), "{err}");
    let stored = h.store.onhold(onhold.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OnholdStatus::Onhold);
    assert_eq!(h.transaction_count().await, before);
}

#[tokio::test]
async fn test_buyer_without_wallet_is_integrity_error() {
    let h = Harness::new().await;
    let merchant = h.merchant(Points::from(500)).await;
    let onhold = h.shipped(&merchant, MemberId::new(), Decimal::from(100)).await;
    h.pass_release_delay();
    let before = h.store.transaction_count().await;

    let err = h.engine.release(onhold.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Integrity(IntegrityError::MissingWallet(WalletOwner::Member(_)))
    ));
    assert_eq!(h.store.transaction_count().await, before);
    let stored = h.store.onhold(onhold.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OnholdStatus::Onhold);
}

#[tokio::test]
async fn test_sponsor_without_wallet_gets_nothing() {
    let h = Harness::new().await;
    let merchant = h.merchant(Points::from(500)).await;
    let buyer = h.member().await;
    let ghost = MemberId::new();
    let mut journal = Journal::new(h.store.as_ref(), h.clock.now());
    journal.add_referral(ReferralEdge {
        child: buyer,
        sponsor: ghost,
        created_at: h.clock.now(),
    });
    journal.commit().await.unwrap();

    let onhold = h.shipped(&merchant, buyer, Decimal::from(1_000)).await;
    h.pass_release_delay();
    let summary = released(h.engine.release(onhold.id).await.unwrap());

    assert_eq!(summary.sponsor, None);
    assert_eq!(summary.referral, Points::ZERO);
    assert_eq!(summary.community.skipped_levels, vec![1]);
    assert!(summary.community.credits.is_empty());
    assert!(h
        .store
        .wallet(&WalletOwner::Member(ghost))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_zero_budget_releases_without_postings() {
    let h = Harness::new().await;
    let merchant = h.merchant(Points::ZERO).await;
    h.engine
        .register_merchant(MerchantAccount {
            reward_budget_percent: Some(Decimal::ZERO),
            ..merchant.clone()
        })
        .await
        .unwrap();
    let buyer = h.member().await;
    let onhold = h.shipped(&merchant, buyer, Decimal::from(1_000)).await;
    h.pass_release_delay();

    let summary = released(h.engine.release(onhold.id).await.unwrap());
    assert_eq!(summary.pool, Points::ZERO);
    assert!(summary.transactions.is_empty());

    let order = h.store.order(onhold.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
}

#[tokio::test]
async fn test_storage_failure_leaves_escrow_on_hold() {
    let h = Harness::new().await;
    let merchant = h.merchant(Points::from(500)).await;
    let buyer = h.member().await;
    let onhold = h.shipped(&merchant, buyer, Decimal::from(1_000)).await;
    h.pass_release_delay();

    h.store.set_fail_on_commit(true).await;
    let err = h.engine.release(onhold.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Storage(_)));
    h.store.set_fail_on_commit(false).await;

    let stored = h.store.onhold(onhold.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OnholdStatus::Onhold);
    assert_eq!(h.member_wallet(buyer).await.total_points(), Points::ZERO);

    released(h.engine.release(onhold.id).await.unwrap());
    assert_eq!(h.member_wallet(buyer).await.total_points(), Points::from(30));
}

#[tokio::test]
async fn test_release_publishes_events_after_commit() {
    let h = Harness::new().await;
    let merchant = h.merchant(Points::from(500)).await;
    let buyer = h.member().await;
    let sponsor = h.member().await;
    h.link(buyer, sponsor).await;
    let onhold = h.shipped(&merchant, buyer, Decimal::from(1_000)).await;
    h.pass_release_delay();
    let mut events = h.sink.subscribe();

    released(h.engine.release(onhold.id).await.unwrap());

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec![
            "member_credited",
            "sponsor_credited",
            "community_credited",
            "order_completed"
        ]
    );
}

#[tokio::test]
async fn test_settlement_nets_to_zero() {
    let h = Harness::new().await;
    let merchant = h.merchant(Points::from(500)).await;
    let buyer = h.member().await;
    let onhold = h.shipped(&merchant, buyer, Decimal::from(1_000)).await;
    h.pass_release_delay();

    let summary = released(h.engine.release(onhold.id).await.unwrap());
    let settlement: Vec<&Transaction> = summary
        .transactions
        .iter()
        .filter(|tx| tx.category == Category::Settlement)
        .collect();
    assert_eq!(settlement.len(), 4);
    assert!(settlement.iter().all(|tx| tx.amount == Points::from(100)));

    let corporate = h.wallet(WalletOwner::Corporate(merchant.corporate_id)).await;
    assert_eq!(corporate.available_points(), Points::from(500));
    let merchant_wallet = h.wallet(WalletOwner::Merchant(merchant.id)).await;
    assert_eq!(merchant_wallet.available_points(), Points::ZERO);
    assert_eq!(merchant_wallet.total_points(), Points::ZERO);
    h.assert_reconciled().await;
}
