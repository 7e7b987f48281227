//! LedgerStore interface tests.
//!
//! These tests verify the contract of the LedgerStore trait.
//! Each storage implementation should run these tests.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use rewards_ledger::model::{
    Bucket, Category, CommunityPointLevel, CorporateId, Direction, MemberId, MerchantAccount,
    MerchantId, OnholdId, OnholdPoint, OnholdStatus, Order, OrderId, Points, PostingContext,
    ReferralEdge, Transaction, UnlockHistory, Wallet, WalletOwner,
};
use rewards_ledger::storage::{LedgerBatch, LedgerStore, StorageError};

/// Current time truncated to the microsecond resolution stores keep.
pub fn now() -> DateTime<Utc> {
    DateTime::from_timestamp_micros(Utc::now().timestamp_micros()).expect("valid timestamp")
}

pub fn make_wallet(owner: WalletOwner) -> Wallet {
    let mut wallet = Wallet::open(owner, now());
    wallet.version = 1;
    wallet
}

pub fn make_transaction(owner: WalletOwner, amount: Points) -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        sequence: 0,
        wallet: owner,
        direction: Direction::Credit,
        bucket: Bucket::Available,
        category: Category::Personal,
        amount,
        context: PostingContext {
            order_id: Some(OrderId::new()),
            level: None,
            note: Some("test".to_string()),
        },
        available_after: amount,
        onhold_after: Points::ZERO,
        total_rp_after: Points::ZERO,
        created_at: now(),
    }
}

pub fn make_order() -> Order {
    let mut order = Order::new(
        OrderId::new(),
        MerchantId::new(),
        MemberId::new(),
        Decimal::new(123_45, 2),
    )
    .with_line(Points::new(1050, 2), 3)
    .with_shipping(Points::from(2));
    order.version = 1;
    order
}

pub fn make_onhold(order: &Order) -> OnholdPoint {
    let mut onhold = OnholdPoint::for_order(order, now()).unwrap();
    onhold.version = 1;
    onhold
}

/// An onhold that is due at `now`.
pub fn make_due_onhold(now: DateTime<Utc>) -> OnholdPoint {
    let mut onhold = make_onhold(&make_order());
    onhold.shipped_at = Some(now - Duration::days(8));
    onhold.auto_release_at = Some(now - Duration::days(1));
    onhold
}

async fn commit<S: LedgerStore>(store: &S, batch: LedgerBatch) -> Vec<Transaction> {
    store.commit(batch).await.expect("commit should succeed")
}

fn assert_conflict(result: Result<Vec<Transaction>, StorageError>) {
    match result {
        Err(StorageError::VersionConflict { .. }) => {}
        other => panic!("expected version conflict, got {:?}", other),
    }
}

fn assert_duplicate(result: Result<Vec<Transaction>, StorageError>) {
    match result {
        Err(StorageError::Duplicate { .. }) => {}
        other => panic!("expected duplicate, got {:?}", other),
    }
}

// =============================================================================
// Wallet tests
// =============================================================================

pub async fn test_wallet_nonexistent<S: LedgerStore>(store: &S) {
    let wallet = store
        .wallet(&WalletOwner::Member(MemberId::new()))
        .await
        .expect("get should succeed");
    assert!(wallet.is_none(), "nonexistent wallet should be None");
}

pub async fn test_wallet_roundtrip<S: LedgerStore>(store: &S) {
    let mut wallet = make_wallet(WalletOwner::Member(MemberId::new()));
    wallet.balances.available_points = Points::new(1234, 2);
    wallet.balances.onhold_points = Points::new(5, 1);
    wallet.balances.total_points = Points::new(1284, 2);
    wallet.balances.total_cp = Points::new(1284, 2);
    wallet.total_referrals = 3;
    wallet.evaluated_referrals = 2;
    wallet.unlocked_level = 15;

    commit(
        store,
        LedgerBatch {
            wallets: vec![wallet.clone()],
            ..Default::default()
        },
    )
    .await;

    let stored = store
        .wallet(&wallet.owner)
        .await
        .expect("get should succeed")
        .expect("wallet should exist");
    assert_eq!(stored, wallet);
}

pub async fn test_company_wallet_singleton<S: LedgerStore>(store: &S) {
    if store
        .wallet(&WalletOwner::Company)
        .await
        .expect("get should succeed")
        .is_some()
    {
        return;
    }
    commit(
        store,
        LedgerBatch {
            wallets: vec![make_wallet(WalletOwner::Company)],
            ..Default::default()
        },
    )
    .await;
    assert_conflict(
        store
            .commit(LedgerBatch {
                wallets: vec![make_wallet(WalletOwner::Company)],
                ..Default::default()
            })
            .await,
    );
}

pub async fn test_insert_existing_conflicts<S: LedgerStore>(store: &S) {
    let wallet = make_wallet(WalletOwner::Corporate(CorporateId::new()));
    let batch = LedgerBatch {
        wallets: vec![wallet],
        ..Default::default()
    };
    commit(store, batch.clone()).await;
    assert_conflict(store.commit(batch).await);
}

pub async fn test_stale_update_conflicts<S: LedgerStore>(store: &S) {
    let mut wallet = make_wallet(WalletOwner::Merchant(MerchantId::new()));
    commit(
        store,
        LedgerBatch {
            wallets: vec![wallet.clone()],
            ..Default::default()
        },
    )
    .await;

    wallet.version = 2;
    wallet.total_referrals = 1;
    let update = LedgerBatch {
        wallets: vec![wallet.clone()],
        ..Default::default()
    };
    commit(store, update.clone()).await;
    assert_conflict(store.commit(update).await);

    let stored = store
        .wallet(&wallet.owner)
        .await
        .expect("get should succeed")
        .expect("wallet should exist");
    assert_eq!(stored.version, 2);
    assert_eq!(stored.total_referrals, 1);
}

pub async fn test_failed_batch_applies_nothing<S: LedgerStore>(store: &S) {
    let fresh = make_wallet(WalletOwner::Member(MemberId::new()));
    let mut stale = make_wallet(WalletOwner::Member(MemberId::new()));
    stale.version = 4;
    let order = make_order();

    let result = store
        .commit(LedgerBatch {
            wallets: vec![fresh.clone(), stale],
            orders: vec![order.clone()],
            transactions: vec![make_transaction(fresh.owner, Points::from(5))],
            ..Default::default()
        })
        .await;
    assert_conflict(result);

    assert!(store
        .wallet(&fresh.owner)
        .await
        .expect("get should succeed")
        .is_none());
    assert!(store
        .order(order.id)
        .await
        .expect("get should succeed")
        .is_none());
    assert!(store
        .transactions(&fresh.owner)
        .await
        .expect("get should succeed")
        .is_empty());
}

// =============================================================================
// Transaction log tests
// =============================================================================

pub async fn test_transactions_sequenced<S: LedgerStore>(store: &S) {
    let owner = WalletOwner::Member(MemberId::new());
    let other = WalletOwner::Member(MemberId::new());

    let first = commit(
        store,
        LedgerBatch {
            transactions: vec![
                make_transaction(owner, Points::from(1)),
                make_transaction(other, Points::from(2)),
            ],
            ..Default::default()
        },
    )
    .await;
    let second = commit(
        store,
        LedgerBatch {
            transactions: vec![make_transaction(owner, Points::new(375, 2))],
            ..Default::default()
        },
    )
    .await;

    assert_eq!(first.len(), 2);
    assert!(first[0].sequence > 0);
    assert!(first[0].sequence < first[1].sequence);
    assert!(first[1].sequence < second[0].sequence);

    let log = store
        .transactions(&owner)
        .await
        .expect("get should succeed");
    assert_eq!(log.len(), 2);
    assert_eq!(log[0], first[0]);
    assert_eq!(log[1], second[0]);
    assert_eq!(log[1].amount, Points::new(375, 2));
}

// =============================================================================
// Order and escrow tests
// =============================================================================

pub async fn test_order_and_onhold_roundtrip<S: LedgerStore>(store: &S) {
    let order = make_order();
    let onhold = make_onhold(&order);
    commit(
        store,
        LedgerBatch {
            orders: vec![order.clone()],
            onholds: vec![onhold.clone()],
            ..Default::default()
        },
    )
    .await;

    let stored_order = store
        .order(order.id)
        .await
        .expect("get should succeed")
        .expect("order should exist");
    assert_eq!(stored_order, order);

    let by_id = store
        .onhold(onhold.id)
        .await
        .expect("get should succeed")
        .expect("onhold should exist");
    assert_eq!(by_id, onhold);
    let by_order = store
        .onhold_for_order(order.id)
        .await
        .expect("get should succeed");
    assert_eq!(by_order, Some(onhold));
}

pub async fn test_onhold_unique_per_order<S: LedgerStore>(store: &S) {
    let order = make_order();
    commit(
        store,
        LedgerBatch {
            onholds: vec![make_onhold(&order)],
            ..Default::default()
        },
    )
    .await;
    assert_duplicate(
        store
            .commit(LedgerBatch {
                onholds: vec![make_onhold(&order)],
                ..Default::default()
            })
            .await,
    );
}

pub async fn test_due_onholds_paginates<S: LedgerStore>(store: &S) {
    let now = now();
    let mut due: Vec<OnholdPoint> = (0..5).map(|_| make_due_onhold(now)).collect();

    let mut released = make_due_onhold(now);
    released.status = OnholdStatus::Released;
    let mut future = make_due_onhold(now);
    future.auto_release_at = Some(now + Duration::days(2));
    let unshipped = make_onhold(&make_order());

    let mut onholds = due.clone();
    onholds.extend([released, future, unshipped]);
    commit(
        store,
        LedgerBatch {
            onholds,
            ..Default::default()
        },
    )
    .await;
    due.sort_by_key(|onhold| onhold.id);
    let due_ids: Vec<OnholdId> = due.iter().map(|onhold| onhold.id).collect();

    // Other tests may leave due rows behind; only look at ours.
    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let page = store
            .due_onholds(now, cursor, 2)
            .await
            .expect("query should succeed");
        assert!(page.len() <= 2);
        assert!(page.iter().all(|onhold| onhold.is_ready_for_release(now)));
        let Some(last) = page.last() else {
            break;
        };
        cursor = Some(last.id);
        seen.extend(
            page.iter()
                .map(|onhold| onhold.id)
                .filter(|id| due_ids.contains(id)),
        );
    }
    assert_eq!(seen, due_ids);
}

// =============================================================================
// Merchant tests
// =============================================================================

pub async fn test_merchant_roundtrip<S: LedgerStore>(store: &S) {
    let mut plain = MerchantAccount::new(MerchantId::new(), CorporateId::new());
    plain.version = 1;
    let mut budgeted = MerchantAccount::new(MerchantId::new(), CorporateId::new())
        .with_reward_budget(Decimal::new(125, 1));
    budgeted.version = 1;

    commit(
        store,
        LedgerBatch {
            merchants: vec![plain.clone(), budgeted.clone()],
            ..Default::default()
        },
    )
    .await;

    for merchant in [plain, budgeted] {
        let stored = store
            .merchant(merchant.id)
            .await
            .expect("get should succeed")
            .expect("merchant should exist");
        assert_eq!(stored, merchant);
    }
}

// =============================================================================
// Sponsor tree and community tests
// =============================================================================

pub async fn test_referral_single_sponsor<S: LedgerStore>(store: &S) {
    let child = MemberId::new();
    let sponsor = MemberId::new();
    let edge = |sponsor| ReferralEdge {
        child,
        sponsor,
        created_at: now(),
    };

    assert_eq!(store.sponsor_of(child).await.expect("lookup"), None);
    commit(
        store,
        LedgerBatch {
            referrals: vec![edge(sponsor)],
            ..Default::default()
        },
    )
    .await;
    assert_eq!(store.sponsor_of(child).await.expect("lookup"), Some(sponsor));

    assert_duplicate(
        store
            .commit(LedgerBatch {
                referrals: vec![edge(MemberId::new())],
                ..Default::default()
            })
            .await,
    );
    assert_eq!(store.sponsor_of(child).await.expect("lookup"), Some(sponsor));
}

pub async fn test_community_levels_ordered<S: LedgerStore>(store: &S) {
    let member = MemberId::new();
    let mut rows = Vec::new();
    for level in [12u8, 3, 30] {
        let mut row = CommunityPointLevel::new(member, level);
        row.credit_locked(Points::new(i64::from(level) * 10, 2));
        row.version = 1;
        rows.push(row);
    }
    commit(
        store,
        LedgerBatch {
            community_levels: rows.clone(),
            ..Default::default()
        },
    )
    .await;

    let stored = store
        .community_levels(member)
        .await
        .expect("get should succeed");
    let levels: Vec<u8> = stored.iter().map(|row| row.level).collect();
    assert_eq!(levels, vec![3, 12, 30]);
    assert!(stored.iter().all(|row| row.is_locked && row.is_balanced()));

    let mut update = stored[0].clone();
    update.release();
    update.version = 2;
    commit(
        store,
        LedgerBatch {
            community_levels: vec![update.clone()],
            ..Default::default()
        },
    )
    .await;
    let single = store
        .community_level(member, 3)
        .await
        .expect("get should succeed");
    assert_eq!(single, Some(update));
}

pub async fn test_unlock_history_in_order<S: LedgerStore>(store: &S) {
    let member = MemberId::new();
    let entry = |previous: u8, new: u8| UnlockHistory {
        id: Uuid::new_v4(),
        member,
        previous_referrals: u32::from(previous),
        new_referrals: u32::from(new),
        previous_unlocked_level: previous,
        new_unlocked_level: new,
        released_cp: Points::new(25, 1),
        created_at: now(),
    };
    let first = entry(0, 5);
    let second = entry(5, 10);
    commit(
        store,
        LedgerBatch {
            unlock_history: vec![first.clone()],
            ..Default::default()
        },
    )
    .await;
    commit(
        store,
        LedgerBatch {
            unlock_history: vec![second.clone()],
            ..Default::default()
        },
    )
    .await;

    let history = store
        .unlock_history(member)
        .await
        .expect("get should succeed");
    assert_eq!(history, vec![first, second]);
}

/// Macro to run all LedgerStore tests against a store implementation.
#[macro_export]
macro_rules! run_ledger_store_tests {
    ($store:expr) => {
        use $crate::storage::ledger_store_tests::*;

        // wallet tests
        test_wallet_nonexistent($store).await;
        println!("  test_wallet_nonexistent: PASSED");

        test_wallet_roundtrip($store).await;
        println!("  test_wallet_roundtrip: PASSED");

        test_company_wallet_singleton($store).await;
        println!("  test_company_wallet_singleton: PASSED");

        test_insert_existing_conflicts($store).await;
        println!("  test_insert_existing_conflicts: PASSED");

        test_stale_update_conflicts($store).await;
        println!("  test_stale_update_conflicts: PASSED");

        test_failed_batch_applies_nothing($store).await;
        println!("  test_failed_batch_applies_nothing: PASSED");

        // transaction log tests
        test_transactions_sequenced($store).await;
        println!("  test_transactions_sequenced: PASSED");

        // escrow tests
        test_order_and_onhold_roundtrip($store).await;
        println!("  test_order_and_onhold_roundtrip: PASSED");

        test_onhold_unique_per_order($store).await;
        println!("  test_onhold_unique_per_order: PASSED");

        test_due_onholds_paginates($store).await;
        println!("  test_due_onholds_paginates: PASSED");

        // merchant tests
        test_merchant_roundtrip($store).await;
        println!("  test_merchant_roundtrip: PASSED");

        // sponsor tree tests
        test_referral_single_sponsor($store).await;
        println!("  test_referral_single_sponsor: PASSED");

        test_community_levels_ordered($store).await;
        println!("  test_community_levels_ordered: PASSED");

        test_unlock_history_in_order($store).await;
        println!("  test_unlock_history_in_order: PASSED");
    };
}
