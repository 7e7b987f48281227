//! Row decoding for the SQLite ledger store.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::model::{
    Balances, Bucket, Category, CommunityPointLevel, CorporateId, Direction, MemberId,
    MerchantAccount, MerchantId, OnholdId, OnholdPoint, OnholdStatus, Order, OrderId,
    OrderStatus, PostingContext, Transaction, UnlockHistory, Wallet, WalletOwner,
};
use crate::storage::helpers::{
    decode_decimal, decode_enum, decode_optional_timestamp, decode_timestamp, decode_uuid,
    decode_version,
};
use crate::storage::{Result, StorageError};

fn text(row: &SqliteRow, column: &str) -> Result<String> {
    Ok(row.try_get::<String, _>(column)?)
}

fn small(row: &SqliteRow, column: &'static str) -> Result<u8> {
    let value: i64 = row.try_get(column)?;
    u8::try_from(value).map_err(|_| StorageError::Decode {
        field: column,
        value: value.to_string(),
    })
}

fn count(row: &SqliteRow, column: &'static str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| StorageError::Decode {
        field: column,
        value: value.to_string(),
    })
}

fn points(row: &SqliteRow, column: &'static str) -> Result<rust_decimal::Decimal> {
    decode_decimal(column, &text(row, column)?)
}

fn owner(row: &SqliteRow) -> Result<WalletOwner> {
    let kind = text(row, "owner_kind")?;
    let id = decode_uuid("owner_id", &text(row, "owner_id")?)?;
    WalletOwner::from_parts(&kind, id).ok_or(StorageError::Decode {
        field: "owner_kind",
        value: kind,
    })
}

pub(super) fn wallet(row: &SqliteRow) -> Result<Wallet> {
    Ok(Wallet {
        owner: owner(row)?,
        balances: Balances {
            available_points: points(row, "available_points")?,
            onhold_points: points(row, "onhold_points")?,
            total_points: points(row, "total_points")?,
            total_pp: points(row, "total_pp")?,
            total_rp: points(row, "total_rp")?,
            total_cp: points(row, "total_cp")?,
        },
        total_referrals: count(row, "total_referrals")?,
        evaluated_referrals: count(row, "evaluated_referrals")?,
        unlocked_level: small(row, "unlocked_level")?,
        version: decode_version(row.try_get("version")?)?,
        updated_at: decode_timestamp("updated_at", &text(row, "updated_at")?)?,
    })
}

pub(super) fn order(row: &SqliteRow) -> Result<Order> {
    let status = text(row, "status")?;
    Ok(Order {
        id: OrderId::from_uuid(decode_uuid("id", &text(row, "id")?)?),
        merchant_id: MerchantId::from_uuid(decode_uuid("merchant_id", &text(row, "merchant_id")?)?),
        buyer_id: MemberId::from_uuid(decode_uuid("buyer_id", &text(row, "buyer_id")?)?),
        total_amount: points(row, "total_amount")?,
        lines: serde_json::from_str(&text(row, "lines")?)?,
        shipping_points: points(row, "shipping_points")?,
        status: decode_enum("status", &status, OrderStatus::parse)?,
        shipped_at: decode_optional_timestamp("shipped_at", row.try_get("shipped_at")?)?,
        completed_at: decode_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        version: decode_version(row.try_get("version")?)?,
    })
}

pub(super) fn onhold(row: &SqliteRow) -> Result<OnholdPoint> {
    let status = text(row, "status")?;
    Ok(OnholdPoint {
        id: OnholdId::from_uuid(decode_uuid("id", &text(row, "id")?)?),
        order_id: OrderId::from_uuid(decode_uuid("order_id", &text(row, "order_id")?)?),
        total_points: points(row, "total_points")?,
        items_points: points(row, "items_points")?,
        shipping_points: points(row, "shipping_points")?,
        status: decode_enum("status", &status, OnholdStatus::parse)?,
        shipped_at: decode_optional_timestamp("shipped_at", row.try_get("shipped_at")?)?,
        auto_release_at: decode_optional_timestamp(
            "auto_release_at",
            row.try_get("auto_release_at")?,
        )?,
        released_at: decode_optional_timestamp("released_at", row.try_get("released_at")?)?,
        refunded_at: decode_optional_timestamp("refunded_at", row.try_get("refunded_at")?)?,
        refund_reason: row.try_get("refund_reason")?,
        created_at: decode_timestamp("created_at", &text(row, "created_at")?)?,
        version: decode_version(row.try_get("version")?)?,
    })
}

pub(super) fn merchant(row: &SqliteRow) -> Result<MerchantAccount> {
    let budget: Option<String> = row.try_get("reward_budget_percent")?;
    Ok(MerchantAccount {
        id: MerchantId::from_uuid(decode_uuid("id", &text(row, "id")?)?),
        corporate_id: CorporateId::from_uuid(decode_uuid(
            "corporate_id",
            &text(row, "corporate_id")?,
        )?),
        reward_budget_percent: budget
            .as_deref()
            .map(|value| decode_decimal("reward_budget_percent", value))
            .transpose()?,
        version: decode_version(row.try_get("version")?)?,
    })
}

pub(super) fn community_level(row: &SqliteRow) -> Result<CommunityPointLevel> {
    let locked: i64 = row.try_get("is_locked")?;
    Ok(CommunityPointLevel {
        member: MemberId::from_uuid(decode_uuid("member_id", &text(row, "member_id")?)?),
        level: small(row, "level")?,
        total_cp: points(row, "total_cp")?,
        available_cp: points(row, "available_cp")?,
        onhold_cp: points(row, "onhold_cp")?,
        is_locked: locked != 0,
        version: decode_version(row.try_get("version")?)?,
    })
}

pub(super) fn transaction(row: &SqliteRow) -> Result<Transaction> {
    let order_id: Option<String> = row.try_get("order_id")?;
    let level: Option<i64> = row.try_get("level")?;
    let level = level
        .map(|value| {
            u8::try_from(value).map_err(|_| StorageError::Decode {
                field: "level",
                value: value.to_string(),
            })
        })
        .transpose()?;
    let sequence: i64 = row.try_get("sequence")?;

    Ok(Transaction {
        id: decode_uuid("id", &text(row, "id")?)?,
        sequence: decode_version(sequence)?,
        wallet: owner(row)?,
        direction: decode_enum("direction", &text(row, "direction")?, Direction::parse)?,
        bucket: decode_enum("bucket", &text(row, "bucket")?, Bucket::parse)?,
        category: decode_enum("category", &text(row, "category")?, Category::parse)?,
        amount: points(row, "amount")?,
        context: PostingContext {
            order_id: order_id
                .as_deref()
                .map(|value| decode_uuid("order_id", value).map(OrderId::from_uuid))
                .transpose()?,
            level,
            note: row.try_get("note")?,
        },
        available_after: points(row, "available_after")?,
        onhold_after: points(row, "onhold_after")?,
        total_rp_after: points(row, "total_rp_after")?,
        created_at: decode_timestamp("created_at", &text(row, "created_at")?)?,
    })
}

pub(super) fn unlock_history(row: &SqliteRow) -> Result<UnlockHistory> {
    Ok(UnlockHistory {
        id: decode_uuid("id", &text(row, "id")?)?,
        member: MemberId::from_uuid(decode_uuid("member_id", &text(row, "member_id")?)?),
        previous_referrals: count(row, "previous_referrals")?,
        new_referrals: count(row, "new_referrals")?,
        previous_unlocked_level: small(row, "previous_unlocked_level")?,
        new_unlocked_level: small(row, "new_unlocked_level")?,
        released_cp: points(row, "released_cp")?,
        created_at: decode_timestamp("created_at", &text(row, "created_at")?)?,
    })
}
