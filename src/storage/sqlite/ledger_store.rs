//! SQLite LedgerStore implementation.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{
    Asterisk, Expr, OnConflict, Order as SortOrder, Query, SimpleExpr, SqliteQueryBuilder,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use super::rows;
use crate::config::SqliteConfig;
use crate::distribution::SponsorLookup;
use crate::model::{
    CommunityPointLevel, MemberId, MerchantAccount, MerchantId, OnholdId, OnholdPoint,
    OnholdStatus, Order, OrderId, ReferralEdge, Transaction, UnlockHistory as UnlockRow, Wallet,
    WalletOwner,
};
use crate::storage::helpers::encode_timestamp;
use crate::storage::schema::{
    CommunityLevels, Merchants, Onholds, Orders, Referrals, Transactions, UnlockHistory, Wallets,
};
use crate::storage::{expected_version, LedgerBatch, LedgerStore, Result, StorageError};

/// SQLite implementation of LedgerStore.
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Create a new SQLite ledger store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for the configured database file.
    pub async fn connect(config: &SqliteConfig) -> Result<Self> {
        let (options, max_connections) = if config.is_in_memory() {
            (SqliteConnectOptions::from_str("sqlite::memory:")?, 1)
        } else {
            if let Some(parent) = Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let options = SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(true);
            (options, config.max_connections.max(1))
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the schema migrations.
    pub async fn init(&self) -> Result<()> {
        sqlx::migrate!("migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Every stored wallet.
    pub async fn wallets(&self) -> Result<Vec<Wallet>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Wallets::Table)
            .to_string(SqliteQueryBuilder);

        let found = sqlx::query(&query).fetch_all(&self.pool).await?;
        found.iter().map(rows::wallet).collect()
    }

    /// Number of transactions across all wallets.
    pub async fn transaction_count(&self) -> Result<usize> {
        let query = Query::select()
            .expr(Expr::col(Transactions::Id).count())
            .from(Transactions::Table)
            .to_string(SqliteQueryBuilder);

        let count: i64 = sqlx::query(&query).fetch_one(&self.pool).await?.try_get(0)?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    async fn write_wallet(conn: &mut SqliteConnection, wallet: &Wallet) -> Result<()> {
        let key = wallet.owner.to_string();
        let kind = wallet.owner.kind();
        let id = wallet.owner.id().to_string();
        let balances = &wallet.balances;
        let values: Vec<(Wallets, SimpleExpr)> = vec![
            (Wallets::AvailablePoints, balances.available_points.to_string().into()),
            (Wallets::OnholdPoints, balances.onhold_points.to_string().into()),
            (Wallets::TotalPoints, balances.total_points.to_string().into()),
            (Wallets::TotalPp, balances.total_pp.to_string().into()),
            (Wallets::TotalRp, balances.total_rp.to_string().into()),
            (Wallets::TotalCp, balances.total_cp.to_string().into()),
            (Wallets::TotalReferrals, i64::from(wallet.total_referrals).into()),
            (
                Wallets::EvaluatedReferrals,
                i64::from(wallet.evaluated_referrals).into(),
            ),
            (Wallets::UnlockedLevel, i64::from(wallet.unlocked_level).into()),
            (Wallets::Version, version_value(wallet.version)),
            (Wallets::UpdatedAt, encode_timestamp(wallet.updated_at).into()),
        ];

        let query = if wallet.version == 1 {
            let (columns, row) = with_key(
                [Wallets::OwnerKind, Wallets::OwnerId],
                [kind.into(), id.into()],
                values,
            );
            Query::insert()
                .into_table(Wallets::Table)
                .columns(columns)
                .values_panic(row)
                .on_conflict(
                    OnConflict::columns([Wallets::OwnerKind, Wallets::OwnerId])
                        .do_nothing()
                        .to_owned(),
                )
                .to_string(SqliteQueryBuilder)
        } else {
            Query::update()
                .table(Wallets::Table)
                .values(values)
                .and_where(Expr::col(Wallets::OwnerKind).eq(kind))
                .and_where(Expr::col(Wallets::OwnerId).eq(id))
                .and_where(Expr::col(Wallets::Version).eq(previous(wallet.version)))
                .to_string(SqliteQueryBuilder)
        };

        let result = sqlx::query(&query).execute(&mut *conn).await?;
        expect_one("wallet", key, wallet.version, result.rows_affected())
    }

    async fn write_order(conn: &mut SqliteConnection, order: &Order) -> Result<()> {
        let id = order.id.to_string();
        let values: Vec<(Orders, SimpleExpr)> = vec![
            (Orders::MerchantId, order.merchant_id.to_string().into()),
            (Orders::BuyerId, order.buyer_id.to_string().into()),
            (Orders::TotalAmount, order.total_amount.to_string().into()),
            (Orders::Lines, serde_json::to_string(&order.lines)?.into()),
            (Orders::ShippingPoints, order.shipping_points.to_string().into()),
            (Orders::Status, order.status.as_str().into()),
            (Orders::ShippedAt, order.shipped_at.map(encode_timestamp).into()),
            (Orders::CompletedAt, order.completed_at.map(encode_timestamp).into()),
            (Orders::Version, version_value(order.version)),
        ];

        let query = if order.version == 1 {
            let (columns, row) = with_key([Orders::Id], [id.clone().into()], values);
            Query::insert()
                .into_table(Orders::Table)
                .columns(columns)
                .values_panic(row)
                .on_conflict(OnConflict::column(Orders::Id).do_nothing().to_owned())
                .to_string(SqliteQueryBuilder)
        } else {
            Query::update()
                .table(Orders::Table)
                .values(values)
                .and_where(Expr::col(Orders::Id).eq(id.clone()))
                .and_where(Expr::col(Orders::Version).eq(previous(order.version)))
                .to_string(SqliteQueryBuilder)
        };

        let result = sqlx::query(&query).execute(&mut *conn).await?;
        expect_one("order", id, order.version, result.rows_affected())
    }

    async fn write_onhold(conn: &mut SqliteConnection, onhold: &OnholdPoint) -> Result<()> {
        let id = onhold.id.to_string();
        let order_id = onhold.order_id.to_string();

        let clash = Query::select()
            .column(Onholds::Id)
            .from(Onholds::Table)
            .and_where(Expr::col(Onholds::OrderId).eq(order_id.clone()))
            .and_where(Expr::col(Onholds::Id).ne(id.clone()))
            .to_string(SqliteQueryBuilder);
        if sqlx::query(&clash).fetch_optional(&mut *conn).await?.is_some() {
            return Err(StorageError::Duplicate {
                entity: "onhold",
                key: order_id,
            });
        }

        let values: Vec<(Onholds, SimpleExpr)> = vec![
            (Onholds::OrderId, order_id.into()),
            (Onholds::TotalPoints, onhold.total_points.to_string().into()),
            (Onholds::ItemsPoints, onhold.items_points.to_string().into()),
            (Onholds::ShippingPoints, onhold.shipping_points.to_string().into()),
            (Onholds::Status, onhold.status.as_str().into()),
            (Onholds::ShippedAt, onhold.shipped_at.map(encode_timestamp).into()),
            (
                Onholds::AutoReleaseAt,
                onhold.auto_release_at.map(encode_timestamp).into(),
            ),
            (Onholds::ReleasedAt, onhold.released_at.map(encode_timestamp).into()),
            (Onholds::RefundedAt, onhold.refunded_at.map(encode_timestamp).into()),
            (Onholds::RefundReason, onhold.refund_reason.clone().into()),
            (Onholds::CreatedAt, encode_timestamp(onhold.created_at).into()),
            (Onholds::Version, version_value(onhold.version)),
        ];

        let query = if onhold.version == 1 {
            let (columns, row) = with_key([Onholds::Id], [id.clone().into()], values);
            Query::insert()
                .into_table(Onholds::Table)
                .columns(columns)
                .values_panic(row)
                .on_conflict(OnConflict::column(Onholds::Id).do_nothing().to_owned())
                .to_string(SqliteQueryBuilder)
        } else {
            Query::update()
                .table(Onholds::Table)
                .values(values)
                .and_where(Expr::col(Onholds::Id).eq(id.clone()))
                .and_where(Expr::col(Onholds::Version).eq(previous(onhold.version)))
                .to_string(SqliteQueryBuilder)
        };

        let result = sqlx::query(&query).execute(&mut *conn).await?;
        expect_one("onhold", id, onhold.version, result.rows_affected())
    }

    async fn write_merchant(conn: &mut SqliteConnection, merchant: &MerchantAccount) -> Result<()> {
        let id = merchant.id.to_string();
        let values: Vec<(Merchants, SimpleExpr)> = vec![
            (Merchants::CorporateId, merchant.corporate_id.to_string().into()),
            (
                Merchants::RewardBudgetPercent,
                merchant
                    .reward_budget_percent
                    .map(|percent| percent.to_string())
                    .into(),
            ),
            (Merchants::Version, version_value(merchant.version)),
        ];

        let query = if merchant.version == 1 {
            let (columns, row) = with_key([Merchants::Id], [id.clone().into()], values);
            Query::insert()
                .into_table(Merchants::Table)
                .columns(columns)
                .values_panic(row)
                .on_conflict(OnConflict::column(Merchants::Id).do_nothing().to_owned())
                .to_string(SqliteQueryBuilder)
        } else {
            Query::update()
                .table(Merchants::Table)
                .values(values)
                .and_where(Expr::col(Merchants::Id).eq(id.clone()))
                .and_where(Expr::col(Merchants::Version).eq(previous(merchant.version)))
                .to_string(SqliteQueryBuilder)
        };

        let result = sqlx::query(&query).execute(&mut *conn).await?;
        expect_one("merchant", id, merchant.version, result.rows_affected())
    }

    async fn write_level(conn: &mut SqliteConnection, row: &CommunityPointLevel) -> Result<()> {
        let key = format!("{}/{}", row.member, row.level);
        let member = row.member.to_string();
        let values: Vec<(CommunityLevels, SimpleExpr)> = vec![
            (CommunityLevels::TotalCp, row.total_cp.to_string().into()),
            (CommunityLevels::AvailableCp, row.available_cp.to_string().into()),
            (CommunityLevels::OnholdCp, row.onhold_cp.to_string().into()),
            (CommunityLevels::IsLocked, i64::from(row.is_locked).into()),
            (CommunityLevels::Version, version_value(row.version)),
        ];

        let query = if row.version == 1 {
            let (columns, cells) = with_key(
                [CommunityLevels::MemberId, CommunityLevels::Level],
                [member.into(), i64::from(row.level).into()],
                values,
            );
            Query::insert()
                .into_table(CommunityLevels::Table)
                .columns(columns)
                .values_panic(cells)
                .on_conflict(
                    OnConflict::columns([CommunityLevels::MemberId, CommunityLevels::Level])
                        .do_nothing()
                        .to_owned(),
                )
                .to_string(SqliteQueryBuilder)
        } else {
            Query::update()
                .table(CommunityLevels::Table)
                .values(values)
                .and_where(Expr::col(CommunityLevels::MemberId).eq(member))
                .and_where(Expr::col(CommunityLevels::Level).eq(i64::from(row.level)))
                .and_where(Expr::col(CommunityLevels::Version).eq(previous(row.version)))
                .to_string(SqliteQueryBuilder)
        };

        let result = sqlx::query(&query).execute(&mut *conn).await?;
        expect_one("community_level", key, row.version, result.rows_affected())
    }

    async fn insert_referral(conn: &mut SqliteConnection, edge: &ReferralEdge) -> Result<()> {
        let child = edge.child.to_string();
        let query = Query::insert()
            .into_table(Referrals::Table)
            .columns([Referrals::ChildId, Referrals::SponsorId, Referrals::CreatedAt])
            .values_panic([
                child.clone().into(),
                edge.sponsor.to_string().into(),
                encode_timestamp(edge.created_at).into(),
            ])
            .on_conflict(OnConflict::column(Referrals::ChildId).do_nothing().to_owned())
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&mut *conn).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::Duplicate {
                entity: "referral",
                key: child,
            });
        }
        Ok(())
    }

    async fn insert_transaction(
        conn: &mut SqliteConnection,
        mut tx: Transaction,
    ) -> Result<Transaction> {
        let query = Query::insert()
            .into_table(Transactions::Table)
            .columns([
                Transactions::Id,
                Transactions::OwnerKind,
                Transactions::OwnerId,
                Transactions::Direction,
                Transactions::Bucket,
                Transactions::Category,
                Transactions::Amount,
                Transactions::OrderId,
                Transactions::Level,
                Transactions::Note,
                Transactions::AvailableAfter,
                Transactions::OnholdAfter,
                Transactions::TotalRpAfter,
                Transactions::CreatedAt,
            ])
            .values_panic([
                tx.id.to_string().into(),
                tx.wallet.kind().into(),
                tx.wallet.id().to_string().into(),
                tx.direction.as_str().into(),
                tx.bucket.as_str().into(),
                tx.category.as_str().into(),
                tx.amount.to_string().into(),
                tx.context.order_id.map(|id| id.to_string()).into(),
                tx.context.level.map(i64::from).into(),
                tx.context.note.clone().into(),
                tx.available_after.to_string().into(),
                tx.onhold_after.to_string().into(),
                tx.total_rp_after.to_string().into(),
                encode_timestamp(tx.created_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&mut *conn).await?;
        tx.sequence = result.last_insert_rowid() as u64;
        Ok(tx)
    }

    async fn insert_unlock(conn: &mut SqliteConnection, row: &UnlockRow) -> Result<()> {
        let query = Query::insert()
            .into_table(UnlockHistory::Table)
            .columns([
                UnlockHistory::Id,
                UnlockHistory::MemberId,
                UnlockHistory::PreviousReferrals,
                UnlockHistory::NewReferrals,
                UnlockHistory::PreviousUnlockedLevel,
                UnlockHistory::NewUnlockedLevel,
                UnlockHistory::ReleasedCp,
                UnlockHistory::CreatedAt,
            ])
            .values_panic([
                row.id.to_string().into(),
                row.member.to_string().into(),
                i64::from(row.previous_referrals).into(),
                i64::from(row.new_referrals).into(),
                i64::from(row.previous_unlocked_level).into(),
                i64::from(row.new_unlocked_level).into(),
                row.released_cp.to_string().into(),
                encode_timestamp(row.created_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    /// Write a batch within an already-started transaction.
    async fn apply_batch(
        conn: &mut SqliteConnection,
        batch: LedgerBatch,
    ) -> Result<Vec<Transaction>> {
        for wallet in &batch.wallets {
            Self::write_wallet(conn, wallet).await?;
        }
        for order in &batch.orders {
            Self::write_order(conn, order).await?;
        }
        for onhold in &batch.onholds {
            Self::write_onhold(conn, onhold).await?;
        }
        for merchant in &batch.merchants {
            Self::write_merchant(conn, merchant).await?;
        }
        for row in &batch.community_levels {
            Self::write_level(conn, row).await?;
        }
        for edge in &batch.referrals {
            Self::insert_referral(conn, edge).await?;
        }
        for row in &batch.unlock_history {
            Self::insert_unlock(conn, row).await?;
        }

        let mut committed = Vec::with_capacity(batch.transactions.len());
        for tx in batch.transactions {
            committed.push(Self::insert_transaction(conn, tx).await?);
        }
        Ok(committed)
    }
}

/// Prepend key columns to a row's value columns for an insert.
fn with_key<C, const N: usize>(
    key_columns: [C; N],
    key_values: [SimpleExpr; N],
    values: Vec<(C, SimpleExpr)>,
) -> (Vec<C>, Vec<SimpleExpr>) {
    let mut columns: Vec<C> = key_columns.into();
    let mut row: Vec<SimpleExpr> = key_values.into();
    for (column, value) in values {
        columns.push(column);
        row.push(value);
    }
    (columns, row)
}

fn version_value(version: u64) -> SimpleExpr {
    i64::try_from(version).unwrap_or(i64::MAX).into()
}

fn previous(version: u64) -> i64 {
    i64::try_from(expected_version(version)).unwrap_or(i64::MAX)
}

fn expect_one(entity: &'static str, key: String, version: u64, rows: u64) -> Result<()> {
    if version == 0 || rows == 0 {
        return Err(StorageError::VersionConflict {
            entity,
            key,
            expected: expected_version(version),
        });
    }
    Ok(())
}

#[async_trait]
impl SponsorLookup for SqliteLedgerStore {
    async fn sponsor_of(&self, member: MemberId) -> Result<Option<MemberId>> {
        let query = Query::select()
            .column(Referrals::SponsorId)
            .from(Referrals::Table)
            .and_where(Expr::col(Referrals::ChildId).eq(member.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => {
                let sponsor: String = row.try_get("sponsor_id")?;
                let id = crate::storage::helpers::decode_uuid("sponsor_id", &sponsor)?;
                Ok(Some(MemberId::from_uuid(id)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn wallet(&self, owner: &WalletOwner) -> Result<Option<Wallet>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Wallets::Table)
            .and_where(Expr::col(Wallets::OwnerKind).eq(owner.kind()))
            .and_where(Expr::col(Wallets::OwnerId).eq(owner.id().to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(rows::wallet).transpose()
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Orders::Table)
            .and_where(Expr::col(Orders::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(rows::order).transpose()
    }

    async fn onhold(&self, id: OnholdId) -> Result<Option<OnholdPoint>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Onholds::Table)
            .and_where(Expr::col(Onholds::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(rows::onhold).transpose()
    }

    async fn onhold_for_order(&self, order_id: OrderId) -> Result<Option<OnholdPoint>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Onholds::Table)
            .and_where(Expr::col(Onholds::OrderId).eq(order_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(rows::onhold).transpose()
    }

    async fn due_onholds(
        &self,
        now: DateTime<Utc>,
        after: Option<OnholdId>,
        limit: usize,
    ) -> Result<Vec<OnholdPoint>> {
        // SelectStatement is !Send; render it before the first await.
        let query = {
            let mut select = Query::select();
            select
                .column(Asterisk)
                .from(Onholds::Table)
                .and_where(Expr::col(Onholds::Status).eq(OnholdStatus::Onhold.as_str()))
                .and_where(Expr::col(Onholds::AutoReleaseAt).is_not_null())
                .and_where(Expr::col(Onholds::AutoReleaseAt).lte(encode_timestamp(now)));
            if let Some(after) = after {
                select.and_where(Expr::col(Onholds::Id).gt(after.to_string()));
            }
            select
                .order_by(Onholds::Id, SortOrder::Asc)
                .limit(limit as u64)
                .to_string(SqliteQueryBuilder)
        };

        let found = sqlx::query(&query).fetch_all(&self.pool).await?;
        debug!(count = found.len(), "Fetched due onholds");
        found.iter().map(rows::onhold).collect()
    }

    async fn merchant(&self, id: MerchantId) -> Result<Option<MerchantAccount>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Merchants::Table)
            .and_where(Expr::col(Merchants::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(rows::merchant).transpose()
    }

    async fn community_level(
        &self,
        member: MemberId,
        level: u8,
    ) -> Result<Option<CommunityPointLevel>> {
        let query = Query::select()
            .column(Asterisk)
            .from(CommunityLevels::Table)
            .and_where(Expr::col(CommunityLevels::MemberId).eq(member.to_string()))
            .and_where(Expr::col(CommunityLevels::Level).eq(i64::from(level)))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(rows::community_level).transpose()
    }

    async fn community_levels(&self, member: MemberId) -> Result<Vec<CommunityPointLevel>> {
        let query = Query::select()
            .column(Asterisk)
            .from(CommunityLevels::Table)
            .and_where(Expr::col(CommunityLevels::MemberId).eq(member.to_string()))
            .order_by(CommunityLevels::Level, SortOrder::Asc)
            .to_string(SqliteQueryBuilder);

        let found = sqlx::query(&query).fetch_all(&self.pool).await?;
        found.iter().map(rows::community_level).collect()
    }

    async fn transactions(&self, owner: &WalletOwner) -> Result<Vec<Transaction>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Transactions::Table)
            .and_where(Expr::col(Transactions::OwnerKind).eq(owner.kind()))
            .and_where(Expr::col(Transactions::OwnerId).eq(owner.id().to_string()))
            .order_by(Transactions::Sequence, SortOrder::Asc)
            .to_string(SqliteQueryBuilder);

        let found = sqlx::query(&query).fetch_all(&self.pool).await?;
        found.iter().map(rows::transaction).collect()
    }

    async fn unlock_history(&self, member: MemberId) -> Result<Vec<UnlockRow>> {
        let query = Query::select()
            .column(Asterisk)
            .from(UnlockHistory::Table)
            .and_where(Expr::col(UnlockHistory::MemberId).eq(member.to_string()))
            .order_by(UnlockHistory::CreatedAt, SortOrder::Asc)
            .order_by_expr(Expr::cust("rowid"), SortOrder::Asc)
            .to_string(SqliteQueryBuilder);

        let found = sqlx::query(&query).fetch_all(&self.pool).await?;
        found.iter().map(rows::unlock_history).collect()
    }

    async fn commit(&self, batch: LedgerBatch) -> Result<Vec<Transaction>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        // BEGIN IMMEDIATE takes the write lock up front so concurrent
        // committers queue instead of failing to upgrade a read lock.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match Self::apply_batch(&mut conn, batch).await {
            Ok(committed) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(committed)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }
}
