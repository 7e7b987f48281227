//! Storage implementations.
//!
//! The ledger store holds wallets, escrow rows, the sponsor tree and the
//! append-only transaction log. Reads are plain lookups; every write goes
//! through [`LedgerStore::commit`] as one all-or-nothing [`LedgerBatch`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::distribution::SponsorLookup;
use crate::model::{
    CommunityPointLevel, MemberId, MerchantAccount, MerchantId, OnholdId, OnholdPoint, Order,
    OrderId, Transaction, UnlockHistory, Wallet, WalletOwner,
};

mod batch;
#[cfg(feature = "sqlite")]
mod helpers;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use batch::LedgerBatch;
pub(crate) use batch::expected_version;
pub use memory::MemoryLedgerStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLedgerStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Version conflict on {entity} {key}: expected stored version {expected}")]
    VersionConflict {
        entity: &'static str,
        key: String,
        expected: u64,
    },

    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("Invalid stored {field}: {value}")]
    Decode { field: &'static str, value: String },

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage type not available: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// A concurrent writer got there first; the operation may be retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Interface for ledger persistence.
///
/// Implementations:
/// - `MemoryLedgerStore`: in-process maps, for tests and embedding
/// - `SqliteLedgerStore`: SQLite via sqlx
#[async_trait]
pub trait LedgerStore: SponsorLookup + Send + Sync {
    async fn wallet(&self, owner: &WalletOwner) -> Result<Option<Wallet>>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn onhold(&self, id: OnholdId) -> Result<Option<OnholdPoint>>;

    async fn onhold_for_order(&self, order_id: OrderId) -> Result<Option<OnholdPoint>>;

    /// One page of escrows with `status = onhold` and `auto_release_at <= now`,
    /// ordered by id and starting strictly after `after`.
    async fn due_onholds(
        &self,
        now: DateTime<Utc>,
        after: Option<OnholdId>,
        limit: usize,
    ) -> Result<Vec<OnholdPoint>>;

    async fn merchant(&self, id: MerchantId) -> Result<Option<MerchantAccount>>;

    async fn community_level(
        &self,
        member: MemberId,
        level: u8,
    ) -> Result<Option<CommunityPointLevel>>;

    /// All level rows for a member, ordered by level.
    async fn community_levels(&self, member: MemberId) -> Result<Vec<CommunityPointLevel>>;

    /// A wallet's transactions in sequence order.
    async fn transactions(&self, owner: &WalletOwner) -> Result<Vec<Transaction>>;

    /// A member's unlock history, oldest first.
    async fn unlock_history(&self, member: MemberId) -> Result<Vec<UnlockHistory>>;

    /// Apply a batch atomically.
    ///
    /// Returns the batch's transactions with their assigned sequences.
    async fn commit(&self, batch: LedgerBatch) -> Result<Vec<Transaction>>;
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn LedgerStore>> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Storage: memory");
            Ok(Arc::new(MemoryLedgerStore::new()))
        }
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            info!("Storage: sqlite at {}", config.sqlite.path);
            let store = SqliteLedgerStore::connect(&config.sqlite).await?;
            store.init().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err(StorageError::Unavailable("sqlite".to_string()))
        }
    }
}
