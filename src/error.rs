//! Error types for ledger operations.
//!
//! Expected business rejections (not due yet, already released, insufficient
//! corporate float) are reported through outcome enums, not these errors.
//! An `Err` means the operation could not run at all: storage failed, the
//! data is inconsistent, or a posting broke a balance rule.

use crate::config::ConfigError;
use crate::model::{Bucket, MemberId, MerchantId, OnholdId, OrderId, Points, WalletOwner};
use crate::storage::StorageError;

/// A posting could not be applied to a wallet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Posting amount must be positive: {owner} got {amount}")]
    NonPositiveAmount { owner: WalletOwner, amount: Points },

    #[error("Insufficient {bucket} balance in {owner}: requested {requested}, held {available}")]
    InsufficientBalance {
        owner: WalletOwner,
        bucket: Bucket,
        requested: Points,
        available: Points,
    },

    #[error("Wallet not loaded into journal: {0}")]
    WalletNotLoaded(WalletOwner),

    #[error("Replay diverged from recorded snapshot at sequence {sequence}")]
    SnapshotMismatch { sequence: u64 },
}

/// Stored data violates an invariant the engine relies on.
///
/// These indicate upstream corruption and abort the whole operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("Sponsor cycle detected at level {level}: {member} already visited")]
    SponsorCycle { member: MemberId, level: u8 },

    #[error("Wallet missing: {0}")]
    MissingWallet(WalletOwner),

    #[error("Order {order_id} missing for onhold {onhold_id}")]
    MissingOrder {
        onhold_id: OnholdId,
        order_id: OrderId,
    },

    #[error("Merchant account missing: {0}")]
    MissingMerchant(MerchantId),
}

/// Errors returned by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl EngineError {
    /// Whether retrying the whole operation from scratch may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_conflict())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
