//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! The tables themselves are created by the migrations under `migrations/sqlite`.

use sea_query::Iden;

/// Wallets table schema.
#[derive(Iden)]
pub enum Wallets {
    Table,
    OwnerKind,
    OwnerId,
    AvailablePoints,
    OnholdPoints,
    TotalPoints,
    TotalPp,
    TotalRp,
    TotalCp,
    TotalReferrals,
    EvaluatedReferrals,
    UnlockedLevel,
    Version,
    UpdatedAt,
}

/// Orders table schema.
#[derive(Iden)]
pub enum Orders {
    Table,
    Id,
    MerchantId,
    BuyerId,
    TotalAmount,
    Lines,
    ShippingPoints,
    Status,
    ShippedAt,
    CompletedAt,
    Version,
}

/// Escrow table schema.
#[derive(Iden)]
pub enum Onholds {
    Table,
    Id,
    OrderId,
    TotalPoints,
    ItemsPoints,
    ShippingPoints,
    Status,
    ShippedAt,
    AutoReleaseAt,
    ReleasedAt,
    RefundedAt,
    RefundReason,
    CreatedAt,
    Version,
}

/// Merchants table schema.
#[derive(Iden)]
pub enum Merchants {
    Table,
    Id,
    CorporateId,
    RewardBudgetPercent,
    Version,
}

/// Sponsor edges, keyed by child.
#[derive(Iden)]
pub enum Referrals {
    Table,
    ChildId,
    SponsorId,
    CreatedAt,
}

/// Per-level community balances.
#[derive(Iden)]
pub enum CommunityLevels {
    Table,
    MemberId,
    Level,
    TotalCp,
    AvailableCp,
    OnholdCp,
    IsLocked,
    Version,
}

/// Append-only transaction log.
#[derive(Iden)]
pub enum Transactions {
    Table,
    Sequence,
    Id,
    OwnerKind,
    OwnerId,
    Direction,
    Bucket,
    Category,
    Amount,
    OrderId,
    Level,
    Note,
    AvailableAfter,
    OnholdAfter,
    TotalRpAfter,
    CreatedAt,
}

/// Unlock audit rows.
#[derive(Iden)]
pub enum UnlockHistory {
    Table,
    Id,
    MemberId,
    PreviousReferrals,
    NewReferrals,
    PreviousUnlockedLevel,
    NewUnlockedLevel,
    ReleasedCp,
    CreatedAt,
}
