//! Ledger domain types.
//!
//! Every mutable row carries a `version` used for optimistic concurrency:
//! 0 means "never persisted", and a commit writes `version + 1`.

macro_rules! str_enum {
    ($ty:ty { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($s => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

mod community;
mod escrow;
mod ids;
mod merchant;
mod transaction;
mod wallet;

pub use community::{CommunityPointLevel, ReferralEdge, UnlockHistory, MAX_COMMUNITY_LEVEL};
pub use escrow::{OnholdPoint, OnholdStatus, Order, OrderLine, OrderStatus};
pub use ids::{CorporateId, MemberId, MerchantId, OnholdId, OrderId, WalletOwner};
pub use merchant::MerchantAccount;
pub use transaction::{Bucket, Category, Direction, Posting, PostingContext, Transaction};
pub use wallet::{Balances, Wallet};

/// Point amounts are exact decimals.
pub type Points = rust_decimal::Decimal;
