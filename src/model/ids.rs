//! Strongly-typed identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// A platform member (buyer and/or sponsor).
    MemberId
);
uuid_id!(
    /// A merchant selling through the platform.
    MerchantId
);
uuid_id!(
    /// The corporate account funding a merchant's rewards.
    CorporateId
);
uuid_id!(OrderId);
uuid_id!(
    /// An escrow record; one per order.
    OnholdId
);

/// The owner of a wallet.
///
/// Wallets are keyed by `(kind, id)`. The company wallet is a singleton
/// holding the platform reserve and uses the nil UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum WalletOwner {
    Member(MemberId),
    Merchant(MerchantId),
    Corporate(CorporateId),
    Company,
}

impl WalletOwner {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Member(_) => "member",
            Self::Merchant(_) => "merchant",
            Self::Corporate(_) => "corporate",
            Self::Company => "company",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Member(id) => id.as_uuid(),
            Self::Merchant(id) => id.as_uuid(),
            Self::Corporate(id) => id.as_uuid(),
            Self::Company => Uuid::nil(),
        }
    }

    /// Rebuild an owner from its stored `(kind, id)` pair.
    pub fn from_parts(kind: &str, id: Uuid) -> Option<Self> {
        match kind {
            "member" => Some(Self::Member(MemberId::from_uuid(id))),
            "merchant" => Some(Self::Merchant(MerchantId::from_uuid(id))),
            "corporate" => Some(Self::Corporate(CorporateId::from_uuid(id))),
            "company" if id.is_nil() => Some(Self::Company),
            _ => None,
        }
    }

    pub fn as_member(&self) -> Option<MemberId> {
        match self {
            Self::Member(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for WalletOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Company => f.write_str("company"),
            other => write!(f, "{}:{}", other.kind(), other.id()),
        }
    }
}
