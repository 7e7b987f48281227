//! Rewards Ledger - escrowed points and multi-level reward distribution
//!
//! Holds order points in escrow until release, then fans each order's reward
//! pool out to the buyer, their sponsor, a 30-level community tree and the
//! company reserve as one atomic ledger commit. Every balance change is an
//! immutable transaction carrying a balance-after snapshot, so wallets can be
//! rebuilt from the log alone.

pub mod clock;
pub mod config;
pub mod distribution;
pub mod error;
pub mod escrow;
pub mod facade;
pub mod ledger;
pub mod merchant;
pub mod model;
pub mod notify;
pub mod referral;
pub mod scheduler;
pub mod storage;
pub mod unlock;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use distribution::{DistributionEngine, DistributionSummary, NotEligibleReason, ReleaseOutcome};
pub use error::{EngineError, IntegrityError, LedgerError, Result};
pub use escrow::{EscrowManager, EscrowOutcome, EscrowRejection};
pub use facade::{RewardsEngine, RewardsEngineBuilder};
pub use notify::{ChannelSink, LedgerEvent, NotificationSink, TracingSink};
pub use referral::{LinkOutcome, LinkRejection};
pub use scheduler::{ReleaseReport, ReleaseScheduler};
pub use storage::{LedgerStore, MemoryLedgerStore, StorageError};
pub use unlock::{UnlockEvaluator, UnlockOutcome};
