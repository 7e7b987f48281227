//! Wallet ledger: the unit-of-work journal, log replay and wallet services.

mod journal;
mod replay;
mod service;

pub use journal::Journal;
pub use replay::{replay, Reconciliation};
pub use service::LedgerService;
