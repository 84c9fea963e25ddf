//! Time-credit ledger.
//!
//! This module implements the credit economy:
//! - Ledger entries, kinds, statuses and references
//! - Credit policy (rates, bonuses, expiration)
//! - The ledger store seam and an in-memory store
//! - Balance summaries and the balance oracle
//! - The transfer orchestrator (locking, idempotency, retries)
//! - Reservations
//! - The expiration sweeper
//! - The credit service facade

pub mod balance;
pub mod entry;
pub mod error;
pub mod locks;
pub mod memory;
pub mod orchestrator;
pub mod policy;
pub mod reservation;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod types;
pub mod validation;

#[cfg(test)]
mod service_props;
#[cfg(test)]
mod tests;

pub use balance::{AccountSummary, BalanceOracle, Reconciliation};
pub use entry::{
    EntryDirection, EntryKind, EntryReference, EntryStatus, LedgerEntry, NewEntry, ReferenceKey,
    ReferenceType,
};
pub use error::CreditError;
pub use memory::InMemoryLedgerStore;
pub use orchestrator::{ExpirationOutcome, RetryPolicy, TransferOrchestrator};
pub use policy::CreditPolicy;
pub use reservation::{Reservation, ReservationKey, ReservationManager};
pub use service::CreditService;
pub use store::{CommitBatch, LedgerStore, SharedLedgerStore};
pub use sweeper::{ExpirationSweeper, SweepReport};
pub use types::{
    BalanceView, CreditStatistics, EntryFilter, HistoryQuery, HistorySortField, TransferReceipt,
    TransferRequest,
};
