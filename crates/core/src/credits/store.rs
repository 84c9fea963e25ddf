//! Persistence seam for the credit ledger.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use skillswap_shared::types::{AccountId, EntryId, PageResponse};

use super::balance::AccountSummary;
use super::entry::{EntryKind, EntryReference, LedgerEntry, NewEntry};
use super::error::CreditError;
use super::reservation::{Reservation, ReservationKey};
use super::types::HistoryQuery;

/// One atomic unit of ledger work.
///
/// A store applies every part or none of it: drafts are appended as
/// `Completed`, `expire` ids flip from `Completed` to `Expired`, released
/// reservations stop holding credits, and the summaries of every touched
/// account are rewritten. The commit fails with `InsufficientFunds` if any
/// debited account would end with negative available credits.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    /// Drafts to append, in order.
    pub entries: Vec<NewEntry>,
    /// Completed credits to mark `Expired`.
    pub expire: Vec<EntryId>,
    /// Reservations consumed by this unit.
    pub release: Vec<ReservationKey>,
}

impl CommitBatch {
    /// A batch holding one draft.
    #[must_use]
    pub fn single(entry: NewEntry) -> Self {
        Self {
            entries: vec![entry],
            ..Self::default()
        }
    }

    /// Every account touched by the batch, ascending and deduplicated.
    #[must_use]
    pub fn accounts(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self
            .entries
            .iter()
            .map(|entry| entry.account_id)
            .chain(self.release.iter().map(|key| key.account_id))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Total debited from `account_id` by the batch, as a positive magnitude.
    #[must_use]
    pub fn debited_from(&self, account_id: AccountId) -> Decimal {
        self.entries
            .iter()
            .filter(|entry| entry.account_id == account_id && entry.amount < Decimal::ZERO)
            .map(|entry| entry.amount.abs())
            .sum()
    }

    /// Returns true if the batch does nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.expire.is_empty() && self.release.is_empty()
    }
}

/// Durable storage of entries, summaries and reservations.
///
/// Implementations must make [`LedgerStore::commit`] atomic and must enforce
/// the `(reference, kind)` uniqueness rule themselves, reporting a collision
/// as [`CreditError::DuplicateReference`] carrying the first entry.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Creates an empty summary. Opening an existing account returns it unchanged.
    async fn open_account(
        &self,
        account_id: AccountId,
        at: DateTime<Utc>,
    ) -> Result<AccountSummary, CreditError>;

    /// Returns the summary of an account.
    async fn summary(&self, account_id: AccountId) -> Result<AccountSummary, CreditError>;

    /// Applies a batch atomically and returns the committed entries in order.
    async fn commit(&self, batch: CommitBatch) -> Result<Vec<LedgerEntry>, CreditError>;

    /// Finds the entry recorded for a reference and kind.
    async fn find_by_reference(
        &self,
        reference: &EntryReference,
        kind: EntryKind,
    ) -> Result<Option<LedgerEntry>, CreditError>;

    /// Returns one page of an account's entries.
    async fn entries_for(
        &self,
        account_id: AccountId,
        query: &HistoryQuery,
    ) -> Result<PageResponse<LedgerEntry>, CreditError>;

    /// Sums the posted (`Completed` or `Expired`) amounts of an account.
    async fn sum_posted(&self, account_id: AccountId) -> Result<Decimal, CreditError>;

    /// Completed credits of an account expiring in `(from, to]`.
    async fn expiring_between(
        &self,
        account_id: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, CreditError>;

    /// Completed credits with `expires_at <= now`, oldest expiry first.
    async fn due_for_expiration(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<LedgerEntry>, CreditError>;

    /// Active reservations of an account.
    async fn reservations(&self, account_id: AccountId) -> Result<Vec<Reservation>, CreditError>;

    /// Records a reservation, failing if it exceeds available credits.
    async fn place_reservation(
        &self,
        reservation: Reservation,
    ) -> Result<AccountSummary, CreditError>;

    /// Removes a reservation without posting anything.
    async fn remove_reservation(&self, key: &ReservationKey) -> Result<Reservation, CreditError>;
}

/// Store handle shared across services and tasks.
pub type SharedLedgerStore = Arc<dyn LedgerStore>;
