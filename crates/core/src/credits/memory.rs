//! Process-local ledger store.
//!
//! Backs tests and the `memory` backend. One `RwLock` guards the whole
//! state, and a commit validates everything before mutating, so a failed
//! commit leaves no trace.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use skillswap_shared::types::{AccountId, EntryId, PageResponse, SortDirection};
use tokio::sync::RwLock;

use super::balance::AccountSummary;
use super::entry::{EntryKind, EntryReference, EntryStatus, LedgerEntry, ReferenceKey};
use super::error::CreditError;
use super::reservation::{Reservation, ReservationKey};
use super::store::{CommitBatch, LedgerStore};
use super::types::{HistoryQuery, HistorySortField};

#[derive(Default)]
struct MemoryState {
    /// Entry with id `n` lives at index `n - 1`.
    entries: Vec<LedgerEntry>,
    by_account: HashMap<AccountId, Vec<usize>>,
    references: HashMap<ReferenceKey, usize>,
    summaries: HashMap<AccountId, AccountSummary>,
    reservations: HashMap<ReservationKey, Reservation>,
}

impl MemoryState {
    fn index_of(&self, id: EntryId) -> Option<usize> {
        let index = usize::try_from(id.value()).ok()?.checked_sub(1)?;
        (index < self.entries.len()).then_some(index)
    }

    fn entries_of(&self, account_id: AccountId) -> impl Iterator<Item = &LedgerEntry> {
        self.by_account
            .get(&account_id)
            .into_iter()
            .flatten()
            .map(|&index| &self.entries[index])
    }
}

/// Ledger store held entirely in memory.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<MemoryState>,
}

impl InMemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn next_id(len: usize, offset: usize) -> Result<EntryId, CreditError> {
    i64::try_from(len + offset + 1)
        .map(EntryId)
        .map_err(|_| CreditError::Internal("entry id overflow".into()))
}

fn compare(a: &LedgerEntry, b: &LedgerEntry, field: HistorySortField) -> Ordering {
    let primary = match field {
        HistorySortField::CreatedAt => a.created_at.cmp(&b.created_at),
        HistorySortField::Amount => a.amount.cmp(&b.amount),
        HistorySortField::Kind => a.kind.as_str().cmp(b.kind.as_str()),
        HistorySortField::Status => a.status.as_str().cmp(b.status.as_str()),
        HistorySortField::Id => Ordering::Equal,
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn open_account(
        &self,
        account_id: AccountId,
        at: DateTime<Utc>,
    ) -> Result<AccountSummary, CreditError> {
        let mut state = self.state.write().await;
        Ok(state
            .summaries
            .entry(account_id)
            .or_insert_with(|| AccountSummary::new(account_id, at))
            .clone())
    }

    async fn summary(&self, account_id: AccountId) -> Result<AccountSummary, CreditError> {
        self.state
            .read()
            .await
            .summaries
            .get(&account_id)
            .cloned()
            .ok_or(CreditError::AccountNotFound(account_id))
    }

    async fn commit(&self, batch: CommitBatch) -> Result<Vec<LedgerEntry>, CreditError> {
        for entry in &batch.entries {
            entry.validate()?;
        }

        let mut state = self.state.write().await;

        let mut working = BTreeMap::new();
        for account_id in batch.accounts() {
            let summary = state
                .summaries
                .get(&account_id)
                .cloned()
                .ok_or(CreditError::AccountNotFound(account_id))?;
            working.insert(account_id, summary);
        }

        let mut seen = HashSet::new();
        for entry in &batch.entries {
            if let Some(key) = entry.reference_key() {
                if let Some(&index) = state.references.get(&key) {
                    return Err(CreditError::DuplicateReference {
                        existing: Box::new(state.entries[index].clone()),
                    });
                }
                if !seen.insert(key) {
                    return Err(CreditError::Internal(
                        "one commit cannot record a reference twice".into(),
                    ));
                }
            }
        }

        let mut expired = Vec::with_capacity(batch.expire.len());
        for &id in &batch.expire {
            let index = state.index_of(id).ok_or(CreditError::EntryNotFound(id))?;
            let original = &state.entries[index];
            if original.status != EntryStatus::Completed || !original.is_credit() {
                return Err(CreditError::EntryNotExpirable(id));
            }
            expired.push(index);
        }

        for key in &batch.release {
            let held = state.reservations.get(key).ok_or_else(|| key.not_found())?;
            if let Some(summary) = working.get_mut(&key.account_id) {
                summary.release(held.amount);
            }
        }

        let processed_at = Utc::now();
        let base = state.entries.len();
        let mut committed = Vec::with_capacity(batch.entries.len());
        for (offset, entry) in batch.entries.iter().enumerate() {
            let summary = working
                .get_mut(&entry.account_id)
                .ok_or(CreditError::AccountNotFound(entry.account_id))?;
            let snapshot = summary.post(entry.amount, entry.kind, entry.created_at);
            committed.push(entry.clone().into_committed(
                next_id(base, offset)?,
                snapshot.before,
                processed_at,
            ));
        }

        for (account_id, summary) in &working {
            let debited = batch.debited_from(*account_id);
            if debited > Decimal::ZERO {
                summary.ensure_solvent(debited)?;
            }
        }

        // Validated; apply.
        for index in expired {
            state.entries[index].status = EntryStatus::Expired;
        }
        for key in &batch.release {
            state.reservations.remove(key);
        }
        for entry in &committed {
            let index = state.entries.len();
            if let Some(key) = entry.reference_key() {
                state.references.insert(key, index);
            }
            state
                .by_account
                .entry(entry.account_id)
                .or_default()
                .push(index);
            state.entries.push(entry.clone());
        }
        state.summaries.extend(working);

        Ok(committed)
    }

    async fn find_by_reference(
        &self,
        reference: &EntryReference,
        kind: EntryKind,
    ) -> Result<Option<LedgerEntry>, CreditError> {
        let state = self.state.read().await;
        let key = ReferenceKey {
            reference: reference.clone(),
            kind,
        };
        Ok(state
            .references
            .get(&key)
            .map(|&index| state.entries[index].clone()))
    }

    async fn entries_for(
        &self,
        account_id: AccountId,
        query: &HistoryQuery,
    ) -> Result<PageResponse<LedgerEntry>, CreditError> {
        let state = self.state.read().await;
        let mut matching: Vec<&LedgerEntry> = state
            .entries_of(account_id)
            .filter(|entry| query.filter.matches(entry))
            .collect();

        matching.sort_by(|a, b| {
            let ordering = compare(a, b, query.sort_by);
            match query.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });

        let total = matching.len() as u64;
        let offset = usize::try_from(query.page.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.page.limit()).unwrap_or(usize::MAX);
        let data = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        Ok(PageResponse::new(
            data,
            query.page.page,
            query.page.per_page,
            total,
        ))
    }

    async fn sum_posted(&self, account_id: AccountId) -> Result<Decimal, CreditError> {
        let state = self.state.read().await;
        Ok(state
            .entries_of(account_id)
            .filter(|entry| entry.status.is_posted())
            .map(|entry| entry.amount)
            .sum())
    }

    async fn expiring_between(
        &self,
        account_id: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, CreditError> {
        let state = self.state.read().await;
        let mut found: Vec<LedgerEntry> = state
            .entries_of(account_id)
            .filter(|entry| {
                entry.status == EntryStatus::Completed
                    && entry.is_credit()
                    && entry.expires_at.is_some_and(|at| at > from && at <= to)
            })
            .cloned()
            .collect();
        found.sort_by_key(|entry| (entry.expires_at, entry.id));
        Ok(found)
    }

    async fn due_for_expiration(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<LedgerEntry>, CreditError> {
        let state = self.state.read().await;
        let mut due: Vec<&LedgerEntry> = state
            .entries
            .iter()
            .filter(|entry| entry.is_due_for_expiration(now))
            .collect();
        due.sort_by_key(|entry| (entry.expires_at, entry.id));
        Ok(due
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn reservations(&self, account_id: AccountId) -> Result<Vec<Reservation>, CreditError> {
        let state = self.state.read().await;
        if !state.summaries.contains_key(&account_id) {
            return Err(CreditError::AccountNotFound(account_id));
        }
        let mut held: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        held.sort_by_key(|r| r.created_at);
        Ok(held)
    }

    async fn place_reservation(
        &self,
        reservation: Reservation,
    ) -> Result<AccountSummary, CreditError> {
        let mut state = self.state.write().await;
        let key = reservation.key();
        if state.reservations.contains_key(&key) {
            return Err(CreditError::ReservationExists {
                account_id: key.account_id,
                purpose: key.purpose,
            });
        }

        let summary = state
            .summaries
            .get_mut(&reservation.account_id)
            .ok_or(CreditError::AccountNotFound(reservation.account_id))?;
        summary.reserve(reservation.amount)?;
        let updated = summary.clone();

        state.reservations.insert(key, reservation);
        Ok(updated)
    }

    async fn remove_reservation(&self, key: &ReservationKey) -> Result<Reservation, CreditError> {
        let mut state = self.state.write().await;
        let held = state
            .reservations
            .remove(key)
            .ok_or_else(|| key.not_found())?;
        if let Some(summary) = state.summaries.get_mut(&key.account_id) {
            summary.release(held.amount);
        }
        Ok(held)
    }
}
