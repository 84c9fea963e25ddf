//! Write side of the ledger.
//!
//! Every balance-changing operation runs here as: lock the touched accounts
//! in ascending order, check for a replayed reference, check solvency,
//! commit one batch. Lock timeouts surface as `ConcurrentModification` and
//! are retried with exponential backoff before reaching the caller.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use skillswap_shared::config::LedgerConfig;
use skillswap_shared::types::{AccountId, EntryId, TransferId};
use tracing::{debug, info, instrument, warn};

use super::entry::{EntryKind, EntryReference, EntryStatus, LedgerEntry, NewEntry, ReferenceType};
use super::error::CreditError;
use super::locks::AccountLocks;
use super::reservation::ReservationKey;
use super::store::{CommitBatch, SharedLedgerStore};
use super::types::{TransferReceipt, TransferRequest};
use super::validation::validate_positive_amount;

/// Upper bound of a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// How conflicting writes are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per retry.
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Builds the policy from ledger configuration.
    #[must_use]
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1 << exp).min(MAX_BACKOFF)
    }
}

/// What happened to one expired credit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpirationOutcome {
    /// The credit that lapsed.
    pub original_id: EntryId,
    /// Its account.
    pub account_id: AccountId,
    /// The negating entry, absent when nothing was left to negate.
    pub expiration: Option<LedgerEntry>,
    /// Credits removed.
    pub negated: Decimal,
    /// Part of the original amount already spent and therefore not negated.
    pub shortfall: Decimal,
    /// Holds cancelled because the remaining balance no longer covers them.
    pub released: Vec<ReservationKey>,
}

/// Serializes and commits ledger writes.
pub struct TransferOrchestrator {
    store: SharedLedgerStore,
    locks: AccountLocks,
    retry: RetryPolicy,
}

impl TransferOrchestrator {
    /// Creates an orchestrator over a store.
    pub fn new(store: SharedLedgerStore, config: &LedgerConfig) -> Self {
        Self {
            store,
            locks: AccountLocks::new(Duration::from_millis(config.lock_timeout_ms)),
            retry: RetryPolicy::from_config(config),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &SharedLedgerStore {
        &self.store
    }

    pub(crate) fn locks(&self) -> &AccountLocks {
        &self.locks
    }

    /// Commits a credit draft. The amount must be positive.
    pub async fn credit(&self, entry: NewEntry) -> Result<LedgerEntry, CreditError> {
        if entry.amount <= Decimal::ZERO {
            return Err(CreditError::InvalidAmount {
                amount: entry.amount,
                reason: "credit amount must be positive",
            });
        }
        self.post(entry).await
    }

    /// Commits a debit draft. The amount must be negative.
    pub async fn debit(&self, entry: NewEntry) -> Result<LedgerEntry, CreditError> {
        if entry.amount >= Decimal::ZERO {
            return Err(CreditError::InvalidAmount {
                amount: entry.amount,
                reason: "debit amount must be negative",
            });
        }
        self.post(entry).await
    }

    /// Commits a draft of either sign.
    ///
    /// A draft whose `(reference, kind)` was already recorded returns the
    /// recorded entry without posting again.
    #[instrument(
        skip(self, entry),
        fields(account_id = %entry.account_id, kind = %entry.kind, amount = %entry.amount)
    )]
    pub async fn post(&self, entry: NewEntry) -> Result<LedgerEntry, CreditError> {
        entry.validate()?;
        let committed = self
            .with_retry("post", move || self.post_once(entry.clone()))
            .await?;
        debug!(entry_id = %committed.id, balance = %committed.balance_after, "entry posted");
        Ok(committed)
    }

    async fn post_once(&self, entry: NewEntry) -> Result<LedgerEntry, CreditError> {
        let _guard = self.locks.acquire(&[entry.account_id]).await?;

        if let Some(existing) = self.recorded(&entry).await? {
            return Ok(existing);
        }

        let summary = self.store.summary(entry.account_id).await?;
        if entry.amount < Decimal::ZERO {
            let requested = entry.amount.abs();
            if summary.available() < requested {
                return Err(CreditError::InsufficientFunds {
                    account_id: entry.account_id,
                    available: summary.available(),
                    requested,
                });
            }
        }

        match self.store.commit(CommitBatch::single(entry)).await {
            Ok(committed) => committed
                .into_iter()
                .next()
                .ok_or_else(|| CreditError::Internal("commit returned no entries".into())),
            Err(CreditError::DuplicateReference { existing }) => Self::replay(*existing),
            Err(err) => Err(err),
        }
    }

    /// Returns the entry already recorded for the draft's reference, if any.
    pub(crate) async fn recorded(
        &self,
        entry: &NewEntry,
    ) -> Result<Option<LedgerEntry>, CreditError> {
        let Some(reference) = &entry.reference else {
            return Ok(None);
        };
        match self.store.find_by_reference(reference, entry.kind).await? {
            Some(existing) => Self::replay(existing).map(Some),
            None => Ok(None),
        }
    }

    /// A replay succeeds only against a posted entry.
    pub(crate) fn replay(existing: LedgerEntry) -> Result<LedgerEntry, CreditError> {
        if existing.status.is_posted() {
            debug!(entry_id = %existing.id, "reference already recorded, returning existing entry");
            Ok(existing)
        } else {
            Err(CreditError::DuplicateReference {
                existing: Box::new(existing),
            })
        }
    }

    /// Moves credits between two accounts as one atomic pair of entries.
    ///
    /// The incoming leg expires at `credit_expires_at`.
    #[instrument(skip(self, request), fields(from = %request.from, to = %request.to, amount = %request.amount))]
    pub async fn transfer(
        &self,
        request: &TransferRequest,
        credit_expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<TransferReceipt, CreditError> {
        validate_positive_amount(request.amount)?;
        if request.from == request.to {
            return Err(CreditError::SameAccount(request.from));
        }

        let transfer_id = request.idempotency_key.unwrap_or_default();
        let reference = EntryReference::new(transfer_id.to_string(), ReferenceType::CreditTransfer);
        let note = if request.description.is_empty() {
            String::new()
        } else {
            format!(": {}", request.description)
        };

        let debit = NewEntry::debit(
            request.from,
            request.amount,
            EntryKind::TransferOut,
            format!("Transfer to {}{note}", request.to),
            now,
        )
        .with_reference(reference.clone());
        let credit = NewEntry::credit(
            request.to,
            request.amount,
            EntryKind::TransferIn,
            format!("Transfer from {}{note}", request.from),
            now,
        )
        .with_reference(reference)
        .expiring_at(credit_expires_at);
        debit.validate()?;
        credit.validate()?;

        let receipt = self
            .with_retry("transfer", move || {
                self.transfer_once(transfer_id, debit.clone(), credit.clone())
            })
            .await?;
        info!(%transfer_id, "credits transferred");
        Ok(receipt)
    }

    async fn transfer_once(
        &self,
        transfer_id: TransferId,
        debit: NewEntry,
        credit: NewEntry,
    ) -> Result<TransferReceipt, CreditError> {
        let _guard = self
            .locks
            .acquire(&[debit.account_id, credit.account_id])
            .await?;

        if let Some(receipt) = self.recorded_transfer(transfer_id).await? {
            debug!(%transfer_id, "transfer already recorded, returning existing legs");
            return Self::replay_transfer(receipt, &debit, &credit);
        }

        let source = self.store.summary(debit.account_id).await?;
        self.store.summary(credit.account_id).await?;

        let requested = debit.amount.abs();
        if source.available() < requested {
            return Err(CreditError::InsufficientFunds {
                account_id: debit.account_id,
                available: source.available(),
                requested,
            });
        }

        let batch = CommitBatch {
            entries: vec![debit.clone(), credit.clone()],
            ..CommitBatch::default()
        };
        match self.store.commit(batch).await {
            Ok(committed) => {
                let mut legs = committed.into_iter();
                match (legs.next(), legs.next()) {
                    (Some(debit), Some(credit)) => Ok(TransferReceipt {
                        transfer_id,
                        debit,
                        credit,
                    }),
                    _ => Err(CreditError::Internal(
                        "transfer commit returned fewer than two entries".into(),
                    )),
                }
            }
            Err(CreditError::DuplicateReference { .. }) => {
                let receipt = self.recorded_transfer(transfer_id).await?.ok_or_else(|| {
                    CreditError::Internal(format!("transfer {transfer_id} collided without legs"))
                })?;
                Self::replay_transfer(receipt, &debit, &credit)
            }
            Err(err) => Err(err),
        }
    }

    /// A recorded transfer answers a retry only if it moved the same amount
    /// between the same accounts.
    fn replay_transfer(
        receipt: TransferReceipt,
        debit: &NewEntry,
        credit: &NewEntry,
    ) -> Result<TransferReceipt, CreditError> {
        let same = receipt.debit.account_id == debit.account_id
            && receipt.credit.account_id == credit.account_id
            && receipt.debit.amount == debit.amount
            && receipt.credit.amount == credit.amount;
        if same {
            Ok(receipt)
        } else {
            warn!(
                transfer_id = %receipt.transfer_id,
                "idempotency key reused for a different transfer"
            );
            Err(CreditError::DuplicateReference {
                existing: Box::new(receipt.debit),
            })
        }
    }

    async fn recorded_transfer(
        &self,
        transfer_id: TransferId,
    ) -> Result<Option<TransferReceipt>, CreditError> {
        let reference = EntryReference::new(transfer_id.to_string(), ReferenceType::CreditTransfer);
        let debit = self
            .store
            .find_by_reference(&reference, EntryKind::TransferOut)
            .await?;
        let credit = self
            .store
            .find_by_reference(&reference, EntryKind::TransferIn)
            .await?;
        match (debit, credit) {
            (Some(debit), Some(credit)) => Ok(Some(TransferReceipt {
                transfer_id,
                debit,
                credit,
            })),
            (None, None) => Ok(None),
            _ => Err(CreditError::Internal(format!(
                "transfer {transfer_id} has only one leg recorded"
            ))),
        }
    }

    /// Negates a lapsed credit and marks it `Expired` in one commit.
    ///
    /// Held credits are negated like free ones. Only credits already spent
    /// are left alone, so the balance never goes below zero. Reservations
    /// the remaining balance can no longer cover are cancelled, newest first,
    /// in the same commit. If nothing is left the credit is marked without
    /// an entry.
    #[instrument(skip(self, original), fields(entry_id = %original.id, account_id = %original.account_id))]
    pub async fn expire(
        &self,
        original: &LedgerEntry,
        now: DateTime<Utc>,
    ) -> Result<ExpirationOutcome, CreditError> {
        if original.status != EntryStatus::Completed || !original.is_credit() {
            return Err(CreditError::EntryNotExpirable(original.id));
        }
        self.with_retry("expire", move || self.expire_once(original, now))
            .await
    }

    async fn expire_once(
        &self,
        original: &LedgerEntry,
        now: DateTime<Utc>,
    ) -> Result<ExpirationOutcome, CreditError> {
        let _guard = self.locks.acquire(&[original.account_id]).await?;

        let summary = self.store.summary(original.account_id).await?;
        let negated = original.amount.min(summary.current_balance.max(Decimal::ZERO));
        let shortfall = original.amount - negated;
        let remaining = summary.current_balance - negated;

        let mut released = Vec::new();
        if summary.reserved_amount > remaining {
            let mut held = self.store.reservations(original.account_id).await?;
            held.sort_by_key(|reservation| reservation.created_at);
            let mut reserved = summary.reserved_amount;
            while reserved > remaining {
                let Some(newest) = held.pop() else { break };
                reserved -= newest.amount;
                released.push(newest.key());
            }
        }

        let mut batch = CommitBatch {
            expire: vec![original.id],
            release: released.clone(),
            ..CommitBatch::default()
        };
        if negated > Decimal::ZERO {
            batch.entries.push(
                NewEntry::debit(
                    original.account_id,
                    negated,
                    EntryKind::Expiration,
                    format!("Expired credits from entry {}", original.id),
                    now,
                )
                .with_reference(EntryReference::new(
                    original.id.to_string(),
                    ReferenceType::CreditExpiration,
                )),
            );
        }

        let expiration = self.store.commit(batch).await?.into_iter().next();
        if shortfall > Decimal::ZERO {
            warn!(
                original = %original.amount,
                %negated,
                %shortfall,
                "expired credit exceeded the balance; negated what remained"
            );
        }
        if !released.is_empty() {
            warn!(count = released.len(), "reservations cancelled by expiration");
        }

        Ok(ExpirationOutcome {
            original_id: original.id,
            account_id: original.account_id,
            expiration,
            negated,
            shortfall,
            released,
        })
    }

    /// Runs `attempt` until it succeeds, fails with a non-retryable error,
    /// or the retry budget is spent.
    pub(crate) async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, CreditError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CreditError>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(err) if err.is_retryable() && retries < self.retry.max_retries => {
                    retries += 1;
                    let delay = self.retry.backoff(retries);
                    warn!(
                        operation,
                        retry = retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "write conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}
