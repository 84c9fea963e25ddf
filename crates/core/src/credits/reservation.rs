//! Credit holds.
//!
//! A reservation earmarks credits for a pending purpose, such as an
//! upcoming session. Held credits stay in the balance but leave the
//! available amount, and are either released unchanged or captured as a
//! debit in the same commit that drops the hold.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use skillswap_shared::types::AccountId;
use tracing::{info, instrument};

use super::entry::{EntryKind, EntryReference, LedgerEntry, NewEntry};
use super::error::CreditError;
use super::orchestrator::TransferOrchestrator;
use super::store::CommitBatch;
use super::validation::validate_positive_amount;

/// An active hold on an account's credits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    /// The account.
    pub account_id: AccountId,
    /// Caller-chosen label, unique per account.
    pub purpose: String,
    /// Credits held.
    pub amount: Decimal,
    /// When the hold was placed.
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    /// The key identifying this reservation.
    #[must_use]
    pub fn key(&self) -> ReservationKey {
        ReservationKey::new(self.account_id, self.purpose.clone())
    }
}

/// Identifies a reservation: one per `(account, purpose)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationKey {
    /// The account.
    pub account_id: AccountId,
    /// The purpose label.
    pub purpose: String,
}

impl ReservationKey {
    /// Creates a key.
    #[must_use]
    pub fn new(account_id: AccountId, purpose: impl Into<String>) -> Self {
        Self {
            account_id,
            purpose: purpose.into(),
        }
    }

    pub(crate) fn not_found(&self) -> CreditError {
        CreditError::ReservationNotFound {
            account_id: self.account_id,
            purpose: self.purpose.clone(),
        }
    }
}

/// Places, releases and captures reservations under the account lock.
#[derive(Clone)]
pub struct ReservationManager {
    orchestrator: Arc<TransferOrchestrator>,
}

impl ReservationManager {
    /// Creates a manager sharing the orchestrator's locks and store.
    pub fn new(orchestrator: Arc<TransferOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Holds `amount` credits for `purpose`.
    #[instrument(skip(self, purpose))]
    pub async fn reserve(
        &self,
        account_id: AccountId,
        amount: Decimal,
        purpose: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Reservation, CreditError> {
        validate_positive_amount(amount)?;
        let reservation = Reservation {
            account_id,
            purpose: purpose.into(),
            amount,
            created_at: now,
        };

        let orchestrator = &self.orchestrator;
        let placed = reservation.clone();
        orchestrator
            .with_retry("reserve", move || {
                let placed = placed.clone();
                async move {
                    let _guard = orchestrator.locks().acquire(&[account_id]).await?;
                    orchestrator.store().place_reservation(placed).await
                }
            })
            .await?;

        info!(purpose = %reservation.purpose, "credits reserved");
        Ok(reservation)
    }

    /// Drops a hold without posting anything.
    #[instrument(skip(self))]
    pub async fn release(&self, key: &ReservationKey) -> Result<Reservation, CreditError> {
        let orchestrator = &self.orchestrator;
        let released = orchestrator
            .with_retry("release", move || async move {
                let _guard = orchestrator.locks().acquire(&[key.account_id]).await?;
                orchestrator.store().remove_reservation(key).await
            })
            .await?;

        info!(amount = %released.amount, "reservation released");
        Ok(released)
    }

    /// Debits the held amount and drops the hold in one commit.
    ///
    /// `kind` must be a debit kind. A capture whose reference was already
    /// recorded returns the recorded entry.
    #[instrument(skip(self, description, reference))]
    pub async fn capture(
        &self,
        key: &ReservationKey,
        kind: EntryKind,
        description: String,
        reference: Option<EntryReference>,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, CreditError> {
        let orchestrator = &self.orchestrator;
        let captured = orchestrator
            .with_retry("capture", move || {
                let description = description.clone();
                let reference = reference.clone();
                async move {
                    let _guard = orchestrator.locks().acquire(&[key.account_id]).await?;

                    let held = orchestrator
                        .store()
                        .reservations(key.account_id)
                        .await?
                        .into_iter()
                        .find(|r| r.purpose == key.purpose)
                        .ok_or_else(|| key.not_found())?;

                    let mut entry = NewEntry::debit(key.account_id, held.amount, kind, description, now);
                    entry.reference = reference;
                    entry.validate()?;
                    if let Some(existing) = orchestrator.recorded(&entry).await? {
                        return Ok(existing);
                    }

                    let batch = CommitBatch {
                        entries: vec![entry],
                        release: vec![key.clone()],
                        ..CommitBatch::default()
                    };
                    match orchestrator.store().commit(batch).await {
                        Ok(committed) => committed.into_iter().next().ok_or_else(|| {
                            CreditError::Internal("capture commit returned no entries".into())
                        }),
                        Err(CreditError::DuplicateReference { existing }) => {
                            TransferOrchestrator::replay(*existing)
                        }
                        Err(err) => Err(err),
                    }
                }
            })
            .await?;

        info!(entry_id = %captured.id, amount = %captured.amount, "reservation captured");
        Ok(captured)
    }

    /// Active holds of an account.
    pub async fn active(&self, account_id: AccountId) -> Result<Vec<Reservation>, CreditError> {
        self.orchestrator.store().reservations(account_id).await
    }
}
