//! Credit service: the public operations of the ledger.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use skillswap_shared::config::{CreditsConfig, LedgerConfig, SweeperConfig};
use skillswap_shared::types::{AccountId, PageResponse, SessionId};
use tracing::{info, instrument};

use super::balance::{AccountSummary, BalanceOracle, Reconciliation};
use super::entry::{EntryKind, EntryReference, LedgerEntry, NewEntry, ReferenceType};
use super::error::CreditError;
use super::orchestrator::TransferOrchestrator;
use super::policy::CreditPolicy;
use super::reservation::{Reservation, ReservationKey, ReservationManager};
use super::store::SharedLedgerStore;
use super::sweeper::ExpirationSweeper;
use super::types::{BalanceView, CreditStatistics, HistoryQuery, TransferReceipt, TransferRequest};
use super::validation::{validate_positive_amount, validate_precision};

/// Entry point for every credit operation.
#[derive(Clone)]
pub struct CreditService {
    orchestrator: Arc<TransferOrchestrator>,
    oracle: BalanceOracle,
    reservations: ReservationManager,
    policy: CreditPolicy,
}

impl CreditService {
    /// Wires the service over a store.
    pub fn new(store: SharedLedgerStore, ledger: &LedgerConfig, credits: CreditsConfig) -> Self {
        let orchestrator = Arc::new(TransferOrchestrator::new(Arc::clone(&store), ledger));
        Self {
            oracle: BalanceOracle::new(store),
            reservations: ReservationManager::new(Arc::clone(&orchestrator)),
            policy: CreditPolicy::new(credits),
            orchestrator,
        }
    }

    /// Builds an expiration sweeper sharing this service's locks.
    pub fn sweeper(&self, config: &SweeperConfig) -> ExpirationSweeper {
        ExpirationSweeper::new(Arc::clone(&self.orchestrator), config)
    }

    /// The credit policy in use.
    pub fn policy(&self) -> &CreditPolicy {
        &self.policy
    }

    // ========== Accounts & Queries ==========

    /// Creates the ledger summary for a new account; idempotent.
    #[instrument(skip(self))]
    pub async fn open_account(&self, account_id: AccountId) -> Result<AccountSummary, CreditError> {
        let summary = self
            .orchestrator
            .store()
            .open_account(account_id, Utc::now())
            .await?;
        info!("credit account opened");
        Ok(summary)
    }

    /// Current, reserved and available balance.
    pub async fn get_balance(&self, account_id: AccountId) -> Result<BalanceView, CreditError> {
        self.oracle.balance(account_id).await
    }

    /// One page of the account's entries.
    pub async fn get_history(
        &self,
        account_id: AccountId,
        query: &HistoryQuery,
    ) -> Result<PageResponse<LedgerEntry>, CreditError> {
        // surfaces AccountNotFound rather than an empty page
        self.orchestrator.store().summary(account_id).await?;
        self.orchestrator
            .store()
            .entries_for(account_id, query)
            .await
    }

    /// Totals plus credits expiring within the configured window.
    pub async fn get_statistics(
        &self,
        account_id: AccountId,
    ) -> Result<CreditStatistics, CreditError> {
        self.oracle
            .statistics(account_id, Utc::now(), self.policy.config().expiring_soon_days)
            .await
    }

    /// Whether `amount` could be debited right now. Advisory: a later debit
    /// re-checks under the account lock.
    pub async fn has_sufficient_credits(
        &self,
        account_id: AccountId,
        amount: Decimal,
    ) -> Result<bool, CreditError> {
        validate_positive_amount(amount)?;
        Ok(self.oracle.available(account_id).await? >= amount)
    }

    /// Compares the summary with the entry log.
    pub async fn reconcile(&self, account_id: AccountId) -> Result<Reconciliation, CreditError> {
        self.oracle.reconcile(account_id).await
    }

    // ========== Generic Postings ==========

    /// Adds `amount` credits of a credit kind. Expiring kinds get the
    /// configured lifetime.
    pub async fn credit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        kind: EntryKind,
        description: impl Into<String>,
        reference: Option<EntryReference>,
    ) -> Result<LedgerEntry, CreditError> {
        validate_positive_amount(amount)?;
        let now = Utc::now();
        let mut entry = NewEntry::credit(account_id, amount, kind, description, now);
        entry.reference = reference;
        if kind.expires() {
            entry.expires_at = self.policy.expiry_from(now);
        }
        self.orchestrator.credit(entry).await
    }

    /// Removes `amount` credits with a debit kind.
    pub async fn debit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        kind: EntryKind,
        description: impl Into<String>,
        reference: Option<EntryReference>,
    ) -> Result<LedgerEntry, CreditError> {
        validate_positive_amount(amount)?;
        let mut entry = NewEntry::debit(account_id, amount, kind, description, Utc::now());
        entry.reference = reference;
        self.orchestrator.debit(entry).await
    }

    // ========== Transfers & Purchases ==========

    /// Moves credits between two accounts. The received credits expire
    /// after the configured lifetime.
    pub async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, CreditError> {
        let now = Utc::now();
        self.orchestrator
            .transfer(request, self.policy.expiry_from(now), now)
            .await
    }

    /// Credits a purchase confirmed by an external payment.
    ///
    /// Replaying the same `payment_reference` returns the first entry.
    #[instrument(skip(self))]
    pub async fn purchase(
        &self,
        account_id: AccountId,
        amount: Decimal,
        payment_reference: &str,
    ) -> Result<LedgerEntry, CreditError> {
        validate_positive_amount(amount)?;
        let payment_reference = payment_reference.trim();
        if payment_reference.is_empty() {
            return Err(CreditError::InvalidReference("payment reference is required"));
        }
        let entry = self
            .policy
            .purchase(account_id, amount, payment_reference, Utc::now());
        let committed = self.orchestrator.credit(entry).await?;
        info!(entry_id = %committed.id, "credits purchased");
        Ok(committed)
    }

    // ========== Policy Events ==========

    /// Grants the welcome bonus; once per account.
    pub async fn grant_registration_bonus(
        &self,
        account_id: AccountId,
    ) -> Result<LedgerEntry, CreditError> {
        let entry = self.policy.registration_bonus(account_id, Utc::now());
        self.orchestrator.credit(entry).await
    }

    /// Grants the referral bonus to `referrer`; once per referred account.
    pub async fn grant_referral_bonus(
        &self,
        referrer: AccountId,
        referred: AccountId,
    ) -> Result<LedgerEntry, CreditError> {
        if referrer == referred {
            return Err(CreditError::SameAccount(referrer));
        }
        let entry = self.policy.referral_bonus(referrer, referred, Utc::now());
        self.orchestrator.credit(entry).await
    }

    /// Pays the teacher for a session; once per session.
    pub async fn record_teaching_earnings(
        &self,
        teacher: AccountId,
        session_id: SessionId,
        duration_minutes: i64,
    ) -> Result<LedgerEntry, CreditError> {
        let entry = self
            .policy
            .teaching_earnings(teacher, session_id, duration_minutes, Utc::now());
        self.orchestrator.credit(entry).await
    }

    /// Charges the learner for a session; once per session.
    pub async fn charge_learning_session(
        &self,
        learner: AccountId,
        session_id: SessionId,
        duration_minutes: i64,
    ) -> Result<LedgerEntry, CreditError> {
        let entry = self
            .policy
            .learning_charge(learner, session_id, duration_minutes, Utc::now());
        self.orchestrator.debit(entry).await
    }

    /// Grants the completion bonus to one participant; once per participant and session.
    pub async fn grant_completion_bonus(
        &self,
        account_id: AccountId,
        session_id: SessionId,
    ) -> Result<LedgerEntry, CreditError> {
        let entry = self.policy.completion_bonus(account_id, session_id, Utc::now());
        self.orchestrator.credit(entry).await
    }

    /// Charges the late-cancellation penalty; fails with `InsufficientFunds`
    /// rather than overdrawing.
    pub async fn apply_cancellation_penalty(
        &self,
        account_id: AccountId,
        session_id: SessionId,
    ) -> Result<LedgerEntry, CreditError> {
        let entry = self
            .policy
            .cancellation_penalty(account_id, session_id, Utc::now());
        self.orchestrator.debit(entry).await
    }

    /// Returns credits to an account; once per reference.
    pub async fn refund(
        &self,
        account_id: AccountId,
        amount: Decimal,
        reference: EntryReference,
        reason: &str,
    ) -> Result<LedgerEntry, CreditError> {
        validate_positive_amount(amount)?;
        let entry = NewEntry::credit(
            account_id,
            amount,
            EntryKind::Refund,
            format!("Refund: {reason}"),
            Utc::now(),
        )
        .with_reference(reference);
        self.orchestrator.credit(entry).await
    }

    /// Posts a signed manual correction tied to an admin ticket.
    #[instrument(skip(self, reason))]
    pub async fn adjust(
        &self,
        account_id: AccountId,
        amount: Decimal,
        ticket: &str,
        reason: &str,
    ) -> Result<LedgerEntry, CreditError> {
        validate_precision(amount)?;
        if amount.is_zero() {
            return Err(CreditError::InvalidAmount {
                amount,
                reason: "adjustment cannot be zero",
            });
        }
        let ticket = ticket.trim();
        if ticket.is_empty() {
            return Err(CreditError::InvalidReference("admin ticket is required"));
        }
        let entry = NewEntry::credit(
            account_id,
            amount,
            EntryKind::AdminAdjustment,
            format!("Adjustment: {reason}"),
            Utc::now(),
        )
        .with_reference(EntryReference::new(ticket, ReferenceType::Admin));
        let committed = self.orchestrator.post(entry).await?;
        info!(entry_id = %committed.id, "admin adjustment posted");
        Ok(committed)
    }

    // ========== Reservations ==========

    /// Holds credits for a purpose.
    pub async fn reserve(
        &self,
        account_id: AccountId,
        amount: Decimal,
        purpose: &str,
    ) -> Result<Reservation, CreditError> {
        self.reservations
            .reserve(account_id, amount, purpose, Utc::now())
            .await
    }

    /// Drops a hold.
    pub async fn release_reservation(
        &self,
        account_id: AccountId,
        purpose: &str,
    ) -> Result<Reservation, CreditError> {
        self.reservations
            .release(&ReservationKey::new(account_id, purpose))
            .await
    }

    /// Debits a held amount as `kind`, dropping the hold.
    ///
    /// With a reference, replaying the capture returns the recorded entry.
    pub async fn capture_reservation(
        &self,
        account_id: AccountId,
        purpose: &str,
        kind: EntryKind,
        reference: Option<EntryReference>,
    ) -> Result<LedgerEntry, CreditError> {
        let key = ReservationKey::new(account_id, purpose);
        self.reservations
            .capture(&key, kind, format!("Captured reservation '{purpose}'"), reference, Utc::now())
            .await
    }

    /// Active holds of an account.
    pub async fn reservations(&self, account_id: AccountId) -> Result<Vec<Reservation>, CreditError> {
        self.reservations.active(account_id).await
    }
}
