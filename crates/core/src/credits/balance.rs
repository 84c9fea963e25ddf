//! Account summaries and the balance oracle.
//!
//! `AccountSummary` is the derived running balance kept next to the entry
//! log. It is rewritten only inside a store commit, so the rule
//! `current_balance == sum(posted amounts)` holds after every commit.
//! [`BalanceOracle`] answers read queries from the summary and can
//! recompute the balance from the log to detect drift.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use skillswap_shared::types::AccountId;
use tracing::{error, instrument};

use super::entry::EntryKind;
use super::error::CreditError;
use super::store::SharedLedgerStore;
use super::types::{BalanceView, CreditStatistics};

/// Derived per-account totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    /// The account.
    pub account_id: AccountId,
    /// Sum of posted entry amounts.
    pub current_balance: Decimal,
    /// Credits held by active reservations.
    pub reserved_amount: Decimal,
    /// Sum of positive amounts ever posted.
    pub total_earned: Decimal,
    /// Sum of negative magnitudes ever posted, excluding expirations.
    pub total_spent: Decimal,
    /// Sum of teaching earnings.
    pub lifetime_earnings: Decimal,
    /// Time of the last posted entry.
    pub last_transaction_at: Option<DateTime<Utc>>,
    /// Bumped on every change.
    pub version: i64,
    /// When the summary was created.
    pub created_at: DateTime<Utc>,
}

/// Balance around one applied entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSnapshot {
    /// Balance before the entry.
    pub before: Decimal,
    /// Balance after the entry.
    pub after: Decimal,
}

impl AccountSummary {
    /// Creates an empty summary.
    #[must_use]
    pub fn new(account_id: AccountId, created_at: DateTime<Utc>) -> Self {
        Self {
            account_id,
            current_balance: Decimal::ZERO,
            reserved_amount: Decimal::ZERO,
            total_earned: Decimal::ZERO,
            total_spent: Decimal::ZERO,
            lifetime_earnings: Decimal::ZERO,
            last_transaction_at: None,
            version: 0,
            created_at,
        }
    }

    /// Credits that may be spent right now.
    #[must_use]
    pub fn available(&self) -> Decimal {
        self.current_balance - self.reserved_amount
    }

    /// Applies a posted amount and returns the balance around it.
    pub fn post(&mut self, amount: Decimal, kind: EntryKind, at: DateTime<Utc>) -> BalanceSnapshot {
        let before = self.current_balance;
        self.current_balance += amount;

        if amount > Decimal::ZERO {
            self.total_earned += amount;
            if kind == EntryKind::EarnedTeaching {
                self.lifetime_earnings += amount;
            }
        } else if kind != EntryKind::Expiration {
            self.total_spent += amount.abs();
        }

        self.last_transaction_at = Some(at);
        self.version += 1;

        BalanceSnapshot {
            before,
            after: self.current_balance,
        }
    }

    /// Holds `amount` credits, failing if that exceeds what is available.
    pub fn reserve(&mut self, amount: Decimal) -> Result<(), CreditError> {
        let available = self.available();
        if amount > available {
            return Err(CreditError::InsufficientFunds {
                account_id: self.account_id,
                available,
                requested: amount,
            });
        }
        self.reserved_amount += amount;
        self.version += 1;
        Ok(())
    }

    /// Releases a held amount.
    pub fn release(&mut self, amount: Decimal) {
        self.reserved_amount = (self.reserved_amount - amount).max(Decimal::ZERO);
        self.version += 1;
    }

    /// Fails if the account has gone below zero available credits.
    ///
    /// `requested` is reported as the shortfall-causing debit total.
    pub fn ensure_solvent(&self, requested: Decimal) -> Result<(), CreditError> {
        if self.available() < Decimal::ZERO {
            return Err(CreditError::InsufficientFunds {
                account_id: self.account_id,
                available: self.available() + requested,
                requested,
            });
        }
        Ok(())
    }
}

/// Result of comparing a summary with its entry log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// The account.
    pub account_id: AccountId,
    /// Balance held by the summary.
    pub summary_balance: Decimal,
    /// Balance recomputed from posted entries.
    pub ledger_balance: Decimal,
    /// `summary_balance - ledger_balance`.
    pub drift: Decimal,
}

impl Reconciliation {
    /// Returns true if the summary matches the log.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.drift.is_zero()
    }
}

/// Read side of the ledger.
#[derive(Clone)]
pub struct BalanceOracle {
    store: SharedLedgerStore,
}

impl BalanceOracle {
    /// Creates an oracle over a store.
    #[must_use]
    pub fn new(store: SharedLedgerStore) -> Self {
        Self { store }
    }

    /// Returns the account balance.
    pub async fn balance(&self, account_id: AccountId) -> Result<BalanceView, CreditError> {
        let summary = self.store.summary(account_id).await?;
        Ok(BalanceView {
            account_id,
            current_balance: summary.current_balance,
            reserved_amount: summary.reserved_amount,
            available_balance: summary.available(),
            last_transaction_at: summary.last_transaction_at,
        })
    }

    /// Returns the credits available for spending.
    pub async fn available(&self, account_id: AccountId) -> Result<Decimal, CreditError> {
        Ok(self.store.summary(account_id).await?.available())
    }

    /// Returns aggregated figures, including credits lapsing within `window_days`.
    pub async fn statistics(
        &self,
        account_id: AccountId,
        now: DateTime<Utc>,
        window_days: u32,
    ) -> Result<CreditStatistics, CreditError> {
        let summary = self.store.summary(account_id).await?;
        let until = now + Duration::days(i64::from(window_days));
        let expiring = self.store.expiring_between(account_id, now, until).await?;
        let expiring_soon = expiring.iter().map(|entry| entry.amount).sum();

        Ok(CreditStatistics {
            account_id,
            current_balance: summary.current_balance,
            available_balance: summary.available(),
            total_earned: summary.total_earned,
            total_spent: summary.total_spent,
            lifetime_earnings: summary.lifetime_earnings,
            expiring_soon,
            expiring_soon_count: u64::try_from(expiring.len()).unwrap_or(u64::MAX),
            expiring_before: until,
        })
    }

    /// Recomputes the balance from the log and compares it with the summary.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, account_id: AccountId) -> Result<Reconciliation, CreditError> {
        let summary = self.store.summary(account_id).await?;
        let ledger_balance = self.store.sum_posted(account_id).await?;
        let report = Reconciliation {
            account_id,
            summary_balance: summary.current_balance,
            ledger_balance,
            drift: summary.current_balance - ledger_balance,
        };
        if !report.is_consistent() {
            error!(
                %account_id,
                summary = %report.summary_balance,
                ledger = %report.ledger_balance,
                "account summary drifted from entry log"
            );
        }
        Ok(report)
    }
}
