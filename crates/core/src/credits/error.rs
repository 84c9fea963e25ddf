//! Credit ledger error types.
//!
//! Every failure a ledger operation can report, with the stable error code
//! and HTTP status the transport layer maps it to.

use rust_decimal::Decimal;
use skillswap_shared::AppError;
use skillswap_shared::types::{AccountId, EntryId};
use thiserror::Error;

use super::entry::LedgerEntry;

/// Errors that can occur during credit ledger operations.
#[derive(Debug, Error)]
pub enum CreditError {
    // ========== Validation Errors ==========
    /// Amount is zero, has the wrong sign for its kind, or is too precise.
    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount {
        /// The rejected amount.
        amount: Decimal,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Transfer source and destination are the same account.
    #[error("Cannot transfer credits to the same account {0}")]
    SameAccount(AccountId),

    /// A required reference is missing or blank.
    #[error("Invalid reference: {0}")]
    InvalidReference(&'static str),

    /// Expiration time is not strictly after creation time.
    #[error("Expiration must be after creation time")]
    InvalidExpiration,

    // ========== Balance Errors ==========
    /// The debit would take available credits below zero.
    #[error("Insufficient credits in account {account_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        /// The account being debited.
        account_id: AccountId,
        /// Credits available at decision time.
        available: Decimal,
        /// Credits requested.
        requested: Decimal,
    },

    // ========== Lookup Errors ==========
    /// Account has no ledger summary.
    #[error("Credit account not found: {0}")]
    AccountNotFound(AccountId),

    /// Ledger entry does not exist.
    #[error("Ledger entry not found: {0}")]
    EntryNotFound(EntryId),

    /// No active reservation for the account and purpose.
    #[error("No reservation '{purpose}' on account {account_id}")]
    ReservationNotFound {
        /// The account.
        account_id: AccountId,
        /// The reservation purpose.
        purpose: String,
    },

    // ========== State Errors ==========
    /// An entry already exists for this reference and kind.
    #[error("Duplicate reference: entry {} already recorded", .existing.id)]
    DuplicateReference {
        /// The entry recorded first.
        existing: Box<LedgerEntry>,
    },

    /// The account already holds a reservation for this purpose.
    #[error("Reservation '{purpose}' already active on account {account_id}")]
    ReservationExists {
        /// The account.
        account_id: AccountId,
        /// The reservation purpose.
        purpose: String,
    },

    /// The entry cannot be expired (not a completed credit).
    #[error("Ledger entry {0} is not an expirable completed credit")]
    EntryNotExpirable(EntryId),

    // ========== Concurrency Errors ==========
    /// Another writer held the account past the lock timeout.
    #[error("Concurrent modification on account {0}, please retry")]
    ConcurrentModification(AccountId),

    // ========== Sweeper Errors ==========
    /// One entry failed during an expiration sweep.
    #[error("Failed to expire entry {entry_id}: {reason}")]
    SweepEntryFailure {
        /// The entry that could not be expired.
        entry_id: EntryId,
        /// The underlying failure.
        reason: String,
    },

    // ========== Infrastructure Errors ==========
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CreditError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::SameAccount(_) => "SAME_ACCOUNT",
            Self::InvalidReference(_) => "INVALID_REFERENCE",
            Self::InvalidExpiration => "INVALID_EXPIRATION",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            Self::ReservationNotFound { .. } => "RESERVATION_NOT_FOUND",
            Self::DuplicateReference { .. } => "DUPLICATE_REFERENCE",
            Self::ReservationExists { .. } => "RESERVATION_EXISTS",
            Self::EntryNotExpirable(_) => "ENTRY_NOT_EXPIRABLE",
            Self::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            Self::SweepEntryFailure { .. } => "SWEEP_ENTRY_FAILURE",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - validation errors
            Self::InvalidAmount { .. }
            | Self::SameAccount(_)
            | Self::InvalidReference(_)
            | Self::InvalidExpiration => 400,

            // 404 Not Found
            Self::AccountNotFound(_) | Self::EntryNotFound(_) | Self::ReservationNotFound { .. } => {
                404
            }

            // 409 Conflict - state and concurrency errors
            Self::DuplicateReference { .. }
            | Self::ReservationExists { .. }
            | Self::EntryNotExpirable(_)
            | Self::ConcurrentModification(_) => 409,

            // 422 Unprocessable Entity - business rule violations
            Self::InsufficientFunds { .. } => 422,

            // 500 Internal Server Error
            Self::SweepEntryFailure { .. } | Self::Storage(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns true if the operation may succeed when retried unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}

impl From<CreditError> for AppError {
    fn from(err: CreditError) -> Self {
        let code = err.error_code();
        let message = err.to_string();
        match err.http_status_code() {
            400 => Self::Validation { code, message },
            404 => Self::NotFound { code, message },
            409 => Self::Conflict { code, message },
            422 => Self::BusinessRule { code, message },
            _ => match err {
                CreditError::Storage(msg) => Self::Database(msg),
                _ => Self::Internal(message),
            },
        }
    }
}
