//! Amount and timestamp checks shared by every write path.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use skillswap_shared::types::has_credit_precision;

use super::entry::EntryKind;
use super::error::CreditError;

/// Validates a caller-supplied magnitude: strictly positive, at most two decimals.
pub fn validate_positive_amount(amount: Decimal) -> Result<(), CreditError> {
    if amount <= Decimal::ZERO {
        return Err(CreditError::InvalidAmount {
            amount,
            reason: "amount must be positive",
        });
    }
    validate_precision(amount)
}

/// Validates a signed entry amount against the sign its kind requires.
pub fn validate_entry_amount(kind: EntryKind, amount: Decimal) -> Result<(), CreditError> {
    if amount.is_zero() {
        return Err(CreditError::InvalidAmount {
            amount,
            reason: "amount cannot be zero",
        });
    }
    if !kind.direction().accepts(amount) {
        return Err(CreditError::InvalidAmount {
            amount,
            reason: "amount sign does not match entry kind",
        });
    }
    validate_precision(amount)
}

/// Rejects amounts with more than two decimal places.
pub fn validate_precision(amount: Decimal) -> Result<(), CreditError> {
    if has_credit_precision(amount) {
        Ok(())
    } else {
        Err(CreditError::InvalidAmount {
            amount,
            reason: "amount has more than two decimal places",
        })
    }
}

/// An expiration, when present, must be strictly after creation.
pub fn validate_expiry(
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<(), CreditError> {
    match expires_at {
        Some(at) if at <= created_at => Err(CreditError::InvalidExpiration),
        _ => Ok(()),
    }
}
