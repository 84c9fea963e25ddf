//! Credit amount helpers.
//!
//! CRITICAL: Never use floating-point for credit calculations.
//! Credits are `rust_decimal::Decimal` values with at most two decimal places.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places a credit amount may carry.
pub const CREDIT_SCALE: u32 = 2;

/// Rounds an amount to credit precision using round-half-up.
///
/// Half-up here means halves move away from zero, so `0.005` becomes `0.01`
/// and `-0.005` becomes `-0.01`.
#[must_use]
pub fn round_credits(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CREDIT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Returns true if the amount has no significant digits beyond credit precision.
///
/// Trailing zeros do not count: `1.500` is a valid two-decimal amount.
#[must_use]
pub fn has_credit_precision(amount: Decimal) -> bool {
    amount.normalize().scale() <= CREDIT_SCALE
}
