//! Ledger entry domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use skillswap_shared::types::{AccountId, EntryId};

use super::error::CreditError;
use super::validation;

/// What caused a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Credits earned by teaching a session.
    EarnedTeaching,
    /// Credits spent attending a session.
    SpentLearning,
    /// Welcome bonus.
    BonusRegistration,
    /// Bonus for referring a new user.
    BonusReferral,
    /// Bonus for completing a session.
    BonusCompletion,
    /// Credits bought with an externally confirmed payment.
    Purchase,
    /// Credits returned to the account.
    Refund,
    /// Late-cancellation penalty.
    Penalty,
    /// Manual correction, either sign.
    AdminAdjustment,
    /// Negation of an expired credit.
    Expiration,
    /// Incoming leg of a transfer.
    TransferIn,
    /// Outgoing leg of a transfer.
    TransferOut,
}

/// Sign category of an entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDirection {
    /// Amount must be positive.
    Credit,
    /// Amount must be negative.
    Debit,
    /// Either sign is accepted.
    Either,
}

impl EntryDirection {
    /// Returns true if a non-zero amount has the sign this direction requires.
    #[must_use]
    pub fn accepts(self, amount: Decimal) -> bool {
        match self {
            Self::Credit => amount > Decimal::ZERO,
            Self::Debit => amount < Decimal::ZERO,
            Self::Either => !amount.is_zero(),
        }
    }
}

impl EntryKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::EarnedTeaching,
        Self::SpentLearning,
        Self::BonusRegistration,
        Self::BonusReferral,
        Self::BonusCompletion,
        Self::Purchase,
        Self::Refund,
        Self::Penalty,
        Self::AdminAdjustment,
        Self::Expiration,
        Self::TransferIn,
        Self::TransferOut,
    ];

    /// Returns the sign category of this kind.
    #[must_use]
    pub const fn direction(self) -> EntryDirection {
        match self {
            Self::EarnedTeaching
            | Self::BonusRegistration
            | Self::BonusReferral
            | Self::BonusCompletion
            | Self::Purchase
            | Self::Refund
            | Self::TransferIn => EntryDirection::Credit,
            Self::SpentLearning | Self::Penalty | Self::Expiration | Self::TransferOut => {
                EntryDirection::Debit
            }
            Self::AdminAdjustment => EntryDirection::Either,
        }
    }

    /// Returns true if credits of this kind lapse after the configured lifetime.
    #[must_use]
    pub const fn expires(self) -> bool {
        matches!(
            self,
            Self::EarnedTeaching
                | Self::BonusRegistration
                | Self::BonusReferral
                | Self::BonusCompletion
                | Self::Purchase
                | Self::TransferIn
        )
    }

    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EarnedTeaching => "earned_teaching",
            Self::SpentLearning => "spent_learning",
            Self::BonusRegistration => "bonus_registration",
            Self::BonusReferral => "bonus_referral",
            Self::BonusCompletion => "bonus_completion",
            Self::Purchase => "purchase",
            Self::Refund => "refund",
            Self::Penalty => "penalty",
            Self::AdminAdjustment => "admin_adjustment",
            Self::Expiration => "expiration",
            Self::TransferIn => "transfer_in",
            Self::TransferOut => "transfer_out",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("Unknown entry kind: {s}"))
    }
}

/// Entry lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Drafted, not yet committed.
    Pending,
    /// Committed; affects the balance.
    Completed,
    /// Rejected; no balance effect.
    Failed,
    /// Withdrawn before commit; no balance effect.
    Cancelled,
    /// Committed and later neutralised by an `Expiration` entry.
    Expired,
}

impl EntryStatus {
    /// Returns true if the entry's amount is part of the running balance.
    ///
    /// An expired credit still counts: its `Expiration` entry carries the
    /// negation, so dropping the original too would negate it twice.
    #[must_use]
    pub const fn is_posted(self) -> bool {
        matches!(self, Self::Completed | Self::Expired)
    }

    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Unknown entry status: {s}")),
        }
    }
}

/// Kind of domain object an entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    /// The registered account itself.
    UserRegistration,
    /// The referred user.
    UserReferral,
    /// A billed video session.
    VideoSession,
    /// A completed video session (per participant).
    VideoSessionCompletion,
    /// A late-cancelled video session.
    VideoSessionCancellation,
    /// An external payment receipt.
    Payment,
    /// A transfer; both legs share the id.
    CreditTransfer,
    /// The ledger entry being expired.
    CreditExpiration,
    /// A captured reservation.
    Reservation,
    /// A refunded charge.
    Refund,
    /// An administrative ticket.
    Admin,
}

impl ReferenceType {
    const ALL: [Self; 11] = [
        Self::UserRegistration,
        Self::UserReferral,
        Self::VideoSession,
        Self::VideoSessionCompletion,
        Self::VideoSessionCancellation,
        Self::Payment,
        Self::CreditTransfer,
        Self::CreditExpiration,
        Self::Reservation,
        Self::Refund,
        Self::Admin,
    ];

    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserRegistration => "USER_REGISTRATION",
            Self::UserReferral => "USER_REFERRAL",
            Self::VideoSession => "VIDEO_SESSION",
            Self::VideoSessionCompletion => "VIDEO_SESSION_COMPLETION",
            Self::VideoSessionCancellation => "VIDEO_SESSION_CANCELLATION",
            Self::Payment => "PAYMENT",
            Self::CreditTransfer => "CREDIT_TRANSFER",
            Self::CreditExpiration => "CREDIT_EXPIRATION",
            Self::Reservation => "RESERVATION",
            Self::Refund => "REFUND",
            Self::Admin => "ADMIN",
        }
    }
}

impl std::fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReferenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_uppercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("Unknown reference type: {s}"))
    }
}

/// Ties an entry to the domain object that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryReference {
    /// Identifier of the triggering object.
    pub id: String,
    /// Kind of the triggering object.
    pub reference_type: ReferenceType,
}

impl EntryReference {
    /// Creates a new reference.
    #[must_use]
    pub fn new(id: impl Into<String>, reference_type: ReferenceType) -> Self {
        Self {
            id: id.into(),
            reference_type,
        }
    }
}

/// Idempotency key: at most one entry exists per `(reference, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceKey {
    /// The reference.
    pub reference: EntryReference,
    /// The entry kind.
    pub kind: EntryKind,
}

/// A committed ledger entry.
///
/// Never edited after commit except for the `Completed -> Expired` flip
/// performed in the same unit as its `Expiration` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Store-assigned, monotonically increasing id.
    pub id: EntryId,
    /// Owning account.
    pub account_id: AccountId,
    /// Signed amount: positive credits, negative debits.
    pub amount: Decimal,
    /// What caused the entry.
    pub kind: EntryKind,
    /// Lifecycle status.
    pub status: EntryStatus,
    /// Advisory free text.
    pub description: String,
    /// Triggering domain object, if any.
    pub reference: Option<EntryReference>,
    /// Account balance before this entry (audit only).
    pub balance_before: Decimal,
    /// Account balance after this entry (audit only).
    pub balance_after: Decimal,
    /// When the entry was drafted.
    pub created_at: DateTime<Utc>,
    /// When the entry was committed.
    pub processed_at: Option<DateTime<Utc>>,
    /// When the credit lapses, if it does.
    pub expires_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// Returns true if this entry removes credits.
    #[must_use]
    pub fn is_debit(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    /// Returns true if this entry adds credits.
    #[must_use]
    pub fn is_credit(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Returns true if the sweeper should negate this entry at `now`.
    #[must_use]
    pub fn is_due_for_expiration(&self, now: DateTime<Utc>) -> bool {
        self.status == EntryStatus::Completed
            && self.is_credit()
            && self.expires_at.is_some_and(|at| at <= now)
    }

    /// Returns the idempotency key, if the entry carries a reference.
    #[must_use]
    pub fn reference_key(&self) -> Option<ReferenceKey> {
        self.reference.clone().map(|reference| ReferenceKey {
            reference,
            kind: self.kind,
        })
    }
}

/// A drafted entry, not yet committed (`Pending`).
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    /// Owning account.
    pub account_id: AccountId,
    /// Signed amount.
    pub amount: Decimal,
    /// What caused the entry.
    pub kind: EntryKind,
    /// Advisory free text.
    pub description: String,
    /// Triggering domain object, if any.
    pub reference: Option<EntryReference>,
    /// Draft time.
    pub created_at: DateTime<Utc>,
    /// When the credit lapses, if it does.
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewEntry {
    /// Drafts a credit of `amount` (a positive magnitude).
    #[must_use]
    pub fn credit(
        account_id: AccountId,
        amount: Decimal,
        kind: EntryKind,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            amount,
            kind,
            description: description.into(),
            reference: None,
            created_at,
            expires_at: None,
        }
    }

    /// Drafts a debit of `amount` (a positive magnitude; stored negated).
    #[must_use]
    pub fn debit(
        account_id: AccountId,
        amount: Decimal,
        kind: EntryKind,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::credit(account_id, -amount, kind, description, created_at)
    }

    /// Attaches the triggering reference.
    #[must_use]
    pub fn with_reference(mut self, reference: EntryReference) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Sets the expiration time.
    #[must_use]
    pub fn expiring_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Returns the idempotency key, if the entry carries a reference.
    #[must_use]
    pub fn reference_key(&self) -> Option<ReferenceKey> {
        self.reference.clone().map(|reference| ReferenceKey {
            reference,
            kind: self.kind,
        })
    }

    /// Checks amount precision, sign against kind, and expiration ordering.
    pub fn validate(&self) -> Result<(), CreditError> {
        validation::validate_entry_amount(self.kind, self.amount)?;
        validation::validate_expiry(self.created_at, self.expires_at)
    }

    /// Turns the draft into a committed entry with its balance snapshot.
    #[must_use]
    pub fn into_committed(
        self,
        id: EntryId,
        balance_before: Decimal,
        processed_at: DateTime<Utc>,
    ) -> LedgerEntry {
        LedgerEntry {
            id,
            account_id: self.account_id,
            amount: self.amount,
            kind: self.kind,
            status: EntryStatus::Completed,
            description: self.description,
            reference: self.reference,
            balance_before,
            balance_after: balance_before + self.amount,
            created_at: self.created_at,
            processed_at: Some(processed_at),
            expires_at: self.expires_at,
        }
    }
}
