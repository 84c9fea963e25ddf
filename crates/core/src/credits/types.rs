//! Query and result types for the credit service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use skillswap_shared::types::{AccountId, PageRequest, SortDirection, TransferId};

use super::entry::{EntryKind, EntryStatus, LedgerEntry};

/// Point-in-time balance of an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    /// The account.
    pub account_id: AccountId,
    /// Sum of posted entries.
    pub current_balance: Decimal,
    /// Credits held by active reservations.
    pub reserved_amount: Decimal,
    /// `current_balance - reserved_amount`.
    pub available_balance: Decimal,
    /// When the balance last changed.
    pub last_transaction_at: Option<DateTime<Utc>>,
}

/// Aggregated figures for an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditStatistics {
    /// The account.
    pub account_id: AccountId,
    /// Sum of posted entries.
    pub current_balance: Decimal,
    /// Credits available for spending.
    pub available_balance: Decimal,
    /// All credits ever received.
    pub total_earned: Decimal,
    /// All credits ever spent, excluding expirations.
    pub total_spent: Decimal,
    /// Credits earned by teaching.
    pub lifetime_earnings: Decimal,
    /// Unexpired credits lapsing within the configured window.
    pub expiring_soon: Decimal,
    /// Number of entries behind `expiring_soon`.
    pub expiring_soon_count: u64,
    /// End of the expiring-soon window.
    pub expiring_before: DateTime<Utc>,
}

/// Column used to order history pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySortField {
    /// Draft time, ties broken by id.
    #[default]
    CreatedAt,
    /// Signed amount, ties broken by id.
    Amount,
    /// Kind name, ties broken by id.
    Kind,
    /// Status name, ties broken by id.
    Status,
    /// Entry id.
    Id,
}

impl std::str::FromStr for HistorySortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created_at" | "createdat" | "date" => Ok(Self::CreatedAt),
            "amount" => Ok(Self::Amount),
            "kind" | "type" => Ok(Self::Kind),
            "status" => Ok(Self::Status),
            "id" => Ok(Self::Id),
            _ => Err(format!("Unknown sort field: {s}")),
        }
    }
}

/// Optional narrowing of a history query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    /// Only entries of this kind.
    pub kind: Option<EntryKind>,
    /// Only entries with this status.
    pub status: Option<EntryStatus>,
    /// Only entries created at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only entries created before this time.
    pub to: Option<DateTime<Utc>>,
}

impl EntryFilter {
    /// Returns true if the entry passes every set criterion.
    #[must_use]
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.kind.is_none_or(|kind| entry.kind == kind)
            && self.status.is_none_or(|status| entry.status == status)
            && self.from.is_none_or(|from| entry.created_at >= from)
            && self.to.is_none_or(|to| entry.created_at < to)
    }
}

/// A paginated, sorted, filtered history request.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Page to return.
    pub page: PageRequest,
    /// Ordering column.
    pub sort_by: HistorySortField,
    /// Ordering direction; newest first by default.
    pub direction: SortDirection,
    /// Narrowing criteria.
    pub filter: EntryFilter,
}

/// A request to move credits between two accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Account debited.
    pub from: AccountId,
    /// Account credited.
    pub to: AccountId,
    /// Positive amount moved.
    pub amount: Decimal,
    /// Free text carried on both legs.
    #[serde(default)]
    pub description: String,
    /// Caller-chosen id; replays with the same id return the first result.
    #[serde(default)]
    pub idempotency_key: Option<TransferId>,
}

/// Both legs of a committed transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Shared reference id of the two legs.
    pub transfer_id: TransferId,
    /// The `TransferOut` entry on the source account.
    pub debit: LedgerEntry,
    /// The `TransferIn` entry on the destination account.
    pub credit: LedgerEntry,
}
