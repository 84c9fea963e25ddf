//! PostgreSQL ledger store.
//!
//! Every commit runs in one database transaction: the touched
//! `credit_accounts` rows are locked `FOR UPDATE` in ascending account
//! order, entries are inserted, and the summaries are rewritten before the
//! transaction commits. The partial unique index on
//! `(reference_id, reference_type, kind)` backs the idempotency rule.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    Order, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set, SqlErr,
    TransactionTrait,
};
use skillswap_core::credits::{
    AccountSummary, CommitBatch, CreditError, EntryKind, EntryReference, EntryStatus,
    HistoryQuery, HistorySortField, LedgerEntry, LedgerStore, Reservation, ReservationKey,
};
use skillswap_shared::types::{AccountId, EntryId, PageResponse, SortDirection};
use tracing::{debug, warn};

use crate::entities::{credit_accounts, credit_reservations, ledger_entries};

const POSTED_STATUSES: [&str; 2] = ["completed", "expired"];

fn storage(err: DbErr) -> CreditError {
    CreditError::Storage(err.to_string())
}

fn corrupt(what: &str, err: &str) -> CreditError {
    CreditError::Storage(format!("corrupt {what} column: {err}"))
}

fn summary_from(row: credit_accounts::Model) -> AccountSummary {
    AccountSummary {
        account_id: AccountId::from_uuid(row.account_id),
        current_balance: row.current_balance,
        reserved_amount: row.reserved_amount,
        total_earned: row.total_earned,
        total_spent: row.total_spent,
        lifetime_earnings: row.lifetime_earnings,
        last_transaction_at: row.last_transaction_at.map(|at| at.with_timezone(&Utc)),
        version: row.version,
        created_at: row.created_at.with_timezone(&Utc),
    }
}

fn entry_from(row: ledger_entries::Model) -> Result<LedgerEntry, CreditError> {
    let reference = match (row.reference_id, row.reference_type) {
        (Some(id), Some(reference_type)) => Some(EntryReference::new(
            id,
            reference_type
                .parse()
                .map_err(|e: String| corrupt("reference_type", &e))?,
        )),
        _ => None,
    };

    Ok(LedgerEntry {
        id: EntryId(row.id),
        account_id: AccountId::from_uuid(row.account_id),
        amount: row.amount,
        kind: row.kind.parse().map_err(|e: String| corrupt("kind", &e))?,
        status: row.status.parse().map_err(|e: String| corrupt("status", &e))?,
        description: row.description,
        reference,
        balance_before: row.balance_before,
        balance_after: row.balance_after,
        created_at: row.created_at.with_timezone(&Utc),
        processed_at: row.processed_at.map(|at| at.with_timezone(&Utc)),
        expires_at: row.expires_at.map(|at| at.with_timezone(&Utc)),
    })
}

fn reservation_from(row: credit_reservations::Model) -> Reservation {
    Reservation {
        account_id: AccountId::from_uuid(row.account_id),
        purpose: row.purpose,
        amount: row.amount,
        created_at: row.created_at.with_timezone(&Utc),
    }
}

fn summary_update(summary: &AccountSummary, now: DateTime<Utc>) -> credit_accounts::ActiveModel {
    credit_accounts::ActiveModel {
        account_id: Set(summary.account_id.into_inner()),
        current_balance: Set(summary.current_balance),
        reserved_amount: Set(summary.reserved_amount),
        total_earned: Set(summary.total_earned),
        total_spent: Set(summary.total_spent),
        lifetime_earnings: Set(summary.lifetime_earnings),
        last_transaction_at: Set(summary.last_transaction_at.map(Into::into)),
        version: Set(summary.version),
        updated_at: Set(now.into()),
        ..Default::default()
    }
}

fn by_reference(reference: &EntryReference, kind: EntryKind) -> Select<ledger_entries::Entity> {
    ledger_entries::Entity::find()
        .filter(ledger_entries::Column::ReferenceId.eq(reference.id.as_str()))
        .filter(ledger_entries::Column::ReferenceType.eq(reference.reference_type.as_str()))
        .filter(ledger_entries::Column::Kind.eq(kind.as_str()))
}

/// `LedgerStore` backed by PostgreSQL through SeaORM.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    db: DatabaseConnection,
}

impl PgLedgerStore {
    /// Creates a store over a connection pool.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Loads and row-locks an account summary inside `txn`.
    async fn lock_account(
        txn: &DatabaseTransaction,
        account_id: AccountId,
    ) -> Result<AccountSummary, CreditError> {
        credit_accounts::Entity::find_by_id(account_id.into_inner())
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(storage)?
            .map(summary_from)
            .ok_or(CreditError::AccountNotFound(account_id))
    }

    /// Resolves a unique violation on insert into the entry recorded first.
    async fn duplicate_of(
        &self,
        reference: &EntryReference,
        kind: EntryKind,
    ) -> Result<CreditError, CreditError> {
        let existing = self
            .find_by_reference(reference, kind)
            .await?
            .ok_or_else(|| {
                CreditError::Storage("unique violation without a matching entry".into())
            })?;
        Ok(CreditError::DuplicateReference {
            existing: Box::new(existing),
        })
    }

    async fn commit_in(
        &self,
        txn: &DatabaseTransaction,
        batch: &CommitBatch,
    ) -> Result<Vec<LedgerEntry>, CreditError> {
        let mut working = BTreeMap::new();
        for account_id in batch.accounts() {
            working.insert(account_id, Self::lock_account(txn, account_id).await?);
        }

        for &id in &batch.expire {
            let original = ledger_entries::Entity::find_by_id(id.value())
                .lock_exclusive()
                .one(txn)
                .await
                .map_err(storage)?
                .ok_or(CreditError::EntryNotFound(id))?;
            if original.status != EntryStatus::Completed.as_str() || original.amount <= Decimal::ZERO {
                return Err(CreditError::EntryNotExpirable(id));
            }
            ledger_entries::ActiveModel {
                id: Set(original.id),
                status: Set(EntryStatus::Expired.as_str().to_string()),
                ..Default::default()
            }
            .update(txn)
            .await
            .map_err(storage)?;
        }

        for key in &batch.release {
            let held = credit_reservations::Entity::find_by_id((
                key.account_id.into_inner(),
                key.purpose.clone(),
            ))
            .one(txn)
            .await
            .map_err(storage)?
            .ok_or_else(|| CreditError::ReservationNotFound {
                account_id: key.account_id,
                purpose: key.purpose.clone(),
            })?;
            if let Some(summary) = working.get_mut(&key.account_id) {
                summary.release(held.amount);
            }
            credit_reservations::Entity::delete_by_id((held.account_id, held.purpose))
                .exec(txn)
                .await
                .map_err(storage)?;
        }

        let processed_at = Utc::now();
        let mut committed = Vec::with_capacity(batch.entries.len());
        for entry in &batch.entries {
            if let Some(reference) = &entry.reference {
                if let Some(existing) = by_reference(reference, entry.kind)
                    .one(txn)
                    .await
                    .map_err(storage)?
                {
                    return Err(CreditError::DuplicateReference {
                        existing: Box::new(entry_from(existing)?),
                    });
                }
            }

            let summary = working
                .get_mut(&entry.account_id)
                .ok_or(CreditError::AccountNotFound(entry.account_id))?;
            let snapshot = summary.post(entry.amount, entry.kind, entry.created_at);

            let row = ledger_entries::ActiveModel {
                account_id: Set(entry.account_id.into_inner()),
                amount: Set(entry.amount),
                kind: Set(entry.kind.as_str().to_string()),
                status: Set(EntryStatus::Completed.as_str().to_string()),
                description: Set(entry.description.clone()),
                reference_id: Set(entry.reference.as_ref().map(|r| r.id.clone())),
                reference_type: Set(entry
                    .reference
                    .as_ref()
                    .map(|r| r.reference_type.as_str().to_string())),
                balance_before: Set(snapshot.before),
                balance_after: Set(snapshot.after),
                created_at: Set(entry.created_at.into()),
                processed_at: Set(Some(processed_at.into())),
                expires_at: Set(entry.expires_at.map(Into::into)),
                ..Default::default()
            }
            .insert(txn)
            .await;

            match row {
                Ok(row) => committed.push(entry_from(row)?),
                Err(err) => {
                    if let (Some(SqlErr::UniqueConstraintViolation(_)), Some(reference)) =
                        (err.sql_err(), &entry.reference)
                    {
                        debug!(reference_id = %reference.id, "reference inserted concurrently");
                        return Err(self.duplicate_of(reference, entry.kind).await?);
                    }
                    return Err(storage(err));
                }
            }
        }

        for (account_id, summary) in &working {
            let debited = batch.debited_from(*account_id);
            if debited > Decimal::ZERO {
                summary.ensure_solvent(debited)?;
            }
        }

        for summary in working.values() {
            summary_update(summary, processed_at)
                .update(txn)
                .await
                .map_err(storage)?;
        }

        Ok(committed)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn open_account(
        &self,
        account_id: AccountId,
        at: DateTime<Utc>,
    ) -> Result<AccountSummary, CreditError> {
        if let Ok(summary) = self.summary(account_id).await {
            return Ok(summary);
        }

        let row = credit_accounts::ActiveModel {
            account_id: Set(account_id.into_inner()),
            current_balance: Set(Decimal::ZERO),
            reserved_amount: Set(Decimal::ZERO),
            total_earned: Set(Decimal::ZERO),
            total_spent: Set(Decimal::ZERO),
            lifetime_earnings: Set(Decimal::ZERO),
            last_transaction_at: Set(None),
            version: Set(0),
            created_at: Set(at.into()),
            updated_at: Set(at.into()),
        }
        .insert(&self.db)
        .await;

        match row {
            Ok(row) => Ok(summary_from(row)),
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                self.summary(account_id).await
            }
            Err(err) => Err(storage(err)),
        }
    }

    async fn summary(&self, account_id: AccountId) -> Result<AccountSummary, CreditError> {
        credit_accounts::Entity::find_by_id(account_id.into_inner())
            .one(&self.db)
            .await
            .map_err(storage)?
            .map(summary_from)
            .ok_or(CreditError::AccountNotFound(account_id))
    }

    async fn commit(&self, batch: CommitBatch) -> Result<Vec<LedgerEntry>, CreditError> {
        for entry in &batch.entries {
            entry.validate()?;
        }

        let txn = self.db.begin().await.map_err(storage)?;
        match self.commit_in(&txn, &batch).await {
            Ok(committed) => {
                txn.commit().await.map_err(storage)?;
                Ok(committed)
            }
            Err(err) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!(error = %rollback, "ledger commit rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn find_by_reference(
        &self,
        reference: &EntryReference,
        kind: EntryKind,
    ) -> Result<Option<LedgerEntry>, CreditError> {
        by_reference(reference, kind)
            .one(&self.db)
            .await
            .map_err(storage)?
            .map(entry_from)
            .transpose()
    }

    async fn entries_for(
        &self,
        account_id: AccountId,
        query: &HistoryQuery,
    ) -> Result<PageResponse<LedgerEntry>, CreditError> {
        let mut select = ledger_entries::Entity::find()
            .filter(ledger_entries::Column::AccountId.eq(account_id.into_inner()));
        if let Some(kind) = query.filter.kind {
            select = select.filter(ledger_entries::Column::Kind.eq(kind.as_str()));
        }
        if let Some(status) = query.filter.status {
            select = select.filter(ledger_entries::Column::Status.eq(status.as_str()));
        }
        if let Some(from) = query.filter.from {
            select = select.filter(ledger_entries::Column::CreatedAt.gte(from));
        }
        if let Some(to) = query.filter.to {
            select = select.filter(ledger_entries::Column::CreatedAt.lt(to));
        }

        let total = select.clone().count(&self.db).await.map_err(storage)?;

        let order = match query.direction {
            SortDirection::Asc => Order::Asc,
            SortDirection::Desc => Order::Desc,
        };
        select = match query.sort_by {
            HistorySortField::CreatedAt => {
                select.order_by(ledger_entries::Column::CreatedAt, order.clone())
            }
            HistorySortField::Amount => select.order_by(ledger_entries::Column::Amount, order.clone()),
            HistorySortField::Kind => select.order_by(ledger_entries::Column::Kind, order.clone()),
            HistorySortField::Status => select.order_by(ledger_entries::Column::Status, order.clone()),
            HistorySortField::Id => select,
        };

        let rows = select
            .order_by(ledger_entries::Column::Id, order)
            .offset(query.page.offset())
            .limit(query.page.limit())
            .all(&self.db)
            .await
            .map_err(storage)?;

        let data = rows
            .into_iter()
            .map(entry_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PageResponse::new(
            data,
            query.page.page,
            query.page.per_page,
            total,
        ))
    }

    async fn sum_posted(&self, account_id: AccountId) -> Result<Decimal, CreditError> {
        let total = ledger_entries::Entity::find()
            .select_only()
            .column_as(ledger_entries::Column::Amount.sum(), "total")
            .filter(ledger_entries::Column::AccountId.eq(account_id.into_inner()))
            .filter(ledger_entries::Column::Status.is_in(POSTED_STATUSES))
            .into_tuple::<Option<Decimal>>()
            .one(&self.db)
            .await
            .map_err(storage)?;
        Ok(total.flatten().unwrap_or(Decimal::ZERO))
    }

    async fn expiring_between(
        &self,
        account_id: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, CreditError> {
        ledger_entries::Entity::find()
            .filter(ledger_entries::Column::AccountId.eq(account_id.into_inner()))
            .filter(ledger_entries::Column::Status.eq(EntryStatus::Completed.as_str()))
            .filter(ledger_entries::Column::Amount.gt(Decimal::ZERO))
            .filter(ledger_entries::Column::ExpiresAt.gt(from))
            .filter(ledger_entries::Column::ExpiresAt.lte(to))
            .order_by_asc(ledger_entries::Column::ExpiresAt)
            .order_by_asc(ledger_entries::Column::Id)
            .all(&self.db)
            .await
            .map_err(storage)?
            .into_iter()
            .map(entry_from)
            .collect()
    }

    async fn due_for_expiration(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<LedgerEntry>, CreditError> {
        ledger_entries::Entity::find()
            .filter(ledger_entries::Column::Status.eq(EntryStatus::Completed.as_str()))
            .filter(ledger_entries::Column::Amount.gt(Decimal::ZERO))
            .filter(ledger_entries::Column::ExpiresAt.lte(now))
            .order_by_asc(ledger_entries::Column::ExpiresAt)
            .order_by_asc(ledger_entries::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(storage)?
            .into_iter()
            .map(entry_from)
            .collect()
    }

    async fn reservations(&self, account_id: AccountId) -> Result<Vec<Reservation>, CreditError> {
        self.summary(account_id).await?;
        let rows = credit_reservations::Entity::find()
            .filter(credit_reservations::Column::AccountId.eq(account_id.into_inner()))
            .order_by_asc(credit_reservations::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(storage)?;
        Ok(rows.into_iter().map(reservation_from).collect())
    }

    async fn place_reservation(
        &self,
        reservation: Reservation,
    ) -> Result<AccountSummary, CreditError> {
        let txn = self.db.begin().await.map_err(storage)?;
        let mut summary = Self::lock_account(&txn, reservation.account_id).await?;

        let existing = credit_reservations::Entity::find_by_id((
            reservation.account_id.into_inner(),
            reservation.purpose.clone(),
        ))
        .one(&txn)
        .await
        .map_err(storage)?;
        if existing.is_some() {
            return Err(CreditError::ReservationExists {
                account_id: reservation.account_id,
                purpose: reservation.purpose,
            });
        }

        summary.reserve(reservation.amount)?;
        credit_reservations::ActiveModel {
            account_id: Set(reservation.account_id.into_inner()),
            purpose: Set(reservation.purpose.clone()),
            amount: Set(reservation.amount),
            created_at: Set(reservation.created_at.into()),
        }
        .insert(&txn)
        .await
        .map_err(storage)?;
        summary_update(&summary, Utc::now())
            .update(&txn)
            .await
            .map_err(storage)?;

        txn.commit().await.map_err(storage)?;
        Ok(summary)
    }

    async fn remove_reservation(&self, key: &ReservationKey) -> Result<Reservation, CreditError> {
        let txn = self.db.begin().await.map_err(storage)?;
        let mut summary = Self::lock_account(&txn, key.account_id).await?;

        let held = credit_reservations::Entity::find_by_id((
            key.account_id.into_inner(),
            key.purpose.clone(),
        ))
        .one(&txn)
        .await
        .map_err(storage)?
        .ok_or_else(|| CreditError::ReservationNotFound {
            account_id: key.account_id,
            purpose: key.purpose.clone(),
        })?;

        credit_reservations::Entity::delete_by_id((held.account_id, held.purpose.clone()))
            .exec(&txn)
            .await
            .map_err(storage)?;
        summary.release(held.amount);
        summary_update(&summary, Utc::now())
            .update(&txn)
            .await
            .map_err(storage)?;

        txn.commit().await.map_err(storage)?;
        Ok(reservation_from(held))
    }
}
