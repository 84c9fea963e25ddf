//! Credit ledger schema.
//!
//! Creates the account summaries, the append-only entry log, and
//! reservations.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(CREDIT_LEDGER_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            "DROP TABLE IF EXISTS credit_reservations, ledger_entries, credit_accounts CASCADE;",
        )
        .await?;
        Ok(())
    }
}

const CREDIT_LEDGER_SQL: &str = r"
-- One summary row per account; rewritten only inside a ledger commit
CREATE TABLE credit_accounts (
    account_id UUID PRIMARY KEY,
    current_balance NUMERIC(18, 2) NOT NULL DEFAULT 0,
    reserved_amount NUMERIC(18, 2) NOT NULL DEFAULT 0,
    total_earned NUMERIC(18, 2) NOT NULL DEFAULT 0,
    total_spent NUMERIC(18, 2) NOT NULL DEFAULT 0,
    lifetime_earnings NUMERIC(18, 2) NOT NULL DEFAULT 0,
    last_transaction_at TIMESTAMPTZ,
    version BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_reserved_non_negative CHECK (reserved_amount >= 0),
    CONSTRAINT chk_available_non_negative CHECK (current_balance - reserved_amount >= 0)
);

-- Append-only entry log; only status may change (completed -> expired)
CREATE TABLE ledger_entries (
    id BIGSERIAL PRIMARY KEY,
    account_id UUID NOT NULL REFERENCES credit_accounts(account_id),
    amount NUMERIC(18, 2) NOT NULL,
    kind VARCHAR(32) NOT NULL,
    status VARCHAR(16) NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    reference_id VARCHAR(255),
    reference_type VARCHAR(64),
    balance_before NUMERIC(18, 2) NOT NULL,
    balance_after NUMERIC(18, 2) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    processed_at TIMESTAMPTZ,
    expires_at TIMESTAMPTZ,
    CONSTRAINT chk_amount_non_zero CHECK (amount <> 0),
    CONSTRAINT chk_expires_after_created CHECK (expires_at IS NULL OR expires_at > created_at),
    CONSTRAINT chk_reference_pair CHECK ((reference_id IS NULL) = (reference_type IS NULL)),
    CONSTRAINT chk_status CHECK (status IN ('pending', 'completed', 'failed', 'cancelled', 'expired'))
);

-- At most one entry per (reference, kind)
CREATE UNIQUE INDEX uq_ledger_entries_reference
    ON ledger_entries(reference_id, reference_type, kind)
    WHERE reference_id IS NOT NULL;

-- Account history
CREATE INDEX idx_ledger_entries_account ON ledger_entries(account_id, created_at DESC, id DESC);

-- Expiration sweep
CREATE INDEX idx_ledger_entries_expiring ON ledger_entries(expires_at)
    WHERE status = 'completed' AND expires_at IS NOT NULL;

-- Active holds, one per (account, purpose)
CREATE TABLE credit_reservations (
    account_id UUID NOT NULL REFERENCES credit_accounts(account_id),
    purpose VARCHAR(255) NOT NULL,
    amount NUMERIC(18, 2) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (account_id, purpose),
    CONSTRAINT chk_reservation_positive CHECK (amount > 0)
);
";
