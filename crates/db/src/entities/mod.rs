//! `SeaORM` entities for the credit ledger tables.

pub mod credit_accounts;
pub mod credit_reservations;
pub mod ledger_entries;
