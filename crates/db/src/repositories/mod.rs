//! Repository implementations for database access.

pub mod credit;

pub use credit::PgLedgerStore;
