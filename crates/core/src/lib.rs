//! Core business logic for SkillSwap.
//!
//! This crate contains the credit ledger with ZERO web or database dependencies.
//! Storage is reached through the [`credits::LedgerStore`] trait; the crate
//! ships an in-memory implementation and the database crate provides the
//! PostgreSQL one.
//!
//! # Modules
//!
//! - `credits` - Credit ledger: entries, policy, balances, transfers,
//!   reservations, and expiration

pub mod credits;
