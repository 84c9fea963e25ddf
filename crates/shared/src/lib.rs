//! Shared types, errors, and configuration for SkillSwap.
//!
//! This crate provides common types used across all other crates:
//! - Credit amount helpers with decimal precision
//! - Typed IDs for type-safe entity references
//! - Pagination and sorting types for list endpoints
//! - Application-wide error types
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
