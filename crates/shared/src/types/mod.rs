//! Common types used across the application.

pub mod credits;
pub mod id;
pub mod pagination;

pub use credits::{CREDIT_SCALE, has_credit_precision, round_credits};
pub use id::*;
pub use pagination::{PageMeta, PageRequest, PageResponse, SortDirection};
