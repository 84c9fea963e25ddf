//! Per-account write serialization.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use skillswap_shared::types::AccountId;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::error::CreditError;

/// Exclusive per-account locks.
///
/// Multi-account writers acquire in ascending id order, so two transfers
/// touching the same pair of accounts cannot deadlock.
pub struct AccountLocks {
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
    timeout: Duration,
}

/// Holds every lock of one acquisition until dropped.
#[must_use = "locks are released when the guard is dropped"]
pub struct AccountGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl AccountLocks {
    /// Creates an empty lock table with the given wait limit.
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Locks every listed account, ascending and deduplicated.
    ///
    /// Fails with `ConcurrentModification` if any lock is not obtained within
    /// the timeout; locks already taken are released.
    pub async fn acquire(&self, accounts: &[AccountId]) -> Result<AccountGuard, CreditError> {
        let mut ids = accounts.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let lock = Arc::clone(self.locks.entry(id).or_default().value());
            match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    debug!(account_id = %id, "account lock wait timed out");
                    return Err(CreditError::ConcurrentModification(id));
                }
            }
        }

        Ok(AccountGuard { _guards: guards })
    }
}
