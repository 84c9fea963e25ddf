//! Periodic expiration of lapsed credits.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use skillswap_shared::config::SweeperConfig;
use skillswap_shared::types::EntryId;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::error::CreditError;
use super::orchestrator::TransferOrchestrator;

/// Result of one sweep pass.
#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    /// Lapsed credits looked at.
    pub examined: usize,
    /// Credits marked `Expired`.
    pub expired: usize,
    /// Total credits removed.
    pub credits_negated: Decimal,
    /// Credits another writer had already expired.
    pub already_expired: usize,
    /// Reservations cancelled because their credits lapsed.
    pub reservations_released: usize,
    /// Per-entry failures; the pass continued past each.
    #[serde(skip)]
    pub failures: Vec<CreditError>,
}

/// Finds completed credits past their expiry and negates them.
///
/// At most one pass runs at a time per sweeper; a pass requested while
/// another is running is skipped.
pub struct ExpirationSweeper {
    orchestrator: Arc<TransferOrchestrator>,
    batch_size: u64,
    running: AtomicBool,
}

/// Clears the running flag when a pass ends, including on panic.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ExpirationSweeper {
    /// Creates a sweeper.
    pub fn new(orchestrator: Arc<TransferOrchestrator>, config: &SweeperConfig) -> Self {
        Self {
            orchestrator,
            batch_size: u64::from(config.batch_size.max(1)),
            running: AtomicBool::new(false),
        }
    }

    /// Runs one pass as of `now`. Returns `None` if a pass is already running.
    #[instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<Option<SweepReport>, CreditError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sweep already in progress, skipping");
            return Ok(None);
        }
        let _pass = PassGuard(&self.running);

        let mut report = SweepReport::default();
        // Entries that will not leave the due set this pass.
        let mut skip: HashSet<EntryId> = HashSet::new();

        loop {
            let limit = self.batch_size + skip.len() as u64;
            let due: Vec<_> = self
                .orchestrator
                .store()
                .due_for_expiration(now, limit)
                .await?
                .into_iter()
                .filter(|entry| !skip.contains(&entry.id))
                .collect();
            if due.is_empty() {
                break;
            }

            for entry in &due {
                report.examined += 1;
                match self.orchestrator.expire(entry, now).await {
                    Ok(outcome) => {
                        report.expired += 1;
                        report.credits_negated += outcome.negated;
                        report.reservations_released += outcome.released.len();
                    }
                    Err(CreditError::DuplicateReference { .. } | CreditError::EntryNotExpirable(_)) => {
                        report.already_expired += 1;
                        skip.insert(entry.id);
                    }
                    Err(err) => {
                        warn!(entry_id = %entry.id, account_id = %entry.account_id, error = %err, "failed to expire credit");
                        skip.insert(entry.id);
                        report.failures.push(CreditError::SweepEntryFailure {
                            entry_id: entry.id,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            examined = report.examined,
            expired = report.expired,
            negated = %report.credits_negated,
            failures = report.failures.len(),
            "expiration sweep finished"
        );
        Ok(Some(report))
    }

    /// Runs a pass every `interval` until `shutdown` is cancelled.
    ///
    /// The first pass starts immediately.
    pub fn spawn(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        info!("expiration sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_once(Utc::now()).await {
                            error!(error = %err, "expiration sweep aborted");
                        }
                    }
                }
            }
        })
    }
}
