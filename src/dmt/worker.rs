//! Reconciliation Worker
//!
//! Background worker that polls pending transfers, force-fails transfers
//! left pending past the reconciliation window, retries reversals that
//! failed earlier and executes approved records whose execution was cut off.

use chrono::TimeDelta;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::orchestrator::DmtOrchestrator;
use crate::error::Result;
use crate::transaction::{TransactionStatus, TransactionType};

/// Configuration for the reconciliation worker
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// How often to scan
    pub scan_interval: Duration,
    /// A transfer must sit in `pending` this long before it is polled
    pub min_pending_age: Duration,
    /// Pending transfers older than this are failed and reversed
    pub window: Duration,
    /// Maximum transfers to process per scan
    pub batch_size: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            min_pending_age: Duration::from_secs(120),
            window: Duration::from_secs(72 * 3600),
            batch_size: 100,
        }
    }
}

/// Counts from one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub polled: usize,
    pub resolved: usize,
    pub expired: usize,
    pub reversals_retried: usize,
    pub approvals_resumed: usize,
}

pub struct ReconciliationWorker {
    orchestrator: Arc<DmtOrchestrator>,
    config: ReconciliationConfig,
}

impl ReconciliationWorker {
    pub fn new(orchestrator: Arc<DmtOrchestrator>, config: ReconciliationConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub fn with_defaults(orchestrator: Arc<DmtOrchestrator>) -> Self {
        Self::new(orchestrator, ReconciliationConfig::default())
    }

    /// Run the worker loop forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            min_pending_age_secs = self.config.min_pending_age.as_secs(),
            window_secs = self.config.window.as_secs(),
            "Starting reconciliation worker"
        );

        loop {
            if let Err(e) = self.scan_and_reconcile().await {
                error!(error = %e, "Reconciliation scan failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single scan
    pub async fn scan_and_reconcile(&self) -> Result<ReconciliationReport> {
        let transactions = self.orchestrator.transactions();
        let now = transactions.clock().now();
        let min_age = TimeDelta::from_std(self.config.min_pending_age).unwrap_or(TimeDelta::zero());
        let window = TimeDelta::from_std(self.config.window).unwrap_or(TimeDelta::MAX);

        let pending = transactions
            .list_by_status(
                TransactionStatus::Pending,
                Some(now - min_age),
                self.config.batch_size,
            )
            .await?;

        let mut report = ReconciliationReport::default();
        for record in pending
            .iter()
            .filter(|r| r.transaction_type == TransactionType::DmtTransfer)
        {
            report.polled += 1;
            let checked = match self.orchestrator.check_status(record.id).await {
                Ok(checked) => checked,
                Err(e) => {
                    error!(transaction_id = %record.id, error = %e, "Status check failed");
                    continue;
                }
            };
            if checked.status != TransactionStatus::Pending {
                info!(
                    transaction_id = %record.id,
                    status = %checked.status,
                    "Pending transfer resolved"
                );
                report.resolved += 1;
                continue;
            }

            let age = now - record.created_at;
            if age >= window {
                warn!(
                    transaction_id = %record.id,
                    age_secs = age.num_seconds(),
                    "Transfer exceeded reconciliation window"
                );
                match self
                    .orchestrator
                    .expire_pending(record.id, "no definitive provider answer within reconciliation window")
                    .await
                {
                    Ok(r) if r.status == TransactionStatus::Failed => report.expired += 1,
                    Ok(_) => report.resolved += 1,
                    Err(e) => {
                        error!(transaction_id = %record.id, error = %e, "Failed to expire transfer")
                    }
                }
            } else {
                debug!(transaction_id = %record.id, "Transfer still pending");
            }
        }

        report.reversals_retried = transactions.retry_reversals(self.config.batch_size).await?;
        report.approvals_resumed = transactions
            .resume_approved(now - min_age, self.config.batch_size)
            .await?;

        if report != ReconciliationReport::default() {
            info!(
                polled = report.polled,
                resolved = report.resolved,
                expired = report.expired,
                reversals_retried = report.reversals_retried,
                approvals_resumed = report.approvals_resumed,
                "Reconciliation scan finished"
            );
        }
        Ok(report)
    }
}
