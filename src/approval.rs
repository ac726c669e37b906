//! Admin approval workflow
//!
//! Single and bulk approve/reject. Bulk operations apply the single-record
//! rule to each id independently; one failure never rolls back the others.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core_types::TransactionId;
use crate::error::{Result, WalletError};
use crate::transaction::types::StatusUpdate;
use crate::transaction::{TransactionRecord, TransactionService, TransactionStatus};

/// Outcome of one id in a bulk operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub transaction_id: TransactionId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BulkOutcome {
    pub(crate) fn from_result(id: TransactionId, result: Result<TransactionRecord>) -> Self {
        match result {
            Ok(record) => Self {
                transaction_id: id,
                success: true,
                status: Some(record.status),
                error_code: None,
                error: None,
            },
            Err(e) => Self {
                transaction_id: id,
                success: false,
                status: None,
                error_code: Some(e.code()),
                error: Some(e.to_string()),
            },
        }
    }
}

pub struct ApprovalWorkflow {
    transactions: Arc<TransactionService>,
}

impl ApprovalWorkflow {
    pub fn new(transactions: Arc<TransactionService>) -> Self {
        Self { transactions }
    }

    /// Approve, then execute the ledger effect.
    ///
    /// Returns the record in `completed`, or `failed` when the balance no
    /// longer covers a debit.
    pub async fn approve(
        &self,
        id: TransactionId,
        actor: &str,
        external_reference: Option<String>,
        notes: Option<String>,
    ) -> Result<TransactionRecord> {
        let clock = self.transactions.clock();
        let approved = self
            .transactions
            .transition(
                id,
                TransactionStatus::AwaitingApproval,
                StatusUpdate::to(TransactionStatus::Approved, clock.now())
                    .decided_by(actor)
                    .external_reference(external_reference)
                    .approval_notes(clean(notes)),
            )
            .await?;
        info!(transaction_id = %id, actor, "Transaction approved");
        self.execute_approved(approved.id).await
    }

    /// Complete an `approved` record
    pub async fn execute_approved(&self, id: TransactionId) -> Result<TransactionRecord> {
        self.transactions
            .complete(id, TransactionStatus::Approved, None)
            .await
    }

    /// Reject with a mandatory reason. Nothing changes if the reason is blank.
    pub async fn reject(
        &self,
        id: TransactionId,
        actor: &str,
        reason: &str,
    ) -> Result<TransactionRecord> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(WalletError::ReasonRequired);
        }
        let clock = self.transactions.clock();
        let record = self
            .transactions
            .transition(
                id,
                TransactionStatus::AwaitingApproval,
                StatusUpdate::to(TransactionStatus::Rejected, clock.now())
                    .decided_by(actor)
                    .failure_reason(reason),
            )
            .await?;
        info!(transaction_id = %id, actor, reason, "Transaction rejected");
        Ok(record)
    }

    pub async fn bulk_approve(
        &self,
        ids: &[TransactionId],
        actor: &str,
        notes: Option<String>,
    ) -> Vec<BulkOutcome> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.approve(*id, actor, None, notes.clone()).await;
            if let Err(e) = &result {
                warn!(transaction_id = %id, error = %e, "Bulk approve item failed");
            }
            outcomes.push(BulkOutcome::from_result(*id, result));
        }
        outcomes
    }

    /// A blank reason fails every item with `REASON_REQUIRED`
    pub async fn bulk_reject(
        &self,
        ids: &[TransactionId],
        actor: &str,
        reason: &str,
    ) -> Vec<BulkOutcome> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.reject(*id, actor, reason).await;
            if let Err(e) = &result {
                warn!(transaction_id = %id, error = %e, "Bulk reject item failed");
            }
            outcomes.push(BulkOutcome::from_result(*id, result));
        }
        outcomes
    }

    /// Review queue, oldest first
    pub async fn awaiting(&self, limit: usize) -> Result<Vec<TransactionRecord>> {
        self.transactions
            .list_by_status(TransactionStatus::AwaitingApproval, None, limit)
            .await
    }
}

fn clean(notes: Option<String>) -> Option<String> {
    notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}
