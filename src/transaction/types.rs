//! Transaction record and request types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{TransactionStatus, TransactionType};
use crate::core_types::{BeneficiaryId, RemitterId, TransactionId, UserId};
use crate::dmt::TransferMode;
use crate::money::Money;

/// Per-type payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TransactionMetadata {
    Topup {
        #[serde(default)]
        payment_method: Option<String>,
    },
    /// Mobile or DTH recharge
    Recharge {
        subscriber_number: String,
        #[serde(default)]
        plan_id: Option<String>,
    },
    BillPayment {
        biller_id: String,
        consumer_number: String,
    },
    Voucher {
        sku: String,
        #[serde(default = "default_quantity")]
        quantity: u32,
    },
    DmtTransfer {
        remitter_id: RemitterId,
        beneficiary_id: BeneficiaryId,
        mode: TransferMode,
    },
}

fn default_quantity() -> u32 {
    1
}

impl TransactionMetadata {
    /// Whether this payload belongs to the given transaction type
    pub fn matches(&self, transaction_type: TransactionType) -> bool {
        matches!(
            (self, transaction_type),
            (TransactionMetadata::Topup { .. }, TransactionType::Topup)
                | (
                    TransactionMetadata::Recharge { .. },
                    TransactionType::MobileRecharge | TransactionType::DthRecharge
                )
                | (TransactionMetadata::BillPayment { .. }, TransactionType::BillPayment)
                | (TransactionMetadata::Voucher { .. }, TransactionType::VoucherPurchase)
                | (TransactionMetadata::DmtTransfer { .. }, TransactionType::DmtTransfer)
        )
    }
}

/// Single source of truth for one money-moving action.
///
/// `amount`, `transaction_type` and `charges` never change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// Owning wallet (user id)
    pub user_id: UserId,
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub charges: Money,
    pub total_amount: Money,
    pub status: TransactionStatus,
    pub metadata: TransactionMetadata,
    pub operator: String,
    pub external_reference: Option<String>,
    pub client_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub failure_reason: Option<String>,
    pub approval_notes: Option<String>,
    /// A ledger debit or credit for this record has been committed
    pub funds_held: bool,
    /// A required reversal failed and is waiting for retry
    pub reversal_pending: bool,
}

impl TransactionRecord {
    pub fn new(id: TransactionId, req: NewTransaction, at: DateTime<Utc>) -> Self {
        // Top-ups carry no charges
        let charges = if req.transaction_type.is_credit() {
            Money::ZERO
        } else {
            req.charges
        };
        Self {
            id,
            user_id: req.user_id,
            transaction_type: req.transaction_type,
            amount: req.amount,
            charges,
            total_amount: req.amount + charges,
            status: TransactionStatus::Initiated,
            metadata: req.metadata,
            operator: req.operator,
            external_reference: None,
            client_ref: req.client_ref,
            created_at: at,
            updated_at: at,
            decided_at: None,
            decided_by: None,
            failure_reason: None,
            approval_notes: None,
            funds_held: false,
            reversal_pending: false,
        }
    }

    /// Ledger reference used for every entry of this record
    pub fn reference(&self) -> String {
        self.id.to_string()
    }

    /// Same request submitted twice with one client reference
    pub fn same_request(&self, req: &NewTransaction) -> bool {
        self.transaction_type == req.transaction_type
            && self.amount == req.amount
            && self.metadata == req.metadata
            && self.operator.eq_ignore_ascii_case(&req.operator)
    }
}

/// Validated creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub charges: Money,
    pub operator: String,
    pub metadata: TransactionMetadata,
    pub client_ref: Option<String>,
}

/// Field changes applied together with a status transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub to: TransactionStatus,
    pub at: DateTime<Utc>,
    pub external_reference: Option<String>,
    pub decided_by: Option<String>,
    pub failure_reason: Option<String>,
    pub approval_notes: Option<String>,
    pub funds_held: Option<bool>,
}

impl StatusUpdate {
    pub fn to(status: TransactionStatus, at: DateTime<Utc>) -> Self {
        Self {
            to: status,
            at,
            external_reference: None,
            decided_by: None,
            failure_reason: None,
            approval_notes: None,
            funds_held: None,
        }
    }

    pub fn external_reference(mut self, reference: Option<String>) -> Self {
        self.external_reference = reference;
        self
    }

    /// Records the admin decision; `decided_at` is the update time
    pub fn decided_by(mut self, actor: &str) -> Self {
        self.decided_by = Some(actor.to_string());
        self
    }

    pub fn failure_reason(mut self, reason: &str) -> Self {
        self.failure_reason = Some(reason.to_string());
        self
    }

    pub fn approval_notes(mut self, notes: Option<String>) -> Self {
        self.approval_notes = notes;
        self
    }

    pub fn funds_held(mut self, held: bool) -> Self {
        self.funds_held = Some(held);
        self
    }

    /// Apply to a record already known to be in the expected state
    pub fn apply(&self, record: &mut TransactionRecord) {
        record.status = self.to;
        record.updated_at = self.at;
        if let Some(reference) = &self.external_reference {
            record.external_reference = Some(reference.clone());
        }
        if let Some(actor) = &self.decided_by {
            record.decided_by = Some(actor.clone());
            record.decided_at = Some(self.at);
        }
        if let Some(reason) = &self.failure_reason {
            record.failure_reason = Some(reason.clone());
        }
        if let Some(notes) = &self.approval_notes {
            record.approval_notes = Some(notes.clone());
        }
        if let Some(held) = self.funds_held {
            record.funds_held = held;
        }
    }
}

/// Changes that do not move the status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub funds_held: Option<bool>,
    pub reversal_pending: Option<bool>,
    pub external_reference: Option<String>,
}

impl RecordPatch {
    pub fn apply(&self, record: &mut TransactionRecord, at: DateTime<Utc>) {
        if let Some(held) = self.funds_held {
            record.funds_held = held;
        }
        if let Some(pending) = self.reversal_pending {
            record.reversal_pending = pending;
        }
        if let Some(reference) = &self.external_reference {
            record.external_reference = Some(reference.clone());
        }
        record.updated_at = at;
    }
}

/// Store insert result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(TransactionRecord),
    /// A record with the same `(user_id, client_ref)` already exists
    Existing(TransactionRecord),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recharge(amount: u64, charges: u64) -> NewTransaction {
        NewTransaction {
            user_id: 1,
            transaction_type: TransactionType::MobileRecharge,
            amount: Money::from_rupees(amount),
            charges: Money::from_rupees(charges),
            operator: "Jio".into(),
            metadata: TransactionMetadata::Recharge {
                subscriber_number: "9876543210".into(),
                plan_id: None,
            },
            client_ref: None,
        }
    }

    #[test]
    fn test_total_includes_charges() {
        let record = TransactionRecord::new(TransactionId::new(), recharge(100, 2), Utc::now());
        assert_eq!(record.total_amount, Money::from_rupees(102));
        assert_eq!(record.status, TransactionStatus::Initiated);
    }

    #[test]
    fn test_topup_has_no_charges() {
        let req = NewTransaction {
            transaction_type: TransactionType::Topup,
            metadata: TransactionMetadata::Topup {
                payment_method: None,
            },
            ..recharge(500, 9)
        };
        let record = TransactionRecord::new(TransactionId::new(), req, Utc::now());
        assert_eq!(record.charges, Money::ZERO);
        assert_eq!(record.total_amount, Money::from_rupees(500));
    }

    #[test]
    fn test_metadata_matches_type() {
        let meta = TransactionMetadata::Recharge {
            subscriber_number: "1".into(),
            plan_id: None,
        };
        assert!(meta.matches(TransactionType::MobileRecharge));
        assert!(meta.matches(TransactionType::DthRecharge));
        assert!(!meta.matches(TransactionType::BillPayment));
    }

    #[test]
    fn test_same_request() {
        let record = TransactionRecord::new(TransactionId::new(), recharge(100, 2), Utc::now());
        assert!(record.same_request(&recharge(100, 2)));
        assert!(!record.same_request(&recharge(101, 2)));
    }

    #[test]
    fn test_status_update_records_decision() {
        let mut record = TransactionRecord::new(TransactionId::new(), recharge(1, 0), Utc::now());
        let at = Utc::now();
        StatusUpdate::to(TransactionStatus::AwaitingApproval, at).apply(&mut record);
        StatusUpdate::to(TransactionStatus::Rejected, at)
            .decided_by("admin-1")
            .failure_reason("duplicate")
            .apply(&mut record);
        assert_eq!(record.status, TransactionStatus::Rejected);
        assert_eq!(record.decided_by.as_deref(), Some("admin-1"));
        assert_eq!(record.decided_at, Some(at));
        assert_eq!(record.failure_reason.as_deref(), Some("duplicate"));
    }

    #[test]
    fn test_metadata_json_shape() {
        let meta = TransactionMetadata::BillPayment {
            biller_id: "BESCOM".into(),
            consumer_number: "123".into(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["kind"], "bill_payment");
        assert_eq!(json["billerId"], "BESCOM");
    }
}
