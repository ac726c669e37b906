//! Approval policy and amount limits
//!
//! Decides per transaction type whether a new record waits for an admin
//! decision or takes the instant path. Remittances never wait: they are
//! driven by the DMT orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::state::TransactionType;
use crate::money::Money;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalPolicy {
    requires_approval: HashSet<TransactionType>,
}

impl ApprovalPolicy {
    pub fn new(types: impl IntoIterator<Item = TransactionType>) -> Self {
        Self {
            requires_approval: types
                .into_iter()
                .filter(|t| *t != TransactionType::DmtTransfer)
                .collect(),
        }
    }

    /// Every type completes instantly
    pub fn instant() -> Self {
        Self::new([])
    }

    pub fn requires_approval(&self, transaction_type: TransactionType) -> bool {
        self.requires_approval.contains(&transaction_type)
    }
}

impl Default for ApprovalPolicy {
    /// Top-ups, recharges and bill payments are reviewed; vouchers are instant
    fn default() -> Self {
        Self::new([
            TransactionType::Topup,
            TransactionType::MobileRecharge,
            TransactionType::DthRecharge,
            TransactionType::BillPayment,
        ])
    }
}

/// Per-request ceilings for wallet top-ups and payments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmountLimits {
    pub max_topup: Money,
    /// Recharges, bill payments and vouchers
    pub max_payment: Money,
}

impl AmountLimits {
    pub fn max_for(&self, transaction_type: TransactionType) -> Money {
        if transaction_type.is_credit() {
            self.max_topup
        } else {
            self.max_payment
        }
    }
}

impl Default for AmountLimits {
    fn default() -> Self {
        Self {
            max_topup: Money::from_rupees(200_000),
            max_payment: Money::from_rupees(100_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ApprovalPolicy::default();
        assert!(policy.requires_approval(TransactionType::Topup));
        assert!(policy.requires_approval(TransactionType::BillPayment));
        assert!(!policy.requires_approval(TransactionType::VoucherPurchase));
        assert!(!policy.requires_approval(TransactionType::DmtTransfer));
    }

    #[test]
    fn test_dmt_is_never_reviewed() {
        let policy = ApprovalPolicy::new([TransactionType::DmtTransfer]);
        assert!(!policy.requires_approval(TransactionType::DmtTransfer));
    }

    #[test]
    fn test_amount_limits_by_direction() {
        let limits = AmountLimits::default();
        assert_eq!(limits.max_for(TransactionType::Topup), Money::from_rupees(200_000));
        assert_eq!(
            limits.max_for(TransactionType::BillPayment),
            Money::from_rupees(100_000)
        );
    }
}
