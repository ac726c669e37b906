//! Transaction status and type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transaction lifecycle status
///
/// ```text
/// initiated ──> completed | failed | pending | awaiting_approval
/// awaiting_approval ──> approved | rejected
/// approved ──> completed | failed
/// pending  ──> completed | failed
/// ```
/// Terminal: completed, failed, rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Validated and recorded
    Initiated,
    /// Waiting for an admin decision
    AwaitingApproval,
    /// Approved, ledger effect not yet applied
    Approved,
    /// Submitted to the provider, outcome unknown. Funds stay held.
    Pending,
    Completed,
    Failed,
    Rejected,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 7] = [
        TransactionStatus::Initiated,
        TransactionStatus::AwaitingApproval,
        TransactionStatus::Approved,
        TransactionStatus::Pending,
        TransactionStatus::Completed,
        TransactionStatus::Failed,
        TransactionStatus::Rejected,
    ];

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::Rejected
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle graph
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (*self, next),
            (Initiated, Completed | Failed | Pending | AwaitingApproval)
                | (AwaitingApproval, Approved | Rejected)
                | (Approved, Completed | Failed)
                | (Pending, Completed | Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Initiated => "initiated",
            TransactionStatus::AwaitingApproval => "awaiting_approval",
            TransactionStatus::Approved => "approved",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown transaction status: {}", s))
    }
}

/// Kind of money-moving action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionType {
    Topup,
    MobileRecharge,
    DthRecharge,
    BillPayment,
    VoucherPurchase,
    DmtTransfer,
}

impl TransactionType {
    pub const ALL: [TransactionType; 6] = [
        TransactionType::Topup,
        TransactionType::MobileRecharge,
        TransactionType::DthRecharge,
        TransactionType::BillPayment,
        TransactionType::VoucherPurchase,
        TransactionType::DmtTransfer,
    ];

    /// Top-ups credit the wallet; everything else debits it
    #[inline]
    pub fn is_credit(&self) -> bool {
        matches!(self, TransactionType::Topup)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Topup => "topup",
            TransactionType::MobileRecharge => "mobile-recharge",
            TransactionType::DthRecharge => "dth-recharge",
            TransactionType::BillPayment => "bill-payment",
            TransactionType::VoucherPurchase => "voucher-purchase",
            TransactionType::DmtTransfer => "dmt-transfer",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown transaction type: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionStatus::*;

    #[test]
    fn test_terminal_states() {
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(Rejected.is_terminal());

        assert!(!Initiated.is_terminal());
        assert!(!AwaitingApproval.is_terminal());
        assert!(!Approved.is_terminal());
        assert!(!Pending.is_terminal());
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        for from in [Completed, Failed, Rejected] {
            for to in TransactionStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_graph_edges() {
        assert!(Initiated.can_transition_to(AwaitingApproval));
        assert!(Initiated.can_transition_to(Pending));
        assert!(AwaitingApproval.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));

        assert!(!AwaitingApproval.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(AwaitingApproval));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Initiated.can_transition_to(Initiated));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(AwaitingApproval.to_string(), "awaiting_approval");
        assert_eq!("pending".parse::<TransactionStatus>().unwrap(), Pending);
        assert!("PENDING".parse::<TransactionStatus>().is_err());
        let json = serde_json::to_string(&AwaitingApproval).unwrap();
        assert_eq!(json, r#""awaiting_approval""#);
    }

    #[test]
    fn test_type_strings() {
        for t in TransactionType::ALL {
            assert_eq!(t.as_str().parse::<TransactionType>().unwrap(), t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert!(TransactionType::Topup.is_credit());
        assert!(!TransactionType::DmtTransfer.is_credit());
    }
}
