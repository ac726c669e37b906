//! Wallet and ledger entry types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::UserId;
use crate::money::Money;

/// One spendable balance per user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub balance: Money,
    /// Incremented on every mutation
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: Money::ZERO,
            version: 0,
            updated_at: at,
        }
    }
}

/// Entry kind. At most one entry of each kind exists per reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Debit,
    Credit,
    Reversal,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Debit => "debit",
            EntryKind::Credit => "credit",
            EntryKind::Reversal => "reversal",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(EntryKind::Debit),
            "credit" => Some(EntryKind::Credit),
            "reversal" => Some(EntryKind::Reversal),
            _ => None,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an entry adds to or takes from the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "in" => Some(Direction::In),
            "out" => Some(Direction::Out),
            _ => None,
        }
    }
}

/// Append-only audit row for one balance mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub entry_id: i64,
    pub user_id: UserId,
    pub reference: String,
    pub kind: EntryKind,
    pub direction: Direction,
    pub amount: Money,
    pub balance_after: Money,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Amount with sign applied (negative for outflows)
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::In => self.amount.inner(),
            Direction::Out => -self.amount.inner(),
        }
    }
}

/// Requested debit or credit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub user_id: UserId,
    pub kind: EntryKind,
    pub amount: Money,
    pub reference: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl Posting {
    pub fn direction(&self) -> Direction {
        match self.kind {
            EntryKind::Credit => Direction::In,
            _ => Direction::Out,
        }
    }
}

/// Result of applying a posting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostOutcome {
    pub entry: LedgerEntry,
    pub wallet: Wallet,
    /// True if an identical posting for the reference already existed
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReversalOutcome {
    Reversed { entry: LedgerEntry, wallet: Wallet },
    AlreadyReversed,
    NothingToReverse,
}

impl ReversalOutcome {
    pub fn is_reversed(&self) -> bool {
        matches!(self, ReversalOutcome::Reversed { .. })
    }
}

/// Net signed effect of a reference's entries
pub fn net_effect<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Decimal {
    entries.into_iter().map(LedgerEntry::signed_amount).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: EntryKind, direction: Direction, rupees: u64) -> LedgerEntry {
        LedgerEntry {
            entry_id: 1,
            user_id: 1,
            reference: "r".into(),
            kind,
            direction,
            amount: Money::from_rupees(rupees),
            balance_after: Money::ZERO,
            reason: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_net_effect() {
        let entries = [
            entry(EntryKind::Debit, Direction::Out, 205),
            entry(EntryKind::Credit, Direction::In, 5),
        ];
        assert_eq!(net_effect(&entries), Decimal::from(-200));
    }

    #[test]
    fn test_entry_kind_roundtrip() {
        for kind in [EntryKind::Debit, EntryKind::Credit, EntryKind::Reversal] {
            assert_eq!(EntryKind::from_str_opt(kind.as_str()), Some(kind));
        }
        assert_eq!(EntryKind::from_str_opt("refund"), None);
    }
}
