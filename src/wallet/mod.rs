//! Wallet Ledger
//!
//! One balance per user, mutated only through [`WalletLedger`].
//!
//! # Safety Invariants
//!
//! 1. **Never Negative**: a debit larger than the balance fails with
//!    `InsufficientFunds` and moves nothing
//! 2. **Conservation**: balance == sum of signed ledger entries
//! 3. **Idempotency**: postings and reversals are keyed by reference

pub mod db;
pub mod ledger;
pub mod store;
pub mod types;

pub use db::PgWalletStore;
pub use ledger::WalletLedger;
pub use store::{InMemoryWalletStore, WalletStore};
pub use types::{Direction, EntryKind, LedgerEntry, ReversalOutcome, Wallet};
