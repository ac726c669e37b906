//! Transaction Lifecycle
//!
//! Every money-moving action is one [`TransactionRecord`] driven through a
//! persistent state machine.
//!
//! # State Machine
//!
//! ```text
//! INITIATED ──(instant)──────────────────────────────> COMPLETED
//!     │
//!     ├──(review)──> AWAITING_APPROVAL ──approve──> APPROVED ──> COMPLETED | FAILED
//!     │                      └──reject──> REJECTED
//!     │
//!     └──(dmt submit)──> COMPLETED | FAILED | PENDING ──(reconcile)──> COMPLETED | FAILED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **CAS Transitions**: every status change names the expected current status
//! 2. **Exactly-Once Ledger Effect**: debit/credit on completion, reversal on failure
//! 3. **Explicit Fail Rule**: only a definitive failure reverses held funds;
//!    ambiguous outcomes stay `pending`

pub mod db;
pub mod policy;
pub mod service;
pub mod state;
pub mod store;
pub mod types;

pub use db::PgTransactionStore;
pub use policy::{AmountLimits, ApprovalPolicy};
pub use service::{ProcessRequest, TopupRequest, TransactionService};
pub use state::{TransactionStatus, TransactionType};
pub use store::{InMemoryTransactionStore, TransactionStore};
pub use types::{TransactionMetadata, TransactionRecord};
