//! wallet_core - Wallet Ledger, Transaction Lifecycle & DMT Orchestrator
//!
//! # Modules
//!
//! - [`money`] - Fixed two-decimal rupee amounts
//! - [`wallet`] - Per-user balance with an append-only ledger
//! - [`commission`] - Scoped charge rules
//! - [`transaction`] - Persistent transaction state machine
//! - [`approval`] - Admin approve/reject workflow
//! - [`dmt`] - Remitters, beneficiaries, transfers and reconciliation
//! - [`provider`] - Remittance network gateway
//! - [`events`] - Post-commit event publishing
//! - [`access`] - Route access guard
//! - [`gateway`] - axum HTTP surface

// Core types - must be first!
pub mod core_types;

pub mod clock;
pub mod error;
pub mod events;
pub mod money;

// Money movement
pub mod approval;
pub mod commission;
pub mod transaction;
pub mod wallet;

// Remittance
pub mod dmt;
pub mod provider;

// Service surface
pub mod access;
pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod services;

// Convenient re-exports at crate root
pub use core_types::{BeneficiaryId, RemitterId, TransactionId, UserId};
pub use error::{Result, WalletError};
pub use money::Money;
pub use services::WalletServices;
