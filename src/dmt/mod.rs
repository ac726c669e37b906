//! Domestic Money Transfer
//!
//! Remitters, beneficiaries, KYC gating and remittance execution with
//! provider reconciliation.

pub mod db;
pub mod orchestrator;
pub mod store;
pub mod types;
pub mod worker;


pub use db::PgDmtStore;
pub use orchestrator::DmtOrchestrator;
pub use store::{DmtStore, InMemoryDmtStore};
pub use types::{
    AddBeneficiaryRequest, Beneficiary, ChargesPreview, DmtConfig, KycStatus, OnboardingStatus,
    RegisterRemitterRequest, Registration, Remitter, RemitterLookup, Resolution, StatusCheck,
    TransferMode, TransferRequest,
};
pub use worker::{ReconciliationConfig, ReconciliationReport, ReconciliationWorker};
