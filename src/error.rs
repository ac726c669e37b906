//! Wallet Error Types
//!
//! One taxonomy shared by the ledger, the transaction state machine, the DMT
//! orchestrator and the HTTP gateway. Codes are stable and exposed to
//! administrators; end users only see the display message.

use thiserror::Error;

use crate::money::{Money, MoneyError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WalletError {
    // === Ledger ===
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Money, requested: Money },

    #[error("Wallet not found for user {0}")]
    WalletNotFound(u64),

    // === State machine ===
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("A rejection reason is required")]
    ReasonRequired,

    // === DMT ===
    #[error("Monthly limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Remitter KYC is not verified")]
    KycNotVerified,

    #[error("KYC attempts exhausted for today")]
    KycAttemptsExhausted,

    #[error("Beneficiary not eligible: {0}")]
    BeneficiaryNotEligible(String),

    #[error("Remitter not found: {0}")]
    RemitterNotFound(String),

    #[error("Remitter already registered: {0}")]
    RemitterExists(String),

    #[error("Beneficiary not found: {0}")]
    BeneficiaryNotFound(String),

    // === Provider ===
    #[error("Provider timed out: {0}")]
    ProviderTimeout(String),

    #[error("Provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("Duplicate submission: {0}")]
    DuplicateSubmission(String),

    // === Validation ===
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // === Access ===
    #[error("User not authenticated")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    // === System ===
    #[error("Reversal failed: {0}")]
    ReversalFailed(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal system error: {0}")]
    Internal(String),
}

impl WalletError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            WalletError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            WalletError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            WalletError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            WalletError::ReasonRequired => "REASON_REQUIRED",
            WalletError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            WalletError::KycNotVerified => "KYC_NOT_VERIFIED",
            WalletError::KycAttemptsExhausted => "KYC_ATTEMPTS_EXHAUSTED",
            WalletError::BeneficiaryNotEligible(_) => "BENEFICIARY_NOT_ELIGIBLE",
            WalletError::RemitterNotFound(_) => "REMITTER_NOT_FOUND",
            WalletError::RemitterExists(_) => "REMITTER_EXISTS",
            WalletError::BeneficiaryNotFound(_) => "BENEFICIARY_NOT_FOUND",
            WalletError::ProviderTimeout(_) => "PROVIDER_TIMEOUT",
            WalletError::ProviderRejected(_) => "PROVIDER_REJECTED",
            WalletError::DuplicateSubmission(_) => "DUPLICATE_SUBMISSION",
            WalletError::InvalidAmount(_) => "INVALID_AMOUNT",
            WalletError::Validation(_) => "VALIDATION_ERROR",
            WalletError::Unauthorized => "UNAUTHORIZED",
            WalletError::Forbidden => "FORBIDDEN",
            WalletError::AccessDenied(_) => "ACCESS_DENIED",
            WalletError::ReversalFailed(_) => "REVERSAL_FAILED",
            WalletError::Database(_) => "DATABASE_ERROR",
            WalletError::Internal(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            WalletError::Unauthorized => 401,
            WalletError::Forbidden | WalletError::AccessDenied(_) => 403,
            WalletError::InvalidAmount(_)
            | WalletError::Validation(_)
            | WalletError::ReasonRequired => 400,
            WalletError::WalletNotFound(_)
            | WalletError::TransactionNotFound(_)
            | WalletError::RemitterNotFound(_)
            | WalletError::BeneficiaryNotFound(_) => 404,
            WalletError::InvalidStateTransition(_)
            | WalletError::DuplicateSubmission(_)
            | WalletError::RemitterExists(_) => 409,
            WalletError::InsufficientFunds { .. }
            | WalletError::LimitExceeded(_)
            | WalletError::KycNotVerified
            | WalletError::KycAttemptsExhausted
            | WalletError::BeneficiaryNotEligible(_)
            | WalletError::ProviderRejected(_) => 422,
            WalletError::ProviderTimeout(_) => 504,
            WalletError::ReversalFailed(_)
            | WalletError::Database(_)
            | WalletError::Internal(_) => 500,
        }
    }

    /// Validation errors are raised before any ledger mutation
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WalletError::InsufficientFunds { .. }
                | WalletError::LimitExceeded(_)
                | WalletError::KycNotVerified
                | WalletError::BeneficiaryNotEligible(_)
                | WalletError::InvalidAmount(_)
                | WalletError::Validation(_)
        )
    }
}

impl From<MoneyError> for WalletError {
    fn from(e: MoneyError) -> Self {
        WalletError::InvalidAmount(e.to_string())
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(e: sqlx::Error) -> Self {
        WalletError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::Internal(format!("serialization: {}", e))
    }
}

impl From<validator::ValidationErrors> for WalletError {
    fn from(e: validator::ValidationErrors) -> Self {
        WalletError::Validation(e.to_string())
    }
}

pub type Result<T, E = WalletError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            WalletError::InsufficientFunds {
                available: Money::ZERO,
                requested: Money::from_rupees(1)
            }
            .code(),
            "INSUFFICIENT_FUNDS"
        );
        assert_eq!(WalletError::KycAttemptsExhausted.code(), "KYC_ATTEMPTS_EXHAUSTED");
        assert_eq!(
            WalletError::DuplicateSubmission("k".into()).code(),
            "DUPLICATE_SUBMISSION"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(WalletError::Unauthorized.http_status(), 401);
        assert_eq!(
            WalletError::InvalidStateTransition("x".into()).http_status(),
            409
        );
        assert_eq!(WalletError::LimitExceeded("x".into()).http_status(), 422);
        assert_eq!(WalletError::WalletNotFound(1).http_status(), 404);
        assert_eq!(WalletError::Internal("x".into()).http_status(), 500);
    }

    #[test]
    fn test_validation_classification() {
        assert!(WalletError::KycNotVerified.is_validation());
        assert!(!WalletError::ProviderTimeout("t".into()).is_validation());
    }

    #[test]
    fn test_money_error_maps_to_invalid_amount() {
        let err: WalletError = MoneyError::Zero.into();
        assert_eq!(err.code(), "INVALID_AMOUNT");
    }
}
