//! Provider Gateway
//!
//! The only contact with the external remittance network. Every call returns
//! a [`ProviderOutcome`]; `Err` is reserved for local faults such as an
//! idempotency key reused with a different payload.
//!
//! # Explicit Fail Rule
//! Only [`ProviderOutcome::Failed`] is a definitive failure. Timeouts, 5xx
//! responses and unreadable answers are [`ProviderOutcome::Pending`].

pub mod http;
#[cfg(any(test, feature = "mock-api"))]
pub mod mock;
pub mod resilient;

pub use http::HttpProvider;
#[cfg(any(test, feature = "mock-api"))]
pub use mock::{MockProvider, MockBehavior};
pub use resilient::{ResilientProvider, RetryPolicy};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dmt::TransferMode;
use crate::error::Result;
use crate::money::Money;

/// Result of one provider call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderOutcome {
    Success {
        provider_ref: String,
    },
    /// Definitive failure
    Failed {
        reason: String,
    },
    /// No definitive answer yet
    Pending {
        #[serde(default)]
        provider_ref: Option<String>,
    },
}

impl ProviderOutcome {
    pub fn success(provider_ref: impl Into<String>) -> Self {
        ProviderOutcome::Success {
            provider_ref: provider_ref.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        ProviderOutcome::Failed {
            reason: reason.into(),
        }
    }

    /// Ambiguous outcome with no provider-side reference
    pub fn unknown() -> Self {
        ProviderOutcome::Pending { provider_ref: None }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, ProviderOutcome::Success { .. })
    }

    #[inline]
    pub fn is_explicit_fail(&self) -> bool {
        matches!(self, ProviderOutcome::Failed { .. })
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, ProviderOutcome::Pending { .. })
    }

    pub fn provider_ref(&self) -> Option<&str> {
        match self {
            ProviderOutcome::Success { provider_ref } => Some(provider_ref),
            ProviderOutcome::Pending { provider_ref } => provider_ref.as_deref(),
            ProviderOutcome::Failed { .. } => None,
        }
    }
}

/// Remittance instruction. Identical for every retry of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPayload {
    pub remitter_mobile: String,
    pub beneficiary_name: String,
    pub account_number: String,
    pub ifsc: String,
    pub amount: Money,
    pub mode: TransferMode,
}

/// How to find a submitted transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferLookup {
    ProviderRef(String),
    IdempotencyKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeneficiaryCheck {
    pub remitter_mobile: String,
    pub name: String,
    pub account_number: String,
    pub ifsc: String,
}

#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &'static str;

    /// Submit a transfer. Repeating a key must not create a second transfer.
    async fn submit_transfer(&self, key: &str, payload: &TransferPayload)
    -> Result<ProviderOutcome>;

    async fn query_transfer(&self, lookup: &TransferLookup) -> Result<ProviderOutcome>;

    async fn send_otp(&self, mobile: &str) -> Result<ProviderOutcome>;

    async fn verify_otp(&self, mobile: &str, otp: &str) -> Result<ProviderOutcome>;

    /// KYC payload is opaque to the core
    async fn verify_kyc(
        &self,
        mobile: &str,
        payload: &serde_json::Value,
    ) -> Result<ProviderOutcome>;

    async fn verify_beneficiary(&self, check: &BeneficiaryCheck) -> Result<ProviderOutcome>;

    /// The transfer submitted under `key` is final; drop any state kept for it
    fn release_key(&self, _key: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        assert!(ProviderOutcome::success("R1").is_success());
        assert!(ProviderOutcome::failed("no").is_explicit_fail());
        assert!(ProviderOutcome::unknown().is_pending());
        assert_eq!(ProviderOutcome::unknown().provider_ref(), None);
        assert_eq!(ProviderOutcome::success("R1").provider_ref(), Some("R1"));
    }

    #[test]
    fn test_outcome_wire_format() {
        let outcome: ProviderOutcome =
            serde_json::from_str(r#"{"status":"pending","provider_ref":"P-9"}"#).unwrap();
        assert_eq!(
            outcome,
            ProviderOutcome::Pending {
                provider_ref: Some("P-9".into())
            }
        );
        let outcome: ProviderOutcome =
            serde_json::from_str(r#"{"status":"failed","reason":"invalid account"}"#).unwrap();
        assert!(outcome.is_explicit_fail());
    }
}
