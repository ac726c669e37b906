//! Timeout, retry and idempotency policy around a provider
//!
//! - every call is bounded by [`RetryPolicy::timeout`]; a timeout becomes an
//!   ambiguous outcome, never a failure
//! - idempotent calls (transfer submit by key, status query, beneficiary
//!   check) retry ambiguous outcomes with exponential backoff
//! - OTP and KYC calls are never retried here
//! - a key reused with a different payload is `DuplicateSubmission` until the
//!   transfer is released as final

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{BeneficiaryCheck, ProviderGateway, ProviderOutcome, TransferLookup, TransferPayload};
use crate::error::{Result, WalletError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound for a single call
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 2,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

pub struct ResilientProvider {
    inner: Arc<dyn ProviderGateway>,
    policy: RetryPolicy,
    /// idempotency key -> first payload seen, for unsettled transfers
    submitted: DashMap<String, TransferPayload>,
}

impl ResilientProvider {
    pub fn new(inner: Arc<dyn ProviderGateway>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            submitted: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Keys still guarded against payload reuse
    pub fn tracked_keys(&self) -> usize {
        self.submitted.len()
    }

    async fn call_once<Fut>(&self, op: &'static str, fut: Fut) -> Result<ProviderOutcome>
    where
        Fut: Future<Output = Result<ProviderOutcome>> + Send,
    {
        match tokio::time::timeout(self.policy.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    provider = self.inner.name(),
                    op,
                    timeout_ms = self.policy.timeout.as_millis() as u64,
                    "Provider call timed out, outcome unknown"
                );
                Ok(ProviderOutcome::unknown())
            }
        }
    }

    async fn with_retries<F, Fut>(&self, op: &'static str, mut make: F) -> Result<ProviderOutcome>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<ProviderOutcome>> + Send,
    {
        let mut attempt = 0;
        loop {
            let outcome = self.call_once(op, make()).await?;
            // Pending with a provider reference is a real answer
            let ambiguous = matches!(outcome, ProviderOutcome::Pending { provider_ref: None });
            if !ambiguous || attempt >= self.policy.max_retries {
                return Ok(outcome);
            }
            let delay = self.policy.backoff(attempt);
            debug!(
                provider = self.inner.name(),
                op,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Retrying ambiguous provider call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn guard_key(&self, key: &str, payload: &TransferPayload) -> Result<()> {
        match self.submitted.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                if existing.get() != payload {
                    return Err(WalletError::DuplicateSubmission(format!(
                        "idempotency key {} reused with a different payload",
                        key
                    )));
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(payload.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderGateway for ResilientProvider {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn submit_transfer(
        &self,
        key: &str,
        payload: &TransferPayload,
    ) -> Result<ProviderOutcome> {
        self.guard_key(key, payload)?;
        let inner = &self.inner;
        self.with_retries("submit_transfer", move || inner.submit_transfer(key, payload))
            .await
    }

    async fn query_transfer(&self, lookup: &TransferLookup) -> Result<ProviderOutcome> {
        let inner = &self.inner;
        self.with_retries("query_transfer", move || inner.query_transfer(lookup))
            .await
    }

    async fn send_otp(&self, mobile: &str) -> Result<ProviderOutcome> {
        self.call_once("send_otp", self.inner.send_otp(mobile)).await
    }

    async fn verify_otp(&self, mobile: &str, otp: &str) -> Result<ProviderOutcome> {
        self.call_once("verify_otp", self.inner.verify_otp(mobile, otp))
            .await
    }

    async fn verify_kyc(
        &self,
        mobile: &str,
        payload: &serde_json::Value,
    ) -> Result<ProviderOutcome> {
        self.call_once("verify_kyc", self.inner.verify_kyc(mobile, payload))
            .await
    }

    async fn verify_beneficiary(&self, check: &BeneficiaryCheck) -> Result<ProviderOutcome> {
        let inner = &self.inner;
        self.with_retries("verify_beneficiary", move || inner.verify_beneficiary(check))
            .await
    }

    fn release_key(&self, key: &str) {
        if self.submitted.remove(key).is_some() {
            debug!(provider = self.inner.name(), key, "Idempotency key released");
        }
        self.inner.release_key(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmt::TransferMode;
    use crate::money::Money;
    use crate::provider::mock::{MockBehavior, MockProvider};

    fn payload(rupees: u64) -> TransferPayload {
        TransferPayload {
            remitter_mobile: "9876543210".into(),
            beneficiary_name: "Asha".into(),
            account_number: "123456789012".into(),
            ifsc: "HDFC0001234".into(),
            amount: Money::from_rupees(rupees),
            mode: TransferMode::Imps,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            max_retries: 2,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_timeout_is_ambiguous_not_failure() {
        let mock = Arc::new(MockProvider::new());
        mock.set_submit(MockBehavior::Hang);
        let provider = ResilientProvider::new(mock.clone(), fast_policy());

        let outcome = provider.submit_transfer("k1", &payload(100)).await.unwrap();
        assert_eq!(outcome, ProviderOutcome::unknown());
        // First attempt plus two retries, all with the same key
        assert_eq!(mock.submit_calls(), 3);
        assert_eq!(mock.unique_submit_keys(), 1);
    }

    #[tokio::test]
    async fn test_definitive_answers_are_not_retried() {
        let mock = Arc::new(MockProvider::new());
        mock.set_submit(MockBehavior::Fail("account closed".into()));
        let provider = ResilientProvider::new(mock.clone(), fast_policy());

        let outcome = provider.submit_transfer("k1", &payload(100)).await.unwrap();
        assert!(outcome.is_explicit_fail());
        assert_eq!(mock.submit_calls(), 1);
    }

    #[tokio::test]
    async fn test_key_reuse_with_other_payload_rejected() {
        let mock = Arc::new(MockProvider::new());
        let provider = ResilientProvider::new(mock.clone(), fast_policy());

        provider.submit_transfer("k1", &payload(100)).await.unwrap();
        provider.submit_transfer("k1", &payload(100)).await.unwrap();
        let err = provider
            .submit_transfer("k1", &payload(200))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::DuplicateSubmission(_)));
        assert_eq!(mock.unique_submit_keys(), 1);
    }

    #[tokio::test]
    async fn test_released_keys_are_forgotten() {
        let mock = Arc::new(MockProvider::new());
        let provider = ResilientProvider::new(mock.clone(), fast_policy());

        for i in 0..5 {
            provider
                .submit_transfer(&format!("k{i}"), &payload(100))
                .await
                .unwrap();
        }
        assert_eq!(provider.tracked_keys(), 5);
        for i in 0..5 {
            provider.release_key(&format!("k{i}"));
        }
        assert_eq!(provider.tracked_keys(), 0);
        provider.release_key("never-seen");
    }

    #[tokio::test]
    async fn test_otp_is_not_retried() {
        let mock = Arc::new(MockProvider::new());
        mock.set_otp(MockBehavior::Hang);
        let provider = ResilientProvider::new(mock.clone(), fast_policy());

        let outcome = provider.send_otp("9876543210").await.unwrap();
        assert!(outcome.is_pending());
        assert_eq!(mock.otp_sends(), 1);
    }
}
