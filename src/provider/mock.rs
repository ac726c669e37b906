//! Scriptable in-process provider
//!
//! Behaves like an idempotent remote: the first definitive outcome for a key
//! is remembered and returned for every later submit or query of that key.
//! Counters expose how many calls and distinct keys were seen.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{BeneficiaryCheck, ProviderGateway, ProviderOutcome, TransferLookup, TransferPayload};
use crate::error::Result;

/// What the next call should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    Succeed,
    Fail(String),
    /// Accepted, still processing (carries a provider reference)
    Processing,
    /// Non-definitive answer without a reference (5xx, garbled body)
    Ambiguous,
    /// Never answers within any reasonable timeout
    Hang,
}

#[derive(Default)]
struct Script {
    default: Option<MockBehavior>,
    queue: VecDeque<MockBehavior>,
}

impl Script {
    fn next(&mut self) -> MockBehavior {
        self.queue
            .pop_front()
            .or_else(|| self.default.clone())
            .unwrap_or(MockBehavior::Succeed)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MockProvider {
    submit: Mutex<Script>,
    query: Mutex<Script>,
    otp: Mutex<Script>,
    kyc: Mutex<Script>,
    beneficiary: Mutex<Script>,
    /// Overrides stored outcomes on query when set
    query_override: Mutex<bool>,
    expected_otp: Mutex<String>,
    /// key -> definitive outcome
    outcomes: Mutex<HashMap<String, ProviderOutcome>>,
    /// provider_ref -> key
    refs: Mutex<HashMap<String, String>>,
    keys: Mutex<HashSet<String>>,
    submit_calls: AtomicUsize,
    query_calls: AtomicUsize,
    otp_sends: AtomicUsize,
    kyc_calls: AtomicUsize,
    beneficiary_calls: AtomicUsize,
    seq: AtomicUsize,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            submit: Mutex::new(Script::default()),
            query: Mutex::new(Script::default()),
            otp: Mutex::new(Script::default()),
            kyc: Mutex::new(Script::default()),
            beneficiary: Mutex::new(Script::default()),
            query_override: Mutex::new(false),
            expected_otp: Mutex::new("123456".to_string()),
            outcomes: Mutex::new(HashMap::new()),
            refs: Mutex::new(HashMap::new()),
            keys: Mutex::new(HashSet::new()),
            submit_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            otp_sends: AtomicUsize::new(0),
            kyc_calls: AtomicUsize::new(0),
            beneficiary_calls: AtomicUsize::new(0),
            seq: AtomicUsize::new(1),
        }
    }

    pub fn set_submit(&self, behavior: MockBehavior) {
        lock(&self.submit).default = Some(behavior);
    }

    /// One-shot behaviour consumed before the default
    pub fn push_submit(&self, behavior: MockBehavior) {
        lock(&self.submit).queue.push_back(behavior);
    }

    /// Force query answers instead of replaying stored outcomes
    pub fn set_query(&self, behavior: MockBehavior) {
        lock(&self.query).default = Some(behavior);
        *lock(&self.query_override) = true;
    }

    pub fn set_otp(&self, behavior: MockBehavior) {
        lock(&self.otp).default = Some(behavior);
    }

    pub fn set_expected_otp(&self, otp: &str) {
        *lock(&self.expected_otp) = otp.to_string();
    }

    pub fn set_kyc(&self, behavior: MockBehavior) {
        lock(&self.kyc).default = Some(behavior);
    }

    pub fn push_kyc(&self, behavior: MockBehavior) {
        lock(&self.kyc).queue.push_back(behavior);
    }

    pub fn set_beneficiary(&self, behavior: MockBehavior) {
        lock(&self.beneficiary).default = Some(behavior);
    }

    /// Settle a key on the provider side, as the real network would later
    pub fn settle(&self, key: &str, outcome: ProviderOutcome) {
        lock(&self.outcomes).insert(key.to_string(), outcome);
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn unique_submit_keys(&self) -> usize {
        lock(&self.keys).len()
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn otp_sends(&self) -> usize {
        self.otp_sends.load(Ordering::SeqCst)
    }

    pub fn kyc_calls(&self) -> usize {
        self.kyc_calls.load(Ordering::SeqCst)
    }

    pub fn beneficiary_calls(&self) -> usize {
        self.beneficiary_calls.load(Ordering::SeqCst)
    }

    fn next_ref(&self, prefix: &str) -> String {
        format!("{}-{:06}", prefix, self.seq.fetch_add(1, Ordering::SeqCst))
    }

    async fn perform(&self, behavior: MockBehavior, prefix: &str) -> ProviderOutcome {
        match behavior {
            MockBehavior::Succeed => ProviderOutcome::success(self.next_ref(prefix)),
            MockBehavior::Fail(reason) => ProviderOutcome::failed(reason),
            MockBehavior::Processing => ProviderOutcome::Pending {
                provider_ref: Some(self.next_ref(prefix)),
            },
            MockBehavior::Ambiguous => ProviderOutcome::unknown(),
            MockBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                ProviderOutcome::unknown()
            }
        }
    }
}

#[async_trait]
impl ProviderGateway for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn submit_transfer(
        &self,
        key: &str,
        _payload: &TransferPayload,
    ) -> Result<ProviderOutcome> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.keys).insert(key.to_string());

        if let Some(known) = lock(&self.outcomes).get(key).cloned() {
            return Ok(known);
        }
        let behavior = lock(&self.submit).next();
        let outcome = self.perform(behavior, "TXN").await;
        if let Some(reference) = outcome.provider_ref() {
            lock(&self.refs).insert(reference.to_string(), key.to_string());
        }
        if !outcome.is_pending() {
            lock(&self.outcomes).insert(key.to_string(), outcome.clone());
        }
        Ok(outcome)
    }

    async fn query_transfer(&self, lookup: &TransferLookup) -> Result<ProviderOutcome> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if *lock(&self.query_override) {
            let behavior = lock(&self.query).next();
            return Ok(self.perform(behavior, "TXN").await);
        }
        let key = match lookup {
            TransferLookup::IdempotencyKey(key) => Some(key.clone()),
            TransferLookup::ProviderRef(reference) => lock(&self.refs).get(reference).cloned(),
        };
        let known = key.and_then(|k| lock(&self.outcomes).get(&k).cloned());
        Ok(match known {
            Some(outcome) => outcome,
            None => match lookup {
                TransferLookup::ProviderRef(reference) => ProviderOutcome::Pending {
                    provider_ref: Some(reference.clone()),
                },
                TransferLookup::IdempotencyKey(_) => ProviderOutcome::unknown(),
            },
        })
    }

    async fn send_otp(&self, _mobile: &str) -> Result<ProviderOutcome> {
        self.otp_sends.fetch_add(1, Ordering::SeqCst);
        let behavior = lock(&self.otp).next();
        Ok(self.perform(behavior, "OTP").await)
    }

    async fn verify_otp(&self, _mobile: &str, otp: &str) -> Result<ProviderOutcome> {
        let expected = lock(&self.expected_otp).clone();
        Ok(if otp == expected {
            ProviderOutcome::success(self.next_ref("OTPV"))
        } else {
            ProviderOutcome::failed("invalid otp")
        })
    }

    async fn verify_kyc(
        &self,
        _mobile: &str,
        _payload: &serde_json::Value,
    ) -> Result<ProviderOutcome> {
        self.kyc_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = lock(&self.kyc).next();
        Ok(self.perform(behavior, "KYC").await)
    }

    async fn verify_beneficiary(&self, _check: &BeneficiaryCheck) -> Result<ProviderOutcome> {
        self.beneficiary_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = lock(&self.beneficiary).next();
        Ok(self.perform(behavior, "BENE").await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmt::TransferMode;
    use crate::money::Money;

    fn payload() -> TransferPayload {
        TransferPayload {
            remitter_mobile: "9876543210".into(),
            beneficiary_name: "Ravi".into(),
            account_number: "00112233445".into(),
            ifsc: "SBIN0000001".into(),
            amount: Money::from_rupees(200),
            mode: TransferMode::Neft,
        }
    }

    #[tokio::test]
    async fn test_repeated_key_replays_outcome() {
        let mock = MockProvider::new();
        let first = mock.submit_transfer("k", &payload()).await.unwrap();
        mock.set_submit(MockBehavior::Fail("late".into()));
        let second = mock.submit_transfer("k", &payload()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(mock.submit_calls(), 2);
        assert_eq!(mock.unique_submit_keys(), 1);
    }

    #[tokio::test]
    async fn test_query_after_settle() {
        let mock = MockProvider::new();
        mock.set_submit(MockBehavior::Processing);
        let outcome = mock.submit_transfer("k", &payload()).await.unwrap();
        let reference = outcome.provider_ref().unwrap().to_string();

        let polled = mock
            .query_transfer(&TransferLookup::ProviderRef(reference.clone()))
            .await
            .unwrap();
        assert!(polled.is_pending());

        mock.settle("k", ProviderOutcome::success(reference.clone()));
        let polled = mock
            .query_transfer(&TransferLookup::ProviderRef(reference))
            .await
            .unwrap();
        assert!(polled.is_success());
    }

    #[tokio::test]
    async fn test_queued_behaviour_precedes_default() {
        let mock = MockProvider::new();
        mock.set_kyc(MockBehavior::Succeed);
        mock.push_kyc(MockBehavior::Fail("blurry".into()));
        let value = serde_json::json!({});
        assert!(mock.verify_kyc("m", &value).await.unwrap().is_explicit_fail());
        assert!(mock.verify_kyc("m", &value).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_otp_check() {
        let mock = MockProvider::new();
        assert!(mock.verify_otp("m", "123456").await.unwrap().is_success());
        assert!(mock.verify_otp("m", "000000").await.unwrap().is_explicit_fail());
    }
}
