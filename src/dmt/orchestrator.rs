//! DMT Orchestrator
//!
//! Remitter onboarding, KYC gating, beneficiary management and transfer
//! execution on top of the transaction service and the provider gateway.
//!
//! # Transfer flow
//! 1. validate KYC, beneficiary eligibility, monthly limits and balance
//! 2. charge via the commission engine with the rail as operator key
//! 3. create the record and debit `total_amount` (funds held)
//! 4. reserve the amount against both monthly limits
//! 5. submit to the provider with the record id as idempotency key
//! 6. success completes, explicit failure fails, reverses and releases the
//!    limits, anything else leaves the record `pending`
//!
//! Every write for one remitter, including the provider call of a transfer,
//! runs under that remitter's mutex.

use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::store::DmtStore;
use super::types::{
    AddBeneficiaryRequest, Beneficiary, ChargesPreview, DmtConfig, KycStatus, OnboardingStatus,
    RegisterRemitterRequest, Registration, Remitter, RemitterLookup, Resolution, StatusCheck,
    TransferMode, TransferRequest, idempotency_key, validate_mobile,
};
use crate::approval::BulkOutcome;
use crate::core_types::{BeneficiaryId, RemitterId, TransactionId, UserId};
use crate::error::{Result, WalletError};
use crate::events::{Event, EventPublisher};
use crate::money::Money;
use crate::provider::{
    BeneficiaryCheck, ProviderGateway, ProviderOutcome, TransferLookup, TransferPayload,
};
use crate::transaction::types::NewTransaction;
use crate::transaction::{
    TransactionMetadata, TransactionRecord, TransactionService, TransactionStatus,
    TransactionType,
};

pub struct DmtOrchestrator {
    store: Arc<dyn DmtStore>,
    transactions: Arc<TransactionService>,
    provider: Arc<dyn ProviderGateway>,
    events: Arc<dyn EventPublisher>,
    config: DmtConfig,
    locks: DashMap<RemitterId, Arc<Mutex<()>>>,
}

impl DmtOrchestrator {
    pub fn new(
        store: Arc<dyn DmtStore>,
        transactions: Arc<TransactionService>,
        provider: Arc<dyn ProviderGateway>,
        events: Arc<dyn EventPublisher>,
        config: DmtConfig,
    ) -> Self {
        Self {
            store,
            transactions,
            provider,
            events,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn transactions(&self) -> &Arc<TransactionService> {
        &self.transactions
    }

    pub fn config(&self) -> &DmtConfig {
        &self.config
    }

    fn remitter_lock(&self, id: RemitterId) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_default().value().clone()
    }

    // ========================================================================
    // Onboarding
    // ========================================================================

    /// Whether a mobile is registered. Remitters of other users stay hidden.
    pub async fn lookup_remitter(&self, user_id: UserId, mobile: &str) -> Result<RemitterLookup> {
        let mobile = mobile.trim();
        validate_mobile(mobile).map_err(|e| WalletError::Validation(e.to_string()))?;

        Ok(match self.store.find_remitter_by_mobile(mobile).await? {
            Some(remitter) if remitter.user_id == user_id => RemitterLookup {
                registered: remitter.is_registered(),
                remitter: Some(remitter),
            },
            Some(_) => RemitterLookup {
                registered: true,
                remitter: None,
            },
            None => RemitterLookup {
                registered: false,
                remitter: None,
            },
        })
    }

    /// Store the profile and issue an OTP to the mobile
    pub async fn register_remitter(
        &self,
        user_id: UserId,
        req: RegisterRemitterRequest,
    ) -> Result<Registration> {
        req.validate()?;
        let clock = self.transactions.clock();
        let now = clock.now();

        let remitter = match self.store.find_remitter_by_mobile(&req.mobile).await? {
            Some(existing) if existing.is_registered() || existing.user_id != user_id => {
                return Err(WalletError::RemitterExists(req.mobile));
            }
            Some(mut existing) => {
                // Unconfirmed profile: take the latest details and send a new OTP
                existing.first_name = req.first_name;
                existing.last_name = req.last_name;
                existing.pincode = req.pincode;
                existing.updated_at = now;
                self.store.save_remitter(&existing).await?;
                existing
            }
            None => {
                self.transactions.ledger().wallet(user_id).await?;
                let remitter = Remitter {
                    id: RemitterId::new(),
                    user_id,
                    mobile: req.mobile,
                    first_name: req.first_name,
                    last_name: req.last_name,
                    pincode: req.pincode,
                    onboarding: OnboardingStatus::OtpPending,
                    kyc_status: KycStatus::Unverified,
                    kyc_attempts: 0,
                    last_kyc_attempt_date: None,
                    monthly_limit: self.config.remitter_monthly_limit,
                    monthly_used: Money::ZERO,
                    limit_period: clock.current_period(),
                    created_at: now,
                    updated_at: now,
                };
                self.store.insert_remitter(remitter.clone()).await?;
                info!(remitter_id = %remitter.id, user_id, "Remitter profile created");
                remitter
            }
        };

        self.issue_otp(&remitter).await?;
        Ok(Registration {
            remitter,
            requires_otp: true,
        })
    }

    pub async fn resend_otp(&self, user_id: UserId, remitter_id: RemitterId) -> Result<Registration> {
        let remitter = self.owned_remitter(user_id, remitter_id).await?;
        if remitter.is_registered() {
            return Ok(Registration {
                remitter,
                requires_otp: false,
            });
        }
        self.issue_otp(&remitter).await?;
        Ok(Registration {
            remitter,
            requires_otp: true,
        })
    }

    async fn issue_otp(&self, remitter: &Remitter) -> Result<()> {
        match self.provider.send_otp(&remitter.mobile).await? {
            ProviderOutcome::Failed { reason } => {
                warn!(remitter_id = %remitter.id, reason = %reason, "OTP send rejected");
                Err(WalletError::ProviderRejected(reason))
            }
            ProviderOutcome::Pending { .. } => {
                warn!(remitter_id = %remitter.id, "OTP send outcome unknown, resend is available");
                Ok(())
            }
            ProviderOutcome::Success { .. } => {
                debug!(remitter_id = %remitter.id, "OTP sent");
                Ok(())
            }
        }
    }

    /// Confirm the mobile. The remitter becomes registered with KYC unverified.
    pub async fn verify_otp(
        &self,
        user_id: UserId,
        remitter_id: RemitterId,
        otp: &str,
    ) -> Result<Remitter> {
        let otp = otp.trim();
        if otp.is_empty() {
            return Err(WalletError::Validation("otp is required".into()));
        }
        let lock = self.remitter_lock(remitter_id);
        let _guard = lock.lock().await;

        let mut remitter = self.owned_remitter(user_id, remitter_id).await?;
        if remitter.is_registered() {
            return Ok(remitter);
        }
        match self.provider.verify_otp(&remitter.mobile, otp).await? {
            ProviderOutcome::Success { .. } => {
                let clock = self.transactions.clock();
                remitter.onboarding = OnboardingStatus::Registered;
                remitter.kyc_status = KycStatus::Unverified;
                remitter.roll_period(&clock.current_period());
                remitter.updated_at = clock.now();
                self.store.save_remitter(&remitter).await?;
                info!(remitter_id = %remitter.id, user_id, "Remitter registered");
                self.publish_remitter(&remitter);
                Ok(remitter)
            }
            ProviderOutcome::Failed { reason } => Err(WalletError::ProviderRejected(reason)),
            ProviderOutcome::Pending { .. } => Err(WalletError::ProviderTimeout(
                "otp verification outcome unknown".into(),
            )),
        }
    }

    pub async fn get_remitter(&self, user_id: UserId, remitter_id: RemitterId) -> Result<Remitter> {
        self.owned_remitter(user_id, remitter_id).await
    }

    // ========================================================================
    // KYC
    // ========================================================================

    /// One KYC attempt. Explicit failures count against today's cap;
    /// ambiguous answers leave the status `pending` and are not counted.
    pub async fn perform_kyc(
        &self,
        user_id: UserId,
        remitter_id: RemitterId,
        payload: &serde_json::Value,
    ) -> Result<Remitter> {
        let lock = self.remitter_lock(remitter_id);
        let _guard = lock.lock().await;

        let mut remitter = self.owned_remitter(user_id, remitter_id).await?;
        if !remitter.is_registered() {
            return Err(WalletError::Validation("mobile number is not verified".into()));
        }
        if remitter.kyc_status == KycStatus::Verified {
            return Ok(remitter);
        }

        let clock = self.transactions.clock();
        let today = clock.today();
        let attempts = remitter.attempts_on(today);
        if attempts >= self.config.max_kyc_attempts_per_day {
            warn!(remitter_id = %remitter.id, attempts, "KYC attempts exhausted for today");
            return Err(WalletError::KycAttemptsExhausted);
        }

        let outcome = self.provider.verify_kyc(&remitter.mobile, payload).await?;
        remitter.updated_at = clock.now();
        let result = match outcome {
            ProviderOutcome::Success { .. } => {
                remitter.kyc_status = KycStatus::Verified;
                info!(remitter_id = %remitter.id, "KYC verified");
                Ok(())
            }
            ProviderOutcome::Failed { reason } => {
                remitter.kyc_status = KycStatus::Unverified;
                remitter.kyc_attempts = attempts + 1;
                remitter.last_kyc_attempt_date = Some(today);
                warn!(
                    remitter_id = %remitter.id,
                    attempts = remitter.kyc_attempts,
                    reason = %reason,
                    "KYC rejected"
                );
                Err(WalletError::ProviderRejected(reason))
            }
            ProviderOutcome::Pending { .. } => {
                remitter.kyc_status = KycStatus::Pending;
                warn!(remitter_id = %remitter.id, "KYC outcome unknown");
                Err(WalletError::ProviderTimeout(
                    "kyc verification outcome unknown".into(),
                ))
            }
        };
        self.store.save_remitter(&remitter).await?;
        self.publish_remitter(&remitter);
        result.map(|_| remitter)
    }

    // ========================================================================
    // Beneficiaries
    // ========================================================================

    /// Add and verify a beneficiary. Verification failure still stores it,
    /// unverified and therefore not eligible.
    pub async fn add_beneficiary(
        &self,
        user_id: UserId,
        remitter_id: RemitterId,
        mut req: AddBeneficiaryRequest,
    ) -> Result<Beneficiary> {
        req.account_number = req.account_number.trim().to_string();
        req.ifsc = req.ifsc.trim().to_ascii_uppercase();
        req.name = req.name.trim().to_string();
        req.validate()?;

        let lock = self.remitter_lock(remitter_id);
        let _guard = lock.lock().await;

        let remitter = self.owned_remitter(user_id, remitter_id).await?;
        if !remitter.is_registered() {
            return Err(WalletError::Validation("mobile number is not verified".into()));
        }
        let existing = self.store.list_beneficiaries(remitter_id).await?;
        if existing
            .iter()
            .any(|b| b.is_active && b.account_number == req.account_number && b.ifsc == req.ifsc)
        {
            return Err(WalletError::Validation("beneficiary already added".into()));
        }

        let clock = self.transactions.clock();
        let now = clock.now();
        let mut beneficiary = Beneficiary {
            id: BeneficiaryId::new(),
            remitter_id,
            name: req.name,
            account_number: req.account_number,
            ifsc: req.ifsc,
            bank_name: req.bank_name,
            is_verified: false,
            is_active: true,
            monthly_limit: self.config.beneficiary_monthly_limit,
            remaining_limit: self.config.beneficiary_monthly_limit,
            limit_period: clock.current_period(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_beneficiary(beneficiary.clone()).await?;
        info!(
            beneficiary_id = %beneficiary.id,
            remitter_id = %remitter_id,
            account = %beneficiary.masked_account(),
            "Beneficiary added"
        );

        match self.check_beneficiary(&remitter, &mut beneficiary).await? {
            ProviderOutcome::Success { .. } => {}
            ProviderOutcome::Failed { reason } => {
                warn!(beneficiary_id = %beneficiary.id, reason = %reason, "Beneficiary verification rejected");
            }
            ProviderOutcome::Pending { .. } => {
                warn!(beneficiary_id = %beneficiary.id, "Beneficiary verification outcome unknown");
            }
        }
        Ok(beneficiary)
    }

    /// Retry verification of an unverified beneficiary
    pub async fn verify_beneficiary(
        &self,
        user_id: UserId,
        beneficiary_id: BeneficiaryId,
    ) -> Result<Beneficiary> {
        let remitter_id = self.owned_beneficiary(user_id, beneficiary_id).await?.1.remitter_id;
        let lock = self.remitter_lock(remitter_id);
        let _guard = lock.lock().await;

        let (remitter, mut beneficiary) = self.owned_beneficiary(user_id, beneficiary_id).await?;
        if !beneficiary.is_active {
            return Err(WalletError::BeneficiaryNotFound(beneficiary_id.to_string()));
        }
        if beneficiary.is_verified {
            return Ok(beneficiary);
        }
        match self.check_beneficiary(&remitter, &mut beneficiary).await? {
            ProviderOutcome::Success { .. } => Ok(beneficiary),
            ProviderOutcome::Failed { reason } => Err(WalletError::ProviderRejected(reason)),
            ProviderOutcome::Pending { .. } => Err(WalletError::ProviderTimeout(
                "beneficiary verification outcome unknown".into(),
            )),
        }
    }

    /// Provider account check; only explicit success marks it verified
    async fn check_beneficiary(
        &self,
        remitter: &Remitter,
        beneficiary: &mut Beneficiary,
    ) -> Result<ProviderOutcome> {
        let check = BeneficiaryCheck {
            remitter_mobile: remitter.mobile.clone(),
            name: beneficiary.name.clone(),
            account_number: beneficiary.account_number.clone(),
            ifsc: beneficiary.ifsc.clone(),
        };
        let outcome = self.provider.verify_beneficiary(&check).await?;
        if outcome.is_success() {
            beneficiary.is_verified = true;
            beneficiary.updated_at = self.transactions.clock().now();
            self.store.save_beneficiary(beneficiary).await?;
            info!(beneficiary_id = %beneficiary.id, "Beneficiary verified");
            self.publish_beneficiary(beneficiary);
        }
        Ok(outcome)
    }

    /// Soft delete
    pub async fn remove_beneficiary(
        &self,
        user_id: UserId,
        beneficiary_id: BeneficiaryId,
    ) -> Result<Beneficiary> {
        let remitter_id = self.owned_beneficiary(user_id, beneficiary_id).await?.1.remitter_id;
        let lock = self.remitter_lock(remitter_id);
        let _guard = lock.lock().await;

        let (_, mut beneficiary) = self.owned_beneficiary(user_id, beneficiary_id).await?;
        if !beneficiary.is_active {
            return Ok(beneficiary);
        }
        beneficiary.is_active = false;
        beneficiary.updated_at = self.transactions.clock().now();
        self.store.save_beneficiary(&beneficiary).await?;
        info!(beneficiary_id = %beneficiary_id, "Beneficiary removed");
        self.publish_beneficiary(&beneficiary);
        Ok(beneficiary)
    }

    /// Active beneficiaries of a remitter
    pub async fn list_beneficiaries(
        &self,
        user_id: UserId,
        remitter_id: RemitterId,
    ) -> Result<Vec<Beneficiary>> {
        self.owned_remitter(user_id, remitter_id).await?;
        let period = self.transactions.clock().current_period();
        let mut list: Vec<Beneficiary> = self
            .store
            .list_beneficiaries(remitter_id)
            .await?
            .into_iter()
            .filter(|b| b.is_active)
            .collect();
        // Show the limit as it applies now, without writing
        for beneficiary in &mut list {
            beneficiary.roll_period(&period);
        }
        Ok(list)
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    pub async fn calculate_charges(
        &self,
        user_id: UserId,
        amount: Money,
        mode: TransferMode,
    ) -> Result<ChargesPreview> {
        self.check_amount(amount)?;
        let charges = self.charges_for(user_id, amount, mode)?;
        Ok(ChargesPreview {
            amount,
            charges,
            total_amount: with_charges(amount, charges)?,
            mode,
        })
    }

    fn charges_for(&self, user_id: UserId, amount: Money, mode: TransferMode) -> Result<Money> {
        self.transactions.commission().compute(
            mode.as_str(),
            TransactionType::DmtTransfer,
            user_id,
            amount,
        )
    }

    fn check_amount(&self, amount: Money) -> Result<()> {
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount(
                "amount must be greater than zero".into(),
            ));
        }
        if amount < self.config.min_transfer_amount {
            return Err(WalletError::InvalidAmount(format!(
                "minimum transfer amount is {}",
                self.config.min_transfer_amount
            )));
        }
        if amount > self.config.max_transfer_amount {
            return Err(WalletError::LimitExceeded(format!(
                "maximum per transfer is {}",
                self.config.max_transfer_amount
            )));
        }
        Ok(())
    }

    /// Execute a remittance. Validation errors leave no record and no debit.
    pub async fn transfer(&self, user_id: UserId, req: TransferRequest) -> Result<TransactionRecord> {
        if let Some(client_ref) = &req.client_ref
            && let Some(existing) = self
                .transactions
                .get_by_client_ref(user_id, client_ref)
                .await?
        {
            return replay_transfer(existing, user_id, &req);
        }
        self.check_amount(req.amount)?;

        let lock = self.remitter_lock(req.remitter_id);
        let _guard = lock.lock().await;

        let mut remitter = self.owned_remitter(user_id, req.remitter_id).await?;
        if !remitter.is_registered() || remitter.kyc_status != KycStatus::Verified {
            return Err(WalletError::KycNotVerified);
        }
        let mut beneficiary = self.beneficiary_of(&remitter, req.beneficiary_id).await?;
        if !beneficiary.is_eligible() {
            let why = if beneficiary.is_active {
                "beneficiary is not verified"
            } else {
                "beneficiary is inactive"
            };
            return Err(WalletError::BeneficiaryNotEligible(why.into()));
        }

        let period = self.transactions.clock().current_period();
        if remitter.roll_period(&period) {
            self.store.save_remitter(&remitter).await?;
        }
        if beneficiary.roll_period(&period) {
            self.store.save_beneficiary(&beneficiary).await?;
        }
        let allowed = beneficiary.remaining_limit.min(remitter.remaining_limit());
        if req.amount > allowed {
            warn!(
                remitter_id = %remitter.id,
                beneficiary_id = %beneficiary.id,
                requested = %req.amount,
                remaining = %allowed,
                "Transfer exceeds monthly limit"
            );
            return Err(WalletError::LimitExceeded(format!(
                "requested {}, remaining this month {}",
                req.amount, allowed
            )));
        }

        let charges = self.charges_for(user_id, req.amount, req.mode)?;
        let total = with_charges(req.amount, charges)?;
        let balance = self.transactions.ledger().get_balance(user_id).await?;
        if balance < total {
            return Err(WalletError::InsufficientFunds {
                available: balance,
                requested: total,
            });
        }

        let (record, created) = self
            .transactions
            .create(NewTransaction {
                user_id,
                transaction_type: TransactionType::DmtTransfer,
                amount: req.amount,
                charges,
                operator: req.mode.as_str().to_string(),
                metadata: TransactionMetadata::DmtTransfer {
                    remitter_id: remitter.id,
                    beneficiary_id: beneficiary.id,
                    mode: req.mode,
                },
                client_ref: req.client_ref.clone(),
            })
            .await?;
        if !created {
            return Ok(record);
        }

        let record = match self.transactions.hold_funds(record.id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(transaction_id = %record.id, error = %e, "Could not hold funds for transfer");
                if let Err(fail_err) = self
                    .transactions
                    .fail(record.id, TransactionStatus::Initiated, "funds could not be held", None)
                    .await
                {
                    error!(transaction_id = %record.id, error = %fail_err, "Failed to close unfunded transfer");
                }
                return Err(e);
            }
        };

        if let Err(e) = self
            .reserve_limits(&mut remitter, &mut beneficiary, record.amount)
            .await
        {
            error!(transaction_id = %record.id, error = %e, "Could not reserve transfer limits");
            if let Err(fail_err) = self
                .transactions
                .fail(record.id, record.status, "limits could not be reserved", None)
                .await
            {
                error!(transaction_id = %record.id, error = %fail_err, "Failed to close unreserved transfer");
            }
            return Err(e);
        }

        let payload = transfer_payload(&remitter, &beneficiary, &record, req.mode);
        self.submit(record, &payload).await
    }

    /// Client-side retry of the submission for a held transfer that never got
    /// a provider reference. Same key, same payload.
    pub async fn resubmit(&self, user_id: UserId, id: TransactionId) -> Result<TransactionRecord> {
        let record = self.transactions.get_for_user(user_id, id).await?;
        let (remitter_id, beneficiary_id, mode) = transfer_parts(&record)?;

        let lock = self.remitter_lock(remitter_id);
        let _guard = lock.lock().await;

        let record = self.transactions.require(id).await?;
        match record.status {
            TransactionStatus::Pending if record.external_reference.is_none() => {}
            TransactionStatus::Initiated if record.funds_held => {}
            TransactionStatus::Pending => return self.poll(record).await,
            _ => return Ok(record),
        }

        let remitter = self
            .store
            .get_remitter(remitter_id)
            .await?
            .ok_or_else(|| WalletError::RemitterNotFound(remitter_id.to_string()))?;
        let beneficiary = self
            .store
            .get_beneficiary(beneficiary_id)
            .await?
            .ok_or_else(|| WalletError::BeneficiaryNotFound(beneficiary_id.to_string()))?;
        info!(transaction_id = %id, "Resubmitting transfer");
        let payload = transfer_payload(&remitter, &beneficiary, &record, mode);
        self.submit(record, &payload).await
    }

    /// Caller holds the remitter lock
    async fn submit(
        &self,
        record: TransactionRecord,
        payload: &TransferPayload,
    ) -> Result<TransactionRecord> {
        let key = idempotency_key(record.id);
        let outcome = match self.provider.submit_transfer(&key, payload).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Funds are held; reconciliation will find out what happened
                error!(transaction_id = %record.id, error = %e, "Provider submission error");
                ProviderOutcome::unknown()
            }
        };
        info!(
            transaction_id = %record.id,
            provider = self.provider.name(),
            outcome = ?outcome,
            "Transfer submitted"
        );
        self.apply_outcome(record, outcome).await
    }

    /// Caller holds the remitter lock
    async fn apply_outcome(
        &self,
        record: TransactionRecord,
        outcome: ProviderOutcome,
    ) -> Result<TransactionRecord> {
        let id = record.id;
        let expected = record.status;
        match outcome {
            ProviderOutcome::Success { provider_ref } => {
                let done = self
                    .transactions
                    .complete(id, expected, Some(provider_ref))
                    .await?;
                self.provider.release_key(&idempotency_key(id));
                Ok(done)
            }
            ProviderOutcome::Failed { reason } => self.fail_transfer(id, expected, &reason).await,
            ProviderOutcome::Pending { provider_ref } => match expected {
                TransactionStatus::Initiated => {
                    self.transactions.mark_pending(id, provider_ref).await
                }
                _ => match provider_ref {
                    Some(reference) if record.external_reference.is_none() => {
                        self.transactions.set_external_reference(id, reference).await
                    }
                    _ => Ok(record),
                },
            },
        }
    }

    /// Count a held transfer against both monthly limits. Caller holds the
    /// lock and has rolled both periods.
    async fn reserve_limits(
        &self,
        remitter: &mut Remitter,
        beneficiary: &mut Beneficiary,
        amount: Money,
    ) -> Result<()> {
        let now = self.transactions.clock().now();
        remitter.monthly_used = remitter
            .monthly_used
            .checked_add(amount)
            .ok_or_else(|| WalletError::LimitExceeded("monthly usage out of range".into()))?;
        remitter.updated_at = now;
        beneficiary.remaining_limit = beneficiary.remaining_limit.saturating_sub(amount);
        beneficiary.updated_at = now;
        self.store.save_remitter(remitter).await?;
        self.store.save_beneficiary(beneficiary).await?;
        debug!(remitter_id = %remitter.id, amount = %amount, "Transfer limits reserved");
        Ok(())
    }

    /// Fail a held transfer and hand its amount back to the limits. Caller
    /// holds the lock.
    async fn fail_transfer(
        &self,
        id: TransactionId,
        expected: TransactionStatus,
        reason: &str,
    ) -> Result<TransactionRecord> {
        let failed = self.transactions.fail(id, expected, reason, None).await?;
        self.provider.release_key(&idempotency_key(id));
        if let Err(e) = self.release_limits(&failed).await {
            error!(transaction_id = %id, error = %e, "Failed to release transfer limits");
        }
        Ok(failed)
    }

    /// Only the period the transfer was reserved in gets the amount back
    async fn release_limits(&self, record: &TransactionRecord) -> Result<()> {
        let (remitter_id, beneficiary_id, _) = transfer_parts(record)?;
        let clock = self.transactions.clock();
        let period = clock.period_of(record.created_at);
        let now = clock.now();

        if let Some(mut remitter) = self.store.get_remitter(remitter_id).await?
            && remitter.limit_period == period
        {
            remitter.monthly_used = remitter.monthly_used.saturating_sub(record.amount);
            remitter.updated_at = now;
            self.store.save_remitter(&remitter).await?;
        }
        if let Some(mut beneficiary) = self.store.get_beneficiary(beneficiary_id).await?
            && beneficiary.limit_period == period
        {
            let cap = beneficiary.monthly_limit;
            beneficiary.remaining_limit = beneficiary
                .remaining_limit
                .checked_add(record.amount)
                .map_or(cap, |m| m.min(cap));
            beneficiary.updated_at = now;
            self.store.save_beneficiary(&beneficiary).await?;
        }
        debug!(transaction_id = %record.id, amount = %record.amount, "Transfer limits released");
        Ok(())
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Poll the provider for a pending transfer. Other states are returned
    /// unchanged.
    pub async fn check_status(&self, id: TransactionId) -> Result<TransactionRecord> {
        let record = self.transactions.require(id).await?;
        let (remitter_id, _, _) = transfer_parts(&record)?;
        if record.status != TransactionStatus::Pending {
            return Ok(record);
        }

        let lock = self.remitter_lock(remitter_id);
        let _guard = lock.lock().await;

        let record = self.transactions.require(id).await?;
        if record.status != TransactionStatus::Pending {
            return Ok(record);
        }
        self.poll(record).await
    }

    /// `check_status` for the owning user
    pub async fn check_status_for_user(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<TransactionRecord> {
        self.transactions.get_for_user(user_id, id).await?;
        self.check_status(id).await
    }

    /// Each id is checked independently
    pub async fn bulk_check_status(&self, ids: &[TransactionId]) -> Vec<StatusCheck> {
        join_all(ids.iter().map(|id| async move {
            BulkOutcome::from_result(*id, self.check_status(*id).await)
        }))
        .await
    }

    /// Caller holds the remitter lock
    async fn poll(&self, record: TransactionRecord) -> Result<TransactionRecord> {
        let lookup = match &record.external_reference {
            Some(reference) => TransferLookup::ProviderRef(reference.clone()),
            None => TransferLookup::IdempotencyKey(idempotency_key(record.id)),
        };
        let outcome = self.provider.query_transfer(&lookup).await?;
        debug!(transaction_id = %record.id, outcome = ?outcome, "Transfer status polled");

        let id = record.id;
        match self.apply_outcome(record, outcome).await {
            Err(WalletError::InvalidStateTransition(_)) => self.transactions.require(id).await,
            other => other,
        }
    }

    /// Operator decision for a pending transfer
    pub async fn manual_resolve(
        &self,
        id: TransactionId,
        actor: &str,
        resolution: Resolution,
    ) -> Result<TransactionRecord> {
        let record = self.transactions.require(id).await?;
        let (remitter_id, _, _) = transfer_parts(&record)?;

        let lock = self.remitter_lock(remitter_id);
        let _guard = lock.lock().await;

        let record = self.transactions.require(id).await?;
        if record.status != TransactionStatus::Pending {
            return Err(WalletError::InvalidStateTransition(format!(
                "transaction {} is {}, only pending transfers can be resolved",
                id, record.status
            )));
        }

        match resolution {
            Resolution::Completed { reference } => {
                let reference = reference.trim();
                if reference.is_empty() {
                    return Err(WalletError::Validation(
                        "a provider reference is required".into(),
                    ));
                }
                info!(transaction_id = %id, actor, reference, "Transfer resolved as completed");
                self.apply_outcome(record, ProviderOutcome::success(reference))
                    .await
            }
            Resolution::Failed { reason } => {
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(WalletError::ReasonRequired);
                }
                info!(transaction_id = %id, actor, reason, "Transfer resolved as failed");
                self.apply_outcome(
                    record,
                    ProviderOutcome::failed(format!("{} (resolved by {})", reason, actor)),
                )
                .await
            }
        }
    }

    /// Fail a transfer still pending after the reconciliation window
    pub async fn expire_pending(&self, id: TransactionId, reason: &str) -> Result<TransactionRecord> {
        let record = self.transactions.require(id).await?;
        let (remitter_id, _, _) = transfer_parts(&record)?;

        let lock = self.remitter_lock(remitter_id);
        let _guard = lock.lock().await;

        let record = self.transactions.require(id).await?;
        if record.status != TransactionStatus::Pending {
            return Ok(record);
        }
        warn!(transaction_id = %id, reason, "Force-failing pending transfer");
        self.fail_transfer(id, TransactionStatus::Pending, reason)
            .await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn owned_remitter(&self, user_id: UserId, remitter_id: RemitterId) -> Result<Remitter> {
        match self.store.get_remitter(remitter_id).await? {
            Some(remitter) if remitter.user_id == user_id => Ok(remitter),
            _ => Err(WalletError::RemitterNotFound(remitter_id.to_string())),
        }
    }

    async fn beneficiary_of(
        &self,
        remitter: &Remitter,
        beneficiary_id: BeneficiaryId,
    ) -> Result<Beneficiary> {
        match self.store.get_beneficiary(beneficiary_id).await? {
            Some(beneficiary) if beneficiary.remitter_id == remitter.id => Ok(beneficiary),
            _ => Err(WalletError::BeneficiaryNotFound(beneficiary_id.to_string())),
        }
    }

    async fn owned_beneficiary(
        &self,
        user_id: UserId,
        beneficiary_id: BeneficiaryId,
    ) -> Result<(Remitter, Beneficiary)> {
        let not_found = || WalletError::BeneficiaryNotFound(beneficiary_id.to_string());
        let beneficiary = self
            .store
            .get_beneficiary(beneficiary_id)
            .await?
            .ok_or_else(not_found)?;
        match self.store.get_remitter(beneficiary.remitter_id).await? {
            Some(remitter) if remitter.user_id == user_id => Ok((remitter, beneficiary)),
            _ => Err(not_found()),
        }
    }

    fn publish_remitter(&self, remitter: &Remitter) {
        self.events.publish(&Event::RemitterUpdated {
            remitter_id: remitter.id,
            user_id: remitter.user_id,
            kyc_status: remitter.kyc_status,
            at: remitter.updated_at,
        });
    }

    fn publish_beneficiary(&self, beneficiary: &Beneficiary) {
        self.events.publish(&Event::BeneficiaryUpdated {
            beneficiary_id: beneficiary.id,
            remitter_id: beneficiary.remitter_id,
            is_verified: beneficiary.is_verified,
            is_active: beneficiary.is_active,
            at: beneficiary.updated_at,
        });
    }
}

fn transfer_parts(record: &TransactionRecord) -> Result<(RemitterId, BeneficiaryId, TransferMode)> {
    match &record.metadata {
        TransactionMetadata::DmtTransfer {
            remitter_id,
            beneficiary_id,
            mode,
        } => Ok((*remitter_id, *beneficiary_id, *mode)),
        _ => Err(WalletError::Validation(format!(
            "transaction {} is not a money transfer",
            record.id
        ))),
    }
}

fn with_charges(amount: Money, charges: Money) -> Result<Money> {
    amount
        .checked_add(charges)
        .ok_or_else(|| WalletError::InvalidAmount("amount plus charges is out of range".into()))
}

fn transfer_payload(
    remitter: &Remitter,
    beneficiary: &Beneficiary,
    record: &TransactionRecord,
    mode: TransferMode,
) -> TransferPayload {
    TransferPayload {
        remitter_mobile: remitter.mobile.clone(),
        beneficiary_name: beneficiary.name.clone(),
        account_number: beneficiary.account_number.clone(),
        ifsc: beneficiary.ifsc.clone(),
        amount: record.amount,
        mode,
    }
}

/// Same client_ref: the original record if the request matches
fn replay_transfer(
    existing: TransactionRecord,
    user_id: UserId,
    req: &TransferRequest,
) -> Result<TransactionRecord> {
    let candidate = NewTransaction {
        user_id,
        transaction_type: TransactionType::DmtTransfer,
        amount: req.amount,
        charges: Money::ZERO,
        operator: req.mode.as_str().to_string(),
        metadata: TransactionMetadata::DmtTransfer {
            remitter_id: req.remitter_id,
            beneficiary_id: req.beneficiary_id,
            mode: req.mode,
        },
        client_ref: req.client_ref.clone(),
    };
    if existing.same_request(&candidate) {
        debug!(transaction_id = %existing.id, "Duplicate transfer client_ref, returning existing");
        Ok(existing)
    } else {
        Err(WalletError::DuplicateSubmission(format!(
            "client_ref {} was used for a different request",
            req.client_ref.as_deref().unwrap_or_default()
        )))
    }
}
