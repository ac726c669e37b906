//! Transaction Service
//!
//! Drives records through the lifecycle and applies the ledger effect of
//! each terminal transition exactly once:
//!
//! - entry to `completed` debits `total_amount` (credits `amount` for top-ups)
//!   unless funds were already held
//! - entry to `failed` with funds held reverses the reference; a failed
//!   reversal sets `reversal_pending` for the reconciliation worker

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::policy::{AmountLimits, ApprovalPolicy};
use super::state::{TransactionStatus, TransactionType};
use super::store::TransactionStore;
use super::types::{
    InsertOutcome, NewTransaction, RecordPatch, StatusUpdate, TransactionMetadata,
    TransactionRecord,
};
use crate::clock::Clock;
use crate::commission::CommissionEngine;
use crate::core_types::{TransactionId, UserId};
use crate::error::{Result, WalletError};
use crate::events::{Event, EventPublisher};
use crate::money::Money;
use crate::wallet::WalletLedger;

/// Wallet top-up request
#[derive(Debug, Clone)]
pub struct TopupRequest {
    pub amount: Money,
    pub payment_method: Option<String>,
    pub client_ref: Option<String>,
}

/// Recharge, bill payment or voucher purchase
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub transaction_type: TransactionType,
    pub amount: Money,
    /// Operator, biller or brand key; also the commission key
    pub operator: String,
    pub metadata: TransactionMetadata,
    pub client_ref: Option<String>,
}

pub struct TransactionService {
    store: Arc<dyn TransactionStore>,
    ledger: Arc<WalletLedger>,
    commission: Arc<CommissionEngine>,
    policy: ApprovalPolicy,
    limits: AmountLimits,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
}

impl TransactionService {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        ledger: Arc<WalletLedger>,
        commission: Arc<CommissionEngine>,
        policy: ApprovalPolicy,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            ledger,
            commission,
            policy,
            limits: AmountLimits::default(),
            clock,
            events,
        }
    }

    pub fn with_limits(mut self, limits: AmountLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn ledger(&self) -> &Arc<WalletLedger> {
        &self.ledger
    }

    pub fn commission(&self) -> &Arc<CommissionEngine> {
        &self.commission
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    fn check_amount(&self, transaction_type: TransactionType, amount: Money) -> Result<()> {
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount(
                "amount must be greater than zero".into(),
            ));
        }
        let max = self.limits.max_for(transaction_type);
        if amount > max {
            return Err(WalletError::InvalidAmount(format!(
                "maximum per {} is {}",
                transaction_type, max
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Record a top-up. Reviewed top-ups wait in `awaiting_approval`.
    pub async fn create_topup(
        &self,
        user_id: UserId,
        req: TopupRequest,
    ) -> Result<TransactionRecord> {
        self.check_amount(TransactionType::Topup, req.amount)?;
        // Wallet must exist before anything is recorded
        self.ledger.wallet(user_id).await?;

        let (record, created) = self
            .create(NewTransaction {
                user_id,
                transaction_type: TransactionType::Topup,
                amount: req.amount,
                charges: Money::ZERO,
                operator: "wallet".into(),
                metadata: TransactionMetadata::Topup {
                    payment_method: req.payment_method,
                },
                client_ref: req.client_ref,
            })
            .await?;
        if !created {
            return Ok(record);
        }
        self.route_new(record).await
    }

    /// Recharge, bill payment or voucher purchase
    ///
    /// Charges come from the commission engine. The balance is checked before
    /// the record exists; the debit itself happens on completion.
    pub async fn process(
        &self,
        user_id: UserId,
        req: ProcessRequest,
    ) -> Result<TransactionRecord> {
        match req.transaction_type {
            TransactionType::Topup => {
                return Err(WalletError::Validation(
                    "use the top-up endpoint for wallet top-ups".into(),
                ));
            }
            TransactionType::DmtTransfer => {
                return Err(WalletError::Validation(
                    "remittances are submitted through the DMT endpoints".into(),
                ));
            }
            _ => {}
        }
        self.check_amount(req.transaction_type, req.amount)?;
        if req.operator.trim().is_empty() {
            return Err(WalletError::Validation("operator is required".into()));
        }
        if !req.metadata.matches(req.transaction_type) {
            return Err(WalletError::Validation(format!(
                "metadata does not describe a {}",
                req.transaction_type
            )));
        }

        // Replays skip validation so they observe the original outcome
        if let Some(client_ref) = &req.client_ref
            && let Some(existing) = self.store.get_by_client_ref(user_id, client_ref).await?
        {
            return self.replay(existing, &requested_transaction(user_id, &req));
        }

        let charges =
            self.commission
                .compute(&req.operator, req.transaction_type, user_id, req.amount)?;
        let total = checked_total(req.amount, charges)?;
        let balance = self.ledger.get_balance(user_id).await?;
        if balance < total {
            return Err(WalletError::InsufficientFunds {
                available: balance,
                requested: total,
            });
        }

        let (record, created) = self
            .create(NewTransaction {
                user_id,
                transaction_type: req.transaction_type,
                amount: req.amount,
                charges,
                operator: req.operator,
                metadata: req.metadata,
                client_ref: req.client_ref,
            })
            .await?;
        if !created {
            return Ok(record);
        }
        self.route_new(record).await
    }

    /// Insert a validated record. Returns `(record, created)`; a matching
    /// `client_ref` yields the existing record or `DuplicateSubmission`.
    pub async fn create(&self, req: NewTransaction) -> Result<(TransactionRecord, bool)> {
        if let Some(client_ref) = &req.client_ref
            && let Some(existing) = self.store.get_by_client_ref(req.user_id, client_ref).await?
        {
            return self.replay(existing, &req).map(|r| (r, false));
        }

        checked_total(req.amount, req.charges)?;
        let record = TransactionRecord::new(TransactionId::new(), req.clone(), self.clock.now());
        match self.store.insert(record).await? {
            InsertOutcome::Inserted(record) => {
                info!(
                    transaction_id = %record.id,
                    user_id = record.user_id,
                    transaction_type = %record.transaction_type,
                    amount = %record.amount,
                    charges = %record.charges,
                    "Transaction created"
                );
                Ok((record, true))
            }
            InsertOutcome::Existing(existing) => self.replay(existing, &req).map(|r| (r, false)),
        }
    }

    fn replay(&self, existing: TransactionRecord, req: &NewTransaction) -> Result<TransactionRecord> {
        if existing.same_request(req) {
            debug!(
                transaction_id = %existing.id,
                client_ref = ?existing.client_ref,
                "Duplicate client_ref, returning existing transaction"
            );
            Ok(existing)
        } else {
            Err(WalletError::DuplicateSubmission(format!(
                "client_ref {} was used for a different request",
                existing.client_ref.as_deref().unwrap_or_default()
            )))
        }
    }

    /// Review or instant path for a fresh record
    async fn route_new(&self, record: TransactionRecord) -> Result<TransactionRecord> {
        if self.policy.requires_approval(record.transaction_type) {
            self.transition(
                record.id,
                TransactionStatus::Initiated,
                StatusUpdate::to(TransactionStatus::AwaitingApproval, self.clock.now()),
            )
            .await
        } else {
            self.complete(record.id, TransactionStatus::Initiated, None)
                .await
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// CAS transition plus event publication
    pub async fn transition(
        &self,
        id: TransactionId,
        expected: TransactionStatus,
        update: StatusUpdate,
    ) -> Result<TransactionRecord> {
        let to = update.to;
        let record = match self.store.transition(id, expected, update).await {
            Ok(record) => record,
            Err(e @ WalletError::InvalidStateTransition(_)) => {
                warn!(transaction_id = %id, from = %expected, to = %to, error = %e, "Transition rejected");
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        info!(transaction_id = %id, from = %expected, to = %to, "Transaction status changed");
        self.events.publish(&Event::TransactionStatusChanged {
            transaction_id: id,
            user_id: record.user_id,
            transaction_type: record.transaction_type,
            from: expected,
            to,
            at: record.updated_at,
        });
        Ok(record)
    }

    /// Move to `completed`, applying the ledger effect if not already held.
    ///
    /// A posting the wallet cannot take (too little balance for a debit, a
    /// credit past the wallet maximum) fails the record instead.
    pub async fn complete(
        &self,
        id: TransactionId,
        expected: TransactionStatus,
        external_reference: Option<String>,
    ) -> Result<TransactionRecord> {
        let record = self.require(id).await?;
        if record.status != expected {
            return Err(crate::transaction::store::status_mismatch(
                id,
                expected,
                record.status,
            ));
        }

        let mut moved_now = false;
        if !record.funds_held {
            let reference = record.reference();
            let reason = format!("{} {}", record.transaction_type, record.id);
            let posted = if record.transaction_type.is_credit() {
                self.ledger
                    .credit(record.user_id, record.amount, &reference, &reason)
                    .await
            } else {
                self.ledger
                    .debit(record.user_id, record.total_amount, &reference, &reason)
                    .await
            };
            match posted {
                Ok(_) => moved_now = true,
                Err(e @ (WalletError::InsufficientFunds { .. } | WalletError::InvalidAmount(_))) => {
                    warn!(transaction_id = %id, error = %e, "Ledger refused posting, failing transaction");
                    let reason = match e {
                        WalletError::InsufficientFunds { .. } => "Insufficient wallet balance",
                        _ => "Amount cannot be applied to the wallet",
                    };
                    return self
                        .transition(
                            id,
                            expected,
                            StatusUpdate::to(TransactionStatus::Failed, self.clock.now())
                                .failure_reason(reason),
                        )
                        .await;
                }
                Err(e) => return Err(e),
            }
        }

        let update = StatusUpdate::to(TransactionStatus::Completed, self.clock.now())
            .external_reference(external_reference)
            .funds_held(true);
        match self.transition(id, expected, update).await {
            Ok(record) => Ok(record),
            Err(e) => {
                if moved_now {
                    // Lost the race after moving money: undo our posting
                    error!(transaction_id = %id, error = %e, "Completion lost after ledger posting, reversing");
                    if let Err(rev) = self.ledger.reverse(&record.reference(), "completion lost").await {
                        error!(transaction_id = %id, error = %rev, "Compensating reversal failed");
                        self.flag_reversal_pending(id).await;
                    }
                }
                Err(e)
            }
        }
    }

    /// Move to `failed`; held funds are returned to the wallet
    pub async fn fail(
        &self,
        id: TransactionId,
        expected: TransactionStatus,
        reason: &str,
        external_reference: Option<String>,
    ) -> Result<TransactionRecord> {
        let record = self
            .transition(
                id,
                expected,
                StatusUpdate::to(TransactionStatus::Failed, self.clock.now())
                    .failure_reason(reason)
                    .external_reference(external_reference),
            )
            .await?;
        if !record.funds_held {
            return Ok(record);
        }

        match self.ledger.reverse(&record.reference(), reason).await {
            Ok(outcome) => {
                debug!(transaction_id = %id, reversed = outcome.is_reversed(), "Held funds released");
                Ok(record)
            }
            Err(e) => {
                error!(
                    transaction_id = %id,
                    error = %e,
                    "Reversal failed, flagging for retry"
                );
                self.store
                    .patch(
                        id,
                        RecordPatch {
                            reversal_pending: Some(true),
                            ..Default::default()
                        },
                        self.clock.now(),
                    )
                    .await
            }
        }
    }

    /// Submitted, outcome unknown
    pub async fn mark_pending(
        &self,
        id: TransactionId,
        external_reference: Option<String>,
    ) -> Result<TransactionRecord> {
        self.transition(
            id,
            TransactionStatus::Initiated,
            StatusUpdate::to(TransactionStatus::Pending, self.clock.now())
                .external_reference(external_reference),
        )
        .await
    }

    /// Debit `total_amount` before an external call and mark funds held
    pub async fn hold_funds(&self, id: TransactionId) -> Result<TransactionRecord> {
        let record = self.require(id).await?;
        if record.funds_held {
            return Ok(record);
        }
        if record.transaction_type.is_credit() {
            return Err(WalletError::Internal(
                "cannot hold funds for a credit transaction".into(),
            ));
        }
        self.ledger
            .debit(
                record.user_id,
                record.total_amount,
                &record.reference(),
                &format!("hold {} {}", record.transaction_type, record.id),
            )
            .await?;
        self.store
            .patch(
                id,
                RecordPatch {
                    funds_held: Some(true),
                    ..Default::default()
                },
                self.clock.now(),
            )
            .await
    }

    /// Attach a provider reference without changing status
    pub async fn set_external_reference(
        &self,
        id: TransactionId,
        reference: String,
    ) -> Result<TransactionRecord> {
        self.store
            .patch(
                id,
                RecordPatch {
                    external_reference: Some(reference),
                    ..Default::default()
                },
                self.clock.now(),
            )
            .await
    }

    async fn flag_reversal_pending(&self, id: TransactionId) {
        let patch = RecordPatch {
            reversal_pending: Some(true),
            ..Default::default()
        };
        if let Err(e) = self.store.patch(id, patch, self.clock.now()).await {
            error!(transaction_id = %id, error = %e, "Failed to flag reversal_pending");
        }
    }

    /// Retry reversals that failed earlier. Returns how many succeeded.
    pub async fn retry_reversals(&self, limit: usize) -> Result<usize> {
        let flagged = self.store.list_reversal_pending(limit).await?;
        let mut done = 0;
        for record in flagged {
            let reason = record
                .failure_reason
                .clone()
                .unwrap_or_else(|| "reversal retry".to_string());
            match self.ledger.reverse(&record.reference(), &reason).await {
                Ok(_) => {
                    self.store
                        .patch(
                            record.id,
                            RecordPatch {
                                reversal_pending: Some(false),
                                ..Default::default()
                            },
                            self.clock.now(),
                        )
                        .await?;
                    info!(transaction_id = %record.id, "Pending reversal completed");
                    done += 1;
                }
                Err(e) => {
                    error!(transaction_id = %record.id, error = %e, "Reversal retry failed");
                }
            }
        }
        Ok(done)
    }

    /// Execute `approved` records whose execution was interrupted, e.g. by a
    /// database error after the approval committed. Returns how many reached
    /// a terminal state.
    pub async fn resume_approved(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize> {
        let stuck = self
            .store
            .list_by_status(TransactionStatus::Approved, Some(updated_before), limit)
            .await?;
        let mut done = 0;
        for record in stuck {
            match self.complete(record.id, TransactionStatus::Approved, None).await {
                Ok(executed) => {
                    info!(transaction_id = %record.id, status = %executed.status, "Approved transaction executed");
                    done += 1;
                }
                // Someone else executed it meanwhile
                Err(WalletError::InvalidStateTransition(_)) => {}
                Err(e) => {
                    error!(transaction_id = %record.id, error = %e, "Approved transaction still not executable");
                }
            }
        }
        Ok(done)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get(&self, id: TransactionId) -> Result<Option<TransactionRecord>> {
        self.store.get(id).await
    }

    pub async fn require(&self, id: TransactionId) -> Result<TransactionRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| WalletError::TransactionNotFound(id.to_string()))
    }

    pub async fn get_by_client_ref(
        &self,
        user_id: UserId,
        client_ref: &str,
    ) -> Result<Option<TransactionRecord>> {
        self.store.get_by_client_ref(user_id, client_ref).await
    }

    /// Another user's record is reported as not found
    pub async fn get_for_user(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<TransactionRecord> {
        match self.store.get(id).await? {
            Some(record) if record.user_id == user_id => Ok(record),
            _ => Err(WalletError::TransactionNotFound(id.to_string())),
        }
    }

    pub async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>> {
        self.store.list_for_user(user_id, limit).await
    }

    pub async fn list_by_status(
        &self,
        status: TransactionStatus,
        updated_before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>> {
        self.store.list_by_status(status, updated_before, limit).await
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

fn checked_total(amount: Money, charges: Money) -> Result<Money> {
    amount.checked_add(charges).ok_or_else(|| {
        WalletError::InvalidAmount(format!("amount plus charges exceeds {}", Money::MAX))
    })
}

/// Shape used to compare a replayed process request with the stored record
fn requested_transaction(user_id: UserId, req: &ProcessRequest) -> NewTransaction {
    NewTransaction {
        user_id,
        transaction_type: req.transaction_type,
        amount: req.amount,
        charges: Money::ZERO,
        operator: req.operator.clone(),
        metadata: req.metadata.clone(),
        client_ref: req.client_ref.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::events::TracingPublisher;
    use crate::transaction::store::InMemoryTransactionStore;
    use crate::wallet::store::testing::FlakyWalletStore;
    use crate::wallet::{InMemoryWalletStore, WalletStore};

    fn service_with(
        wallet_store: Arc<dyn WalletStore>,
        policy: ApprovalPolicy,
    ) -> TransactionService {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::default());
        let events: Arc<dyn EventPublisher> = Arc::new(TracingPublisher);
        let ledger = Arc::new(WalletLedger::new(wallet_store, clock.clone(), events.clone()));
        TransactionService::new(
            Arc::new(InMemoryTransactionStore::new()),
            ledger,
            Arc::new(CommissionEngine::new()),
            policy,
            clock,
            events,
        )
    }

    async fn funded(service: &TransactionService, user_id: UserId, rupees: u64) {
        service.ledger.open_wallet(user_id).await.unwrap();
        service
            .ledger
            .credit(user_id, Money::from_rupees(rupees), "seed", "seed")
            .await
            .unwrap();
    }

    fn voucher(amount: u64) -> ProcessRequest {
        ProcessRequest {
            transaction_type: TransactionType::VoucherPurchase,
            amount: Money::from_rupees(amount),
            operator: "amazon".into(),
            metadata: TransactionMetadata::Voucher {
                sku: "AMZ".into(),
                quantity: 1,
            },
            client_ref: None,
        }
    }

    #[tokio::test]
    async fn test_voucher_completes_instantly() {
        let service = service_with(Arc::new(InMemoryWalletStore::new()), ApprovalPolicy::default());
        funded(&service, 1, 1000).await;

        let record = service.process(1, voucher(250)).await.unwrap();
        assert_eq!(record.status, TransactionStatus::Completed);
        assert!(record.funds_held);
        assert_eq!(
            service.ledger.get_balance(1).await.unwrap(),
            Money::from_rupees(750)
        );
    }

    #[tokio::test]
    async fn test_insufficient_funds_creates_no_record() {
        let service = service_with(Arc::new(InMemoryWalletStore::new()), ApprovalPolicy::default());
        funded(&service, 1, 100).await;

        let err = service.process(1, voucher(250)).await.unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
        assert!(service.list_for_user(1, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_topup_waits_for_approval() {
        let service = service_with(Arc::new(InMemoryWalletStore::new()), ApprovalPolicy::default());
        service.ledger.open_wallet(1).await.unwrap();

        let record = service
            .create_topup(
                1,
                TopupRequest {
                    amount: Money::from_rupees(500),
                    payment_method: Some("upi".into()),
                    client_ref: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(record.status, TransactionStatus::AwaitingApproval);
        assert_eq!(service.ledger.get_balance(1).await.unwrap(), Money::ZERO);
    }

    #[tokio::test]
    async fn test_topup_for_missing_wallet() {
        let service = service_with(Arc::new(InMemoryWalletStore::new()), ApprovalPolicy::default());
        let err = service
            .create_topup(
                5,
                TopupRequest {
                    amount: Money::from_rupees(1),
                    payment_method: None,
                    client_ref: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, WalletError::WalletNotFound(5));
    }

    #[tokio::test]
    async fn test_amounts_above_limit_are_rejected() {
        let service = service_with(Arc::new(InMemoryWalletStore::new()), ApprovalPolicy::instant());
        funded(&service, 1, 1000).await;

        let err = service
            .create_topup(
                1,
                TopupRequest {
                    amount: Money::from_rupees(200_001),
                    payment_method: None,
                    client_ref: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));

        let err = service.process(1, voucher(100_001)).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
        assert!(service.list_for_user(1, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_topups_past_wallet_maximum_fail_cleanly() {
        let service = service_with(Arc::new(InMemoryWalletStore::new()), ApprovalPolicy::instant())
            .with_limits(AmountLimits {
                max_topup: Money::MAX,
                max_payment: Money::MAX,
            });
        service.ledger.open_wallet(1).await.unwrap();
        let big = TopupRequest {
            amount: Money::parse("600000000000000000").unwrap(),
            payment_method: None,
            client_ref: None,
        };

        let first = service.create_topup(1, big.clone()).await.unwrap();
        assert_eq!(first.status, TransactionStatus::Completed);
        let second = service.create_topup(1, big).await.unwrap();
        assert_eq!(second.status, TransactionStatus::Failed);
        assert_eq!(
            service.ledger.get_balance(1).await.unwrap(),
            Money::parse("600000000000000000").unwrap()
        );
    }

    #[tokio::test]
    async fn test_client_ref_idempotency() {
        let service = service_with(Arc::new(InMemoryWalletStore::new()), ApprovalPolicy::instant());
        funded(&service, 1, 1000).await;

        let mut req = voucher(100);
        req.client_ref = Some("order-1".into());
        let first = service.process(1, req.clone()).await.unwrap();
        let second = service.process(1, req.clone()).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(
            service.ledger.get_balance(1).await.unwrap(),
            Money::from_rupees(900)
        );

        req.amount = Money::from_rupees(200);
        let err = service.process(1, req).await.unwrap_err();
        assert!(matches!(err, WalletError::DuplicateSubmission(_)));
    }

    #[tokio::test]
    async fn test_single_terminal_transition() {
        let service = service_with(Arc::new(InMemoryWalletStore::new()), ApprovalPolicy::instant());
        funded(&service, 1, 1000).await;
        let record = service.process(1, voucher(100)).await.unwrap();

        let err = service
            .fail(record.id, TransactionStatus::Initiated, "late", None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidStateTransition(_)));
        let err = service
            .complete(record.id, TransactionStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidStateTransition(_)));
        assert_eq!(
            service.ledger.get_balance(1).await.unwrap(),
            Money::from_rupees(900)
        );
    }

    #[tokio::test]
    async fn test_fail_with_held_funds_reverses_once() {
        let service = service_with(Arc::new(InMemoryWalletStore::new()), ApprovalPolicy::instant());
        funded(&service, 1, 1000).await;
        let (record, _) = service
            .create(NewTransaction {
                user_id: 1,
                transaction_type: TransactionType::BillPayment,
                amount: Money::from_rupees(300),
                charges: Money::from_rupees(5),
                operator: "bescom".into(),
                metadata: TransactionMetadata::BillPayment {
                    biller_id: "bescom".into(),
                    consumer_number: "1".into(),
                },
                client_ref: None,
            })
            .await
            .unwrap();
        service.hold_funds(record.id).await.unwrap();
        assert_eq!(
            service.ledger.get_balance(1).await.unwrap(),
            Money::from_rupees(695)
        );

        let failed = service
            .fail(record.id, TransactionStatus::Initiated, "biller down", None)
            .await
            .unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(
            service.ledger.get_balance(1).await.unwrap(),
            Money::from_rupees(1000)
        );
    }

    #[tokio::test]
    async fn test_failed_reversal_is_flagged_and_retried() {
        let wallet_store = Arc::new(FlakyWalletStore::new());
        let service = service_with(wallet_store.clone(), ApprovalPolicy::instant());
        funded(&service, 1, 1000).await;
        let (record, _) = service
            .create(NewTransaction {
                user_id: 1,
                transaction_type: TransactionType::VoucherPurchase,
                amount: Money::from_rupees(200),
                charges: Money::ZERO,
                operator: "amazon".into(),
                metadata: TransactionMetadata::Voucher {
                    sku: "AMZ".into(),
                    quantity: 1,
                },
                client_ref: None,
            })
            .await
            .unwrap();
        service.hold_funds(record.id).await.unwrap();

        wallet_store.set_fail_reverse(true);
        let failed = service
            .fail(record.id, TransactionStatus::Initiated, "provider said no", None)
            .await
            .unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert!(failed.reversal_pending);
        assert_eq!(
            service.ledger.get_balance(1).await.unwrap(),
            Money::from_rupees(800)
        );

        assert_eq!(service.retry_reversals(10).await.unwrap(), 0);
        wallet_store.set_fail_reverse(false);
        assert_eq!(service.retry_reversals(10).await.unwrap(), 1);
        assert_eq!(
            service.ledger.get_balance(1).await.unwrap(),
            Money::from_rupees(1000)
        );
        let record = service.require(record.id).await.unwrap();
        assert!(!record.reversal_pending);
        assert_eq!(service.retry_reversals(10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_for_user_hides_other_users() {
        let service = service_with(Arc::new(InMemoryWalletStore::new()), ApprovalPolicy::instant());
        funded(&service, 1, 1000).await;
        let record = service.process(1, voucher(10)).await.unwrap();
        assert!(service.get_for_user(1, record.id).await.is_ok());
        assert!(matches!(
            service.get_for_user(2, record.id).await,
            Err(WalletError::TransactionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_metadata_must_match_type() {
        let service = service_with(Arc::new(InMemoryWalletStore::new()), ApprovalPolicy::instant());
        funded(&service, 1, 1000).await;
        let mut req = voucher(10);
        req.transaction_type = TransactionType::BillPayment;
        assert!(matches!(
            service.process(1, req).await,
            Err(WalletError::Validation(_))
        ));
    }
}
