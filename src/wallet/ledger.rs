//! Wallet Ledger
//!
//! The only component allowed to change a balance. Every mutation appends a
//! [`LedgerEntry`] and publishes [`Event::BalanceChanged`] once committed.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::store::WalletStore;
use super::types::{EntryKind, LedgerEntry, Posting, ReversalOutcome, Wallet};
use crate::clock::Clock;
use crate::core_types::UserId;
use crate::error::{Result, WalletError};
use crate::events::{Event, EventPublisher};
use crate::money::Money;

pub struct WalletLedger {
    store: Arc<dyn WalletStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
}

impl WalletLedger {
    pub fn new(
        store: Arc<dyn WalletStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            clock,
            events,
        }
    }

    /// Create the user's wallet at signup. Idempotent.
    pub async fn open_wallet(&self, user_id: UserId) -> Result<Wallet> {
        let wallet = self.store.open(user_id, self.clock.now()).await?;
        debug!(user_id, "Wallet opened");
        Ok(wallet)
    }

    pub async fn wallet(&self, user_id: UserId) -> Result<Wallet> {
        self.store
            .get(user_id)
            .await?
            .ok_or(WalletError::WalletNotFound(user_id))
    }

    /// Latest committed balance
    pub async fn get_balance(&self, user_id: UserId) -> Result<Money> {
        Ok(self.wallet(user_id).await?.balance)
    }

    pub async fn debit(
        &self,
        user_id: UserId,
        amount: Money,
        reference: &str,
        reason: &str,
    ) -> Result<LedgerEntry> {
        self.post(user_id, EntryKind::Debit, amount, reference, reason)
            .await
    }

    pub async fn credit(
        &self,
        user_id: UserId,
        amount: Money,
        reference: &str,
        reason: &str,
    ) -> Result<LedgerEntry> {
        self.post(user_id, EntryKind::Credit, amount, reference, reason)
            .await
    }

    async fn post(
        &self,
        user_id: UserId,
        kind: EntryKind,
        amount: Money,
        reference: &str,
        reason: &str,
    ) -> Result<LedgerEntry> {
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount(
                "amount must be greater than zero".into(),
            ));
        }
        let outcome = self
            .store
            .post(Posting {
                user_id,
                kind,
                amount,
                reference: reference.to_string(),
                reason: reason.to_string(),
                at: self.clock.now(),
            })
            .await?;

        if outcome.replayed {
            debug!(user_id, reference, kind = %kind, "Posting already applied");
        } else {
            info!(
                user_id,
                reference,
                kind = %kind,
                amount = %amount,
                balance = %outcome.wallet.balance,
                "Ledger posting committed"
            );
            self.events.publish(&Event::BalanceChanged {
                user_id,
                balance: outcome.wallet.balance,
                reference: reference.to_string(),
                at: outcome.entry.created_at,
            });
        }
        Ok(outcome.entry)
    }

    /// Compensate every entry tied to `reference`. Idempotent.
    pub async fn reverse(&self, reference: &str, reason: &str) -> Result<ReversalOutcome> {
        let outcome = self
            .store
            .reverse(reference, reason, self.clock.now())
            .await?;
        match &outcome {
            ReversalOutcome::Reversed { entry, wallet } => {
                info!(
                    user_id = wallet.user_id,
                    reference,
                    amount = %entry.amount,
                    balance = %wallet.balance,
                    "Reversal committed"
                );
                self.events.publish(&Event::BalanceChanged {
                    user_id: wallet.user_id,
                    balance: wallet.balance,
                    reference: reference.to_string(),
                    at: entry.created_at,
                });
            }
            ReversalOutcome::AlreadyReversed => {
                debug!(reference, "Reference already reversed");
            }
            ReversalOutcome::NothingToReverse => {
                warn!(reference, "Reversal requested but no entries found");
            }
        }
        Ok(outcome)
    }

    /// Audit trail of one wallet
    pub async fn entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        self.wallet(user_id).await?;
        self.store.entries(user_id).await
    }

    pub async fn entries_for_reference(&self, reference: &str) -> Result<Vec<LedgerEntry>> {
        self.store.entries_for_reference(reference).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::events::BroadcastPublisher;
    use crate::wallet::store::InMemoryWalletStore;
    use crate::wallet::types::net_effect;
    use rand::Rng;

    fn ledger() -> (WalletLedger, Arc<BroadcastPublisher>) {
        let events = Arc::new(BroadcastPublisher::new(64));
        let ledger = WalletLedger::new(
            Arc::new(InMemoryWalletStore::new()),
            Arc::new(SystemClock::default()),
            events.clone(),
        );
        (ledger, events)
    }

    #[tokio::test]
    async fn test_balance_of_unknown_wallet() {
        let (ledger, _) = ledger();
        assert_eq!(
            ledger.get_balance(42).await,
            Err(WalletError::WalletNotFound(42))
        );
    }

    #[tokio::test]
    async fn test_debit_rejects_overdraft() {
        let (ledger, _) = ledger();
        ledger.open_wallet(1).await.unwrap();
        ledger
            .credit(1, Money::from_rupees(100), "t0", "seed")
            .await
            .unwrap();

        let err = ledger
            .debit(1, Money::from_rupees(101), "t1", "recharge")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WalletError::InsufficientFunds {
                available: Money::from_rupees(100),
                requested: Money::from_rupees(101),
            }
        );
        assert_eq!(ledger.get_balance(1).await.unwrap(), Money::from_rupees(100));
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let (ledger, _) = ledger();
        ledger.open_wallet(1).await.unwrap();
        let err = ledger.credit(1, Money::ZERO, "t", "x").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");
    }

    #[tokio::test]
    async fn test_reversal_is_idempotent() {
        let (ledger, _) = ledger();
        ledger.open_wallet(1).await.unwrap();
        ledger
            .credit(1, Money::from_rupees(1000), "seed", "seed")
            .await
            .unwrap();
        ledger
            .debit(1, Money::from_rupees(205), "dmt-1", "transfer")
            .await
            .unwrap();

        assert!(ledger.reverse("dmt-1", "failed").await.unwrap().is_reversed());
        assert_eq!(
            ledger.reverse("dmt-1", "failed").await.unwrap(),
            ReversalOutcome::AlreadyReversed
        );
        assert_eq!(
            ledger.get_balance(1).await.unwrap(),
            Money::from_rupees(1000)
        );
    }

    #[tokio::test]
    async fn test_balance_changed_published() {
        let (ledger, events) = ledger();
        let mut rx = events.subscribe();
        ledger.open_wallet(3).await.unwrap();
        ledger
            .credit(3, Money::from_rupees(5), "t", "seed")
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::BalanceChanged { user_id: 3, .. }));

        // A replay publishes nothing
        ledger
            .credit(3, Money::from_rupees(5), "t", "seed")
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_debits_never_overdraw() {
        let (ledger, _) = ledger();
        let ledger = Arc::new(ledger);
        ledger.open_wallet(1).await.unwrap();
        ledger
            .credit(1, Money::from_rupees(1000), "seed", "seed")
            .await
            .unwrap();

        let amounts: Vec<u64> = {
            let mut rng = rand::thread_rng();
            (0..64).map(|_| rng.gen_range(1..=100)).collect()
        };

        let mut handles = Vec::new();
        for (i, rupees) in amounts.iter().copied().enumerate() {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let reference = format!("d-{i}");
                if i % 4 == 0 {
                    ledger
                        .credit(1, Money::from_rupees(rupees), &reference, "credit")
                        .await
                        .map(|_| (true, rupees))
                } else {
                    ledger
                        .debit(1, Money::from_rupees(rupees), &reference, "debit")
                        .await
                        .map(|_| (false, rupees))
                }
            }));
        }

        let mut expected: i64 = 1000;
        for handle in handles {
            match handle.await.unwrap() {
                Ok((true, rupees)) => expected += rupees as i64,
                Ok((false, rupees)) => expected -= rupees as i64,
                Err(WalletError::InsufficientFunds { .. }) => {}
                Err(e) => panic!("unexpected error {e}"),
            }
        }

        let balance = ledger.get_balance(1).await.unwrap();
        assert!(expected >= 0);
        assert_eq!(balance, Money::from_rupees(expected as u64));

        // Conservation: balance equals the sum of entries
        let entries = ledger.entries(1).await.unwrap();
        assert_eq!(net_effect(&entries), balance.inner());
        assert!(entries.iter().all(|e| !e.balance_after.inner().is_sign_negative()));
    }
}
