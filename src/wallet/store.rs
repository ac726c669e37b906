//! Wallet storage seam
//!
//! Every store applies a posting atomically per user: the balance check, the
//! entry append and the version bump happen under one lock (a DashMap shard
//! lock in memory, a row lock in PostgreSQL).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicI64, Ordering};

use super::types::{
    Direction, EntryKind, LedgerEntry, PostOutcome, Posting, ReversalOutcome, Wallet, net_effect,
};
use crate::core_types::UserId;
use crate::error::{Result, WalletError};
use crate::money::Money;

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Create the wallet if missing; returns the current wallet either way
    async fn open(&self, user_id: UserId, at: DateTime<Utc>) -> Result<Wallet>;

    async fn get(&self, user_id: UserId) -> Result<Option<Wallet>>;

    /// Apply a debit or credit. A repeated posting for the same
    /// `(reference, kind)` returns the original entry with `replayed = true`.
    async fn post(&self, posting: Posting) -> Result<PostOutcome>;

    /// Compensate the net effect of every entry tied to `reference`
    async fn reverse(
        &self,
        reference: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<ReversalOutcome>;

    /// Entries of one wallet, oldest first
    async fn entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>>;

    async fn entries_for_reference(&self, reference: &str) -> Result<Vec<LedgerEntry>>;
}

/// Decide the compensating direction and amount for a reference's entries.
///
/// Returns `Ok(None)` when the entries already net to zero.
pub(crate) fn compensation(entries: &[&LedgerEntry]) -> Result<Option<(Direction, Money)>> {
    let net = net_effect(entries.iter().copied());
    if net.is_zero() {
        return Ok(None);
    }
    let (direction, magnitude) = if net.is_sign_negative() {
        (Direction::In, -net)
    } else {
        (Direction::Out, net)
    };
    Ok(Some((direction, Money::new(magnitude)?)))
}

/// Balance after moving `amount` in `direction`
pub(crate) fn apply_direction(balance: Money, direction: Direction, amount: Money) -> Result<Money> {
    match direction {
        Direction::In => balance.checked_add(amount).ok_or_else(|| {
            WalletError::InvalidAmount(format!("balance would exceed {}", Money::MAX))
        }),
        Direction::Out => balance
            .checked_sub(amount)
            .ok_or(WalletError::InsufficientFunds {
                available: balance,
                requested: amount,
            }),
    }
}

struct WalletSlot {
    wallet: Wallet,
    entries: Vec<LedgerEntry>,
}

/// DashMap-backed store
///
/// `get_mut` holds the shard write lock for the whole posting, which
/// serialises mutations of one user without blocking unrelated shards.
pub struct InMemoryWalletStore {
    wallets: DashMap<UserId, WalletSlot>,
    /// reference -> owning user
    references: DashMap<String, UserId>,
    next_entry_id: AtomicI64,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self {
            wallets: DashMap::new(),
            references: DashMap::new(),
            next_entry_id: AtomicI64::new(1),
        }
    }

    fn next_id(&self) -> i64 {
        self.next_entry_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for InMemoryWalletStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn open(&self, user_id: UserId, at: DateTime<Utc>) -> Result<Wallet> {
        let slot = self.wallets.entry(user_id).or_insert_with(|| WalletSlot {
            wallet: Wallet::new(user_id, at),
            entries: Vec::new(),
        });
        Ok(slot.wallet.clone())
    }

    async fn get(&self, user_id: UserId) -> Result<Option<Wallet>> {
        Ok(self.wallets.get(&user_id).map(|s| s.wallet.clone()))
    }

    async fn post(&self, posting: Posting) -> Result<PostOutcome> {
        if posting.kind == EntryKind::Reversal {
            return Err(WalletError::Internal(
                "reversals must go through reverse()".into(),
            ));
        }
        let mut slot = self
            .wallets
            .get_mut(&posting.user_id)
            .ok_or(WalletError::WalletNotFound(posting.user_id))?;

        // Lock order is wallet shard, then reference shard
        let claim = match self.references.entry(posting.reference.clone()) {
            Entry::Occupied(owner) if *owner.get() != posting.user_id => {
                return Err(WalletError::DuplicateSubmission(format!(
                    "reference {} belongs to another wallet",
                    posting.reference
                )));
            }
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => Some(vacant),
        };

        if let Some(existing) = slot
            .entries
            .iter()
            .find(|e| e.reference == posting.reference && e.kind == posting.kind)
        {
            if existing.amount != posting.amount {
                return Err(WalletError::DuplicateSubmission(format!(
                    "{} {} already posted with amount {}",
                    posting.kind, posting.reference, existing.amount
                )));
            }
            return Ok(PostOutcome {
                entry: existing.clone(),
                wallet: slot.wallet.clone(),
                replayed: true,
            });
        }

        let direction = posting.direction();
        let balance_after = apply_direction(slot.wallet.balance, direction, posting.amount)?;

        let entry = LedgerEntry {
            entry_id: self.next_id(),
            user_id: posting.user_id,
            reference: posting.reference.clone(),
            kind: posting.kind,
            direction,
            amount: posting.amount,
            balance_after,
            reason: posting.reason,
            created_at: posting.at,
        };
        slot.wallet.balance = balance_after;
        slot.wallet.version += 1;
        slot.wallet.updated_at = posting.at;
        slot.entries.push(entry.clone());
        if let Some(vacant) = claim {
            vacant.insert(posting.user_id);
        }
        let wallet = slot.wallet.clone();
        Ok(PostOutcome {
            entry,
            wallet,
            replayed: false,
        })
    }

    async fn reverse(
        &self,
        reference: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<ReversalOutcome> {
        let Some(user_id) = self.references.get(reference).map(|r| *r) else {
            return Ok(ReversalOutcome::NothingToReverse);
        };
        let mut slot = self
            .wallets
            .get_mut(&user_id)
            .ok_or(WalletError::WalletNotFound(user_id))?;

        let plan = {
            let related: Vec<&LedgerEntry> = slot
                .entries
                .iter()
                .filter(|e| e.reference == reference)
                .collect();
            if related.iter().any(|e| e.kind == EntryKind::Reversal) {
                return Ok(ReversalOutcome::AlreadyReversed);
            }
            compensation(&related)?
        };
        let Some((direction, amount)) = plan else {
            return Ok(ReversalOutcome::NothingToReverse);
        };

        let balance_after = apply_direction(slot.wallet.balance, direction, amount)?;

        let entry = LedgerEntry {
            entry_id: self.next_id(),
            user_id,
            reference: reference.to_string(),
            kind: EntryKind::Reversal,
            direction,
            amount,
            balance_after,
            reason: reason.to_string(),
            created_at: at,
        };
        slot.wallet.balance = balance_after;
        slot.wallet.version += 1;
        slot.wallet.updated_at = at;
        slot.entries.push(entry.clone());

        Ok(ReversalOutcome::Reversed {
            entry,
            wallet: slot.wallet.clone(),
        })
    }

    async fn entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .wallets
            .get(&user_id)
            .map(|s| s.entries.clone())
            .unwrap_or_default())
    }

    async fn entries_for_reference(&self, reference: &str) -> Result<Vec<LedgerEntry>> {
        let Some(user_id) = self.references.get(reference).map(|r| *r) else {
            return Ok(Vec::new());
        };
        Ok(self
            .wallets
            .get(&user_id)
            .map(|s| {
                s.entries
                    .iter()
                    .filter(|e| e.reference == reference)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Store wrapper whose postings or reversals can be switched to fail
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    pub struct FlakyWalletStore {
        inner: Arc<InMemoryWalletStore>,
        fail_post: AtomicBool,
        fail_reverse: AtomicBool,
        reverse_calls: AtomicUsize,
    }

    impl FlakyWalletStore {
        pub fn new() -> Self {
            Self {
                inner: Arc::new(InMemoryWalletStore::new()),
                fail_post: AtomicBool::new(false),
                fail_reverse: AtomicBool::new(false),
                reverse_calls: AtomicUsize::new(0),
            }
        }

        pub fn set_fail_post(&self, fail: bool) {
            self.fail_post.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_reverse(&self, fail: bool) {
            self.fail_reverse.store(fail, Ordering::SeqCst);
        }

        pub fn reverse_calls(&self) -> usize {
            self.reverse_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WalletStore for FlakyWalletStore {
        async fn open(&self, user_id: UserId, at: DateTime<Utc>) -> Result<Wallet> {
            self.inner.open(user_id, at).await
        }

        async fn get(&self, user_id: UserId) -> Result<Option<Wallet>> {
            self.inner.get(user_id).await
        }

        async fn post(&self, posting: Posting) -> Result<PostOutcome> {
            if self.fail_post.load(Ordering::SeqCst) {
                return Err(WalletError::Database("connection reset".into()));
            }
            self.inner.post(posting).await
        }

        async fn reverse(
            &self,
            reference: &str,
            reason: &str,
            at: DateTime<Utc>,
        ) -> Result<ReversalOutcome> {
            self.reverse_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_reverse.load(Ordering::SeqCst) {
                return Err(WalletError::Database("connection reset".into()));
            }
            self.inner.reverse(reference, reason, at).await
        }

        async fn entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
            self.inner.entries(user_id).await
        }

        async fn entries_for_reference(&self, reference: &str) -> Result<Vec<LedgerEntry>> {
            self.inner.entries_for_reference(reference).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn posting(user_id: UserId, kind: EntryKind, rupees: u64, reference: &str) -> Posting {
        Posting {
            user_id,
            kind,
            amount: Money::from_rupees(rupees),
            reference: reference.to_string(),
            reason: "test".into(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let store = InMemoryWalletStore::new();
        let first = store.open(1, Utc::now()).await.unwrap();
        store
            .post(posting(1, EntryKind::Credit, 50, "t1"))
            .await
            .unwrap();
        let second = store.open(1, Utc::now()).await.unwrap();
        assert_eq!(first.balance, Money::ZERO);
        assert_eq!(second.balance, Money::from_rupees(50));
    }

    #[tokio::test]
    async fn test_post_to_missing_wallet() {
        let store = InMemoryWalletStore::new();
        let err = store
            .post(posting(9, EntryKind::Credit, 1, "t"))
            .await
            .unwrap_err();
        assert_eq!(err, WalletError::WalletNotFound(9));
    }

    #[tokio::test]
    async fn test_replayed_posting_does_not_move_money() {
        let store = InMemoryWalletStore::new();
        store.open(1, Utc::now()).await.unwrap();
        store
            .post(posting(1, EntryKind::Credit, 100, "t1"))
            .await
            .unwrap();
        let again = store
            .post(posting(1, EntryKind::Credit, 100, "t1"))
            .await
            .unwrap();
        assert!(again.replayed);
        assert_eq!(again.wallet.balance, Money::from_rupees(100));

        let conflicting = store.post(posting(1, EntryKind::Credit, 99, "t1")).await;
        assert!(matches!(
            conflicting,
            Err(WalletError::DuplicateSubmission(_))
        ));
    }

    #[tokio::test]
    async fn test_reference_owned_by_other_wallet() {
        let store = InMemoryWalletStore::new();
        store.open(1, Utc::now()).await.unwrap();
        store.open(2, Utc::now()).await.unwrap();
        store
            .post(posting(1, EntryKind::Credit, 10, "t1"))
            .await
            .unwrap();
        let result = store.post(posting(2, EntryKind::Credit, 10, "t1")).await;
        assert!(matches!(result, Err(WalletError::DuplicateSubmission(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reference_claimed_by_one_wallet() {
        let store = Arc::new(InMemoryWalletStore::new());
        for user_id in 1..=32 {
            store.open(user_id, Utc::now()).await.unwrap();
        }

        let handles: Vec<_> = (1..=32)
            .map(|user_id| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .post(posting(user_id, EntryKind::Credit, 10, "shared"))
                        .await
                })
            })
            .collect();
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(store.entries_for_reference("shared").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_credit_past_max_is_rejected() {
        let store = InMemoryWalletStore::new();
        store.open(1, Utc::now()).await.unwrap();
        let mut big = posting(1, EntryKind::Credit, 0, "t1");
        big.amount = Money::MAX;
        store.post(big.clone()).await.unwrap();

        big.reference = "t2".into();
        big.amount = Money::from_rupees(1);
        let err = store.post(big).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
        let wallet = store.get(1).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Money::MAX);
        assert_eq!(store.entries(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reverse_nets_all_entries() {
        let store = InMemoryWalletStore::new();
        store.open(1, Utc::now()).await.unwrap();
        store
            .post(posting(1, EntryKind::Credit, 1000, "seed"))
            .await
            .unwrap();
        store
            .post(posting(1, EntryKind::Debit, 205, "dmt-1"))
            .await
            .unwrap();

        let outcome = store.reverse("dmt-1", "failed", Utc::now()).await.unwrap();
        let ReversalOutcome::Reversed { entry, wallet } = outcome else {
            panic!("expected reversal");
        };
        assert_eq!(entry.direction, Direction::In);
        assert_eq!(entry.amount, Money::from_rupees(205));
        assert_eq!(wallet.balance, Money::from_rupees(1000));

        let again = store.reverse("dmt-1", "failed", Utc::now()).await.unwrap();
        assert_eq!(again, ReversalOutcome::AlreadyReversed);
    }

    #[tokio::test]
    async fn test_reverse_unknown_reference() {
        let store = InMemoryWalletStore::new();
        let outcome = store.reverse("nope", "x", Utc::now()).await.unwrap();
        assert_eq!(outcome, ReversalOutcome::NothingToReverse);
    }
}
