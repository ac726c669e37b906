//! Transaction storage seam
//!
//! `transition` is the only way to change a status: it is a compare-and-swap
//! on the expected current status and also rejects edges outside the
//! lifecycle graph.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::state::TransactionStatus;
use super::types::{InsertOutcome, RecordPatch, StatusUpdate, TransactionRecord};
use crate::core_types::{TransactionId, UserId};
use crate::error::{Result, WalletError};

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new record; `(user_id, client_ref)` is unique
    async fn insert(&self, record: TransactionRecord) -> Result<InsertOutcome>;

    async fn get(&self, id: TransactionId) -> Result<Option<TransactionRecord>>;

    async fn get_by_client_ref(
        &self,
        user_id: UserId,
        client_ref: &str,
    ) -> Result<Option<TransactionRecord>>;

    /// CAS the status from `expected` to `update.to`
    ///
    /// # Errors
    /// `InvalidStateTransition` if the record is not in `expected` or the
    /// edge is not in the graph; `TransactionNotFound` if missing.
    async fn transition(
        &self,
        id: TransactionId,
        expected: TransactionStatus,
        update: StatusUpdate,
    ) -> Result<TransactionRecord>;

    async fn patch(
        &self,
        id: TransactionId,
        patch: RecordPatch,
        at: DateTime<Utc>,
    ) -> Result<TransactionRecord>;

    /// Newest first
    async fn list_for_user(&self, user_id: UserId, limit: usize) -> Result<Vec<TransactionRecord>>;

    /// Oldest update first; `updated_before` filters out recently touched records
    async fn list_by_status(
        &self,
        status: TransactionStatus,
        updated_before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>>;

    async fn list_reversal_pending(&self, limit: usize) -> Result<Vec<TransactionRecord>>;
}

pub(crate) fn check_edge(
    id: TransactionId,
    expected: TransactionStatus,
    to: TransactionStatus,
) -> Result<()> {
    if expected.can_transition_to(to) {
        Ok(())
    } else {
        Err(WalletError::InvalidStateTransition(format!(
            "transaction {}: {} -> {} is not allowed",
            id, expected, to
        )))
    }
}

pub(crate) fn status_mismatch(
    id: TransactionId,
    expected: TransactionStatus,
    actual: TransactionStatus,
) -> WalletError {
    WalletError::InvalidStateTransition(format!(
        "transaction {}: expected {}, found {}",
        id, expected, actual
    ))
}

/// DashMap-backed store
#[derive(Default)]
pub struct InMemoryTransactionStore {
    records: DashMap<TransactionId, TransactionRecord>,
    client_refs: DashMap<(UserId, String), TransactionId>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect<F>(&self, filter: F) -> Vec<TransactionRecord>
    where
        F: Fn(&TransactionRecord) -> bool,
    {
        self.records
            .iter()
            .filter(|r| filter(r.value()))
            .map(|r| r.value().clone())
            .collect()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, record: TransactionRecord) -> Result<InsertOutcome> {
        let Some(client_ref) = record.client_ref.clone() else {
            self.records.insert(record.id, record.clone());
            return Ok(InsertOutcome::Inserted(record));
        };

        match self.client_refs.entry((record.user_id, client_ref)) {
            Entry::Occupied(existing) => {
                let id = *existing.get();
                drop(existing);
                self.records
                    .get(&id)
                    .map(|r| InsertOutcome::Existing(r.value().clone()))
                    .ok_or_else(|| WalletError::Internal(format!("dangling client_ref for {}", id)))
            }
            Entry::Vacant(slot) => {
                self.records.insert(record.id, record.clone());
                slot.insert(record.id);
                Ok(InsertOutcome::Inserted(record))
            }
        }
    }

    async fn get(&self, id: TransactionId) -> Result<Option<TransactionRecord>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn get_by_client_ref(
        &self,
        user_id: UserId,
        client_ref: &str,
    ) -> Result<Option<TransactionRecord>> {
        let id = self
            .client_refs
            .get(&(user_id, client_ref.to_string()))
            .map(|r| *r.value());
        match id {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }

    async fn transition(
        &self,
        id: TransactionId,
        expected: TransactionStatus,
        update: StatusUpdate,
    ) -> Result<TransactionRecord> {
        check_edge(id, expected, update.to)?;
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| WalletError::TransactionNotFound(id.to_string()))?;
        if record.status != expected {
            return Err(status_mismatch(id, expected, record.status));
        }
        update.apply(&mut record);
        Ok(record.clone())
    }

    async fn patch(
        &self,
        id: TransactionId,
        patch: RecordPatch,
        at: DateTime<Utc>,
    ) -> Result<TransactionRecord> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| WalletError::TransactionNotFound(id.to_string()))?;
        patch.apply(&mut record, at);
        Ok(record.clone())
    }

    async fn list_for_user(&self, user_id: UserId, limit: usize) -> Result<Vec<TransactionRecord>> {
        let mut records = self.collect(|r| r.user_id == user_id);
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
        updated_before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>> {
        let mut records = self.collect(|r| {
            r.status == status && updated_before.is_none_or(|cutoff| r.updated_at <= cutoff)
        });
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn list_reversal_pending(&self, limit: usize) -> Result<Vec<TransactionRecord>> {
        let mut records = self.collect(|r| r.reversal_pending);
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::transaction::state::TransactionType;
    use crate::transaction::types::{NewTransaction, TransactionMetadata};

    fn voucher(client_ref: Option<&str>) -> TransactionRecord {
        TransactionRecord::new(
            TransactionId::new(),
            NewTransaction {
                user_id: 1,
                transaction_type: TransactionType::VoucherPurchase,
                amount: Money::from_rupees(250),
                charges: Money::ZERO,
                operator: "amazon".into(),
                metadata: TransactionMetadata::Voucher {
                    sku: "AMZ-250".into(),
                    quantity: 1,
                },
                client_ref: client_ref.map(str::to_string),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_cas_transition() {
        let store = InMemoryTransactionStore::new();
        let record = voucher(None);
        let id = record.id;
        store.insert(record).await.unwrap();

        let updated = store
            .transition(
                id,
                TransactionStatus::Initiated,
                StatusUpdate::to(TransactionStatus::Completed, Utc::now()),
            )
            .await
            .unwrap();
        assert_eq!(updated.status, TransactionStatus::Completed);

        // Second terminal transition loses the CAS
        let err = store
            .transition(
                id,
                TransactionStatus::Initiated,
                StatusUpdate::to(TransactionStatus::Failed, Utc::now()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            TransactionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_edge_outside_graph_rejected() {
        let store = InMemoryTransactionStore::new();
        let record = voucher(None);
        let id = record.id;
        store.insert(record).await.unwrap();

        let err = store
            .transition(
                id,
                TransactionStatus::Initiated,
                StatusUpdate::to(TransactionStatus::Rejected, Utc::now()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn test_client_ref_unique_per_user() {
        let store = InMemoryTransactionStore::new();
        let first = voucher(Some("c-1"));
        let first_id = first.id;
        assert!(matches!(
            store.insert(first).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
        match store.insert(voucher(Some("c-1"))).await.unwrap() {
            InsertOutcome::Existing(existing) => assert_eq!(existing.id, first_id),
            other => panic!("expected existing, got {other:?}"),
        }
        let found = store.get_by_client_ref(1, "c-1").await.unwrap().unwrap();
        assert_eq!(found.id, first_id);
        assert!(store.get_by_client_ref(2, "c-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_status_respects_cutoff() {
        let store = InMemoryTransactionStore::new();
        let record = voucher(None);
        let id = record.id;
        store.insert(record).await.unwrap();
        store
            .transition(
                id,
                TransactionStatus::Initiated,
                StatusUpdate::to(TransactionStatus::Pending, Utc::now()),
            )
            .await
            .unwrap();

        let past = Utc::now() - chrono::Duration::minutes(5);
        assert!(
            store
                .list_by_status(TransactionStatus::Pending, Some(past), 10)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            store
                .list_by_status(TransactionStatus::Pending, None, 10)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
