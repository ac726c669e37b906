//! Remitter and beneficiary storage

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::types::{Beneficiary, Remitter};
use crate::core_types::{BeneficiaryId, RemitterId};
use crate::error::{Result, WalletError};

/// Callers serialise writes per remitter; the store only guards uniqueness.
#[async_trait]
pub trait DmtStore: Send + Sync {
    /// Fails with `RemitterExists` if the mobile is taken
    async fn insert_remitter(&self, remitter: Remitter) -> Result<()>;

    async fn get_remitter(&self, id: RemitterId) -> Result<Option<Remitter>>;

    async fn find_remitter_by_mobile(&self, mobile: &str) -> Result<Option<Remitter>>;

    /// Replace an existing remitter
    async fn save_remitter(&self, remitter: &Remitter) -> Result<()>;

    async fn insert_beneficiary(&self, beneficiary: Beneficiary) -> Result<()>;

    async fn get_beneficiary(&self, id: BeneficiaryId) -> Result<Option<Beneficiary>>;

    async fn save_beneficiary(&self, beneficiary: &Beneficiary) -> Result<()>;

    /// All beneficiaries of a remitter, active or not, oldest first
    async fn list_beneficiaries(&self, remitter_id: RemitterId) -> Result<Vec<Beneficiary>>;
}

#[derive(Default)]
pub struct InMemoryDmtStore {
    remitters: DashMap<RemitterId, Remitter>,
    by_mobile: DashMap<String, RemitterId>,
    beneficiaries: DashMap<BeneficiaryId, Beneficiary>,
}

impl InMemoryDmtStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DmtStore for InMemoryDmtStore {
    async fn insert_remitter(&self, remitter: Remitter) -> Result<()> {
        match self.by_mobile.entry(remitter.mobile.clone()) {
            Entry::Occupied(_) => Err(WalletError::RemitterExists(remitter.mobile)),
            Entry::Vacant(slot) => {
                slot.insert(remitter.id);
                self.remitters.insert(remitter.id, remitter);
                Ok(())
            }
        }
    }

    async fn get_remitter(&self, id: RemitterId) -> Result<Option<Remitter>> {
        Ok(self.remitters.get(&id).map(|r| r.value().clone()))
    }

    async fn find_remitter_by_mobile(&self, mobile: &str) -> Result<Option<Remitter>> {
        let Some(id) = self.by_mobile.get(mobile).map(|r| *r.value()) else {
            return Ok(None);
        };
        self.get_remitter(id).await
    }

    async fn save_remitter(&self, remitter: &Remitter) -> Result<()> {
        match self.remitters.get_mut(&remitter.id) {
            Some(mut slot) => {
                *slot = remitter.clone();
                Ok(())
            }
            None => Err(WalletError::RemitterNotFound(remitter.id.to_string())),
        }
    }

    async fn insert_beneficiary(&self, beneficiary: Beneficiary) -> Result<()> {
        self.beneficiaries.insert(beneficiary.id, beneficiary);
        Ok(())
    }

    async fn get_beneficiary(&self, id: BeneficiaryId) -> Result<Option<Beneficiary>> {
        Ok(self.beneficiaries.get(&id).map(|b| b.value().clone()))
    }

    async fn save_beneficiary(&self, beneficiary: &Beneficiary) -> Result<()> {
        match self.beneficiaries.get_mut(&beneficiary.id) {
            Some(mut slot) => {
                *slot = beneficiary.clone();
                Ok(())
            }
            None => Err(WalletError::BeneficiaryNotFound(beneficiary.id.to_string())),
        }
    }

    async fn list_beneficiaries(&self, remitter_id: RemitterId) -> Result<Vec<Beneficiary>> {
        let mut list: Vec<Beneficiary> = self
            .beneficiaries
            .iter()
            .filter(|b| b.remitter_id == remitter_id)
            .map(|b| b.value().clone())
            .collect();
        list.sort_by_key(|b| b.id);
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmt::types::{KycStatus, OnboardingStatus};
    use crate::money::Money;
    use chrono::Utc;

    fn remitter(mobile: &str) -> Remitter {
        let now = Utc::now();
        Remitter {
            id: RemitterId::new(),
            user_id: 1,
            mobile: mobile.into(),
            first_name: "Ravi".into(),
            last_name: "Kumar".into(),
            pincode: None,
            onboarding: OnboardingStatus::OtpPending,
            kyc_status: KycStatus::Unverified,
            kyc_attempts: 0,
            last_kyc_attempt_date: None,
            monthly_limit: Money::from_rupees(25_000),
            monthly_used: Money::ZERO,
            limit_period: "2024-03".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_mobile_is_unique() {
        let store = InMemoryDmtStore::new();
        store.insert_remitter(remitter("9876543210")).await.unwrap();
        let err = store.insert_remitter(remitter("9876543210")).await.unwrap_err();
        assert!(matches!(err, WalletError::RemitterExists(_)));
    }

    #[tokio::test]
    async fn test_lookup_by_mobile_and_save() {
        let store = InMemoryDmtStore::new();
        let mut r = remitter("9123456789");
        store.insert_remitter(r.clone()).await.unwrap();

        r.onboarding = OnboardingStatus::Registered;
        store.save_remitter(&r).await.unwrap();

        let found = store.find_remitter_by_mobile("9123456789").await.unwrap().unwrap();
        assert_eq!(found.onboarding, OnboardingStatus::Registered);
        assert!(store.find_remitter_by_mobile("9000000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_unknown_remitter_fails() {
        let store = InMemoryDmtStore::new();
        let err = store.save_remitter(&remitter("9876543210")).await.unwrap_err();
        assert!(matches!(err, WalletError::RemitterNotFound(_)));
    }
}
