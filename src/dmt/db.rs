//! PostgreSQL DMT store
//!
//! Tables `dmt_remitters_tb` and `dmt_beneficiaries_tb`. Mobile uniqueness is
//! enforced by the schema; saves overwrite the whole row.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::store::DmtStore;
use super::types::{Beneficiary, KycStatus, OnboardingStatus, Remitter};
use crate::core_types::{BeneficiaryId, RemitterId, UserId};
use crate::error::{Result, WalletError};
use crate::money::Money;

const REMITTER_COLUMNS: &str = "id, user_id, mobile, first_name, last_name, pincode, onboarding, \
                                kyc_status, kyc_attempts, last_kyc_attempt_date, monthly_limit, \
                                monthly_used, limit_period, created_at, updated_at";

const BENEFICIARY_COLUMNS: &str = "id, remitter_id, name, account_number, ifsc, bank_name, \
                                   is_verified, is_active, monthly_limit, remaining_limit, \
                                   limit_period, created_at, updated_at";

pub struct PgDmtStore {
    pool: PgPool,
}

impl PgDmtStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn onboarding_str(status: OnboardingStatus) -> &'static str {
    match status {
        OnboardingStatus::OtpPending => "otp_pending",
        OnboardingStatus::Registered => "registered",
    }
}

fn parse_onboarding(s: &str) -> Result<OnboardingStatus> {
    match s {
        "otp_pending" => Ok(OnboardingStatus::OtpPending),
        "registered" => Ok(OnboardingStatus::Registered),
        other => Err(WalletError::Database(format!("unknown onboarding status: {other}"))),
    }
}

fn kyc_str(status: KycStatus) -> &'static str {
    match status {
        KycStatus::Unverified => "unverified",
        KycStatus::Pending => "pending",
        KycStatus::Verified => "verified",
    }
}

fn parse_kyc(s: &str) -> Result<KycStatus> {
    match s {
        "unverified" => Ok(KycStatus::Unverified),
        "pending" => Ok(KycStatus::Pending),
        "verified" => Ok(KycStatus::Verified),
        other => Err(WalletError::Database(format!("unknown kyc status: {other}"))),
    }
}

fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| WalletError::Database(format!("bad {what} id {raw}: {e}")))
}

fn row_to_remitter(row: &PgRow) -> Result<Remitter> {
    let id: String = row.try_get("id")?;
    let user_id: i64 = row.try_get("user_id")?;
    let onboarding: String = row.try_get("onboarding")?;
    let kyc_status: String = row.try_get("kyc_status")?;
    let kyc_attempts: i32 = row.try_get("kyc_attempts")?;
    let monthly_limit: Decimal = row.try_get("monthly_limit")?;
    let monthly_used: Decimal = row.try_get("monthly_used")?;

    Ok(Remitter {
        id: parse_id(&id, "remitter")?,
        user_id: user_id as UserId,
        mobile: row.try_get("mobile")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        pincode: row.try_get("pincode")?,
        onboarding: parse_onboarding(&onboarding)?,
        kyc_status: parse_kyc(&kyc_status)?,
        kyc_attempts: kyc_attempts.max(0) as u32,
        last_kyc_attempt_date: row.try_get("last_kyc_attempt_date")?,
        monthly_limit: Money::new(monthly_limit)?,
        monthly_used: Money::new(monthly_used)?,
        limit_period: row.try_get("limit_period")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_beneficiary(row: &PgRow) -> Result<Beneficiary> {
    let id: String = row.try_get("id")?;
    let remitter_id: String = row.try_get("remitter_id")?;
    let monthly_limit: Decimal = row.try_get("monthly_limit")?;
    let remaining_limit: Decimal = row.try_get("remaining_limit")?;

    Ok(Beneficiary {
        id: parse_id(&id, "beneficiary")?,
        remitter_id: parse_id(&remitter_id, "remitter")?,
        name: row.try_get("name")?,
        account_number: row.try_get("account_number")?,
        ifsc: row.try_get("ifsc")?,
        bank_name: row.try_get("bank_name")?,
        is_verified: row.try_get("is_verified")?,
        is_active: row.try_get("is_active")?,
        monthly_limit: Money::new(monthly_limit)?,
        remaining_limit: Money::new(remaining_limit)?,
        limit_period: row.try_get("limit_period")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl DmtStore for PgDmtStore {
    async fn insert_remitter(&self, remitter: Remitter) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO dmt_remitters_tb
                (id, user_id, mobile, first_name, last_name, pincode, onboarding, kyc_status,
                 kyc_attempts, last_kyc_attempt_date, monthly_limit, monthly_used, limit_period,
                 created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(remitter.id.to_string())
        .bind(remitter.user_id as i64)
        .bind(&remitter.mobile)
        .bind(&remitter.first_name)
        .bind(&remitter.last_name)
        .bind(&remitter.pincode)
        .bind(onboarding_str(remitter.onboarding))
        .bind(kyc_str(remitter.kyc_status))
        .bind(remitter.kyc_attempts as i32)
        .bind(remitter.last_kyc_attempt_date)
        .bind(remitter.monthly_limit.inner())
        .bind(remitter.monthly_used.inner())
        .bind(&remitter.limit_period)
        .bind(remitter.created_at)
        .bind(remitter.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(WalletError::RemitterExists(remitter.mobile))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_remitter(&self, id: RemitterId) -> Result<Option<Remitter>> {
        let row = sqlx::query(&format!(
            "SELECT {REMITTER_COLUMNS} FROM dmt_remitters_tb WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_remitter).transpose()
    }

    async fn find_remitter_by_mobile(&self, mobile: &str) -> Result<Option<Remitter>> {
        let row = sqlx::query(&format!(
            "SELECT {REMITTER_COLUMNS} FROM dmt_remitters_tb WHERE mobile = $1"
        ))
        .bind(mobile)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_remitter).transpose()
    }

    async fn save_remitter(&self, remitter: &Remitter) -> Result<()> {
        let result = sqlx::query(
            "UPDATE dmt_remitters_tb SET
                first_name = $1,
                last_name = $2,
                pincode = $3,
                onboarding = $4,
                kyc_status = $5,
                kyc_attempts = $6,
                last_kyc_attempt_date = $7,
                monthly_limit = $8,
                monthly_used = $9,
                limit_period = $10,
                updated_at = $11
             WHERE id = $12",
        )
        .bind(&remitter.first_name)
        .bind(&remitter.last_name)
        .bind(&remitter.pincode)
        .bind(onboarding_str(remitter.onboarding))
        .bind(kyc_str(remitter.kyc_status))
        .bind(remitter.kyc_attempts as i32)
        .bind(remitter.last_kyc_attempt_date)
        .bind(remitter.monthly_limit.inner())
        .bind(remitter.monthly_used.inner())
        .bind(&remitter.limit_period)
        .bind(remitter.updated_at)
        .bind(remitter.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WalletError::RemitterNotFound(remitter.id.to_string()));
        }
        Ok(())
    }

    async fn insert_beneficiary(&self, beneficiary: Beneficiary) -> Result<()> {
        sqlx::query(
            "INSERT INTO dmt_beneficiaries_tb
                (id, remitter_id, name, account_number, ifsc, bank_name, is_verified, is_active,
                 monthly_limit, remaining_limit, limit_period, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(beneficiary.id.to_string())
        .bind(beneficiary.remitter_id.to_string())
        .bind(&beneficiary.name)
        .bind(&beneficiary.account_number)
        .bind(&beneficiary.ifsc)
        .bind(&beneficiary.bank_name)
        .bind(beneficiary.is_verified)
        .bind(beneficiary.is_active)
        .bind(beneficiary.monthly_limit.inner())
        .bind(beneficiary.remaining_limit.inner())
        .bind(&beneficiary.limit_period)
        .bind(beneficiary.created_at)
        .bind(beneficiary.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_beneficiary(&self, id: BeneficiaryId) -> Result<Option<Beneficiary>> {
        let row = sqlx::query(&format!(
            "SELECT {BENEFICIARY_COLUMNS} FROM dmt_beneficiaries_tb WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_beneficiary).transpose()
    }

    async fn save_beneficiary(&self, beneficiary: &Beneficiary) -> Result<()> {
        let result = sqlx::query(
            "UPDATE dmt_beneficiaries_tb SET
                name = $1,
                bank_name = $2,
                is_verified = $3,
                is_active = $4,
                monthly_limit = $5,
                remaining_limit = $6,
                limit_period = $7,
                updated_at = $8
             WHERE id = $9",
        )
        .bind(&beneficiary.name)
        .bind(&beneficiary.bank_name)
        .bind(beneficiary.is_verified)
        .bind(beneficiary.is_active)
        .bind(beneficiary.monthly_limit.inner())
        .bind(beneficiary.remaining_limit.inner())
        .bind(&beneficiary.limit_period)
        .bind(beneficiary.updated_at)
        .bind(beneficiary.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WalletError::BeneficiaryNotFound(beneficiary.id.to_string()));
        }
        Ok(())
    }

    async fn list_beneficiaries(&self, remitter_id: RemitterId) -> Result<Vec<Beneficiary>> {
        let rows = sqlx::query(&format!(
            "SELECT {BENEFICIARY_COLUMNS} FROM dmt_beneficiaries_tb
             WHERE remitter_id = $1
             ORDER BY id"
        ))
        .bind(remitter_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_beneficiary).collect()
    }
}
