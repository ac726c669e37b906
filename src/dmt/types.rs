//! DMT domain types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError};

use crate::clock::IST_OFFSET_SECS;
use crate::core_types::{BeneficiaryId, RemitterId, TransactionId, UserId};
use crate::money::Money;

/// Bank rail for a transfer; also the commission operator key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransferMode {
    Imps,
    Neft,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Imps => "imps",
            TransferMode::Neft => "neft",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Imps => write!(f, "IMPS"),
            TransferMode::Neft => write!(f, "NEFT"),
        }
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "imps" => Ok(TransferMode::Imps),
            "neft" => Ok(TransferMode::Neft),
            other => Err(format!("unknown transfer mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    Unverified,
    /// Provider answer outstanding
    Pending,
    Verified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    /// Profile stored, mobile not yet confirmed
    OtpPending,
    Registered,
}

/// Registered sender for DMT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Remitter {
    pub id: RemitterId,
    /// Wallet that funds this remitter's transfers
    pub user_id: UserId,
    pub mobile: String,
    pub first_name: String,
    pub last_name: String,
    pub pincode: Option<String>,
    pub onboarding: OnboardingStatus,
    pub kyc_status: KycStatus,
    pub kyc_attempts: u32,
    pub last_kyc_attempt_date: Option<NaiveDate>,
    pub monthly_limit: Money,
    pub monthly_used: Money,
    /// Period `monthly_used` belongs to ("2024-03")
    pub limit_period: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Remitter {
    pub fn remaining_limit(&self) -> Money {
        self.monthly_limit.saturating_sub(self.monthly_used)
    }

    /// Attempts counted against `today`
    pub fn attempts_on(&self, today: NaiveDate) -> u32 {
        if self.last_kyc_attempt_date == Some(today) {
            self.kyc_attempts
        } else {
            0
        }
    }

    /// Start a fresh limit period. Returns true if anything changed.
    pub fn roll_period(&mut self, period: &str) -> bool {
        if self.limit_period == period {
            return false;
        }
        self.limit_period = period.to_string();
        self.monthly_used = Money::ZERO;
        true
    }

    pub fn is_registered(&self) -> bool {
        self.onboarding == OnboardingStatus::Registered
    }
}

/// Bank account recipient owned by one remitter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beneficiary {
    pub id: BeneficiaryId,
    pub remitter_id: RemitterId,
    pub name: String,
    pub account_number: String,
    pub ifsc: String,
    pub bank_name: Option<String>,
    pub is_verified: bool,
    pub is_active: bool,
    pub monthly_limit: Money,
    pub remaining_limit: Money,
    pub limit_period: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Beneficiary {
    pub fn is_eligible(&self) -> bool {
        self.is_verified && self.is_active
    }

    pub fn roll_period(&mut self, period: &str) -> bool {
        if self.limit_period == period {
            return false;
        }
        self.limit_period = period.to_string();
        self.remaining_limit = self.monthly_limit;
        true
    }

    /// Account number with all but the last four digits hidden
    pub fn masked_account(&self) -> String {
        let len = self.account_number.len();
        let visible = len.saturating_sub(4);
        format!("{}{}", "X".repeat(visible), &self.account_number[visible..])
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRemitterRequest {
    #[validate(custom(function = "validate_mobile"))]
    pub mobile: String,
    #[validate(length(min = 1, max = 64))]
    pub first_name: String,
    #[validate(length(min = 1, max = 64))]
    pub last_name: String,
    #[validate(custom(function = "validate_pincode"))]
    pub pincode: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddBeneficiaryRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(custom(function = "validate_account_number"))]
    pub account_number: String,
    #[validate(custom(function = "validate_ifsc"))]
    pub ifsc: String,
    pub bank_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub remitter_id: RemitterId,
    pub beneficiary_id: BeneficiaryId,
    pub amount: Money,
    pub mode: TransferMode,
    pub client_ref: Option<String>,
}

/// Operator decision for a stuck transfer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Completed { reference: String },
    Failed { reason: String },
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemitterLookup {
    pub registered: bool,
    pub remitter: Option<Remitter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub remitter: Remitter,
    pub requires_otp: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargesPreview {
    pub amount: Money,
    pub charges: Money,
    pub total_amount: Money,
    pub mode: TransferMode,
}

/// Limits and KYC policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmtConfig {
    pub max_kyc_attempts_per_day: u32,
    pub remitter_monthly_limit: Money,
    pub beneficiary_monthly_limit: Money,
    pub min_transfer_amount: Money,
    pub max_transfer_amount: Money,
    /// Business calendar offset for KYC days and limit months
    pub timezone_offset_secs: i32,
}

impl Default for DmtConfig {
    fn default() -> Self {
        Self {
            max_kyc_attempts_per_day: 2,
            remitter_monthly_limit: Money::from_rupees(25_000),
            beneficiary_monthly_limit: Money::from_rupees(25_000),
            min_transfer_amount: Money::from_rupees(100),
            max_transfer_amount: Money::from_rupees(25_000),
            timezone_offset_secs: IST_OFFSET_SECS,
        }
    }
}

/// Result of one id in a bulk status check
pub type StatusCheck = crate::approval::BulkOutcome;

/// Transfer id paired with its idempotency key
pub(crate) fn idempotency_key(id: TransactionId) -> String {
    id.to_string()
}

// ============================================================================
// Field validators
// ============================================================================

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Ten digits, first digit 6-9
pub fn validate_mobile(mobile: &str) -> Result<(), ValidationError> {
    let bytes = mobile.as_bytes();
    let ok = bytes.len() == 10
        && bytes.iter().all(u8::is_ascii_digit)
        && matches!(bytes[0], b'6'..=b'9');
    if ok {
        Ok(())
    } else {
        Err(invalid("mobile", "mobile must be 10 digits starting with 6-9"))
    }
}

pub fn validate_pincode(pincode: &str) -> Result<(), ValidationError> {
    if pincode.len() == 6 && pincode.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(invalid("pincode", "pincode must be 6 digits"))
    }
}

/// 9 to 18 digits
pub fn validate_account_number(account: &str) -> Result<(), ValidationError> {
    if (9..=18).contains(&account.len()) && account.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(invalid("account_number", "account number must be 9-18 digits"))
    }
}

/// Four letters, a zero, then six alphanumerics (`SBIN0001234`)
pub fn validate_ifsc(ifsc: &str) -> Result<(), ValidationError> {
    let bytes = ifsc.as_bytes();
    let ok = bytes.len() == 11
        && bytes[..4].iter().all(u8::is_ascii_uppercase)
        && bytes[4] == b'0'
        && bytes[5..]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(invalid("ifsc", "IFSC must look like AAAA0XXXXXX"))
    }
}
