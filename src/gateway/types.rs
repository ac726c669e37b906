//! API envelope, error mapping and request bodies
//!
//! - `ApiResponse<T>`: unified `{code, msg, data}` wrapper
//! - `ApiError`: `WalletError` rendered with its HTTP status and stable code
//! - request DTOs (camelCase JSON)

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::core_types::{BeneficiaryId, RemitterId, TransactionId, UserId};
use crate::dmt::{AddBeneficiaryRequest, TransferMode};
use crate::error::WalletError;
use crate::money::Money;
use crate::transaction::{TransactionMetadata, TransactionRecord, TransactionStatus, TransactionType};

// ============================================================================
// Unified API Response Format
// ============================================================================

/// All API responses follow this structure:
/// - code: 0 = success, otherwise the HTTP status
/// - msg: short message description
/// - error: stable error code (errors only)
/// - data: actual data (success only)
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            error: None,
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(status: StatusCode, error: &str, msg: impl Into<String>) -> Self {
        Self {
            code: i32::from(status.as_u16()),
            msg: msg.into(),
            error: Some(error.to_string()),
            data: None,
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub msg: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR",
            msg: msg.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED",
            msg: msg.into(),
        }
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "SERVICE_UNAVAILABLE",
            msg: msg.into(),
        }
    }
}

impl From<WalletError> for ApiError {
    fn from(e: WalletError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = e.code(), error = %e, "Request failed");
        } else if matches!(e, WalletError::InvalidStateTransition(_)) {
            tracing::warn!(code = e.code(), error = %e, "Rejected state transition");
        }
        Self {
            status,
            code: e.code(),
            msg: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiResponse::error(self.status, self.code, self.msg)),
        )
            .into_response()
    }
}

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceData {
    pub user_id: UserId,
    pub balance: Money,
}

/// Short answer for create-style calls
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAck {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub amount: Money,
    pub charges: Money,
    pub total_amount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<&TransactionRecord> for TransactionAck {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            transaction_id: record.id,
            status: record.status,
            amount: record.amount,
            charges: record.charges,
            total_amount: record.total_amount,
            failure_reason: record.failure_reason.clone(),
        }
    }
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopupBody {
    pub amount: Money,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub client_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBody {
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub operator: String,
    pub metadata: TransactionMetadata,
    #[serde(default)]
    pub client_ref: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(50).clamp(1, 500)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Approve,
    Reject,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionBody {
    pub action: DecisionAction,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkApproveBody {
    pub transaction_ids: Vec<TransactionId>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRejectBody {
    pub transaction_ids: Vec<TransactionId>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCheckBody {
    pub transaction_ids: Vec<TransactionId>,
}

#[derive(Debug, Deserialize)]
pub struct LookupBody {
    pub mobile: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemitterBody {
    pub remitter_id: RemitterId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpBody {
    pub remitter_id: RemitterId,
    pub otp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KycBody {
    pub remitter_id: RemitterId,
    /// Forwarded to the provider untouched
    #[serde(default)]
    pub document: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeneficiaryQuery {
    pub remitter_id: RemitterId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddBeneficiaryBody {
    pub remitter_id: RemitterId,
    #[serde(flatten)]
    pub beneficiary: AddBeneficiaryRequest,
}

#[derive(Debug, Deserialize)]
pub struct ChargesBody {
    pub amount: Money,
    pub mode: TransferMode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBody {
    pub remitter_id: RemitterId,
    pub beneficiary_id: BeneficiaryId,
    pub amount: Money,
    pub mode: TransferMode,
    #[serde(default)]
    pub client_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemeAssignmentBody {
    pub user_id: UserId,
    /// `null` clears the assignment
    #[serde(default)]
    pub scheme: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RulesBody {
    pub rules: Vec<crate::commission::RuleSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_carries_code() {
        let err = ApiError::from(WalletError::KycNotVerified);
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        let body = serde_json::to_value(ApiResponse::error(err.status, err.code, err.msg)).unwrap();
        assert_eq!(body["code"], 422);
        assert_eq!(body["error"], "KYC_NOT_VERIFIED");
        assert!(body.get("data").is_none());
    }

    #[test]
    fn test_transfer_body_parses_camel_case() {
        let json = format!(
            r#"{{"remitterId":"{}","beneficiaryId":"{}","amount":"200.00","mode":"IMPS"}}"#,
            RemitterId::new(),
            BeneficiaryId::new()
        );
        let body: TransferBody = serde_json::from_str(&json).unwrap();
        assert_eq!(body.amount, Money::from_rupees(200));
        assert_eq!(body.mode, TransferMode::Imps);
        assert!(body.client_ref.is_none());
    }

    #[test]
    fn test_list_limit_is_clamped() {
        assert_eq!(ListQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(ListQuery { limit: Some(10_000) }.limit(), 500);
        assert_eq!(ListQuery::default().limit(), 50);
    }
}
