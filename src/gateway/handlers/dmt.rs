//! Remitter onboarding, KYC, beneficiaries and transfers

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use std::sync::Arc;

use super::super::auth::AuthUser;
use super::super::state::AppState;
use super::super::types::{
    AddBeneficiaryBody, ApiResult, BeneficiaryQuery, ChargesBody, KycBody, LookupBody,
    RemitterBody, TransactionAck, TransferBody, VerifyOtpBody, ok,
};
use crate::core_types::{BeneficiaryId, TransactionId};
use crate::dmt::{
    Beneficiary, ChargesPreview, RegisterRemitterRequest, Registration, Remitter, RemitterLookup,
    TransferRequest,
};
use crate::transaction::TransactionRecord;

// ============================================================================
// Remitter
// ============================================================================

pub async fn lookup_remitter(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<LookupBody>,
) -> ApiResult<RemitterLookup> {
    ok(state
        .services
        .dmt
        .lookup_remitter(user.user_id, &body.mobile)
        .await?)
}

pub async fn register_remitter(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<RegisterRemitterRequest>,
) -> ApiResult<Registration> {
    ok(state
        .services
        .dmt
        .register_remitter(user.user_id, body)
        .await?)
}

pub async fn resend_otp(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<RemitterBody>,
) -> ApiResult<Registration> {
    ok(state
        .services
        .dmt
        .resend_otp(user.user_id, body.remitter_id)
        .await?)
}

pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<VerifyOtpBody>,
) -> ApiResult<Remitter> {
    ok(state
        .services
        .dmt
        .verify_otp(user.user_id, body.remitter_id, &body.otp)
        .await?)
}

pub async fn kyc(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<KycBody>,
) -> ApiResult<Remitter> {
    ok(state
        .services
        .dmt
        .perform_kyc(user.user_id, body.remitter_id, &body.document)
        .await?)
}

// ============================================================================
// Beneficiaries
// ============================================================================

pub async fn list_beneficiaries(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<BeneficiaryQuery>,
) -> ApiResult<Vec<Beneficiary>> {
    ok(state
        .services
        .dmt
        .list_beneficiaries(user.user_id, query.remitter_id)
        .await?)
}

pub async fn add_beneficiary(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<AddBeneficiaryBody>,
) -> ApiResult<Beneficiary> {
    ok(state
        .services
        .dmt
        .add_beneficiary(user.user_id, body.remitter_id, body.beneficiary)
        .await?)
}

pub async fn verify_beneficiary(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<BeneficiaryId>,
) -> ApiResult<Beneficiary> {
    ok(state
        .services
        .dmt
        .verify_beneficiary(user.user_id, id)
        .await?)
}

pub async fn remove_beneficiary(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<BeneficiaryId>,
) -> ApiResult<Beneficiary> {
    ok(state
        .services
        .dmt
        .remove_beneficiary(user.user_id, id)
        .await?)
}

// ============================================================================
// Transfers
// ============================================================================

pub async fn calculate_charges(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<ChargesBody>,
) -> ApiResult<ChargesPreview> {
    ok(state
        .services
        .dmt
        .calculate_charges(user.user_id, body.amount, body.mode)
        .await?)
}

/// Ambiguous provider answers return `pending`, not an error
pub async fn transfer(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<TransferBody>,
) -> ApiResult<TransactionAck> {
    tracing::info!(
        user_id = user.user_id,
        remitter_id = %body.remitter_id,
        beneficiary_id = %body.beneficiary_id,
        amount = %body.amount,
        mode = %body.mode,
        "Transfer requested"
    );
    let record = state
        .services
        .dmt
        .transfer(
            user.user_id,
            TransferRequest {
                remitter_id: body.remitter_id,
                beneficiary_id: body.beneficiary_id,
                amount: body.amount,
                mode: body.mode,
                client_ref: body.client_ref,
            },
        )
        .await?;
    ok(TransactionAck::from(&record))
}

pub async fn resubmit(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<TransactionId>,
) -> ApiResult<TransactionAck> {
    let record = state.services.dmt.resubmit(user.user_id, id).await?;
    ok(TransactionAck::from(&record))
}

pub async fn check_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<TransactionId>,
) -> ApiResult<TransactionRecord> {
    ok(state
        .services
        .dmt
        .check_status_for_user(user.user_id, id)
        .await?)
}
