//! Administrator decisions: approvals, manual DMT resolution, wallet opening

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use std::sync::Arc;

use super::super::auth::AuthUser;
use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, BalanceData, BulkApproveBody, BulkCheckBody, BulkRejectBody,
    DecisionAction, DecisionBody, ListQuery, TransactionAck, ok,
};
use crate::approval::BulkOutcome;
use crate::core_types::{TransactionId, UserId};
use crate::dmt::{Resolution, StatusCheck};
use crate::transaction::TransactionRecord;

/// Bulk requests above this size are refused
const MAX_BULK: usize = 200;

fn check_bulk(ids: &[TransactionId]) -> Result<(), ApiError> {
    if ids.is_empty() {
        return Err(ApiError::bad_request("transactionIds must not be empty"));
    }
    if ids.len() > MAX_BULK {
        return Err(ApiError::bad_request(format!(
            "at most {} transactions per request",
            MAX_BULK
        )));
    }
    Ok(())
}

/// Open the wallet for a newly signed-up user. Idempotent.
pub async fn open_wallet(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> ApiResult<BalanceData> {
    let wallet = state.services.ledger.open_wallet(user_id).await?;
    ok(BalanceData {
        user_id,
        balance: wallet.balance,
    })
}

/// Review queue, oldest first
pub async fn awaiting(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<TransactionRecord>> {
    ok(state.services.approvals.awaiting(query.limit()).await?)
}

pub async fn decide(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<TransactionId>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<TransactionAck> {
    let approvals = &state.services.approvals;
    let record = match body.action {
        DecisionAction::Approve => {
            approvals
                .approve(id, &admin.actor(), body.external_reference, body.notes)
                .await?
        }
        DecisionAction::Reject => {
            approvals
                .reject(id, &admin.actor(), body.reason.as_deref().unwrap_or_default())
                .await?
        }
    };
    ok(TransactionAck::from(&record))
}

pub async fn bulk_approve(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthUser>,
    Json(body): Json<BulkApproveBody>,
) -> ApiResult<Vec<BulkOutcome>> {
    check_bulk(&body.transaction_ids)?;
    ok(state
        .services
        .approvals
        .bulk_approve(&body.transaction_ids, &admin.actor(), body.notes)
        .await)
}

pub async fn bulk_reject(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthUser>,
    Json(body): Json<BulkRejectBody>,
) -> ApiResult<Vec<BulkOutcome>> {
    check_bulk(&body.transaction_ids)?;
    ok(state
        .services
        .approvals
        .bulk_reject(&body.transaction_ids, &admin.actor(), &body.reason)
        .await)
}

pub async fn bulk_check_status(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BulkCheckBody>,
) -> ApiResult<Vec<StatusCheck>> {
    check_bulk(&body.transaction_ids)?;
    ok(state.services.dmt.bulk_check_status(&body.transaction_ids).await)
}

/// Operator decision for a transfer stuck in `pending`
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthUser>,
    Path(id): Path<TransactionId>,
    Json(resolution): Json<Resolution>,
) -> ApiResult<TransactionAck> {
    let record = state
        .services
        .dmt
        .manual_resolve(id, &admin.actor(), resolution)
        .await?;
    ok(TransactionAck::from(&record))
}
