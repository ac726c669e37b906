use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use std::sync::Arc;

use super::super::auth::AuthUser;
use super::super::state::AppState;
use super::super::types::{ApiResult, ListQuery, ProcessBody, TransactionAck, ok};
use crate::core_types::TransactionId;
use crate::transaction::{ProcessRequest, TransactionRecord};

/// Recharge, bill payment or voucher purchase
pub async fn process(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<ProcessBody>,
) -> ApiResult<TransactionAck> {
    tracing::info!(
        user_id = user.user_id,
        transaction_type = %body.transaction_type,
        operator = %body.operator,
        amount = %body.amount,
        "Transaction requested"
    );
    let record = state
        .services
        .transactions
        .process(
            user.user_id,
            ProcessRequest {
                transaction_type: body.transaction_type,
                amount: body.amount,
                operator: body.operator,
                metadata: body.metadata,
                client_ref: body.client_ref,
            },
        )
        .await?;
    ok(TransactionAck::from(&record))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<TransactionRecord>> {
    ok(state
        .services
        .transactions
        .list_for_user(user.user_id, query.limit())
        .await?)
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<TransactionId>,
) -> ApiResult<TransactionRecord> {
    ok(state
        .services
        .transactions
        .get_for_user(user.user_id, id)
        .await?)
}
