//! Wallet balance, ledger history and top-up

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use std::sync::Arc;

use super::super::auth::AuthUser;
use super::super::state::AppState;
use super::super::types::{ApiResult, BalanceData, ListQuery, TopupBody, TransactionAck, ok};
use crate::transaction::TopupRequest;
use crate::wallet::LedgerEntry;

pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<BalanceData> {
    let balance = state.services.ledger.get_balance(user.user_id).await?;
    ok(BalanceData {
        user_id: user.user_id,
        balance,
    })
}

/// Newest entries first
pub async fn get_entries(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<LedgerEntry>> {
    let mut entries = state.services.ledger.entries(user.user_id).await?;
    entries.reverse();
    entries.truncate(query.limit());
    ok(entries)
}

/// Top-ups wait for approval unless the policy makes them instant
pub async fn topup(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<TopupBody>,
) -> ApiResult<TransactionAck> {
    tracing::info!(user_id = user.user_id, amount = %body.amount, "Top-up requested");
    let record = state
        .services
        .transactions
        .create_topup(
            user.user_id,
            TopupRequest {
                amount: body.amount,
                payment_method: body.payment_method,
                client_ref: body.client_ref,
            },
        )
        .await?;
    ok(TransactionAck::from(&record))
}
