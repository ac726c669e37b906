//! Development-only funding shortcut, compiled with the `mock-api` feature

use axum::{Json, extract::State};
use serde::Deserialize;
use std::sync::Arc;

use super::super::state::AppState;
use super::super::types::{ApiResult, BalanceData, ok};
use crate::core_types::{TransactionId, UserId};
use crate::money::Money;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockDepositBody {
    pub user_id: UserId,
    pub amount: Money,
}

/// Open the wallet if needed and credit it directly
pub async fn mock_deposit(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MockDepositBody>,
) -> ApiResult<BalanceData> {
    let ledger = &state.services.ledger;
    ledger.open_wallet(body.user_id).await?;
    let reference = format!("mock-deposit-{}", TransactionId::new());
    ledger
        .credit(body.user_id, body.amount, &reference, "mock deposit")
        .await?;
    tracing::warn!(user_id = body.user_id, amount = %body.amount, "Mock deposit credited");
    ok(BalanceData {
        user_id: body.user_id,
        balance: ledger.get_balance(body.user_id).await?,
    })
}
