use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use super::super::state::AppState;
use super::super::types::{ApiResult, RulesBody, SchemeAssignmentBody, ok};
use crate::commission::RuleSpec;
use crate::core_types::UserId;

pub async fn list_rules(State(state): State<Arc<AppState>>) -> ApiResult<Vec<RuleSpec>> {
    ok(state.services.commission.rules())
}

/// Upsert every rule in the body; the first invalid rule stops the batch
pub async fn put_rules(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RulesBody>,
) -> ApiResult<Vec<RuleSpec>> {
    let commission = &state.services.commission;
    for spec in &body.rules {
        commission.upsert_rule(spec)?;
    }
    ok(commission.rules())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemeAssignment {
    pub user_id: UserId,
    pub scheme: Option<String>,
}

pub async fn put_assignment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SchemeAssignmentBody>,
) -> ApiResult<SchemeAssignment> {
    let commission = &state.services.commission;
    commission.assign_scheme(body.user_id, body.scheme.as_deref());
    ok(SchemeAssignment {
        user_id: body.user_id,
        scheme: commission.scheme_of(body.user_id),
    })
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRef {
    pub scope: crate::commission::ScopeKind,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub operator: String,
    pub transaction_type: crate::transaction::TransactionType,
}

#[derive(Debug, Serialize)]
pub struct Removed {
    pub removed: bool,
}

pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RuleRef>,
) -> ApiResult<Removed> {
    use crate::commission::{RuleScope, ScopeKind};
    use crate::error::WalletError;

    let scope = match body.scope {
        ScopeKind::Global => RuleScope::Global,
        ScopeKind::Scheme => RuleScope::Scheme(
            body.scheme
                .ok_or_else(|| WalletError::Validation("scheme is required".into()))?,
        ),
        ScopeKind::User => RuleScope::User(
            body.user_id
                .ok_or_else(|| WalletError::Validation("userId is required".into()))?,
        ),
    };
    let removed = state
        .services
        .commission
        .remove_rule(&scope, &body.operator, body.transaction_type);
    ok(Removed { removed })
}
