use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use std::sync::Arc;

use super::super::state::AppState;
use super::super::types::ApiResponse;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub timestamp_ms: i64,
    pub storage: &'static str,
}

/// Liveness plus a database ping when PostgreSQL is configured
///
/// - Healthy: 200 OK + {code: 0, data: {timestampMs, storage}}
/// - Unhealthy: 503 + {code: 503, error: "SERVICE_UNAVAILABLE"}
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let now_ms = state.services.clock.now().timestamp_millis();
    let storage = match &state.services.database {
        Some(db) => {
            if let Err(e) = db.health_check().await {
                tracing::error!(error = %e, "[HEALTH] PostgreSQL ping failed");
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ApiResponse {
                        code: 503,
                        msg: "unavailable".to_string(),
                        error: Some("SERVICE_UNAVAILABLE".to_string()),
                        data: None,
                    }),
                );
            }
            "postgres"
        }
        None => "memory",
    };
    (
        StatusCode::OK,
        Json(ApiResponse::success(HealthResponse {
            timestamp_ms: now_ms,
            storage,
        })),
    )
}
