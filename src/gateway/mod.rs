//! HTTP gateway
//!
//! axum router under `/api/v1`. Every route passes through
//! [`auth::auth_middleware`], which resolves the bearer token and applies the
//! access guard; handlers only see callers that are allowed in.

pub mod auth;
pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post, put},
};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::AppConfig;
use crate::services::WalletServices;
use auth::{API_PREFIX, JwtAuth, auth_middleware};
use handlers::{admin, commission, dmt, health, transactions, wallet};
use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let wallet_routes = Router::new()
        .route("/wallet/balance", get(wallet::get_balance))
        .route("/wallet/entries", get(wallet::get_entries))
        .route("/wallet/topup", post(wallet::topup))
        .route("/transactions", get(transactions::list))
        .route("/transactions/process", post(transactions::process))
        .route("/transactions/{id}", get(transactions::get_one));

    let dmt_routes = Router::new()
        .route("/dmt/remitter/lookup", post(dmt::lookup_remitter))
        .route("/dmt/remitter/register", post(dmt::register_remitter))
        .route("/dmt/remitter/resend-otp", post(dmt::resend_otp))
        .route("/dmt/remitter/verify-otp", post(dmt::verify_otp))
        .route("/dmt/kyc", post(dmt::kyc))
        .route(
            "/dmt/beneficiaries",
            get(dmt::list_beneficiaries).post(dmt::add_beneficiary),
        )
        .route("/dmt/beneficiaries/{id}", delete(dmt::remove_beneficiary))
        .route("/dmt/beneficiaries/{id}/verify", post(dmt::verify_beneficiary))
        .route("/dmt/calculate-charges", post(dmt::calculate_charges))
        .route("/dmt/transaction", post(dmt::transfer))
        .route("/dmt/transaction/{id}/resubmit", post(dmt::resubmit))
        .route("/dmt/transaction/{id}/status", get(dmt::check_status));

    let admin_routes = Router::new()
        .route("/admin/wallets/{user_id}", post(admin::open_wallet))
        .route("/admin/transactions/awaiting", get(admin::awaiting))
        .route("/admin/transactions/bulk-approve", patch(admin::bulk_approve))
        .route("/admin/transactions/bulk-reject", patch(admin::bulk_reject))
        .route("/admin/transactions/{id}", patch(admin::decide))
        .route(
            "/admin/dmt/transactions/bulk-check-status",
            post(admin::bulk_check_status),
        )
        .route("/admin/dmt/transactions/{id}/resolve", post(admin::resolve))
        .route(
            "/admin/commission/rules",
            get(commission::list_rules)
                .put(commission::put_rules)
                .delete(commission::delete_rule),
        )
        .route("/admin/commission/assignments", put(commission::put_assignment));

    let api = Router::new()
        .route("/health", get(health::health_check))
        .merge(wallet_routes)
        .merge(dmt_routes)
        .merge(admin_routes)
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let app = Router::new().nest(API_PREFIX, api);

    // Excluded from production builds (`--no-default-features`)
    #[cfg(feature = "mock-api")]
    let app = app.nest(
        "/internal/mock",
        Router::new().route("/deposit", post(handlers::mock::mock_deposit)),
    );

    app.with_state(state)
}

pub async fn run_server(config: &AppConfig, services: Arc<WalletServices>) -> anyhow::Result<()> {
    use anyhow::Context;

    let state = Arc::new(AppState::new(
        services,
        JwtAuth::new(&config.auth),
        config.access.clone(),
    ));
    let app = build_router(state);

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(%addr, "Gateway listening");
    tracing::info!("API: http://{}{}/*", addr, API_PREFIX);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Gateway server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
