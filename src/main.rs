//! wallet_core server
//!
//! Usage:
//!   cargo run -- [--env dev] [--port 8080]

use anyhow::Context;
use std::sync::Arc;

use wallet_core::config::AppConfig;
use wallet_core::gateway;
use wallet_core::services::WalletServices;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut config = AppConfig::load(&env)?;
    if let Some(port) = get_port_override() {
        config.gateway.port = port;
    }
    let _log_guard = wallet_core::logging::init_logging(&config);

    tracing::info!(env = %env, "Starting wallet_core");

    let services = Arc::new(
        WalletServices::build(&config)
            .await
            .context("Failed to initialise services")?,
    );
    let worker = services.spawn_reconciliation(&config);

    let result = gateway::run_server(&config, services).await;
    if let Some(worker) = worker {
        worker.abort();
    }
    tracing::info!("wallet_core stopped");
    result
}
