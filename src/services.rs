//! Service wiring
//!
//! Builds every component from one [`AppConfig`]. PostgreSQL backs the wallet,
//! transaction and DMT stores when `postgres_url` is set; otherwise everything
//! lives in memory.

use anyhow::Context;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::approval::ApprovalWorkflow;
use crate::clock::{Clock, SystemClock};
use crate::commission::CommissionEngine;
use crate::config::{AppConfig, ProviderKind};
use crate::db::Database;
use crate::dmt::{DmtOrchestrator, DmtStore, InMemoryDmtStore, PgDmtStore, ReconciliationWorker};
use crate::events::{BroadcastPublisher, EventPublisher, FanoutPublisher, TracingPublisher};
use crate::provider::{HttpProvider, ProviderGateway, ResilientProvider};
use crate::transaction::{
    InMemoryTransactionStore, PgTransactionStore, TransactionService, TransactionStore,
};
use crate::wallet::{InMemoryWalletStore, PgWalletStore, WalletLedger, WalletStore};

pub struct WalletServices {
    pub clock: Arc<dyn Clock>,
    /// Subscribe here for push notifications
    pub broadcast: Arc<BroadcastPublisher>,
    pub ledger: Arc<WalletLedger>,
    pub commission: Arc<CommissionEngine>,
    pub transactions: Arc<TransactionService>,
    pub approvals: Arc<ApprovalWorkflow>,
    pub dmt: Arc<DmtOrchestrator>,
    pub database: Option<Arc<Database>>,
}

/// Stores and collaborators that differ between deployments and tests
pub struct ServiceParts {
    pub clock: Arc<dyn Clock>,
    pub wallets: Arc<dyn WalletStore>,
    pub transactions: Arc<dyn TransactionStore>,
    pub dmt: Arc<dyn DmtStore>,
    pub provider: Arc<dyn ProviderGateway>,
    pub database: Option<Arc<Database>>,
}

impl WalletServices {
    /// Connect stores and the provider described by `config`
    pub async fn build(config: &AppConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.dmt.timezone_offset_secs));
        let provider = build_provider(config)?;

        let parts = match &config.postgres_url {
            Some(url) => {
                let db = Database::connect(url, config.postgres_max_connections)
                    .await
                    .context("Failed to connect to PostgreSQL")?;
                db.migrate().await.context("Failed to apply migrations")?;
                info!("PostgreSQL stores enabled");
                let pool = db.pool().clone();
                ServiceParts {
                    clock,
                    wallets: Arc::new(PgWalletStore::new(pool.clone())),
                    transactions: Arc::new(PgTransactionStore::new(pool.clone())),
                    dmt: Arc::new(PgDmtStore::new(pool)),
                    provider,
                    database: Some(Arc::new(db)),
                }
            }
            None => {
                warn!("postgres_url not set, using in-memory stores");
                ServiceParts {
                    clock,
                    wallets: Arc::new(InMemoryWalletStore::new()),
                    transactions: Arc::new(InMemoryTransactionStore::new()),
                    dmt: Arc::new(InMemoryDmtStore::new()),
                    provider,
                    database: None,
                }
            }
        };
        Self::assemble(config, parts)
    }

    pub fn assemble(config: &AppConfig, parts: ServiceParts) -> anyhow::Result<Self> {
        let broadcast = Arc::new(BroadcastPublisher::new(config.event_channel_capacity));
        let events: Arc<dyn EventPublisher> = Arc::new(FanoutPublisher::new(vec![
            broadcast.clone(),
            Arc::new(TracingPublisher),
        ]));

        let commission = Arc::new(
            CommissionEngine::with_rules(&config.commission.rules)
                .context("Invalid commission rules")?,
        );
        let ledger = Arc::new(WalletLedger::new(
            parts.wallets,
            parts.clock.clone(),
            events.clone(),
        ));
        let transactions = Arc::new(TransactionService::new(
            parts.transactions,
            ledger.clone(),
            commission.clone(),
            config.approval.policy(),
            parts.clock.clone(),
            events.clone(),
        )
        .with_limits(config.limits));
        let approvals = Arc::new(ApprovalWorkflow::new(transactions.clone()));
        let dmt = Arc::new(DmtOrchestrator::new(
            parts.dmt,
            transactions.clone(),
            parts.provider,
            events,
            config.dmt.clone(),
        ));

        Ok(Self {
            clock: parts.clock,
            broadcast,
            ledger,
            commission,
            transactions,
            approvals,
            dmt,
            database: parts.database,
        })
    }

    /// Start the reconciliation worker unless disabled
    pub fn spawn_reconciliation(&self, config: &AppConfig) -> Option<JoinHandle<()>> {
        if !config.reconciliation.enabled {
            info!("Reconciliation worker disabled");
            return None;
        }
        let worker =
            ReconciliationWorker::new(self.dmt.clone(), config.reconciliation.worker_config());
        Some(tokio::spawn(async move {
            worker.run().await;
        }))
    }
}

fn build_provider(config: &AppConfig) -> anyhow::Result<Arc<dyn ProviderGateway>> {
    let inner: Arc<dyn ProviderGateway> = match config.provider.kind {
        ProviderKind::Http => {
            let base_url = config
                .provider
                .base_url
                .as_deref()
                .context("provider.base_url is required for the http provider")?;
            Arc::new(
                HttpProvider::new(
                    base_url,
                    config.provider.api_key.clone(),
                    config.provider.timeout(),
                )
                .map_err(|e| anyhow::anyhow!("Failed to build provider client: {}", e))?,
            )
        }
        ProviderKind::Mock => mock_provider()?,
    };
    info!(provider = inner.name(), "Provider gateway configured");
    Ok(Arc::new(ResilientProvider::new(
        inner,
        config.provider.retry_policy(),
    )))
}

#[cfg(feature = "mock-api")]
fn mock_provider() -> anyhow::Result<Arc<dyn ProviderGateway>> {
    warn!("Using the in-process mock provider");
    Ok(Arc::new(crate::provider::MockProvider::new()))
}

#[cfg(not(feature = "mock-api"))]
fn mock_provider() -> anyhow::Result<Arc<dyn ProviderGateway>> {
    anyhow::bail!("provider.kind = mock requires the mock-api feature")
}
