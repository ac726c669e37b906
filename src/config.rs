use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::access::AccessPolicy;
use crate::commission::RuleSpec;
use crate::dmt::{DmtConfig, ReconciliationConfig};
use crate::provider::RetryPolicy;
use crate::transaction::{AmountLimits, ApprovalPolicy, TransactionType};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// In-memory stores when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub postgres_max_connections: u32,
    pub auth: AuthConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub dmt: DmtConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationSettings,
    #[serde(default)]
    pub approval: ApprovalSettings,
    #[serde(default)]
    pub limits: AmountLimits,
    #[serde(default)]
    pub access: AccessPolicy,
    #[serde(default)]
    pub commission: CommissionSettings,
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
}

fn default_max_connections() -> u32 {
    20
}

fn default_event_capacity() -> usize {
    1024
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    /// HS256 shared secret
    pub jwt_secret: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,
}

fn default_leeway() -> u64 {
    30
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Mock,
    Http,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Mock,
            base_url: None,
            api_key: None,
            timeout_ms: 10_000,
            max_retries: 2,
            backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.timeout(),
            max_retries: self.max_retries,
            base_backoff: Duration::from_millis(self.backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ReconciliationSettings {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    pub min_pending_age_secs: u64,
    /// Pending transfers older than this are failed and reversed
    pub window_secs: u64,
    pub batch_size: usize,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        let defaults = ReconciliationConfig::default();
        Self {
            enabled: true,
            scan_interval_secs: defaults.scan_interval.as_secs(),
            min_pending_age_secs: defaults.min_pending_age.as_secs(),
            window_secs: defaults.window.as_secs(),
            batch_size: defaults.batch_size,
        }
    }
}

impl ReconciliationSettings {
    pub fn worker_config(&self) -> ReconciliationConfig {
        ReconciliationConfig {
            scan_interval: Duration::from_secs(self.scan_interval_secs),
            min_pending_age: Duration::from_secs(self.min_pending_age_secs),
            window: Duration::from_secs(self.window_secs),
            batch_size: self.batch_size,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ApprovalSettings {
    pub requires_approval: Vec<TransactionType>,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            requires_approval: vec![
                TransactionType::Topup,
                TransactionType::MobileRecharge,
                TransactionType::DthRecharge,
                TransactionType::BillPayment,
            ],
        }
    }
}

impl ApprovalSettings {
    pub fn policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::new(self.requires_approval.iter().copied())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CommissionSettings {
    pub rules: Vec<RuleSpec>,
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config: {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(content).context("Failed to parse config yaml")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.len() < 16 {
            bail!("auth.jwt_secret must be at least 16 characters");
        }
        if self.provider.kind == ProviderKind::Http && self.provider.base_url.is_none() {
            bail!("provider.base_url is required for the http provider");
        }
        if self.dmt.min_transfer_amount > self.dmt.max_transfer_amount {
            bail!("dmt.min_transfer_amount exceeds dmt.max_transfer_amount");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;

    const MINIMAL: &str = r#"
log_level: info
log_dir: ./logs
log_file: wallet.log
use_json: false
rotation: daily
gateway:
  host: 127.0.0.1
  port: 8080
auth:
  jwt_secret: "0123456789abcdef0123"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert!(config.postgres_url.is_none());
        assert_eq!(config.provider.kind, ProviderKind::Mock);
        assert_eq!(config.dmt.max_kyc_attempts_per_day, 2);
        assert_eq!(config.dmt.min_transfer_amount, Money::from_rupees(100));
        assert!(config.approval.policy().requires_approval(TransactionType::Topup));
        assert!(!config.access.require_location_for_dmt);
        assert_eq!(config.auth.leeway_secs, 30);
    }

    #[test]
    fn test_sections_override() {
        let yaml = format!(
            "{}{}",
            MINIMAL,
            r#"
provider:
  kind: http
  base_url: "https://provider.example"
  timeout_ms: 2500
dmt:
  remitter_monthly_limit: "10000"
approval:
  requires_approval: [topup]
limits:
  max_topup: "50000"
access:
  require_location_for_dmt: true
commission:
  rules:
    - scope: global
      operator: imps
      transactionType: dmt-transfer
      kind: fixed
      value: "5"
"#
        );
        let config = AppConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.provider.retry_policy().timeout, Duration::from_millis(2500));
        assert_eq!(config.dmt.remitter_monthly_limit, Money::from_rupees(10_000));
        assert!(!config.approval.policy().requires_approval(TransactionType::BillPayment));
        assert!(config.access.require_location_for_dmt);
        assert_eq!(config.limits.max_topup, Money::from_rupees(50_000));
        assert_eq!(config.limits.max_payment, Money::from_rupees(100_000));
        assert_eq!(config.commission.rules.len(), 1);
    }

    #[test]
    fn test_http_provider_needs_url() {
        let yaml = format!("{}provider:\n  kind: http\n", MINIMAL);
        assert!(AppConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_short_secret_rejected() {
        let yaml = MINIMAL.replace("0123456789abcdef0123", "short");
        assert!(AppConfig::from_yaml(&yaml).is_err());
    }
}
