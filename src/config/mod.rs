//! Configuration: the `config` crate layered over environment variables,
//! following the `AppConfig::new()` construction pattern used elsewhere in
//! this codebase, plus `dotenvy` for local `.env` loading. Recognizes the
//! `fluxpay.*` keys for the idempotency gate, outbox publisher, and saga
//! orchestrator, plus the infra connection strings.
//!
//! No Vault/secrets-manager integration: secrets come from environment
//! variables like the rest of this pack's services (see DESIGN.md for the
//! dropped `hashicorp_vault` dependency).

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub pg_adapter: PgAdapterConfig,
    #[serde(default)]
    pub fluxpay: FluxpayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Absent means the idempotency gate runs durable-store-only.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_client_id() -> String {
    "fluxpay-engine".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PgAdapterConfig {
    pub base_url: String,
    #[serde(default = "default_pg_timeout_ms", rename = "timeout_ms")]
    pub timeout_ms: u64,
}

fn default_pg_timeout_ms() -> u64 {
    5_000
}

impl PgAdapterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FluxpayConfig {
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub saga: SagaConfig,
    #[serde(default)]
    pub tenants: TenantsConfig,
}

impl Default for FluxpayConfig {
    fn default() -> Self {
        Self {
            idempotency: IdempotencyConfig::default(),
            outbox: OutboxConfig::default(),
            saga: SagaConfig::default(),
            tenants: TenantsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_idempotency_ttl_secs", rename = "ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_key_prefix")]
    pub redis_key_prefix: String,
    #[serde(default = "default_redis_timeout_ms")]
    pub redis_timeout_ms: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_idempotency_ttl_secs(),
            redis_key_prefix: default_key_prefix(),
            redis_timeout_ms: default_redis_timeout_ms(),
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_idempotency_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_key_prefix() -> String {
    "fluxpay:idem".into()
}

fn default_redis_timeout_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_true", rename = "cleanup_enabled")]
    pub cleanup_enabled: bool,
    #[serde(default = "default_cleanup_retention_days")]
    pub cleanup_retention_days: i64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            polling_interval_ms: default_polling_interval_ms(),
            cleanup_enabled: true,
            cleanup_retention_days: default_cleanup_retention_days(),
        }
    }
}

impl OutboxConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

fn default_batch_size() -> i64 {
    100
}

fn default_max_retries() -> i32 {
    3
}

fn default_polling_interval_ms() -> u64 {
    100
}

fn default_cleanup_retention_days() -> i64 {
    7
}

#[derive(Debug, Clone, Deserialize)]
pub struct SagaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_saga_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    #[serde(default = "default_max_retries", rename = "compensation_max_retries")]
    pub compensation_max_retries: i32,
    #[serde(default = "default_compensation_retry_delay_secs")]
    pub compensation_retry_delay_secs: u64,
    #[serde(default = "default_saga_cleanup_retention_days")]
    pub cleanup_retention_days: i64,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_saga_timeout_secs(),
            step_timeout_secs: default_step_timeout_secs(),
            compensation_max_retries: default_max_retries(),
            compensation_retry_delay_secs: default_compensation_retry_delay_secs(),
            cleanup_retention_days: default_saga_cleanup_retention_days(),
        }
    }
}

fn default_saga_timeout_secs() -> u64 {
    30
}

fn default_step_timeout_secs() -> u64 {
    10
}

fn default_compensation_retry_delay_secs() -> u64 {
    1
}

fn default_saga_cleanup_retention_days() -> i64 {
    30
}

fn default_true() -> bool {
    true
}

/// Per-tenant feature toggles, keyed by tenant id
/// (`fluxpay.tenants.configs.<id>.*`).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TenantsConfig {
    #[serde(default)]
    pub configs: HashMap<String, TenantOverride>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantOverride {
    pub rate_limit: Option<u32>,
    #[serde(default)]
    pub credit_enabled: bool,
    #[serde(default)]
    pub subscription_enabled: bool,
    pub webhook_url: Option<String>,
}

impl AppConfig {
    /// Loads configuration from environment variables (`.env` first, if
    /// present). Nested keys use `__` as the separator, e.g.
    /// `FLUXPAY__OUTBOX__BATCH_SIZE=50`.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let raw = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to load configuration: {e}")))?;

        raw.try_deserialize()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to parse configuration: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fluxpay_defaults_match_documented_values() {
        let cfg = FluxpayConfig::default();
        assert!(cfg.idempotency.enabled);
        assert_eq!(cfg.idempotency.ttl_secs, 24 * 60 * 60);
        assert_eq!(cfg.outbox.batch_size, 100);
        assert_eq!(cfg.outbox.max_retries, 3);
        assert_eq!(cfg.outbox.polling_interval_ms, 100);
        assert_eq!(cfg.outbox.cleanup_retention_days, 7);
        assert_eq!(cfg.saga.timeout_secs, 30);
        assert_eq!(cfg.saga.step_timeout_secs, 10);
        assert_eq!(cfg.saga.compensation_max_retries, 3);
        assert_eq!(cfg.saga.cleanup_retention_days, 30);
    }
}
