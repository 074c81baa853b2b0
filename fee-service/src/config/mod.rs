use crate::models::CreditApplyOrder;
use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use service_core::config::Config as CoreConfig;
use service_core::db::RetryConfig;
use std::env;

#[derive(Clone, Debug)]
pub struct FeeConfig {
    pub common: CoreConfig,
    pub database: DatabaseConfig,
    pub engine: EngineSettings,
    pub security: SecurityConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

/// Knobs for the transactional ingest engine.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Upper bound on waiting for the per-student record locks, applied
    /// with `SET LOCAL lock_timeout` inside each write transaction.
    pub lock_timeout_ms: u64,
    /// Retry policy for transient storage failures.
    pub retry: RetryConfig,
    /// Which of several same-period records absorbs carryover credit first.
    pub credit_apply_order: CreditApplyOrder,
}

impl FeeConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let common = CoreConfig::load()?;

        let db_url = env::var("FEE_DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("FEE_DATABASE_URL must be set"))?;
        let max_connections = env::var("FEE_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("FEE_DB_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "2".to_string())
            .parse()?;

        let lock_timeout_ms = env::var("FEE_LOCK_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()?;
        let max_retries = env::var("FEE_MAX_RETRIES")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let order_label =
            env::var("FEE_CREDIT_APPLY_ORDER").unwrap_or_else(|_| "created_first".to_string());
        let credit_apply_order = CreditApplyOrder::from_str(&order_label).ok_or_else(|| {
            anyhow::anyhow!(
                "FEE_CREDIT_APPLY_ORDER must be created_first or mandatory_first, got {}",
                order_label
            )
        })?;

        let allowed_origins = env::var("FEE_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let otlp_endpoint = env::var("OTLP_ENDPOINT").ok();

        Ok(Self {
            common,
            database: DatabaseConfig {
                url: db_url,
                max_connections,
                min_connections,
            },
            engine: EngineSettings {
                lock_timeout_ms,
                retry: RetryConfig::with_max_retries(max_retries),
                credit_apply_order,
            },
            security: SecurityConfig { allowed_origins },
            service_name: "fee-service".to_string(),
            log_level,
            otlp_endpoint,
        })
    }
}
