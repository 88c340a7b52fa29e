//! Worker process settings.

use core_config::database::DatabaseConfig;
use core_config::{ConfigError, FromEnv, env_optional, env_or_default, env_parse};
use domain_hr_jobs::HrJobSettings;
use job_queue::WorkerConfig;
use std::net::SocketAddr;
use std::time::Duration;

/// Settings read from the environment at start-up.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    /// Jobs run at once per queue
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub ml_service_url: String,
    pub ml_service_timeout: Duration,
    pub email_timeout: Duration,
    pub hr_email: String,
    /// Prometheus listener; metrics are off when unset
    pub metrics_addr: Option<SocketAddr>,
    /// PostgreSQL record store; the in-memory store is used when unset
    pub database: Option<DatabaseConfig>,
}

impl WorkerSettings {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::new()
            .with_concurrency(self.concurrency)
            .with_poll_interval_ms(self.poll_interval_ms)
    }

    pub fn job_settings(&self) -> HrJobSettings {
        HrJobSettings {
            hr_email: self.hr_email.clone(),
            email_timeout: self.email_timeout,
            analysis_timeout: self.ml_service_timeout,
        }
    }
}

impl FromEnv for WorkerSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let metrics_addr = match env_optional("METRICS_ADDR") {
            Some(raw) => Some(raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::ParseError {
                key: "METRICS_ADDR".to_string(),
                details: e.to_string(),
            })?),
            None => None,
        };
        let database = match env_optional("DATABASE_URL") {
            Some(_) => Some(DatabaseConfig::from_env()?),
            None => None,
        };

        Ok(Self {
            concurrency: env_parse("WORKER_CONCURRENCY", 4usize)?.max(1),
            poll_interval_ms: env_parse("WORKER_POLL_INTERVAL_MS", 250)?,
            ml_service_url: env_or_default("ML_SERVICE_URL", "http://localhost:8000"),
            ml_service_timeout: Duration::from_secs(env_parse("ML_SERVICE_TIMEOUT_SECS", 30)?),
            email_timeout: Duration::from_secs(env_parse("EMAIL_TIMEOUT_SECS", 30)?),
            hr_email: env_or_default("HR_NOTIFICATION_EMAIL", "hr@company.com"),
            metrics_addr,
            database,
        })
    }
}
