//! HR Jobs Worker Service
//!
//! Runs the four HR background queues against Redis.
//!
//! ## Architecture
//!
//! ```text
//! Redis (hr:queue:<name>)  x4, connected independently
//!   ↓
//! QueueRegistry (live | unavailable per queue)
//!   ↓
//! QueueWorker per live queue (bounded concurrency, retry/backoff)
//!   ↓
//! HR handlers (resume, email + transcript, analytics, report)
//!   ↓                           ↘ follow-up jobs → Dispatcher
//! Record store (PostgreSQL) / Email provider / ML service
//! ```
//!
//! A queue whose Redis connection fails at start-up stays unavailable for the
//! life of the process; dispatches to it are acknowledged with a mock result.
//! SIGINT/SIGTERM stop the workers, wait for in-flight jobs, then close every
//! live queue.

pub mod config;

use config::WorkerSettings;
use core_config::database::DatabaseConfig;
use core_config::redis::RedisConfig;
use core_config::{Environment, FromEnv};
use domain_hr_jobs::{
    EmailProvider, HrDependencies, InMemoryRecordStore, MlServiceClient, PostgresRecordStore, RecordStore,
    SendGridProvider, SmtpProvider, TemplateEngine, handler_set,
};
use eyre::{Result, WrapErr};
use job_queue::{
    Dispatcher, LifecycleMonitor, QueueRegistry, QueueWorker, RedisConnector, ShutdownCoordinator, init_metrics,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// SendGrid in production, SMTP (Mailpit/MailHog) otherwise.
fn email_provider(environment: &Environment) -> Result<Arc<dyn EmailProvider>> {
    if environment.is_production() {
        info!("Using SendGrid provider for production");
        let provider = SendGridProvider::from_env()
            .wrap_err("SendGrid configuration error. Ensure SENDGRID_API_KEY and SENDGRID_FROM_EMAIL are set")?;
        Ok(Arc::new(provider))
    } else {
        info!("Using SMTP provider for development");
        let provider = SmtpProvider::mailhog().wrap_err("Failed to create SMTP provider")?;
        Ok(Arc::new(provider))
    }
}

/// PostgreSQL when configured, otherwise a process-local in-memory store.
async fn record_store(database: Option<&DatabaseConfig>) -> Result<Arc<dyn RecordStore>> {
    match database {
        Some(config) => {
            let store = PostgresRecordStore::connect(&config.url, config.max_connections, config.connect_timeout)
                .await
                .wrap_err("Failed to connect to the PostgreSQL record store")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory record store; records are lost on exit");
            Ok(Arc::new(InMemoryRecordStore::new()))
        }
    }
}

/// Run the worker until SIGINT/SIGTERM.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the Prometheus exporter
/// cannot bind, the configured database is unreachable, or the email
/// provider / ML client cannot be built. Redis
/// being unreachable is not an error: the affected queues run in mock mode.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        "Starting HR jobs worker"
    );

    let settings = WorkerSettings::from_env().wrap_err("Failed to load worker configuration")?;
    if let Some(addr) = settings.metrics_addr {
        init_metrics(addr).wrap_err_with(|| format!("Failed to start metrics exporter on {}", addr))?;
    }

    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;
    let connector = RedisConnector::new(&redis_config.uri, redis_config.connect_timeout)
        .wrap_err("Invalid Redis URI")?;
    let registry = Arc::new(QueueRegistry::connect(&connector).await);

    let email = email_provider(&environment)?;
    match email.health_check().await {
        Ok(true) => info!(provider = email.name(), "Email provider reachable"),
        Ok(false) => warn!(provider = email.name(), "Email provider health check failed"),
        Err(e) => warn!(provider = email.name(), error = %e, "Email provider health check errored"),
    }

    let analysis = MlServiceClient::new(settings.ml_service_url.clone(), settings.ml_service_timeout)
        .wrap_err("Failed to create ML service client")?;
    let templates = TemplateEngine::new().wrap_err("Failed to initialize template engine")?;

    let deps = HrDependencies {
        store: record_store(settings.database.as_ref()).await?,
        email,
        analysis: Arc::new(analysis),
        templates: Arc::new(templates),
        settings: settings.job_settings(),
    };
    let handlers = Arc::new(handler_set(&deps));

    let dispatcher = Dispatcher::new(registry.clone());
    let monitor = Arc::new(LifecycleMonitor::attach(&registry));
    let mut coordinator = ShutdownCoordinator::new(registry.clone());

    let worker_config = settings.worker_config();
    for (queue, broker) in registry.live() {
        let worker = QueueWorker::new(
            broker.clone(),
            handlers.clone(),
            dispatcher.clone(),
            monitor.clone(),
            worker_config.clone(),
        );
        let shutdown = coordinator.subscribe();
        coordinator.track(tokio::spawn(async move { worker.run(shutdown).await }));
        info!(queue = %queue, concurrency = settings.concurrency, "Worker started");
    }

    let unavailable: Vec<String> = registry.unavailable().map(|(queue, _)| queue.to_string()).collect();
    if !unavailable.is_empty() {
        warn!(queues = ?unavailable, "Running with unavailable queues, their jobs are mocked");
    }

    shutdown_signal().await;

    let report = coordinator.shutdown().await;
    for (queue, reason) in &report.failed {
        error!(queue = %queue, reason = %reason, "Queue did not close cleanly");
    }

    info!("HR jobs worker stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM. A handler that cannot be installed is logged
/// and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
