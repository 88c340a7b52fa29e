//! HR background jobs
//!
//! Handlers for the four HR job families, plugged into `job-queue`:
//!
//! | Queue                | Job type                       | Handler                 |
//! |----------------------|--------------------------------|-------------------------|
//! | `resumeProcessing`   | `process-resume`               | [`ResumeProcessor`]     |
//! | `emailNotifications` | `send-email`                   | [`EmailProcessor`]      |
//! | `emailNotifications` | `process-interview-transcript` | [`TranscriptProcessor`] |
//! | `dataAnalytics`      | `calculate-metrics`            | [`AnalyticsProcessor`]  |
//! | `reportGeneration`   | `generate-report`              | [`ReportProcessor`]     |
//!
//! Handlers reach the outside world only through [`RecordStore`] (PostgreSQL
//! in deployments, in memory for tests and local runs),
//! [`EmailProvider`] and [`AnalysisService`]. Emails that a handler wants sent
//! afterwards (HR notices, report delivery) are returned as follow-up jobs.
//!
//! ```rust,ignore
//! let deps = HrDependencies {
//!     store: Arc::new(InMemoryRecordStore::new()),
//!     email: Arc::new(SmtpProvider::new(SmtpConfig::mailhog())?),
//!     analysis: Arc::new(MlServiceClient::new("http://localhost:8000", timeout)?),
//!     templates: Arc::new(TemplateEngine::new()?),
//!     settings: HrJobSettings::default(),
//! };
//! let handlers = Arc::new(handler_set(&deps));
//! ```

pub mod analysis;
pub mod error;
pub mod models;
pub mod postgres_store;
pub mod processors;
pub mod providers;
pub mod store;
pub mod templates;

pub use analysis::{AnalysisService, MlServiceClient};
pub use error::{HrJobError, HrJobResult};
pub use models::{EmailType, ReportType, SendEmailJob, job_types};
pub use postgres_store::PostgresRecordStore;
pub use processors::{
    AnalyticsProcessor, EmailProcessor, HrDependencies, HrJobSettings, ReportProcessor, ResumeProcessor,
    TranscriptProcessor, handler_set,
};
pub use providers::{EmailProvider, SendGridConfig, SendGridProvider, SmtpConfig, SmtpProvider};
pub use store::{InMemoryRecordStore, RecordStore};
pub use templates::TemplateEngine;
