//! Error types for the HR jobs domain.

use job_queue::JobError;
use std::time::Duration;
use thiserror::Error;

/// Result type for HR job operations.
pub type HrJobResult<T> = Result<T, HrJobError>;

/// Errors raised by HR job collaborators.
///
/// Every variant becomes a [`JobError`] at the handler boundary, so the queue's
/// retry policy applies to all of them.
#[derive(Debug, Error)]
pub enum HrJobError {
    /// Record store read or write failed.
    #[error("Record store error: {0}")]
    Store(String),

    /// Email provider error.
    #[error("Email provider error: {0}")]
    Provider(String),

    /// Template rendering error.
    #[error("Template rendering error: {0}")]
    Template(String),

    /// Analysis service error.
    #[error("Analysis service error: {0}")]
    Analysis(String),

    /// A collaborator call exceeded its time budget.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<HrJobError> for JobError {
    fn from(err: HrJobError) -> Self {
        match err {
            HrJobError::Timeout { operation, after } => JobError::Timeout { operation, after },
            other => JobError::Handler(other.to_string()),
        }
    }
}

impl From<handlebars::RenderError> for HrJobError {
    fn from(err: handlebars::RenderError) -> Self {
        HrJobError::Template(err.to_string())
    }
}

impl From<handlebars::TemplateError> for HrJobError {
    fn from(err: handlebars::TemplateError) -> Self {
        HrJobError::Template(err.to_string())
    }
}

impl From<serde_json::Error> for HrJobError {
    fn from(err: serde_json::Error) -> Self {
        HrJobError::Internal(format!("JSON serialization error: {}", err))
    }
}

/// Run `future` with a time budget, mapping an elapsed timer to
/// [`HrJobError::Timeout`].
pub async fn with_timeout<T, F>(operation: &str, after: Duration, future: F) -> HrJobResult<T>
where
    F: std::future::Future<Output = HrJobResult<T>>,
{
    tokio::time::timeout(after, future)
        .await
        .map_err(|_| HrJobError::Timeout {
            operation: operation.to_string(),
            after,
        })?
}
