//! Queue and job error types
//!
//! Two families of errors live here:
//! - [`QueueError`]: failures of the queue machinery itself (unknown queue
//!   names, broker I/O, closed queues). Returned to callers of the dispatcher
//!   and to workers.
//! - [`JobError`]: failures raised by a job handler. Every variant counts as a
//!   handler failure and goes through the queue's retry/backoff policy.

use crate::policy::QueueName;
use std::time::Duration;
use thiserror::Error;

/// Queue machinery errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Queue name outside the enumerated set
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Broker could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// Queue handle has been closed
    #[error("Queue {0} is closed")]
    Closed(QueueName),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// Errors raised by job handlers
#[derive(Error, Debug)]
pub enum JobError {
    /// Payload did not match the job type's expected shape
    #[error("Invalid payload for {job_type}: {message}")]
    InvalidPayload { job_type: String, message: String },

    /// No handler registered for this job type on the queue
    #[error("Unknown job type '{job_type}' for queue {queue}")]
    UnknownJobType { queue: QueueName, job_type: String },

    /// Report builder not found for the requested report type
    #[error("Unknown report type: {0}")]
    UnknownReportType(String),

    /// External call exceeded its time budget
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Any other failure inside a handler body
    #[error("{0}")]
    Handler(String),
}

impl JobError {
    /// Create a generic handler failure
    pub fn handler(message: impl Into<String>) -> Self {
        JobError::Handler(message.into())
    }

    /// Create an invalid payload error
    pub fn invalid_payload(job_type: impl Into<String>, message: impl ToString) -> Self {
        JobError::InvalidPayload {
            job_type: job_type.into(),
            message: message.to_string(),
        }
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::InvalidPayload { .. } => "invalid_payload",
            JobError::UnknownJobType { .. } => "unknown_job_type",
            JobError::UnknownReportType(_) => "unknown_report_type",
            JobError::Timeout { .. } => "timeout",
            JobError::Handler(_) => "handler",
        }
    }
}
