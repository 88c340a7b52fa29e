//! Job handler trait and the (queue, job type) handler table.

use crate::error::JobError;
use crate::job::{Job, JobResult};
use crate::policy::QueueName;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Trait for job handlers.
///
/// A handler is bound to one (queue, job type) pair. Returning `Err` marks the
/// attempt failed; the broker then retries or dead-letters the job according
/// to the queue policy. Handlers that mutate an entity record the failure on
/// it before returning the error.
///
/// # Example
///
/// ```rust,ignore
/// struct Ping;
///
/// #[async_trait]
/// impl JobHandler for Ping {
///     async fn handle(&self, job: &Job) -> Result<JobResult, JobError> {
///         Ok(JobResult::success(json!({ "pong": job.id.to_string() })))
///     }
///
///     fn name(&self) -> &'static str {
///         "Ping"
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process a single job attempt.
    async fn handle(&self, job: &Job) -> Result<JobResult, JobError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}

/// Routes jobs to handlers by queue and job type.
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: HashMap<(QueueName, String), Arc<dyn JobHandler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to a (queue, job type) pair, replacing any previous one.
    pub fn register(
        mut self,
        queue: QueueName,
        job_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        self.handlers.insert((queue, job_type.into()), handler);
        self
    }

    pub fn get(&self, queue: QueueName, job_type: &str) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(&(queue, job_type.to_string()))
    }

    /// Queues that have at least one handler.
    pub fn queues(&self) -> BTreeSet<QueueName> {
        self.handlers.keys().map(|(queue, _)| *queue).collect()
    }

    /// Run the handler bound to the job's queue and type.
    pub async fn dispatch(&self, job: &Job) -> Result<JobResult, JobError> {
        let handler = self
            .get(job.queue, &job.job_type)
            .ok_or_else(|| JobError::UnknownJobType {
                queue: job.queue,
                job_type: job.job_type.clone(),
            })?;
        handler.handle(job).await
    }
}
