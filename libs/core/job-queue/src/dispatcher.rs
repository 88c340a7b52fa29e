//! Dispatcher: the single entry point for producing work.

use crate::error::QueueError;
use crate::job::{Dispatched, FollowUp, Job, JobOptions, MockAcknowledgement};
use crate::metrics::QueueMetrics;
use crate::policy::QueueName;
use crate::registry::QueueRegistry;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves queue names against the registry and enqueues jobs.
///
/// When the target queue is unavailable the dispatcher hands back a
/// [`MockAcknowledgement`] instead of an error, so callers never branch on
/// broker availability. It never retries on the caller's behalf.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<QueueRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<QueueRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    /// Submit a job by logical queue name.
    ///
    /// # Errors
    ///
    /// `QueueError::UnknownQueue` for a name outside the enumerated set,
    /// regardless of broker state. Broker failures on a live queue are
    /// propagated as-is.
    pub async fn submit(
        &self,
        queue: &str,
        job_type: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<Dispatched, QueueError> {
        let queue = QueueName::parse(queue)?;
        self.submit_to(queue, job_type, payload, options).await
    }

    /// Submit a job to a known queue.
    pub async fn submit_to(
        &self,
        queue: QueueName,
        job_type: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<Dispatched, QueueError> {
        let metrics = QueueMetrics::new(queue);

        let Some(broker) = self.registry.handle(queue) else {
            warn!(queue = %queue, job_type = %job_type, "Queue unavailable, returning mock acknowledgement");
            metrics.job_mocked(job_type);
            return Ok(Dispatched::Mock(MockAcknowledgement::new(
                queue, job_type, payload, options,
            )));
        };

        let resolved = options.resolve(broker.config(), Utc::now());
        let job = broker
            .add(Job::new(queue, job_type, payload, resolved))
            .await?;

        metrics.job_enqueued(job_type);
        debug!(
            queue = %queue,
            job_id = %job.id,
            job_type = %job_type,
            delay_ms = job.options.delay,
            attempts = job.options.attempts,
            "Job dispatched"
        );

        Ok(Dispatched::Queued(job))
    }

    /// Dispatch a follow-on job requested by a handler.
    pub async fn submit_follow_up(&self, follow_up: &FollowUp) -> Result<Dispatched, QueueError> {
        self.submit_to(
            follow_up.queue,
            &follow_up.job_type,
            follow_up.payload.clone(),
            follow_up.options.clone(),
        )
        .await
    }
}
