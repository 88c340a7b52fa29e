//! Lifecycle monitor: completion/failure observation for live queues.
//!
//! Workers report every finished attempt here. The monitor logs it, updates
//! metrics and republishes it on a broadcast channel so tests and other
//! components can follow job outcomes (including requested follow-ups).

use crate::job::{FollowUp, JobId};
use crate::metrics::QueueMetrics;
use crate::policy::QueueName;
use crate::registry::QueueRegistry;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

const EVENT_CAPACITY: usize = 1024;

/// A finished job attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Completed {
        queue: QueueName,
        job_id: JobId,
        job_type: String,
        data: Value,
        follow_ups: Vec<FollowUp>,
    },
    Failed {
        queue: QueueName,
        job_id: JobId,
        job_type: String,
        error: String,
        attempts_made: u32,
        max_attempts: u32,
        /// `None` once dead-lettered
        retry_in: Option<Duration>,
    },
}

impl LifecycleEvent {
    pub fn queue(&self) -> QueueName {
        match self {
            LifecycleEvent::Completed { queue, .. } | LifecycleEvent::Failed { queue, .. } => *queue,
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            LifecycleEvent::Completed { job_id, .. } | LifecycleEvent::Failed { job_id, .. } => *job_id,
        }
    }

    /// Terminal failure: attempts reached the ceiling.
    pub fn is_dead_lettered(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::Failed { attempts_made, max_attempts, .. } if attempts_made >= max_attempts
        )
    }
}

/// Observes completed and failed jobs on live queues.
pub struct LifecycleMonitor {
    observed: BTreeSet<QueueName>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleMonitor {
    /// Attach to every live queue of the registry. Unavailable queues are
    /// skipped.
    pub fn attach(registry: &QueueRegistry) -> Self {
        let observed: BTreeSet<QueueName> = registry.live().map(|(queue, _)| queue).collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(queues = ?observed, "Lifecycle monitor attached");
        Self { observed, events }
    }

    pub fn observes(&self, queue: QueueName) -> bool {
        self.observed.contains(&queue)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Record a finished attempt.
    pub fn observe(&self, event: LifecycleEvent) {
        let queue = event.queue();
        if !self.observes(queue) {
            return;
        }
        let metrics = QueueMetrics::new(queue);

        match &event {
            LifecycleEvent::Completed {
                job_id,
                job_type,
                follow_ups,
                ..
            } => {
                info!(
                    queue = %queue,
                    job_id = %job_id,
                    job_type = %job_type,
                    follow_ups = follow_ups.len(),
                    "Job completed successfully"
                );
            }
            LifecycleEvent::Failed {
                job_id,
                job_type,
                error,
                attempts_made,
                max_attempts,
                retry_in,
                ..
            } => {
                error!(
                    queue = %queue,
                    job_id = %job_id,
                    job_type = %job_type,
                    error = %error,
                    attempts_made = attempts_made,
                    max_attempts = max_attempts,
                    retry_in_ms = retry_in.map(|d| d.as_millis() as u64),
                    "Job failed"
                );

                if event.is_dead_lettered() {
                    metrics.job_dead_lettered(job_type);
                    error!(
                        queue = %queue,
                        job_id = %job_id,
                        job_type = %job_type,
                        attempts_made = attempts_made,
                        "Moving job to dead letter queue"
                    );
                } else {
                    metrics.job_retried(job_type);
                }
            }
        }

        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
