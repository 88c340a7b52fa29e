//! In-process broker backed by the tokio clock.
//!
//! Used by tests and by single-process deployments without Redis. Delays and
//! backoff are measured with `tokio::time::Instant`, so paused-clock tests
//! can fast-forward through them.

use super::{Broker, BrokerConnector, JobCounts, STALLED_REASON};
use crate::error::QueueError;
use crate::job::{FailOutcome, Job, JobId, JobResult};
use crate::policy::{QueueConfig, QueueName};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

struct Scheduled {
    ready_at: Instant,
    seq: u64,
    job: Job,
}

struct Leased {
    job: Job,
    lease_until: Instant,
}

#[derive(Default)]
struct State {
    scheduled: Vec<Scheduled>,
    active: HashMap<JobId, Leased>,
    completed: VecDeque<Job>,
    failed: VecDeque<Job>,
    seq: u64,
    closed: bool,
}

impl State {
    fn schedule(&mut self, job: Job, ready_at: Instant) {
        self.seq += 1;
        self.scheduled.push(Scheduled {
            ready_at,
            seq: self.seq,
            job,
        });
    }

    /// Retry or dead-letter a job whose attempt just failed.
    fn settle_failure(&mut self, job: &Job, outcome: FailOutcome, config: &QueueConfig) {
        self.active.remove(&job.id);
        match outcome {
            FailOutcome::Retrying { delay } => self.schedule(job.clone(), Instant::now() + delay),
            FailOutcome::DeadLettered => retain_newest(&mut self.failed, job.clone(), config.retain_failed),
        }
    }
}

/// Keeps newest entries at the front, trimmed to `limit`.
fn retain_newest(store: &mut VecDeque<Job>, job: Job, limit: usize) {
    store.push_front(job);
    store.truncate(limit);
}

/// In-memory queue handle.
pub struct MemoryBroker {
    queue: QueueName,
    config: QueueConfig,
    state: Mutex<State>,
}

impl MemoryBroker {
    pub fn new(queue: QueueName, config: QueueConfig) -> Self {
        Self {
            queue,
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Handle for `queue` using the compiled-in policy.
    pub fn for_queue(queue: QueueName) -> Self {
        Self::new(queue, QueueConfig::for_queue(queue))
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn queue(&self) -> QueueName {
        self.queue
    }

    fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn add(&self, job: Job) -> Result<Job, QueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed(self.queue));
        }

        let ready_at = Instant::now() + job.options.initial_delay();
        debug!(queue = %self.queue, job_id = %job.id, delay_ms = job.options.delay, "Job added");
        state.schedule(job.clone(), ready_at);
        Ok(job)
    }

    async fn reserve(&self) -> Result<Option<Job>, QueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(None);
        }

        let now = Instant::now();
        let next = state
            .scheduled
            .iter()
            .enumerate()
            .filter(|(_, s)| s.ready_at <= now)
            .min_by_key(|(_, s)| (s.ready_at, s.seq))
            .map(|(idx, _)| idx);

        Ok(next.map(|idx| {
            let job = state.scheduled.remove(idx).job;
            state.active.insert(
                job.id,
                Leased {
                    job: job.clone(),
                    lease_until: now + self.config.stall_timeout,
                },
            );
            job
        }))
    }

    async fn extend_lease(&self, job: &Job) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        Ok(match state.active.get_mut(&job.id) {
            Some(leased) => {
                leased.lease_until = Instant::now() + self.config.stall_timeout;
                true
            }
            None => false,
        })
    }

    async fn recover_stalled(&self) -> Result<Vec<(Job, FailOutcome)>, QueueError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let mut stalled: Vec<JobId> = state
            .active
            .iter()
            .filter(|(_, leased)| leased.lease_until <= now)
            .map(|(id, _)| *id)
            .collect();
        stalled.sort();

        let mut recovered = Vec::with_capacity(stalled.len());
        for id in stalled {
            let Some(Leased { mut job, .. }) = state.active.remove(&id) else {
                continue;
            };
            let outcome = job.record_failure(STALLED_REASON);
            warn!(queue = %self.queue, job_id = %job.id, attempts_made = job.attempts_made, "Recovered stalled job");
            state.settle_failure(&job, outcome, &self.config);
            recovered.push((job, outcome));
        }
        Ok(recovered)
    }

    async fn complete(&self, job: &mut Job, result: &JobResult) -> Result<(), QueueError> {
        job.record_completion(result);

        let mut state = self.state.lock().await;
        state.active.remove(&job.id);
        retain_newest(&mut state.completed, job.clone(), self.config.retain_completed);
        Ok(())
    }

    async fn fail(&self, job: &mut Job, reason: &str) -> Result<FailOutcome, QueueError> {
        let outcome = job.record_failure(reason);

        let mut state = self.state.lock().await;
        state.settle_failure(job, outcome, &self.config);
        Ok(outcome)
    }

    async fn completed_jobs(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.completed.iter().take(limit).cloned().collect())
    }

    async fn failed_jobs(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.failed.iter().take(limit).cloned().collect())
    }

    async fn counts(&self) -> Result<JobCounts, QueueError> {
        let state = self.state.lock().await;
        let now = Instant::now();
        let waiting = state.scheduled.iter().filter(|s| s.ready_at <= now).count();

        Ok(JobCounts {
            waiting: waiting as u64,
            delayed: (state.scheduled.len() - waiting) as u64,
            active: state.active.len() as u64,
            completed: state.completed.len() as u64,
            failed: state.failed.len() as u64,
        })
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.state.lock().await.closed = true;
        Ok(())
    }
}

/// Connector that always succeeds with a fresh [`MemoryBroker`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryConnector;

#[async_trait]
impl BrokerConnector for MemoryConnector {
    async fn connect(
        &self,
        queue: QueueName,
        config: QueueConfig,
    ) -> Result<Arc<dyn Broker>, QueueError> {
        Ok(Arc::new(MemoryBroker::new(queue, config)))
    }
}
