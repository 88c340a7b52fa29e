//! Broker abstraction: one handle per named queue.
//!
//! The broker is the scheduling authority. It owns delay handling, attempt
//! counting, backoff and retention. Workers only reserve jobs and report
//! outcomes back.

mod memory;
mod redis;

pub use self::memory::{MemoryBroker, MemoryConnector};
pub use self::redis::{RedisBroker, RedisConnector};

use crate::error::QueueError;
use crate::job::{FailOutcome, Job, JobResult};
use crate::policy::{QueueConfig, QueueName};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Failure reason recorded for an attempt whose lease lapsed.
pub const STALLED_REASON: &str = "Job stalled: lease expired before the attempt finished";

/// Snapshot of job counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    /// Eligible now
    pub waiting: u64,
    /// Still inside their delay window
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

/// A live queue handle.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Queue this handle serves.
    fn queue(&self) -> QueueName;

    /// Policy this handle was built with.
    fn config(&self) -> &QueueConfig;

    /// Enqueue a job; it becomes eligible after its initial delay.
    async fn add(&self, job: Job) -> Result<Job, QueueError>;

    /// Take the next eligible job, if any, and mark it active under a lease of
    /// `stall_timeout`.
    async fn reserve(&self) -> Result<Option<Job>, QueueError>;

    /// Renew the lease on an active job. `false` when the job is no longer
    /// held, e.g. after stalled-job recovery took it over.
    async fn extend_lease(&self, job: &Job) -> Result<bool, QueueError>;

    /// Fail every active job whose lease has lapsed, exactly as if its handler
    /// had returned an error. Returns the recovered jobs with their outcome.
    async fn recover_stalled(&self) -> Result<Vec<(Job, FailOutcome)>, QueueError>;

    /// Mark an active job completed and retain it up to `retain_completed`.
    async fn complete(&self, job: &mut Job, result: &JobResult) -> Result<(), QueueError>;

    /// Record a failed attempt. Either schedules a retry per the job's backoff
    /// or moves the job to the failed-job store, retained up to `retain_failed`.
    async fn fail(&self, job: &mut Job, reason: &str) -> Result<FailOutcome, QueueError>;

    /// Most recently completed jobs, newest first.
    async fn completed_jobs(&self, limit: usize) -> Result<Vec<Job>, QueueError>;

    /// Most recently dead-lettered jobs, newest first.
    async fn failed_jobs(&self, limit: usize) -> Result<Vec<Job>, QueueError>;

    async fn counts(&self) -> Result<JobCounts, QueueError>;

    /// Stop accepting work. Idempotent.
    async fn close(&self) -> Result<(), QueueError>;
}

/// Builds a queue handle against a broker backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(
        &self,
        queue: QueueName,
        config: QueueConfig,
    ) -> Result<Arc<dyn Broker>, QueueError>;
}
