//! Job model: identity, options, results, follow-on requests and
//! mock acknowledgements.

use crate::error::JobError;
use crate::policy::{Backoff, QueueConfig, QueueName};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Id returned in place of a real job id when a queue is unavailable.
pub const MOCK_JOB_ID: &str = "mock-job-id";

/// Broker-assigned job identifier (UUID v7, time ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Caller-supplied job options. Unset fields fall back to the queue policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Delay before the first attempt, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    /// Total attempts allowed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay_ms(mut self, delay: u64) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Merge these options over the queue defaults. Caller values win.
    pub fn resolve(&self, config: &QueueConfig, dispatched_at: DateTime<Utc>) -> ResolvedOptions {
        let initial_delay = u64::try_from(config.initial_delay.as_millis()).unwrap_or(u64::MAX);

        ResolvedOptions {
            delay: self.delay.unwrap_or(initial_delay),
            attempts: self.attempts.unwrap_or(config.max_attempts).max(1),
            backoff: self.backoff.or(config.backoff),
            dispatched_at,
        }
    }
}

/// Effective options of an enqueued job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedOptions {
    /// Delay before the first attempt, in milliseconds
    pub delay: u64,
    pub attempts: u32,
    pub backoff: Option<Backoff>,
    /// Set by the dispatcher, never by the caller
    pub dispatched_at: DateTime<Utc>,
}

impl ResolvedOptions {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.delay)
    }
}

/// Outcome of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Job goes back on the queue after `delay`
    Retrying { delay: Duration },
    /// Attempts exhausted; job moved to the failed-job store
    DeadLettered,
}

/// One unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub queue: QueueName,
    pub job_type: String,
    pub payload: Value,
    pub options: ResolvedOptions,
    pub attempts_made: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        queue: QueueName,
        job_type: impl Into<String>,
        payload: Value,
        options: ResolvedOptions,
    ) -> Self {
        Self {
            id: JobId::new(),
            queue,
            job_type: job_type.into(),
            payload,
            options,
            attempts_made: 0,
            failed_reason: None,
            return_value: None,
            finished_at: None,
        }
    }

    /// Decode the payload into the job type's typed shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| JobError::invalid_payload(&self.job_type, e))
    }

    /// Whether the attempt ceiling has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.attempts_made >= self.options.attempts
    }

    /// Count a failed attempt and decide between retry and dead-letter.
    pub fn record_failure(&mut self, reason: impl Into<String>) -> FailOutcome {
        self.attempts_made += 1;
        self.failed_reason = Some(reason.into());

        if self.is_exhausted() {
            self.finished_at = Some(Utc::now());
            FailOutcome::DeadLettered
        } else {
            let delay = self
                .options
                .backoff
                .map(|b| b.delay_for_attempt(self.attempts_made))
                .unwrap_or(Duration::ZERO);
            FailOutcome::Retrying { delay }
        }
    }

    /// Mark the job finished with a handler result.
    pub fn record_completion(&mut self, result: &JobResult) {
        self.return_value = Some(result.data.clone());
        self.finished_at = Some(Utc::now());
    }
}

/// A follow-on job requested by a handler, dispatched after completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUp {
    pub queue: QueueName,
    pub job_type: String,
    pub payload: Value,
    #[serde(default)]
    pub options: JobOptions,
}

impl FollowUp {
    pub fn new(queue: QueueName, job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            queue,
            job_type: job_type.into(),
            payload,
            options: JobOptions::default(),
        }
    }
}

/// Return value of a successful handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub success: bool,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_ups: Vec<FollowUp>,
}

impl JobResult {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data,
            follow_ups: Vec::new(),
        }
    }

    pub fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_ups.push(follow_up);
        self
    }
}

/// Synthetic stand-in returned when the target queue is unavailable.
/// Never persisted, retried or processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockAcknowledgement {
    pub id: String,
    pub queue: QueueName,
    pub job_type: String,
    pub payload: Value,
    pub options: JobOptions,
}

impl MockAcknowledgement {
    pub fn new(queue: QueueName, job_type: impl Into<String>, payload: Value, options: JobOptions) -> Self {
        Self {
            id: MOCK_JOB_ID.to_string(),
            queue,
            job_type: job_type.into(),
            payload,
            options,
        }
    }
}

/// Result of a dispatch: a real job or a mock acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Queued(Job),
    Mock(MockAcknowledgement),
}

impl Dispatched {
    pub fn id(&self) -> String {
        match self {
            Dispatched::Queued(job) => job.id.to_string(),
            Dispatched::Mock(ack) => ack.id.clone(),
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, Dispatched::Mock(_))
    }

    pub fn job(&self) -> Option<&Job> {
        match self {
            Dispatched::Queued(job) => Some(job),
            Dispatched::Mock(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_for(queue: QueueName, options: JobOptions) -> Job {
        let config = QueueConfig::for_queue(queue);
        Job::new(queue, "test", json!({}), options.resolve(&config, Utc::now()))
    }

    #[test]
    fn test_resolve_uses_queue_defaults() {
        let config = QueueConfig::for_queue(QueueName::ResumeProcessing);
        let resolved = JobOptions::new().resolve(&config, Utc::now());

        assert_eq!(resolved.delay, 1000);
        assert_eq!(resolved.attempts, 3);
        assert_eq!(resolved.backoff, Some(Backoff::Exponential { delay: 2000 }));
    }

    #[test]
    fn test_resolve_caller_options_win() {
        let config = QueueConfig::for_queue(QueueName::DataAnalytics);
        let resolved = JobOptions::new()
            .with_delay_ms(9999)
            .with_attempts(5)
            .with_backoff(Backoff::Fixed { delay: 10 })
            .resolve(&config, Utc::now());

        assert_eq!(resolved.delay, 9999);
        assert_eq!(resolved.attempts, 5);
        assert_eq!(resolved.backoff, Some(Backoff::Fixed { delay: 10 }));
    }

    #[test]
    fn test_options_deserialize_from_caller_shape() {
        let options: JobOptions = serde_json::from_value(json!({"delay": 9999})).unwrap();
        assert_eq!(options.delay, Some(9999));
        assert_eq!(options.attempts, None);
    }

    #[test]
    fn test_record_failure_exponential_then_dead_letter() {
        let mut job = job_for(QueueName::ResumeProcessing, JobOptions::new());

        assert_eq!(
            job.record_failure("first"),
            FailOutcome::Retrying { delay: Duration::from_millis(2000) }
        );
        assert_eq!(
            job.record_failure("second"),
            FailOutcome::Retrying { delay: Duration::from_millis(4000) }
        );
        assert_eq!(job.record_failure("third"), FailOutcome::DeadLettered);
        assert_eq!(job.attempts_made, 3);
        assert_eq!(job.failed_reason.as_deref(), Some("third"));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_record_failure_without_backoff_retries_immediately() {
        let mut job = job_for(QueueName::DataAnalytics, JobOptions::new());

        assert_eq!(
            job.record_failure("boom"),
            FailOutcome::Retrying { delay: Duration::ZERO }
        );
        assert_eq!(job.record_failure("boom"), FailOutcome::DeadLettered);
    }

    #[test]
    fn test_decode_invalid_payload() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            required: String,
        }

        let job = job_for(QueueName::ReportGeneration, JobOptions::new());
        let err = job.decode::<Needs>().unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload { ref job_type, .. } if job_type == "test"));
    }

    #[test]
    fn test_mock_acknowledgement() {
        let ack = MockAcknowledgement::new(
            QueueName::EmailNotifications,
            "send-email",
            json!({"to": "a@b.com"}),
            JobOptions::new().with_delay_ms(5),
        );
        let dispatched = Dispatched::Mock(ack);

        assert!(dispatched.is_mock());
        assert_eq!(dispatched.id(), MOCK_JOB_ID);
        assert!(dispatched.job().is_none());
    }
}
