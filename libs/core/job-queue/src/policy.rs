//! Queue names and the static per-queue policy table.

use crate::error::QueueError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// The fixed set of workload queues.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum QueueName {
    ResumeProcessing,
    EmailNotifications,
    DataAnalytics,
    ReportGeneration,
}

impl QueueName {
    /// Resolve a logical queue name, rejecting anything outside the set.
    pub fn parse(name: &str) -> Result<Self, QueueError> {
        name.parse::<QueueName>()
            .map_err(|_| QueueError::UnknownQueue(name.to_string()))
    }

    /// All queues, in declaration order.
    pub fn all() -> impl Iterator<Item = QueueName> {
        QueueName::iter()
    }
}

/// Delay strategy between retry attempts. Delays are in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed { delay: u64 },
    /// Delay doubles with every failed attempt, starting at `delay`
    Exponential { delay: u64 },
}

impl Backoff {
    /// Delay before the next attempt, given how many attempts have failed so far.
    ///
    /// `attempts_made` is 1 after the first failure.
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay } => Duration::from_millis(delay),
            Backoff::Exponential { delay } => {
                let exponent = attempts_made.saturating_sub(1).min(32);
                Duration::from_millis(delay.saturating_mul(2u64.saturating_pow(exponent)))
            }
        }
    }
}

const STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Retention, delay and retry policy for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Max successful jobs kept for inspection
    pub retain_completed: usize,
    /// Max terminally failed jobs kept for inspection
    pub retain_failed: usize,
    /// Delay before the first attempt
    pub initial_delay: Duration,
    /// Ceiling on total attempts (first attempt included)
    pub max_attempts: u32,
    /// Retry delay strategy; `None` retries immediately
    pub backoff: Option<Backoff>,
    /// Lease on a reserved job. A job whose lease lapses without renewal is
    /// stalled and counts as a failed attempt.
    pub stall_timeout: Duration,
}

impl QueueConfig {
    /// The compiled-in policy for a queue.
    pub fn for_queue(queue: QueueName) -> Self {
        match queue {
            QueueName::ResumeProcessing => Self {
                retain_completed: 50,
                retain_failed: 100,
                initial_delay: Duration::from_millis(1000),
                max_attempts: 3,
                backoff: Some(Backoff::Exponential { delay: 2000 }),
                stall_timeout: STALL_TIMEOUT,
            },
            QueueName::EmailNotifications => Self {
                retain_completed: 50,
                retain_failed: 100,
                initial_delay: Duration::from_millis(500),
                max_attempts: 3,
                backoff: Some(Backoff::Fixed { delay: 1000 }),
                stall_timeout: STALL_TIMEOUT,
            },
            QueueName::DataAnalytics => Self {
                retain_completed: 20,
                retain_failed: 50,
                initial_delay: Duration::from_millis(5000),
                max_attempts: 2,
                backoff: None,
                stall_timeout: STALL_TIMEOUT,
            },
            QueueName::ReportGeneration => Self {
                retain_completed: 10,
                retain_failed: 25,
                initial_delay: Duration::ZERO,
                max_attempts: 2,
                backoff: None,
                stall_timeout: STALL_TIMEOUT,
            },
        }
    }
}
