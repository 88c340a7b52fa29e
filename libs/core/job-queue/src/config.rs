//! Worker configuration

use std::time::Duration;

/// Configuration for a queue worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum jobs processed at once by one worker
    pub concurrency: usize,

    /// Sleep between polls when the queue has nothing eligible
    pub poll_interval: Duration,

    /// How often the worker looks for jobs whose lease lapsed
    pub stall_check_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(250),
            stall_check_interval: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum concurrent jobs (at least 1)
    pub fn with_concurrency(mut self, count: usize) -> Self {
        self.concurrency = count.max(1);
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval = Duration::from_millis(interval);
        self
    }

    /// Set the stalled-job sweep interval
    pub fn with_stall_check_interval_ms(mut self, interval: u64) -> Self {
        self.stall_check_interval = Duration::from_millis(interval);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.stall_check_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_builder_clamps_concurrency() {
        let config = WorkerConfig::new().with_concurrency(0).with_poll_interval_ms(10);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
    }
}
