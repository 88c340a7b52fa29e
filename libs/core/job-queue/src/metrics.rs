//! Prometheus metrics for queues and workers
//!
//! Counters go through the `metrics` facade and are no-ops until a recorder
//! is installed with [`init_metrics`].

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use crate::policy::QueueName;

static EXPORTER: OnceCell<SocketAddr> = OnceCell::new();

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must run inside a tokio runtime. Subsequent calls are no-ops.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    EXPORTER
        .get_or_try_init(|| {
            PrometheusBuilder::new().with_http_listener(addr).install()?;
            info!(addr = %addr, "Prometheus exporter listening");
            Ok(addr)
        })
        .map(|_| ())
}

/// Per-queue metrics helper
#[derive(Debug, Clone, Copy)]
pub struct QueueMetrics {
    queue: QueueName,
}

impl QueueMetrics {
    pub fn new(queue: QueueName) -> Self {
        Self { queue }
    }

    fn queue_label(&self) -> &'static str {
        self.queue.into()
    }

    /// Record a job accepted by a live queue
    pub fn job_enqueued(&self, job_type: &str) {
        counter!(
            "hr_jobs_enqueued_total",
            "queue" => self.queue_label(),
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    /// Record a mock acknowledgement handed out for an unavailable queue
    pub fn job_mocked(&self, job_type: &str) {
        counter!(
            "hr_jobs_mocked_total",
            "queue" => self.queue_label(),
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    /// Record a completed job
    pub fn job_completed(&self, job_type: &str, duration: Duration) {
        counter!(
            "hr_jobs_completed_total",
            "queue" => self.queue_label(),
            "job_type" => job_type.to_string()
        )
        .increment(1);

        histogram!(
            "hr_job_duration_seconds",
            "queue" => self.queue_label(),
            "job_type" => job_type.to_string()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a failed attempt
    pub fn job_failed(&self, job_type: &str, kind: &'static str) {
        counter!(
            "hr_jobs_failed_total",
            "queue" => self.queue_label(),
            "job_type" => job_type.to_string(),
            "kind" => kind
        )
        .increment(1);
    }

    /// Record a retry scheduled by the broker
    pub fn job_retried(&self, job_type: &str) {
        counter!(
            "hr_jobs_retried_total",
            "queue" => self.queue_label(),
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    /// Record a job moved to the failed-job store
    pub fn job_dead_lettered(&self, job_type: &str) {
        counter!(
            "hr_jobs_dead_lettered_total",
            "queue" => self.queue_label(),
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }
}
