//! Shutdown coordinator: stop workers, then close every live queue.

use crate::error::QueueError;
use crate::policy::QueueName;
use crate::registry::QueueRegistry;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Result of a coordinated shutdown.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub closed: Vec<QueueName>,
    pub failed: Vec<(QueueName, String)>,
}

/// Owns the shutdown signal and the worker task handles.
pub struct ShutdownCoordinator {
    registry: Arc<QueueRegistry>,
    signal: watch::Sender<bool>,
    workers: Vec<JoinHandle<Result<(), QueueError>>>,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<QueueRegistry>) -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            registry,
            signal,
            workers: Vec::new(),
        }
    }

    /// Receiver that flips to `true` when shutdown starts.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Track a worker task so shutdown waits for it.
    pub fn track(&mut self, worker: JoinHandle<Result<(), QueueError>>) {
        self.workers.push(worker);
    }

    /// Signal workers, wait for them to drain, then close all live queues
    /// concurrently. Unavailable queues are skipped.
    pub async fn shutdown(self) -> ShutdownReport {
        info!("Shutting down queues...");
        let _ = self.signal.send(true);

        for worker in join_all(self.workers).await {
            match worker {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Worker exited with error"),
                Err(e) => error!(error = %e, "Worker task panicked"),
            }
        }

        let closes = self.registry.live().map(|(queue, broker)| async move {
            (queue, broker.close().await)
        });

        let mut report = ShutdownReport::default();
        for (queue, result) in join_all(closes).await {
            match result {
                Ok(()) => report.closed.push(queue),
                Err(e) => {
                    error!(queue = %queue, error = %e, "Failed to close queue");
                    report.failed.push((queue, e.to_string()));
                }
            }
        }

        info!(closed = report.closed.len(), failed = report.failed.len(), "All queues closed");
        report
    }
}
