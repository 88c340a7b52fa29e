//! Queue worker: polls one live queue and runs its handlers.

use crate::broker::{Broker, STALLED_REASON};
use crate::config::WorkerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{JobError, QueueError};
use crate::job::{FailOutcome, Job, JobResult};
use crate::metrics::QueueMetrics;
use crate::monitor::{LifecycleEvent, LifecycleMonitor};
use crate::processor::HandlerSet;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Tries per broker bookkeeping call before the job is left to stalled-job
/// recovery.
const BROKER_ATTEMPTS: u32 = 3;
const BROKER_RETRY_DELAY: Duration = Duration::from_millis(200);

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn failed_event(job: Job, reason: String, outcome: FailOutcome) -> LifecycleEvent {
    LifecycleEvent::Failed {
        queue: job.queue,
        job_id: job.id,
        job_type: job.job_type,
        error: reason,
        attempts_made: job.attempts_made,
        max_attempts: job.options.attempts,
        retry_in: match outcome {
            FailOutcome::Retrying { delay } => Some(delay),
            FailOutcome::DeadLettered => None,
        },
    }
}

/// Everything a spawned job task needs.
#[derive(Clone)]
struct JobContext {
    broker: Arc<dyn Broker>,
    handlers: Arc<HandlerSet>,
    dispatcher: Dispatcher,
    monitor: Arc<LifecycleMonitor>,
}

impl JobContext {
    /// Run the handler while renewing the job's lease. A panic is an ordinary
    /// handler failure.
    async fn run_handler(&self, job: &Job) -> Result<JobResult, JobError> {
        let handled = AssertUnwindSafe(self.handlers.dispatch(job)).catch_unwind();
        tokio::pin!(handled);

        let period = (self.broker.config().stall_timeout / 2).max(Duration::from_millis(10));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                outcome = &mut handled => {
                    return outcome.unwrap_or_else(|panic| {
                        Err(JobError::handler(format!("Handler panicked: {}", panic_message(panic.as_ref()))))
                    });
                }
                _ = heartbeat.tick() => match self.broker.extend_lease(job).await {
                    Ok(true) => {}
                    Ok(false) => warn!(queue = %job.queue, job_id = %job.id, "Job lease lost, attempt may run twice"),
                    Err(e) => warn!(queue = %job.queue, job_id = %job.id, error = %e, "Failed to extend job lease"),
                },
            }
        }
    }

    /// Run a broker bookkeeping call on a copy of the job, retrying errors.
    /// `None` leaves the job active until stalled-job recovery picks it up.
    async fn settle<T, F, Fut>(&self, job: &Job, action: &'static str, mut op: F) -> Option<(Job, T)>
    where
        F: FnMut(Job) -> Fut,
        Fut: Future<Output = Result<(Job, T), QueueError>>,
    {
        for attempt in 1..=BROKER_ATTEMPTS {
            match op(job.clone()).await {
                Ok(settled) => return Some(settled),
                Err(e) if attempt < BROKER_ATTEMPTS => {
                    warn!(queue = %job.queue, job_id = %job.id, attempt, error = %e, "Failed to {}, retrying", action);
                    tokio::time::sleep(BROKER_RETRY_DELAY).await;
                }
                Err(e) => error!(
                    queue = %job.queue,
                    job_id = %job.id,
                    error = %e,
                    "Failed to {}, leaving job to stalled-job recovery",
                    action
                ),
            }
        }
        None
    }

    /// Run one attempt and report the outcome to the broker and the monitor.
    async fn process(&self, mut job: Job) {
        let metrics = QueueMetrics::new(job.queue);
        let started = Instant::now();

        debug!(
            queue = %job.queue,
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts_made + 1,
            "Processing job"
        );

        let broker = &self.broker;
        match self.run_handler(&job).await {
            Ok(result) => {
                let result_ref = &result;
                let settled = self
                    .settle(&job, "mark job completed", |mut candidate| async move {
                        broker
                            .complete(&mut candidate, result_ref)
                            .await
                            .map(|()| (candidate, ()))
                    })
                    .await;
                if let Some((completed, ())) = settled {
                    job = completed;
                }
                metrics.job_completed(&job.job_type, started.elapsed());

                // The handler's side effects happened, so follow-ups go out
                // even when the completion could not be recorded.
                for follow_up in &result.follow_ups {
                    match self.dispatcher.submit_follow_up(follow_up).await {
                        Ok(dispatched) => debug!(
                            parent_job_id = %job.id,
                            queue = %follow_up.queue,
                            job_type = %follow_up.job_type,
                            follow_up_id = %dispatched.id(),
                            "Follow-up job dispatched"
                        ),
                        Err(e) => error!(
                            parent_job_id = %job.id,
                            queue = %follow_up.queue,
                            job_type = %follow_up.job_type,
                            error = %e,
                            "Failed to dispatch follow-up job"
                        ),
                    }
                }

                self.monitor.observe(LifecycleEvent::Completed {
                    queue: job.queue,
                    job_id: job.id,
                    job_type: job.job_type,
                    data: result.data,
                    follow_ups: result.follow_ups,
                });
            }
            Err(err) => {
                metrics.job_failed(&job.job_type, err.kind());
                let reason = err.to_string();
                let reason_ref = reason.as_str();

                let settled = self
                    .settle(&job, "record job failure", |mut candidate| async move {
                        broker
                            .fail(&mut candidate, reason_ref)
                            .await
                            .map(|outcome| (candidate, outcome))
                    })
                    .await;
                if let Some((failed, outcome)) = settled {
                    self.monitor.observe(failed_event(failed, reason, outcome));
                }
            }
        }
    }
}

/// Worker for one live queue.
///
/// Jobs run concurrently up to `WorkerConfig::concurrency`. On shutdown the
/// worker stops reserving new jobs and waits for in-flight ones to finish;
/// a started attempt is never cancelled.
pub struct QueueWorker {
    context: JobContext,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
}

impl QueueWorker {
    pub fn new(
        broker: Arc<dyn Broker>,
        handlers: Arc<HandlerSet>,
        dispatcher: Dispatcher,
        monitor: Arc<LifecycleMonitor>,
        config: WorkerConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        Self {
            context: JobContext {
                broker,
                handlers,
                dispatcher,
                monitor,
            },
            config,
            semaphore,
        }
    }

    /// Run the worker loop until the shutdown flag flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        let queue = self.context.broker.queue();
        info!(
            queue = %queue,
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting queue worker"
        );

        let mut tasks = JoinSet::new();
        let mut next_stall_check = tokio::time::Instant::now();

        loop {
            if *shutdown.borrow() {
                info!(queue = %queue, "Received shutdown signal, stopping worker");
                break;
            }

            while let Some(done) = tasks.try_join_next() {
                if let Err(e) = done {
                    error!(queue = %queue, error = %e, "Job task panicked");
                }
            }

            if tokio::time::Instant::now() >= next_stall_check {
                next_stall_check = tokio::time::Instant::now() + self.config.stall_check_interval;
                self.recover_stalled().await;
            }

            if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
                match self.context.broker.reserve().await {
                    Ok(Some(job)) => {
                        let context = self.context.clone();
                        tasks.spawn(async move {
                            let _permit = permit;
                            context.process(job).await;
                        });
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(queue = %queue, error = %e, "Failed to reserve job"),
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!(queue = %queue, "Shutdown channel closed, stopping worker");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(queue = %queue, in_flight = in_flight, "Waiting for in-flight jobs");
        }
        while let Some(done) = tasks.join_next().await {
            if let Err(e) = done {
                error!(queue = %queue, error = %e, "Job task panicked");
            }
        }

        info!(queue = %queue, "Queue worker stopped");
        Ok(())
    }

    /// Fail jobs whose lease lapsed, e.g. held by a worker process that died.
    async fn recover_stalled(&self) {
        match self.context.broker.recover_stalled().await {
            Ok(recovered) => {
                for (job, outcome) in recovered {
                    QueueMetrics::new(job.queue).job_failed(&job.job_type, "stalled");
                    self.context
                        .monitor
                        .observe(failed_event(job, STALLED_REASON.to_string(), outcome));
                }
            }
            Err(e) => warn!(queue = %self.context.broker.queue(), error = %e, "Failed to recover stalled jobs"),
        }
    }
}
