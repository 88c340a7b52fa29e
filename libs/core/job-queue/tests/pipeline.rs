//! End-to-end behavior of registry, dispatcher, workers, monitor and shutdown
//! over the in-memory broker.

use async_trait::async_trait;
use chrono::Utc;
use job_queue::{
    Broker, Dispatcher, FailOutcome, FollowUp, HandlerSet, Job, JobCounts, JobError, JobHandler, JobOptions,
    JobResult, LifecycleEvent, LifecycleMonitor, MemoryBroker, QueueConfig, QueueError, QueueName, QueueRegistry,
    QueueWorker, STALLED_REASON, ShutdownCoordinator, WorkerConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

struct AlwaysFails {
    calls: AtomicU32,
}

#[async_trait]
impl JobHandler for AlwaysFails {
    async fn handle(&self, _job: &Job) -> Result<JobResult, JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(JobError::handler("aggregate source offline"))
    }

    fn name(&self) -> &'static str {
        "AlwaysFails"
    }
}

struct Counting {
    calls: AtomicU32,
    follow_up: Option<FollowUp>,
}

#[async_trait]
impl JobHandler for Counting {
    async fn handle(&self, job: &Job) -> Result<JobResult, JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut result = JobResult::success(json!({ "echo": job.payload }));
        if let Some(follow_up) = &self.follow_up {
            result = result.with_follow_up(follow_up.clone());
        }
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "Counting"
    }
}

struct Panics {
    calls: AtomicU32,
}

#[async_trait]
impl JobHandler for Panics {
    async fn handle(&self, job: &Job) -> Result<JobResult, JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rows: Vec<u64> = Vec::new();
        let first = rows[job.attempts_made as usize];
        Ok(JobResult::success(json!({ "first": first })))
    }

    fn name(&self) -> &'static str {
        "Panics"
    }
}

/// Memory broker whose first `complete` calls error, like a dropped Redis
/// connection.
struct FlakyCompletion {
    inner: MemoryBroker,
    failures_left: AtomicU32,
}

#[async_trait]
impl Broker for FlakyCompletion {
    fn queue(&self) -> QueueName {
        self.inner.queue()
    }

    fn config(&self) -> &QueueConfig {
        self.inner.config()
    }

    async fn add(&self, job: Job) -> Result<Job, QueueError> {
        self.inner.add(job).await
    }

    async fn reserve(&self) -> Result<Option<Job>, QueueError> {
        self.inner.reserve().await
    }

    async fn extend_lease(&self, job: &Job) -> Result<bool, QueueError> {
        self.inner.extend_lease(job).await
    }

    async fn recover_stalled(&self) -> Result<Vec<(Job, FailOutcome)>, QueueError> {
        self.inner.recover_stalled().await
    }

    async fn complete(&self, job: &mut Job, result: &JobResult) -> Result<(), QueueError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QueueError::Connection("connection reset".to_string()));
        }
        self.inner.complete(job, result).await
    }

    async fn fail(&self, job: &mut Job, reason: &str) -> Result<FailOutcome, QueueError> {
        self.inner.fail(job, reason).await
    }

    async fn completed_jobs(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        self.inner.completed_jobs(limit).await
    }

    async fn failed_jobs(&self, limit: usize) -> Result<Vec<Job>, QueueError> {
        self.inner.failed_jobs(limit).await
    }

    async fn counts(&self) -> Result<JobCounts, QueueError> {
        self.inner.counts().await
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.inner.close().await
    }
}

struct Harness {
    dispatcher: Dispatcher,
    monitor: Arc<LifecycleMonitor>,
    coordinator: ShutdownCoordinator,
    brokers: Vec<(QueueName, Arc<dyn Broker>)>,
}

impl Harness {
    fn start(live: &[QueueName], handlers: HandlerSet) -> Self {
        let brokers = live
            .iter()
            .map(|queue| Arc::new(MemoryBroker::for_queue(*queue)) as Arc<dyn Broker>)
            .collect();
        Self::with_brokers(brokers, handlers)
    }

    fn with_brokers(live: Vec<Arc<dyn Broker>>, handlers: HandlerSet) -> Self {
        let mut builder = QueueRegistry::builder();
        let mut brokers = Vec::new();
        for broker in live {
            builder = builder.live(broker.queue(), broker.clone());
            brokers.push((broker.queue(), broker));
        }
        let registry = Arc::new(builder.build());
        let dispatcher = Dispatcher::new(registry.clone());
        let monitor = Arc::new(LifecycleMonitor::attach(&registry));
        let handlers = Arc::new(handlers);
        let mut coordinator = ShutdownCoordinator::new(registry.clone());

        for (_, broker) in registry.live() {
            let worker = QueueWorker::new(
                broker.clone(),
                handlers.clone(),
                dispatcher.clone(),
                monitor.clone(),
                WorkerConfig::new().with_concurrency(2).with_poll_interval_ms(50),
            );
            let shutdown = coordinator.subscribe();
            coordinator.track(tokio::spawn(async move { worker.run(shutdown).await }));
        }

        Self {
            dispatcher,
            monitor,
            coordinator,
            brokers,
        }
    }

    fn broker(&self, queue: QueueName) -> &Arc<dyn Broker> {
        &self
            .brokers
            .iter()
            .find(|(q, _)| *q == queue)
            .expect("queue is live")
            .1
    }
}

async fn next_matching<F>(rx: &mut broadcast::Receiver<LifecycleEvent>, pred: F) -> LifecycleEvent
where
    F: Fn(&LifecycleEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(300), async {
        loop {
            let event = rx.recv().await.expect("monitor channel open");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event before timeout")
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_handler_attempted_exactly_max_attempts() {
    let handler = Arc::new(AlwaysFails {
        calls: AtomicU32::new(0),
    });
    let harness = Harness::start(
        &[QueueName::DataAnalytics],
        HandlerSet::new().register(QueueName::DataAnalytics, "calculate-metrics", handler.clone()),
    );
    let mut events = harness.monitor.subscribe();

    let dispatched = harness
        .dispatcher
        .submit("dataAnalytics", "calculate-metrics", json!({"departmentId": "d-1"}), JobOptions::new())
        .await
        .unwrap();
    let job_id = dispatched.job().unwrap().id;

    let first = next_matching(&mut events, |e| e.job_id() == job_id).await;
    assert!(!first.is_dead_lettered());

    let last = next_matching(&mut events, |e| e.job_id() == job_id).await;
    assert!(last.is_dead_lettered());
    match last {
        LifecycleEvent::Failed {
            attempts_made,
            max_attempts,
            retry_in,
            ..
        } => {
            assert_eq!(attempts_made, 2);
            assert_eq!(max_attempts, 2);
            assert!(retry_in.is_none());
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // Give the worker time to (wrongly) pick the job up again
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

    let failed = harness
        .broker(QueueName::DataAnalytics)
        .failed_jobs(10)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, job_id);
    assert_eq!(failed[0].failed_reason.as_deref(), Some("aggregate source offline"));

    harness.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_queue_never_reaches_handler() {
    let handler = Arc::new(Counting {
        calls: AtomicU32::new(0),
        follow_up: None,
    });
    let harness = Harness::start(
        &[QueueName::EmailNotifications],
        HandlerSet::new().register(QueueName::ResumeProcessing, "process-resume", handler.clone()),
    );

    let dispatched = harness
        .dispatcher
        .submit("resumeProcessing", "process-resume", json!({"candidateId": "c-1"}), JobOptions::new())
        .await
        .unwrap();
    assert!(dispatched.is_mock());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    assert!(!harness.monitor.observes(QueueName::ResumeProcessing));

    harness.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_follow_up_dispatched_after_completion() {
    let report_handler = Arc::new(Counting {
        calls: AtomicU32::new(0),
        follow_up: Some(FollowUp::new(
            QueueName::EmailNotifications,
            "send-email",
            json!({"type": "report_generated", "to": "boss@company.com"}),
        )),
    });
    let email_handler = Arc::new(Counting {
        calls: AtomicU32::new(0),
        follow_up: None,
    });
    let harness = Harness::start(
        &[QueueName::ReportGeneration, QueueName::EmailNotifications],
        HandlerSet::new()
            .register(QueueName::ReportGeneration, "generate-report", report_handler.clone())
            .register(QueueName::EmailNotifications, "send-email", email_handler.clone()),
    );
    let mut events = harness.monitor.subscribe();

    harness
        .dispatcher
        .submit("reportGeneration", "generate-report", json!({"reportType": "payroll_summary"}), JobOptions::new())
        .await
        .unwrap();

    let report_done = next_matching(&mut events, |e| e.queue() == QueueName::ReportGeneration).await;
    match report_done {
        LifecycleEvent::Completed { follow_ups, .. } => {
            assert_eq!(follow_ups.len(), 1);
            assert_eq!(follow_ups[0].queue, QueueName::EmailNotifications);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let email_done = next_matching(&mut events, |e| e.queue() == QueueName::EmailNotifications).await;
    assert!(matches!(email_done, LifecycleEvent::Completed { .. }));
    assert_eq!(email_handler.calls.load(Ordering::SeqCst), 1);

    let completed = harness
        .broker(QueueName::ReportGeneration)
        .completed_jobs(10)
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);

    harness.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_queues_after_workers_stop() {
    let handler = Arc::new(Counting {
        calls: AtomicU32::new(0),
        follow_up: None,
    });
    let harness = Harness::start(
        &[QueueName::ReportGeneration],
        HandlerSet::new().register(QueueName::ReportGeneration, "generate-report", handler),
    );
    let broker = harness.broker(QueueName::ReportGeneration).clone();

    let report = harness.coordinator.shutdown().await;
    assert_eq!(report.closed, vec![QueueName::ReportGeneration]);

    // Closed queues refuse new work; the dispatcher surfaces that error
    let err = harness
        .dispatcher
        .submit("reportGeneration", "generate-report", json!({}), JobOptions::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("closed"));
    assert_eq!(broker.counts().await.unwrap().waiting, 0);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_handler_is_retried_then_dead_lettered() {
    let handler = Arc::new(Panics {
        calls: AtomicU32::new(0),
    });
    let harness = Harness::start(
        &[QueueName::ReportGeneration],
        HandlerSet::new().register(QueueName::ReportGeneration, "generate-report", handler.clone()),
    );
    let mut events = harness.monitor.subscribe();

    let dispatched = harness
        .dispatcher
        .submit("reportGeneration", "generate-report", json!({"reportType": "payroll_summary"}), JobOptions::new())
        .await
        .unwrap();
    let job_id = dispatched.job().unwrap().id;

    let dead = next_matching(&mut events, |e| e.job_id() == job_id && e.is_dead_lettered()).await;
    match dead {
        LifecycleEvent::Failed { error, attempts_made, .. } => {
            assert!(error.starts_with("Handler panicked"), "{}", error);
            assert_eq!(attempts_made, 2);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

    let broker = harness.broker(QueueName::ReportGeneration);
    let failed = broker.failed_jobs(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, job_id);
    let counts = broker.counts().await.unwrap();
    assert_eq!(counts.active, 0);
    assert_eq!(counts.failed, 1);

    harness.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_completion_recorded_after_transient_broker_error() {
    let broker: Arc<dyn Broker> = Arc::new(FlakyCompletion {
        inner: MemoryBroker::for_queue(QueueName::ReportGeneration),
        failures_left: AtomicU32::new(1),
    });
    let report_handler = Arc::new(Counting {
        calls: AtomicU32::new(0),
        follow_up: Some(FollowUp::new(
            QueueName::EmailNotifications,
            "send-email",
            json!({"type": "report_generated", "to": "boss@company.com"}),
        )),
    });
    let email_handler = Arc::new(Counting {
        calls: AtomicU32::new(0),
        follow_up: None,
    });
    let harness = Harness::with_brokers(
        vec![
            broker,
            Arc::new(MemoryBroker::for_queue(QueueName::EmailNotifications)) as Arc<dyn Broker>,
        ],
        HandlerSet::new()
            .register(QueueName::ReportGeneration, "generate-report", report_handler.clone())
            .register(QueueName::EmailNotifications, "send-email", email_handler.clone()),
    );
    let mut events = harness.monitor.subscribe();

    harness
        .dispatcher
        .submit("reportGeneration", "generate-report", json!({}), JobOptions::new())
        .await
        .unwrap();

    let email_done = next_matching(&mut events, |e| e.queue() == QueueName::EmailNotifications).await;
    assert!(matches!(email_done, LifecycleEvent::Completed { .. }));

    let reports = harness.broker(QueueName::ReportGeneration);
    assert_eq!(reports.completed_jobs(10).await.unwrap().len(), 1);
    assert_eq!(reports.counts().await.unwrap().active, 0);
    assert_eq!(report_handler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(email_handler.calls.load(Ordering::SeqCst), 1);

    harness.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_job_held_by_dead_worker_is_recovered_and_rerun() {
    let broker = Arc::new(MemoryBroker::for_queue(QueueName::ReportGeneration));
    let options = JobOptions::new().resolve(broker.config(), Utc::now());
    let orphan = broker
        .add(Job::new(QueueName::ReportGeneration, "generate-report", json!({}), options))
        .await
        .unwrap();
    // Reserved by a worker that then disappeared
    broker.reserve().await.unwrap().unwrap();

    let handler = Arc::new(Counting {
        calls: AtomicU32::new(0),
        follow_up: None,
    });
    let harness = Harness::with_brokers(
        vec![broker.clone() as Arc<dyn Broker>],
        HandlerSet::new().register(QueueName::ReportGeneration, "generate-report", handler.clone()),
    );
    let mut events = harness.monitor.subscribe();

    let stalled = next_matching(&mut events, |e| e.job_id() == orphan.id).await;
    match stalled {
        LifecycleEvent::Failed { error, attempts_made, retry_in, .. } => {
            assert_eq!(error, STALLED_REASON);
            assert_eq!(attempts_made, 1);
            assert_eq!(retry_in, Some(Duration::ZERO));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let rerun = next_matching(&mut events, |e| e.job_id() == orphan.id).await;
    assert!(matches!(rerun, LifecycleEvent::Completed { .. }));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

    let completed = broker.completed_jobs(10).await.unwrap();
    assert_eq!(completed[0].attempts_made, 1);

    harness.coordinator.shutdown().await;
}
