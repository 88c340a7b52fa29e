//! HR handlers running behind real workers over the in-memory broker.

use async_trait::async_trait;
use domain_hr_jobs::analysis::{
    AnalysisService, ResumeAnalysis, ResumeAnalysisRequest, TranscriptAnalysis, TranscriptAnalysisRequest,
};
use domain_hr_jobs::providers::{EmailProvider, OutgoingEmail, SentEmail};
use domain_hr_jobs::store::EntityKind;
use domain_hr_jobs::{
    HrDependencies, HrJobError, HrJobResult, HrJobSettings, InMemoryRecordStore, TemplateEngine, handler_set,
};
use job_queue::{
    Dispatcher, JobId, JobOptions, LifecycleEvent, LifecycleMonitor, MemoryBroker, QueueName, QueueRegistry,
    QueueWorker, ShutdownCoordinator, WorkerConfig,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Default)]
struct RecordingProvider {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingProvider {
    fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailProvider for RecordingProvider {
    async fn send(&self, email: &OutgoingEmail) -> HrJobResult<SentEmail> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        Ok(SentEmail {
            id: format!("msg-{}", sent.len()),
        })
    }

    fn name(&self) -> &'static str {
        "Recording"
    }

    async fn health_check(&self) -> HrJobResult<bool> {
        Ok(true)
    }
}

struct FixedAnalysis;

#[async_trait]
impl AnalysisService for FixedAnalysis {
    async fn analyze_resume(&self, request: &ResumeAnalysisRequest) -> HrJobResult<ResumeAnalysis> {
        Ok(ResumeAnalysis {
            skills: vec!["rust".to_string()],
            fit_score: 91.0,
            recommended_role: Some("Platform Engineer".to_string()),
            candidate_name: Some(format!("Candidate {}", request.candidate_id)),
            job_title: Some("Engineer".to_string()),
        })
    }

    async fn analyze_transcript(&self, _request: &TranscriptAnalysisRequest) -> HrJobResult<TranscriptAnalysis> {
        Err(HrJobError::Analysis("not used".to_string()))
    }
}

struct Pipeline {
    dispatcher: Dispatcher,
    monitor: Arc<LifecycleMonitor>,
    coordinator: ShutdownCoordinator,
    provider: Arc<RecordingProvider>,
    store: Arc<InMemoryRecordStore>,
}

impl Pipeline {
    fn start() -> Self {
        let queues = [
            QueueName::ResumeProcessing,
            QueueName::EmailNotifications,
            QueueName::DataAnalytics,
            QueueName::ReportGeneration,
        ];
        let registry = Arc::new(
            queues
                .iter()
                .fold(QueueRegistry::builder(), |builder, queue| {
                    builder.live(*queue, Arc::new(MemoryBroker::for_queue(*queue)))
                })
                .build(),
        );

        let provider = Arc::new(RecordingProvider::default());
        let store = Arc::new(InMemoryRecordStore::new());
        let deps = HrDependencies {
            store: store.clone(),
            email: provider.clone(),
            analysis: Arc::new(FixedAnalysis),
            templates: Arc::new(TemplateEngine::new().unwrap()),
            settings: HrJobSettings::default(),
        };
        let handlers = Arc::new(handler_set(&deps));

        let dispatcher = Dispatcher::new(registry.clone());
        let monitor = Arc::new(LifecycleMonitor::attach(&registry));
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
            provider,
            store,
        }
    }
}

async fn next_for(rx: &mut broadcast::Receiver<LifecycleEvent>, queue: QueueName) -> LifecycleEvent {
    tokio::time::timeout(Duration::from_secs(300), async {
        loop {
            let event = rx.recv().await.expect("monitor channel open");
            if event.queue() == queue {
                return event;
            }
        }
    })
    .await
    .expect("event before timeout")
}

async fn terminal_for(rx: &mut broadcast::Receiver<LifecycleEvent>, job_id: JobId) -> LifecycleEvent {
    tokio::time::timeout(Duration::from_secs(300), async {
        loop {
            let event = rx.recv().await.expect("monitor channel open");
            let terminal = matches!(event, LifecycleEvent::Completed { .. }) || event.is_dead_lettered();
            if event.job_id() == job_id && terminal {
                return event;
            }
        }
    })
    .await
    .expect("event before timeout")
}

#[tokio::test(start_paused = true)]
async fn test_application_received_email_sent_once() {
    let pipeline = Pipeline::start();
    let mut events = pipeline.monitor.subscribe();

    let dispatched = pipeline
        .dispatcher
        .submit(
            "emailNotifications",
            "send-email",
            json!({
                "type": "application_received",
                "to": "a@b.com",
                "data": {"candidateName": "Ada", "jobTitle": "Engineer"}
            }),
            JobOptions::new(),
        )
        .await
        .unwrap();
    assert!(!dispatched.is_mock());

    let done = terminal_for(&mut events, dispatched.job().unwrap().id).await;
    match done {
        LifecycleEvent::Completed { data, .. } => assert_eq!(data["success"], json!(true)),
        other => panic!("unexpected event: {:?}", other),
    }

    let sent = pipeline.provider.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["a@b.com".to_string()]);
    assert!(sent[0].subject.contains("Engineer"));
    assert!(sent[0].html.contains("Ada"));
    assert!(sent[0].html.contains("Engineer"));

    pipeline.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_bogus_report_dead_letters_without_email() {
    let pipeline = Pipeline::start();
    let mut events = pipeline.monitor.subscribe();

    let dispatched = pipeline
        .dispatcher
        .submit(
            "reportGeneration",
            "generate-report",
            json!({"reportType": "bogus", "requesterEmail": "boss@company.com"}),
            JobOptions::new(),
        )
        .await
        .unwrap();

    let last = terminal_for(&mut events, dispatched.job().unwrap().id).await;
    match last {
        LifecycleEvent::Failed {
            error, attempts_made, ..
        } => {
            assert_eq!(attempts_made, 2);
            assert!(error.contains("bogus"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(pipeline.provider.sent().is_empty());

    pipeline.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_processed_resume_notifies_hr() {
    let pipeline = Pipeline::start();
    let mut events = pipeline.monitor.subscribe();

    pipeline
        .dispatcher
        .submit(
            "resumeProcessing",
            "process-resume",
            json!({"candidateId": "c-7", "filePath": "/uploads/c-7.pdf"}),
            JobOptions::new(),
        )
        .await
        .unwrap();

    let resume_done = next_for(&mut events, QueueName::ResumeProcessing).await;
    assert!(matches!(resume_done, LifecycleEvent::Completed { .. }));
    let email_done = next_for(&mut events, QueueName::EmailNotifications).await;
    assert!(matches!(email_done, LifecycleEvent::Completed { .. }));

    let sent = pipeline.provider.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["hr@company.com".to_string()]);
    assert!(sent[0].html.contains("Candidate c-7"));

    let candidate = pipeline.store.entity(EntityKind::Candidate, "c-7").await.unwrap();
    assert_eq!(candidate["processingStatus"], json!("processed"));
    assert_eq!(candidate["fitScore"], json!(91.0));

    pipeline.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_analytics_through_the_queue() {
    let pipeline = Pipeline::start();
    pipeline
        .store
        .insert_all(
            EntityKind::Employee,
            (0..10).map(|i| {
                json!({"id": format!("e{i}"), "departmentId": "eng", "isActive": true, "hireDate": "2024-03-01T00:00:00Z"})
            }),
        )
        .await;
    pipeline
        .store
        .insert_all(
            EntityKind::LeaveRequest,
            [
                json!({"id": "l1", "departmentId": "eng", "createdAt": "2024-03-02T00:00:00Z"}),
                json!({"id": "l2", "departmentId": "eng", "createdAt": "2024-03-03T00:00:00Z"}),
            ],
        )
        .await;
    let mut events = pipeline.monitor.subscribe();

    pipeline
        .dispatcher
        .submit(
            "dataAnalytics",
            "calculate-metrics",
            json!({
                "departmentId": "eng",
                "dateRange": {"start": "2024-01-01T00:00:00Z", "end": "2024-12-31T00:00:00Z"}
            }),
            JobOptions::new(),
        )
        .await
        .unwrap();

    match next_for(&mut events, QueueName::DataAnalytics).await {
        LifecycleEvent::Completed { data, .. } => {
            let metrics = &data["analytics"]["metrics"];
            assert_eq!(metrics["employeeCount"], json!(10));
            assert_eq!(metrics["leaveRequests"], json!(2));
            assert_eq!(metrics["averageSalary"], json!(0.0));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    pipeline.coordinator.shutdown().await;
}
