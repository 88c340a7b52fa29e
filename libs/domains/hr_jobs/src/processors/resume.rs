//! `process-resume`: analyse a candidate's resume and record the result.

use super::{HrDependencies, fields};
use crate::analysis::{AnalysisService, ResumeAnalysis, ResumeAnalysisRequest};
use crate::error::{HrJobError, HrJobResult, with_timeout};
use crate::models::{EmailType, ResumeJob, SendEmailJob, job_types};
use crate::store::{EntityKind, RecordStore};
use async_trait::async_trait;
use chrono::Utc;
use job_queue::{FollowUp, Job, JobError, JobHandler, JobResult, QueueName};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Candidate status after a successful analysis.
pub const STATUS_PROCESSED: &str = "processed";
/// Candidate status after a failed attempt.
pub const STATUS_PROCESSED_WITH_ERROR: &str = "processed_with_error";

/// Resume analysis handler.
///
/// On success the candidate gets the skills/fit assessment and an HR notice is
/// requested as a follow-up email. On failure the candidate is first marked
/// `processed_with_error`, then the original error is returned so the queue
/// retries. Both writes set final values, so retries never leave the candidate
/// half processed and half failed.
pub struct ResumeProcessor {
    store: Arc<dyn RecordStore>,
    analysis: Arc<dyn AnalysisService>,
    hr_email: String,
    analysis_timeout: Duration,
}

impl ResumeProcessor {
    pub fn new(deps: &HrDependencies) -> Self {
        Self {
            store: deps.store.clone(),
            analysis: deps.analysis.clone(),
            hr_email: deps.settings.hr_email.clone(),
            analysis_timeout: deps.settings.analysis_timeout,
        }
    }

    async fn process(&self, job: &ResumeJob) -> HrJobResult<ResumeAnalysis> {
        let request = ResumeAnalysisRequest {
            file_path: job.file_path.clone(),
            candidate_id: job.candidate_id.clone(),
            job_posting_id: job.job_posting_id.clone(),
        };
        let analysis = with_timeout(
            "resume analysis",
            self.analysis_timeout,
            self.analysis.analyze_resume(&request),
        )
        .await?;

        self.store
            .update_entity(
                EntityKind::Candidate,
                &job.candidate_id,
                fields(json!({
                    "skills": analysis.skills,
                    "fitScore": analysis.fit_score,
                    "recommendedRole": analysis.recommended_role,
                    "isProcessed": true,
                    "processingStatus": STATUS_PROCESSED,
                    "processingError": null,
                    "processedAt": Utc::now(),
                })),
            )
            .await?;

        Ok(analysis)
    }

    /// Record the failure on the candidate. A failing write is logged; the
    /// caller still returns the original error.
    async fn record_failure(&self, candidate_id: &str, err: &HrJobError) {
        let update = self
            .store
            .update_entity(
                EntityKind::Candidate,
                candidate_id,
                fields(json!({
                    "isProcessed": true,
                    "processingStatus": STATUS_PROCESSED_WITH_ERROR,
                    "processingError": err.to_string(),
                    "processedAt": Utc::now(),
                })),
            )
            .await;

        if let Err(update_err) = update {
            error!(
                candidate_id = %candidate_id,
                error = %update_err,
                "Failed to record resume processing error on candidate"
            );
        }
    }

    fn hr_notice(&self, job: &ResumeJob, analysis: &ResumeAnalysis) -> HrJobResult<FollowUp> {
        let email = SendEmailJob::new(
            EmailType::ResumeProcessed,
            self.hr_email.as_str(),
            fields(json!({
                "candidateId": job.candidate_id,
                "candidateName": analysis.candidate_name,
                "fitScore": analysis.fit_score,
                "jobTitle": analysis.job_title,
            })),
        );

        Ok(FollowUp::new(
            QueueName::EmailNotifications,
            job_types::SEND_EMAIL,
            serde_json::to_value(email)?,
        ))
    }
}

#[async_trait]
impl JobHandler for ResumeProcessor {
    async fn handle(&self, job: &Job) -> Result<JobResult, JobError> {
        let payload: ResumeJob = job.decode()?;
        info!(job_id = %job.id, candidate_id = %payload.candidate_id, "Processing resume");

        let analysis = match self.process(&payload).await {
            Ok(analysis) => analysis,
            Err(err) => {
                error!(candidate_id = %payload.candidate_id, error = %err, "Resume processing failed");
                self.record_failure(&payload.candidate_id, &err).await;
                return Err(err.into());
            }
        };

        let follow_up = self.hr_notice(&payload, &analysis)?;
        Ok(JobResult::success(json!({
            "success": true,
            "candidateId": payload.candidate_id,
            "skills": analysis.skills,
            "fitScore": analysis.fit_score,
        }))
        .with_follow_up(follow_up))
    }

    fn name(&self) -> &'static str {
        "ResumeProcessor"
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::analysis::MockAnalysisService;
    use crate::providers::MockEmailProvider;
    use crate::store::{InMemoryRecordStore, MockRecordStore};

    fn resume_job() -> Job {
        job(
            QueueName::ResumeProcessing,
            job_types::PROCESS_RESUME,
            json!({"candidateId": "c-1", "filePath": "/uploads/ada.pdf", "jobPostingId": "jp-9"}),
        )
    }

    fn analysis_ok() -> MockAnalysisService {
        let mut analysis = MockAnalysisService::new();
        analysis.expect_analyze_resume().returning(|request| {
            assert_eq!(request.candidate_id, "c-1");
            assert_eq!(request.job_posting_id.as_deref(), Some("jp-9"));
            Ok(ResumeAnalysis {
                skills: vec!["rust".to_string(), "sql".to_string()],
                fit_score: 87.0,
                recommended_role: Some("Backend Engineer".to_string()),
                candidate_name: Some("Ada".to_string()),
                job_title: Some("Engineer".to_string()),
            })
        });
        analysis
    }

    fn analysis_failing() -> MockAnalysisService {
        let mut analysis = MockAnalysisService::new();
        analysis
            .expect_analyze_resume()
            .returning(|_| Err(HrJobError::Analysis("model offline".to_string())));
        analysis
    }

    #[tokio::test]
    async fn test_success_records_assessment_and_requests_hr_email() {
        let store = Arc::new(InMemoryRecordStore::new());
        let processor = ResumeProcessor::new(&deps_with(store.clone(), MockEmailProvider::new(), analysis_ok()));

        let result = processor.handle(&resume_job()).await.unwrap();
        assert_eq!(result.data["fitScore"], json!(87.0));
        assert_eq!(result.follow_ups.len(), 1);

        let follow_up = &result.follow_ups[0];
        assert_eq!(follow_up.queue, QueueName::EmailNotifications);
        assert_eq!(follow_up.job_type, job_types::SEND_EMAIL);
        let email: SendEmailJob = serde_json::from_value(follow_up.payload.clone()).unwrap();
        assert_eq!(email.email_type, EmailType::ResumeProcessed);
        assert_eq!(email.to.to_vec(), vec!["hr@company.com".to_string()]);
        assert_eq!(email.data["candidateName"], json!("Ada"));

        let candidate = store.entity(EntityKind::Candidate, "c-1").await.unwrap();
        assert_eq!(candidate["processingStatus"], json!(STATUS_PROCESSED));
        assert_eq!(candidate["processingError"], json!(null));
        assert_eq!(candidate["recommendedRole"], json!("Backend Engineer"));
    }

    #[tokio::test]
    async fn test_failure_is_recorded_before_it_is_returned() {
        let mut store = MockRecordStore::new();
        store
            .expect_update_entity()
            .times(1)
            .returning(|kind, id, fields| {
                assert_eq!(kind, EntityKind::Candidate);
                assert_eq!(id, "c-1");
                assert_eq!(fields["processingStatus"], json!(STATUS_PROCESSED_WITH_ERROR));
                assert_eq!(fields["isProcessed"], json!(true));
                assert!(fields["processingError"].as_str().unwrap().contains("model offline"));
                Ok(())
            });

        let processor = ResumeProcessor::new(&deps_with(
            Arc::new(store),
            MockEmailProvider::new(),
            analysis_failing(),
        ));
        let err = processor.handle(&resume_job()).await.unwrap_err();
        assert!(err.to_string().contains("model offline"));
    }

    #[tokio::test]
    async fn test_failure_marking_still_reraises_when_store_is_down() {
        let mut store = MockRecordStore::new();
        store
            .expect_update_entity()
            .times(1)
            .returning(|_, _, _| Err(HrJobError::Store("connection refused".to_string())));

        let processor = ResumeProcessor::new(&deps_with(
            Arc::new(store),
            MockEmailProvider::new(),
            analysis_failing(),
        ));
        let err = processor.handle(&resume_job()).await.unwrap_err();
        // The analysis error wins over the bookkeeping error
        assert!(err.to_string().contains("model offline"));
    }

    #[tokio::test]
    async fn test_repeated_failures_then_success_leave_consistent_state() {
        let store = Arc::new(InMemoryRecordStore::new());

        let failing = ResumeProcessor::new(&deps_with(store.clone(), MockEmailProvider::new(), analysis_failing()));
        assert!(failing.handle(&resume_job()).await.is_err());
        assert!(failing.handle(&resume_job()).await.is_err());

        let candidate = store.entity(EntityKind::Candidate, "c-1").await.unwrap();
        assert_eq!(candidate["processingStatus"], json!(STATUS_PROCESSED_WITH_ERROR));
        assert!(candidate.get("fitScore").is_none());

        let succeeding = ResumeProcessor::new(&deps_with(store.clone(), MockEmailProvider::new(), analysis_ok()));
        succeeding.handle(&resume_job()).await.unwrap();

        let candidate = store.entity(EntityKind::Candidate, "c-1").await.unwrap();
        assert_eq!(candidate["processingStatus"], json!(STATUS_PROCESSED));
        assert_eq!(candidate["processingError"], json!(null));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_invalid_and_touches_nothing() {
        let processor = ResumeProcessor::new(&deps(unused_store()));
        let bad = job(
            QueueName::ResumeProcessing,
            job_types::PROCESS_RESUME,
            json!({"filePath": "/uploads/ada.pdf"}),
        );
        let err = processor.handle(&bad).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload { .. }));
    }
}
