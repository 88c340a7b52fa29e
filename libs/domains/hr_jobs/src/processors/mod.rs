//! Job handlers for the four HR job families.

mod analytics;
mod email;
mod report;
mod resume;
mod transcript;

pub use analytics::AnalyticsProcessor;
pub use email::EmailProcessor;
pub use report::ReportProcessor;
pub use resume::ResumeProcessor;
pub use transcript::{TranscriptProcessor, TranscriptScores, calculate_scores, fallback_analysis};

use crate::analysis::AnalysisService;
use crate::models::job_types;
use crate::providers::EmailProvider;
use crate::store::RecordStore;
use crate::templates::TemplateEngine;
use job_queue::{HandlerSet, QueueName};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Tunables shared by the handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HrJobSettings {
    /// Recipient of resume-processed notices.
    pub hr_email: String,
    /// Budget for one email provider call.
    pub email_timeout: Duration,
    /// Budget for one analysis service call.
    pub analysis_timeout: Duration,
}

impl Default for HrJobSettings {
    fn default() -> Self {
        Self {
            hr_email: "hr@company.com".to_string(),
            email_timeout: Duration::from_secs(30),
            analysis_timeout: Duration::from_secs(30),
        }
    }
}

/// Collaborators shared by every handler invocation.
#[derive(Clone)]
pub struct HrDependencies {
    pub store: Arc<dyn RecordStore>,
    pub email: Arc<dyn EmailProvider>,
    pub analysis: Arc<dyn AnalysisService>,
    pub templates: Arc<TemplateEngine>,
    pub settings: HrJobSettings,
}

/// Bind every HR job type to its queue.
pub fn handler_set(deps: &HrDependencies) -> HandlerSet {
    HandlerSet::new()
        .register(
            QueueName::ResumeProcessing,
            job_types::PROCESS_RESUME,
            Arc::new(ResumeProcessor::new(deps)),
        )
        .register(
            QueueName::EmailNotifications,
            job_types::SEND_EMAIL,
            Arc::new(EmailProcessor::new(deps)),
        )
        .register(
            QueueName::EmailNotifications,
            job_types::PROCESS_INTERVIEW_TRANSCRIPT,
            Arc::new(TranscriptProcessor::new(deps)),
        )
        .register(
            QueueName::DataAnalytics,
            job_types::CALCULATE_METRICS,
            Arc::new(AnalyticsProcessor::new(deps)),
        )
        .register(
            QueueName::ReportGeneration,
            job_types::GENERATE_REPORT,
            Arc::new(ReportProcessor::new(deps)),
        )
}

/// Field map from a JSON object literal; anything else yields an empty map.
pub(crate) fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_all_job_types_registered() {
        let handlers = handler_set(&deps(unused_store()));
        assert!(handlers.get(QueueName::ResumeProcessing, job_types::PROCESS_RESUME).is_some());
        assert!(handlers.get(QueueName::EmailNotifications, job_types::SEND_EMAIL).is_some());
        assert!(
            handlers
                .get(QueueName::EmailNotifications, job_types::PROCESS_INTERVIEW_TRANSCRIPT)
                .is_some()
        );
        assert!(handlers.get(QueueName::DataAnalytics, job_types::CALCULATE_METRICS).is_some());
        assert!(handlers.get(QueueName::ReportGeneration, job_types::GENERATE_REPORT).is_some());
        assert_eq!(handlers.queues().len(), 4);
    }
}
