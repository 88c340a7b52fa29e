//! `send-email`: render a template and send it through the email provider.

use super::HrDependencies;
use crate::error::with_timeout;
use crate::models::SendEmailJob;
use crate::providers::{EmailProvider, OutgoingEmail};
use crate::templates::TemplateEngine;
use async_trait::async_trait;
use job_queue::{Job, JobError, JobHandler, JobResult};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Email handler.
pub struct EmailProcessor {
    provider: Arc<dyn EmailProvider>,
    templates: Arc<TemplateEngine>,
    timeout: Duration,
}

impl EmailProcessor {
    pub fn new(deps: &HrDependencies) -> Self {
        Self {
            provider: deps.email.clone(),
            templates: deps.templates.clone(),
            timeout: deps.settings.email_timeout,
        }
    }
}

#[async_trait]
impl JobHandler for EmailProcessor {
    async fn handle(&self, job: &Job) -> Result<JobResult, JobError> {
        let payload: SendEmailJob = job.decode()?;
        if payload.to.is_empty() {
            return Err(JobError::invalid_payload(&job.job_type, "no recipients"));
        }

        let recipients = payload.to.to_vec();
        info!(
            job_id = %job.id,
            email_type = %payload.email_type,
            to = ?recipients,
            provider = self.provider.name(),
            "Sending email"
        );

        let rendered = self.templates.render(payload.email_type, &payload.data)?;
        let email = OutgoingEmail {
            from: None,
            to: recipients.clone(),
            cc: payload.cc,
            bcc: payload.bcc,
            subject: rendered.subject,
            html: rendered.html,
            text: rendered.text,
        };

        let sent = with_timeout("email send", self.timeout, self.provider.send(&email)).await?;

        Ok(JobResult::success(json!({
            "success": true,
            "messageId": sent.id,
            "recipients": recipients,
            "type": payload.email_type,
        })))
    }

    fn name(&self) -> &'static str {
        "EmailProcessor"
    }
}
