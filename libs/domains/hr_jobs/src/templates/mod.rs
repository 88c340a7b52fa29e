//! Email template rendering engine.
//!
//! Handlebars templates for every [`EmailType`]. Bodies are HTML-escaped,
//! subjects are rendered without escaping, and the plain-text alternative is
//! the HTML body with its tags stripped.

use crate::error::{HrJobError, HrJobResult};
use crate::models::EmailType;
use handlebars::Handlebars;
use regex::Regex;
use serde_json::{Map, Value};
use strum::IntoEnumIterator;
use tracing::debug;

/// Rendered email content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Template engine for the HR email templates.
pub struct TemplateEngine {
    bodies: Handlebars<'static>,
    subjects: Handlebars<'static>,
    tags: Regex,
}

impl TemplateEngine {
    /// Create an engine with every template registered.
    pub fn new() -> HrJobResult<Self> {
        let mut bodies = Handlebars::new();
        let mut subjects = Handlebars::new();
        subjects.register_escape_fn(handlebars::no_escape);

        for email_type in EmailType::iter() {
            let (subject, html) = sources(email_type);
            bodies.register_template_string(email_type.as_ref(), html)?;
            subjects.register_template_string(email_type.as_ref(), subject)?;
        }

        let tags = Regex::new(r"<[^>]*>").map_err(|e| HrJobError::Template(e.to_string()))?;

        Ok(Self { bodies, subjects, tags })
    }

    /// Render the template for `email_type` with the job's data.
    pub fn render(&self, email_type: EmailType, data: &Map<String, Value>) -> HrJobResult<RenderedEmail> {
        debug!(email_type = %email_type, "Rendering email");

        let subject = self.subjects.render(email_type.as_ref(), data)?;
        let html = self.bodies.render(email_type.as_ref(), data)?;
        let text = self.strip_tags(&html);

        Ok(RenderedEmail {
            subject: subject.trim().to_string(),
            html,
            text,
        })
    }

    fn strip_tags(&self, html: &str) -> String {
        self.tags
            .replace_all(html, "")
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Subject and HTML body source for each template.
fn sources(email_type: EmailType) -> (&'static str, &'static str) {
    match email_type {
        EmailType::ApplicationReceived => (APPLICATION_RECEIVED_SUBJECT, APPLICATION_RECEIVED_HTML),
        EmailType::ApplicationRejected => (APPLICATION_REJECTED_SUBJECT, APPLICATION_REJECTED_HTML),
        EmailType::InterviewScheduled => (INTERVIEW_SCHEDULED_SUBJECT, INTERVIEW_SCHEDULED_HTML),
        EmailType::LeaveApproved => (LEAVE_APPROVED_SUBJECT, LEAVE_APPROVED_HTML),
        EmailType::ResumeProcessed => (RESUME_PROCESSED_SUBJECT, RESUME_PROCESSED_HTML),
        EmailType::ReportGenerated => (REPORT_GENERATED_SUBJECT, REPORT_GENERATED_HTML),
    }
}

// ============================================================================
// Template sources
// ============================================================================

const APPLICATION_RECEIVED_SUBJECT: &str = "Application Received - {{jobTitle}}";
const APPLICATION_RECEIVED_HTML: &str = r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #2563eb;">Application Received</h2>
  <p>Dear {{candidateName}},</p>
  <p>Thank you for applying to the {{jobTitle}} position.</p>
  <p>We have received your application and will review it shortly. You will hear from us within the next 2-3 business days.</p>
  <p>Best regards,<br>HR Team</p>
</div>"#;

const APPLICATION_REJECTED_SUBJECT: &str = "Application Update - {{jobTitle}}";
const APPLICATION_REJECTED_HTML: &str = r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #2563eb;">Application Status Update</h2>
  <p>Dear {{candidateName}},</p>
  <p>Thank you for applying for the {{jobTitle}} position.</p>
  <p>After careful consideration, we have decided to move forward with other candidates at this time.</p>
  {{#if reason}}<p>Reason: {{reason}}</p>{{/if}}
  <p>We encourage you to apply for other positions that match your experience.</p>
  <p>Best regards,<br>HR Team</p>
</div>"#;

const INTERVIEW_SCHEDULED_SUBJECT: &str = "Interview Scheduled - {{jobTitle}} Position";
const INTERVIEW_SCHEDULED_HTML: &str = r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #2563eb;">Interview Scheduled</h2>
  <p>Dear {{candidateName}},</p>
  <p>Your interview has been scheduled. Here are the details:</p>
  <div style="background: #f3f4f6; padding: 20px; border-radius: 8px; margin: 20px 0;">
    <p><strong>Position:</strong> {{jobTitle}}</p>
    <p><strong>Date:</strong> {{interviewDate}}</p>
    <p><strong>Time:</strong> {{interviewTime}}</p>
    <p><strong>Type:</strong> {{interviewType}}</p>
    {{#if location}}<p><strong>Location:</strong> {{location}}</p>{{/if}}
    {{#if meetingLink}}<p><strong>Meeting Link:</strong> <a href="{{meetingLink}}">Join Interview</a></p>{{/if}}
  </div>
  <p>Please confirm your attendance by replying to this email.</p>
  <p>Best regards,<br>HR Team</p>
</div>"#;

const LEAVE_APPROVED_SUBJECT: &str = "Leave Request Approved";
const LEAVE_APPROVED_HTML: &str = r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #2563eb;">Leave Request Approved</h2>
  <p>Dear {{employeeName}},</p>
  <p>Your leave request has been approved.</p>
  <ul>
    <li>Type: {{leaveType}}</li>
    <li>Start Date: {{startDate}}</li>
    <li>End Date: {{endDate}}</li>
    <li>Days: {{daysRequested}}</li>
  </ul>
  <p>Please ensure your work coverage is arranged before your leave period.</p>
  <p>Best regards,<br>HR Team</p>
</div>"#;

const RESUME_PROCESSED_SUBJECT: &str = "New Resume Processed - Candidate Application";
const RESUME_PROCESSED_HTML: &str = r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #2563eb;">New Candidate Resume Processed</h2>
  <p>Hello HR Team,</p>
  <p>A new resume has been processed and is ready for your review:</p>
  <div style="background: #f3f4f6; padding: 20px; border-radius: 8px; margin: 20px 0;">
    <p><strong>Name:</strong> {{candidateName}}</p>
    <p><strong>Job Title:</strong> {{jobTitle}}</p>
    <p><strong>Fit Score:</strong> {{fitScore}}/100</p>
  </div>
  <p>Please review the candidate's profile and schedule an interview if appropriate.</p>
</div>"#;

const REPORT_GENERATED_SUBJECT: &str = "Report Ready - {{reportType}}";
const REPORT_GENERATED_HTML: &str = r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #2563eb;">Your report is ready</h2>
  <p>The {{reportType}} report generated at {{generatedAt}} is attached below.</p>
  {{#if period}}<p><strong>Period:</strong> {{period.startDate}} to {{period.endDate}}</p>{{/if}}
  <pre style="background: #f3f4f6; padding: 20px; border-radius: 8px;">{{reportData}}</pre>
</div>"#;
