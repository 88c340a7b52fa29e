//! Typed payloads for the HR job types.
//!
//! Handlers decode the opaque job payload into one of these structs before
//! doing any work; a payload that does not fit fails with `InvalidPayload`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString};

// ============================================================================
// Job type labels
// ============================================================================

/// Job type labels, one per handler.
pub mod job_types {
    pub const PROCESS_RESUME: &str = "process-resume";
    pub const SEND_EMAIL: &str = "send-email";
    pub const PROCESS_INTERVIEW_TRANSCRIPT: &str = "process-interview-transcript";
    pub const CALCULATE_METRICS: &str = "calculate-metrics";
    pub const GENERATE_REPORT: &str = "generate-report";
}

// ============================================================================
// Resume processing
// ============================================================================

/// Payload of `process-resume`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeJob {
    pub candidate_id: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_posting_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_period: Option<String>,
}

// ============================================================================
// Email
// ============================================================================

/// Email templates known to the email handler.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmailType {
    /// Candidate acknowledgement after applying.
    ApplicationReceived,
    /// Candidate rejection notice.
    ApplicationRejected,
    /// Interview invitation.
    InterviewScheduled,
    /// Employee leave approval.
    LeaveApproved,
    /// HR notice that a resume was analysed.
    ResumeProcessed,
    /// Delivery of a generated report.
    ReportGenerated,
}

/// One address or a list of addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Recipients::One(address) => vec![address.clone()],
            Recipients::Many(addresses) => addresses.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Recipients::One(address) => address.trim().is_empty(),
            Recipients::Many(addresses) => addresses.iter().all(|a| a.trim().is_empty()),
        }
    }
}

impl From<&str> for Recipients {
    fn from(address: &str) -> Self {
        Recipients::One(address.to_string())
    }
}

/// Payload of `send-email`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailJob {
    #[serde(rename = "type")]
    pub email_type: EmailType,
    pub to: Recipients,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl SendEmailJob {
    pub fn new(email_type: EmailType, to: impl Into<Recipients>, data: Map<String, Value>) -> Self {
        Self {
            email_type,
            to: to.into(),
            cc: Vec::new(),
            bcc: Vec::new(),
            data,
        }
    }
}

// ============================================================================
// Interview transcripts
// ============================================================================

/// Payload of `process-interview-transcript`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptJob {
    pub transcript_id: String,
    pub interview_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    pub transcript: String,
    /// Interview length in minutes
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(default)]
    pub job_requirements: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_name: Option<String>,
}

// ============================================================================
// Analytics
// ============================================================================

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Payload of `calculate-metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsJob {
    pub department_id: String,
    pub date_range: DateRange,
}

// ============================================================================
// Reports
// ============================================================================

/// Report builders known to the report handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReportType {
    PayrollSummary,
    AttendanceReport,
    DepartmentPerformance,
    RecruitmentAnalytics,
    PerformanceReview,
}

impl ReportType {
    /// Whether the finished report is emailed to the requester.
    pub fn is_emailed(&self) -> bool {
        !matches!(self, ReportType::DepartmentPerformance)
    }
}

/// Report filters; each builder uses the subset it needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_posting_id: Option<String>,
}

/// Payload of `generate-report`.
///
/// `report_type` stays a string so an unrecognised type is reported as
/// `UnknownReportType` rather than as a malformed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportJob {
    pub report_type: String,
    #[serde(default)]
    pub parameters: ReportParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}
