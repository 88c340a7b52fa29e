//! Analysis service collaborator (resume and interview transcript scoring).

use crate::error::{HrJobError, HrJobResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Resume analysis request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResumeAnalysisRequest {
    pub file_path: String,
    pub candidate_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_posting_id: Option<String>,
}

/// Resume analysis response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeAnalysis {
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub fit_score: f64,
    #[serde(default)]
    pub recommended_role: Option<String>,
    #[serde(default)]
    pub candidate_name: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
}

/// Interview transcript analysis request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptAnalysisRequest {
    pub transcript: String,
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    pub job_requirements: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_name: Option<String>,
    pub interview_type: String,
}

/// Interview transcript analysis.
///
/// Scores are 0-100. Everything else the service returns is kept in `extra`
/// and stored verbatim with the analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptAnalysis {
    #[serde(default)]
    pub overall_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub communication_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_method: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Remote analysis of resumes and interview transcripts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze_resume(&self, request: &ResumeAnalysisRequest) -> HrJobResult<ResumeAnalysis>;

    async fn analyze_transcript(&self, request: &TranscriptAnalysisRequest) -> HrJobResult<TranscriptAnalysis>;
}

/// HTTP client for the ML service.
pub struct MlServiceClient {
    client: Client,
    base_url: String,
}

impl MlServiceClient {
    /// Create a client; every request is bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> HrJobResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HrJobError::Config(format!("Failed to build ML service client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> HrJobResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Calling ML service");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| HrJobError::Analysis(format!("{} request failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %url, status = %status, "ML service returned an error");
            return Err(HrJobError::Analysis(format!("{} returned {}: {}", path, status, body)));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| HrJobError::Analysis(format!("{} returned an invalid body: {}", path, e)))
    }
}

#[async_trait]
impl AnalysisService for MlServiceClient {
    async fn analyze_resume(&self, request: &ResumeAnalysisRequest) -> HrJobResult<ResumeAnalysis> {
        self.post("/api/resume/analyze", request).await
    }

    async fn analyze_transcript(&self, request: &TranscriptAnalysisRequest) -> HrJobResult<TranscriptAnalysis> {
        self.post("/analyze-interview", request).await
    }
}
