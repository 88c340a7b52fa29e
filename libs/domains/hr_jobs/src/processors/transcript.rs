//! `process-interview-transcript`: score an interview transcript and store
//! the analysis on the transcript and the interview.

use super::{HrDependencies, fields};
use crate::analysis::{AnalysisService, TranscriptAnalysis, TranscriptAnalysisRequest};
use crate::error::{HrJobResult, with_timeout};
use crate::models::TranscriptJob;
use crate::store::{EntityKind, RecordStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use job_queue::{Job, JobError, JobHandler, JobResult};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Interview length that scores a neutral duration factor, in minutes.
const OPTIMAL_DURATION_MINUTES: f64 = 30.0;

pub const STATUS_ANALYZED: &str = "ANALYZED";
pub const STATUS_ERROR: &str = "ERROR";

/// Adjustment factors applied to the base analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreFactors {
    pub duration_factor: f64,
    pub communication_factor: f64,
}

/// Final interview scores (0-100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptScores {
    pub overall_score: u32,
    pub communication_score: u32,
    pub technical_score: u32,
    pub confidence_score: u32,
    pub duration: f64,
    pub words_per_minute: u32,
    pub analysis_timestamp: DateTime<Utc>,
    pub factors: ScoreFactors,
}

fn score(value: f64) -> u32 {
    value.round().clamp(0.0, 100.0) as u32
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Local keyword/sentence heuristic used when the analysis service fails.
pub fn fallback_analysis(transcript: &str, requirements: &[String]) -> TranscriptAnalysis {
    let words = transcript.split_whitespace().count();
    let sentences = transcript
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count();
    let avg_words_per_sentence = if sentences == 0 {
        0.0
    } else {
        words as f64 / sentences as f64
    };

    let requirement_text = requirements.join(" ").to_lowercase();
    let requirement_words: Vec<&str> = requirement_text.split_whitespace().collect();
    let transcript_lower = transcript.to_lowercase();
    let matched: Vec<String> = requirement_words
        .iter()
        .filter(|keyword| keyword.chars().count() > 3)
        .filter(|keyword| transcript_lower.contains(*keyword))
        .map(|keyword| keyword.to_string())
        .collect();
    let keyword_score = matched.len() as f64 / requirement_words.len().max(1) as f64 * 100.0;

    let strengths = vec![
        if matched.is_empty() {
            "Participated actively in interview"
        } else {
            "Demonstrated relevant technical knowledge"
        },
        if avg_words_per_sentence > 10.0 {
            "Clear communication skills"
        } else {
            "Concise responses"
        },
    ];
    let weaknesses = vec![
        if matched.is_empty() {
            "Limited technical keyword usage"
        } else {
            "Could improve technical depth"
        },
        if avg_words_per_sentence < 5.0 {
            "Very brief responses"
        } else {
            "Could provide more detailed explanations"
        },
    ];

    TranscriptAnalysis {
        overall_score: (keyword_score * 0.7 + (avg_words_per_sentence * 2.0).min(30.0))
            .round()
            .min(100.0),
        communication_score: Some((avg_words_per_sentence * 3.0).round().min(100.0)),
        technical_score: Some(keyword_score.round()),
        confidence_score: Some((keyword_score * 0.8).round()),
        strengths: strengths.into_iter().map(String::from).collect(),
        weaknesses: weaknesses.into_iter().map(String::from).collect(),
        recommendations: vec![
            "Review technical requirements more thoroughly".to_string(),
            "Practice explaining technical concepts clearly".to_string(),
            "Prepare specific examples of relevant experience".to_string(),
        ],
        sentiment: Some("neutral".to_string()),
        topics: matched.into_iter().take(5).collect(),
        analysis_method: Some("fallback".to_string()),
        extra: Default::default(),
    }
}

/// Combine an analysis with interview length and speaking pace.
///
/// `duration` is in minutes. The duration factor is clamped to 0.8..=1.2
/// around a 30 minute interview; the pace factor is words-per-minute / 100
/// clamped to 0.7..=1.1.
pub fn calculate_scores(
    analysis: &TranscriptAnalysis,
    transcript: &str,
    duration: f64,
    now: DateTime<Utc>,
) -> TranscriptScores {
    let base = analysis.overall_score;
    let duration_factor = (duration / OPTIMAL_DURATION_MINUTES).clamp(0.8, 1.2);

    let words = transcript.split_whitespace().count() as f64;
    let words_per_minute = if duration > 0.0 { words / duration } else { 0.0 };
    let communication_factor = (words_per_minute / 100.0).clamp(0.7, 1.1);

    TranscriptScores {
        overall_score: score(base * duration_factor * communication_factor),
        communication_score: score(analysis.communication_score.unwrap_or(base) * communication_factor),
        technical_score: score(analysis.technical_score.unwrap_or(base)),
        confidence_score: score(analysis.confidence_score.unwrap_or(base)),
        duration,
        words_per_minute: words_per_minute.round().max(0.0) as u32,
        analysis_timestamp: now,
        factors: ScoreFactors {
            duration_factor: round2(duration_factor),
            communication_factor: round2(communication_factor),
        },
    }
}

/// Interview transcript handler.
pub struct TranscriptProcessor {
    store: Arc<dyn RecordStore>,
    analysis: Arc<dyn AnalysisService>,
    timeout: Duration,
}

impl TranscriptProcessor {
    pub fn new(deps: &HrDependencies) -> Self {
        Self {
            store: deps.store.clone(),
            analysis: deps.analysis.clone(),
            timeout: deps.settings.analysis_timeout,
        }
    }

    async fn analyze(&self, job: &TranscriptJob) -> TranscriptAnalysis {
        let request = TranscriptAnalysisRequest {
            transcript: job.transcript.clone(),
            duration: job.duration,
            job_title: job.job_title.clone(),
            job_requirements: job.job_requirements.clone(),
            candidate_name: job.candidate_name.clone(),
            interview_type: "technical".to_string(),
        };

        match with_timeout("transcript analysis", self.timeout, self.analysis.analyze_transcript(&request)).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(transcript_id = %job.transcript_id, error = %e, "Analysis service unavailable, using fallback analysis");
                fallback_analysis(&job.transcript, &job.job_requirements)
            }
        }
    }

    async fn process(&self, job: &TranscriptJob) -> HrJobResult<Value> {
        let analysis = self.analyze(job).await;
        let now = Utc::now();
        let scores = calculate_scores(&analysis, &job.transcript, job.duration, now);

        self.store
            .update_entity(
                EntityKind::InterviewTranscript,
                &job.transcript_id,
                fields(json!({
                    "analysis": analysis,
                    "scores": scores,
                    "status": STATUS_ANALYZED,
                    "analyzedAt": now,
                })),
            )
            .await?;

        self.store
            .update_entity(
                EntityKind::Interview,
                &job.interview_id,
                fields(json!({
                    "aiAnalysis": analysis,
                    "aiScores": scores,
                    "status": STATUS_ANALYZED,
                })),
            )
            .await?;

        info!(
            transcript_id = %job.transcript_id,
            overall_score = scores.overall_score,
            "Transcript analysed"
        );

        Ok(json!({
            "success": true,
            "transcriptId": job.transcript_id,
            "scores": scores,
            "analysis": analysis,
        }))
    }
}

#[async_trait]
impl JobHandler for TranscriptProcessor {
    async fn handle(&self, job: &Job) -> Result<JobResult, JobError> {
        let payload: TranscriptJob = job.decode()?;
        info!(
            job_id = %job.id,
            transcript_id = %payload.transcript_id,
            interview_id = %payload.interview_id,
            "Processing interview transcript"
        );

        match self.process(&payload).await {
            Ok(data) => Ok(JobResult::success(data)),
            Err(err) => {
                error!(transcript_id = %payload.transcript_id, error = %err, "Transcript processing failed");

                let marked = self
                    .store
                    .update_entity(
                        EntityKind::InterviewTranscript,
                        &payload.transcript_id,
                        fields(json!({
                            "status": STATUS_ERROR,
                            "error": err.to_string(),
                            "analyzedAt": Utc::now(),
                        })),
                    )
                    .await;
                if let Err(update_err) = marked {
                    error!(transcript_id = %payload.transcript_id, error = %update_err, "Failed to mark transcript as errored");
                }

                Err(err.into())
            }
        }
    }

    fn name(&self) -> &'static str {
        "TranscriptProcessor"
    }
}
