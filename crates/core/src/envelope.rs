//! Message envelopes exchanged with out-of-process workers.
//!
//! A single JSON shape with a `kind` discriminator travels on both
//! queues: `REQUEST` (orchestrator to worker) and `RESULT` (worker to
//! orchestrator). Fields a kind does not use are simply absent, and
//! unknown fields are ignored so workers can add fields ahead of us.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::job::{GenerationParams, Job, JobResults, SourceType, DEFAULT_FAILURE_MESSAGE};
use crate::types::{JobId, Timestamp};

/// Envelope decode/encode failures.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unexpected envelope kind: expected {expected}, got {found}")]
    UnexpectedKind {
        expected: &'static str,
        found: &'static str,
    },
}

/// Every message on the request and result queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MessageEnvelope {
    #[serde(rename = "REQUEST")]
    Request(RequestEnvelope),
    #[serde(rename = "RESULT")]
    Result(ResultEnvelope),
}

impl MessageEnvelope {
    pub fn kind(&self) -> &'static str {
        match self {
            MessageEnvelope::Request(_) => "REQUEST",
            MessageEnvelope::Result(_) => "RESULT",
        }
    }
}

fn default_language() -> String {
    "en".to_string()
}

/// Envelope timestamps are informational only, so a value we cannot read
/// never costs the message. RFC 3339 is taken as is, a zone-less ISO
/// datetime is read as UTC, and anything else becomes the receive time.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now))
}

fn parse_timestamp(text: &str) -> Option<Timestamp> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    text.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
}

/// Everything a worker needs to start a job without calling back first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub job_id: JobId,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub timestamp: Timestamp,
    pub owner_id: String,
    pub source_image_url: String,
    pub age: String,
    pub budget: i32,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub source_type: SourceType,
}

impl RequestEnvelope {
    pub fn for_job(job: &Job, timestamp: Timestamp) -> Self {
        let GenerationParams {
            age,
            budget,
            language,
            source_type,
        } = job.params.clone();

        Self {
            job_id: job.id,
            timestamp,
            owner_id: job.owner_id.clone(),
            source_image_url: job.source_image_url.clone(),
            age,
            budget,
            language,
            source_type,
        }
    }
}

/// Output references a worker may attach to a successful result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultArtifacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glb_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ldr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_ldr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bom_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_target: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub est_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability_score: Option<i32>,
}

impl ResultArtifacts {
    /// Sparse patch for the job record.
    pub fn to_patch(&self) -> JobResults {
        JobResults {
            corrected_image_url: self.corrected_url.clone(),
            glb_url: self.glb_url.clone(),
            ldr_url: self.ldr_url.clone(),
            initial_ldr_url: self.initial_ldr_url.clone(),
            bom_url: self.bom_url.clone(),
            pdf_url: self.pdf_url.clone(),
            background_url: self.background_url.clone(),
            parts: self.parts,
            final_target: self.final_target,
            suggested_tags: self.tags.clone(),
            est_cost: self.est_cost,
            token_count: self.token_count,
            stability_score: self.stability_score,
            ..Default::default()
        }
    }
}

/// How the worker's run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultOutcome {
    Success(ResultArtifacts),
    Failure { error_message: String },
}

/// Final report for a job. Failure results never carry artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawResultEnvelope", into = "RawResultEnvelope")]
pub struct ResultEnvelope {
    pub job_id: JobId,
    pub timestamp: Timestamp,
    pub outcome: ResultOutcome,
}

impl ResultEnvelope {
    pub fn success(job_id: JobId, timestamp: Timestamp, artifacts: ResultArtifacts) -> Self {
        Self {
            job_id,
            timestamp,
            outcome: ResultOutcome::Success(artifacts),
        }
    }

    pub fn failure(job_id: JobId, timestamp: Timestamp, error_message: impl Into<String>) -> Self {
        Self {
            job_id,
            timestamp,
            outcome: ResultOutcome::Failure {
                error_message: error_message.into(),
            },
        }
    }
}

/// Flat wire shape of a result envelope.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResultEnvelope {
    job_id: JobId,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    timestamp: Timestamp,
    success: bool,
    #[serde(flatten)]
    artifacts: ResultArtifacts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl From<RawResultEnvelope> for ResultEnvelope {
    fn from(raw: RawResultEnvelope) -> Self {
        let outcome = if raw.success {
            ResultOutcome::Success(raw.artifacts)
        } else {
            let error_message = raw
                .error_message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
            ResultOutcome::Failure { error_message }
        };

        Self {
            job_id: raw.job_id,
            timestamp: raw.timestamp,
            outcome,
        }
    }
}

impl From<ResultEnvelope> for RawResultEnvelope {
    fn from(envelope: ResultEnvelope) -> Self {
        let (success, artifacts, error_message) = match envelope.outcome {
            ResultOutcome::Success(artifacts) => (true, artifacts, None),
            ResultOutcome::Failure { error_message } => {
                (false, ResultArtifacts::default(), Some(error_message))
            }
        };

        Self {
            job_id: envelope.job_id,
            timestamp: envelope.timestamp,
            success,
            artifacts,
            error_message,
        }
    }
}

/// Parse an envelope of either kind.
pub fn decode(text: &str) -> Result<MessageEnvelope, EnvelopeError> {
    Ok(serde_json::from_str(text)?)
}

/// Parse an envelope that must be a `RESULT`.
pub fn decode_result(text: &str) -> Result<ResultEnvelope, EnvelopeError> {
    match decode(text)? {
        MessageEnvelope::Result(result) => Ok(result),
        other => Err(EnvelopeError::UnexpectedKind {
            expected: "RESULT",
            found: other.kind(),
        }),
    }
}

pub fn encode(envelope: &MessageEnvelope) -> Result<String, EnvelopeError> {
    Ok(serde_json::to_string(envelope)?)
}
