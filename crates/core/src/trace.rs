//! Execution trace events reported by workers while they run a job.
//!
//! Trace events are append-only. They are diagnostic data: losing one
//! never affects the job record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

/// Outcome of one pipeline step as reported by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceEventStatus {
    Start,
    Success,
    Failure,
    Retry,
}

impl TraceEventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TraceEventStatus::Start => "START",
            TraceEventStatus::Success => "SUCCESS",
            TraceEventStatus::Failure => "FAILURE",
            TraceEventStatus::Retry => "RETRY",
        }
    }
}

impl fmt::Display for TraceEventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceEventStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "START" => Ok(TraceEventStatus::Start),
            "SUCCESS" => Ok(TraceEventStatus::Success),
            "FAILURE" => Ok(TraceEventStatus::Failure),
            "RETRY" => Ok(TraceEventStatus::Retry),
            other => Err(CoreError::Validation(format!(
                "Unknown trace event status '{other}'"
            ))),
        }
    }
}

/// A stored trace event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    /// Store-assigned insertion sequence.
    pub id: i64,
    pub job_id: JobId,
    pub step: String,
    pub node_name: String,
    pub status: TraceEventStatus,
    pub duration_ms: Option<i64>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub message: Option<String>,
    pub created_at: Timestamp,
}

/// A trace event as received from a worker, before it is stored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTraceEvent {
    pub step: String,
    pub node_name: String,
    pub status: TraceEventStatus,
    pub duration_ms: Option<i64>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub message: Option<String>,
    /// Worker-side timestamp; receive time is used when absent.
    pub created_at: Option<Timestamp>,
}

impl NewTraceEvent {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.step.trim().is_empty() {
            return Err(CoreError::Validation("step is required".into()));
        }
        if self.node_name.trim().is_empty() {
            return Err(CoreError::Validation("nodeName is required".into()));
        }
        if self.duration_ms.is_some_and(|d| d < 0) {
            return Err(CoreError::Validation("durationMs must not be negative".into()));
        }
        Ok(())
    }

    /// Timestamp the event is stored under.
    pub fn effective_created_at(&self, received_at: Timestamp) -> Timestamp {
        self.created_at.unwrap_or(received_at)
    }

    pub fn into_event(self, id: i64, job_id: JobId, received_at: Timestamp) -> TraceEvent {
        let created_at = self.effective_created_at(received_at);
        TraceEvent {
            id,
            job_id,
            step: self.step,
            node_name: self.node_name,
            status: self.status,
            duration_ms: self.duration_ms,
            input: self.input,
            output: self.output,
            message: self.message,
            created_at,
        }
    }
}

/// Read order: ascending `created_at`, ties broken by insertion sequence.
pub fn sort_for_read(events: &mut [TraceEvent]) {
    events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}
