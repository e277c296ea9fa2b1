//! Event type names published on the event bus for job lifecycle changes.
//!
//! The same names are used as SSE event names on the live job stream.

/// Initial snapshot sent when a stream subscriber connects.
pub const JOB_CONNECTED: &str = "connected";

/// Job record created and queued for dispatch.
pub const JOB_CREATED: &str = "job_created";

/// Stage or status moved (including a transition to `RUNNING`).
pub const JOB_STAGE: &str = "job_stage";

/// Result fields were merged into the record.
pub const JOB_RESULTS: &str = "job_results";

/// Job reached `DONE`.
pub const JOB_COMPLETED: &str = "job_completed";

/// Job reached `FAILED`.
pub const JOB_FAILED: &str = "job_failed";

/// Job was cancelled by its owner.
pub const JOB_CANCELLED: &str = "job_cancelled";

/// A worker recorded an execution trace event.
pub const JOB_TRACE: &str = "job_trace";

/// Whether `event_type` announces that the job ended.
pub fn is_terminal(event_type: &str) -> bool {
    matches!(event_type, JOB_COMPLETED | JOB_FAILED | JOB_CANCELLED)
}
