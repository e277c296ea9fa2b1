use brickyard_core::error::CoreError;
use brickyard_core::types::JobId;
use brickyard_db::store::StoreError;

use crate::dispatcher::DispatchError;

/// Failures of orchestrator operations. Variants that concern a single job
/// carry its id so logs and responses can be correlated.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {job_id} not found")]
    NotFound { job_id: JobId },

    #[error("Dispatch failed for job {job_id}: {source}")]
    DispatchFailure {
        job_id: JobId,
        #[source]
        source: DispatchError,
    },

    #[error("Storage failure: {source}")]
    Storage {
        job_id: Option<JobId>,
        #[source]
        source: StoreError,
    },

    #[error("Job {job_id}: {reason}")]
    Conflict { job_id: JobId, reason: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl JobError {
    pub(crate) fn storage(job_id: impl Into<Option<JobId>>, source: StoreError) -> Self {
        JobError::Storage {
            job_id: job_id.into(),
            source,
        }
    }

    /// Whether retrying the same call later can succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, JobError::Storage { .. } | JobError::DispatchFailure { .. })
    }
}

impl From<CoreError> for JobError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Validation(msg) => JobError::Validation(msg),
            other => JobError::Validation(other.to_string()),
        }
    }
}
