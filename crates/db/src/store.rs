//! Storage contracts shared by the PostgreSQL and in-memory backends.

use async_trait::async_trait;
use brickyard_core::job::{Job, JobStatus};
use brickyard_core::trace::{NewTraceEvent, TraceEvent};
use brickyard_core::types::{JobId, Timestamp};

/// Maximum page size for job listing.
pub const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
pub const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Stored record {id} could not be decoded: {reason}")]
    Serialization { id: String, reason: String },

    #[error("Record {0} already exists")]
    Duplicate(JobId),

    /// The backend could not be reached at all.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

/// A read-modify-write step run atomically against one job.
///
/// Returns the snapshot to write, or `None` to leave the record as is.
pub type JobMutation = Box<dyn FnOnce(&Job) -> Option<Job> + Send>;

/// What an atomic update did.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    NotFound,
    /// The mutation declined to write; carries the current snapshot.
    Unchanged(Job),
    Updated { before: Job, after: Job },
}

/// Filters for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub owner_id: Option<String>,
    pub status: Option<JobStatus>,
    /// Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl JobFilter {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.owner_id
            .as_ref()
            .map_or(true, |owner| &job.owner_id == owner)
            && self.status.map_or(true, |status| job.status == status)
    }
}

/// Durable job records with atomic per-job updates.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Newest first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    /// Non-terminal jobs whose `stage_updated_at` is before `older_than`,
    /// oldest first.
    async fn list_stalled(&self, older_than: Timestamp, limit: i64)
        -> Result<Vec<Job>, StoreError>;

    /// Run `mutation` against the current snapshot with no other update to
    /// the same job interleaving.
    async fn update(&self, id: JobId, mutation: JobMutation) -> Result<UpdateOutcome, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Append-only execution trace storage.
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn append(
        &self,
        job_id: JobId,
        event: NewTraceEvent,
        received_at: Timestamp,
    ) -> Result<TraceEvent, StoreError>;

    /// Ascending by `created_at`, ties broken by insertion order.
    async fn list_for_job(&self, job_id: JobId) -> Result<Vec<TraceEvent>, StoreError>;
}
