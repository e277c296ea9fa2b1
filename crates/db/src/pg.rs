//! PostgreSQL-backed stores.

use async_trait::async_trait;
use brickyard_core::job::Job;
use brickyard_core::trace::{NewTraceEvent, TraceEvent};
use brickyard_core::types::{JobId, Timestamp};

use crate::repositories::{JobRepo, TraceRepo};
use crate::store::{
    JobFilter, JobMutation, JobStore, StoreError, TraceStore, UpdateOutcome,
};
use crate::DbPool;

const UNIQUE_VIOLATION: &str = "23505";

pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn rows_to_jobs(rows: Vec<crate::models::job::JobRow>) -> Result<Vec<Job>, StoreError> {
    rows.into_iter().map(Job::try_from).collect()
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        JobRepo::insert(&self.pool, job).await.map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                StoreError::Duplicate(job.id)
            }
            _ => StoreError::from(e),
        })
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        JobRepo::find_by_id(&self.pool, id)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        rows_to_jobs(JobRepo::list(&self.pool, filter).await?)
    }

    async fn list_stalled(
        &self,
        older_than: Timestamp,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        rows_to_jobs(JobRepo::list_stalled(&self.pool, older_than, limit).await?)
    }

    async fn update(&self, id: JobId, mutation: JobMutation) -> Result<UpdateOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = JobRepo::find_for_update(&mut *tx, id).await? else {
            tracing::debug!(job_id = %id, "Update for unknown job");
            tx.rollback().await?;
            return Ok(UpdateOutcome::NotFound);
        };
        let before = Job::try_from(row)?;

        match mutation(&before) {
            None => {
                tx.rollback().await?;
                Ok(UpdateOutcome::Unchanged(before))
            }
            Some(after) => {
                JobRepo::write_lifecycle(&mut *tx, &after).await?;
                tx.commit().await?;
                Ok(UpdateOutcome::Updated { before, after })
            }
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }
}

pub struct PgTraceStore {
    pool: DbPool,
}

impl PgTraceStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TraceStore for PgTraceStore {
    async fn append(
        &self,
        job_id: JobId,
        event: NewTraceEvent,
        received_at: Timestamp,
    ) -> Result<TraceEvent, StoreError> {
        let created_at = event.effective_created_at(received_at);
        let row = TraceRepo::insert(&self.pool, job_id, &event, created_at).await?;
        TraceEvent::try_from(row)
    }

    async fn list_for_job(&self, job_id: JobId) -> Result<Vec<TraceEvent>, StoreError> {
        TraceRepo::list_for_job(&self.pool, job_id)
            .await?
            .into_iter()
            .map(TraceEvent::try_from)
            .collect()
    }
}
