//! Repository for the `jobs` table.
//!
//! Only the lifecycle columns are ever written after insert; identity,
//! owner, source, and parameters are immutable.

use brickyard_core::job::{Job, JobStatus};
use brickyard_core::types::{JobId, Timestamp};
use sqlx::types::Json;
use sqlx::PgExecutor;

use crate::models::job::JobRow;
use crate::store::JobFilter;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, owner_id, title, status, stage, source_image_url, params, \
    error_message, results, created_at, updated_at, stage_updated_at";

/// Statuses the stalled-job sweep considers.
const LIVE_STATUSES: [JobStatus; 2] = [JobStatus::Queued, JobStatus::Running];

pub struct JobRepo;

impl JobRepo {
    pub async fn insert<'e>(executor: impl PgExecutor<'e>, job: &Job) -> Result<(), sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        );
        sqlx::query(&query)
            .bind(job.id)
            .bind(&job.owner_id)
            .bind(&job.title)
            .bind(job.status.as_str())
            .bind(job.stage.as_str())
            .bind(&job.source_image_url)
            .bind(Json(&job.params))
            .bind(&job.error_message)
            .bind(Json(&job.results))
            .bind(job.created_at)
            .bind(job.updated_at)
            .bind(job.stage_updated_at)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: JobId,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Lock the row for the rest of the surrounding transaction.
    pub async fn find_for_update<'e>(
        executor: impl PgExecutor<'e>,
        id: JobId,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Write the mutable lifecycle columns of `job`.
    pub async fn write_lifecycle<'e>(
        executor: impl PgExecutor<'e>,
        job: &Job,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs \
             SET status = $2, stage = $3, error_message = $4, results = $5, \
                 updated_at = $6, stage_updated_at = $7 \
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(job.stage.as_str())
        .bind(&job.error_message)
        .bind(Json(&job.results))
        .bind(job.updated_at)
        .bind(job.stage_updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Newest first, with optional owner and status filters.
    pub async fn list<'e>(
        executor: impl PgExecutor<'e>,
        filter: &JobFilter,
    ) -> Result<Vec<JobRow>, sqlx::Error> {
        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions = Vec::new();
        let mut next_param = 1;
        if filter.owner_id.is_some() {
            conditions.push(format!("owner_id = ${next_param}"));
            next_param += 1;
        }
        if filter.status.is_some() {
            conditions.push(format!("status = ${next_param}"));
            next_param += 1;
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {COLUMNS} FROM jobs {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ${} OFFSET ${}",
            next_param,
            next_param + 1
        );

        let mut q = sqlx::query_as::<_, JobRow>(&query);
        if let Some(owner_id) = &filter.owner_id {
            q = q.bind(owner_id);
        }
        if let Some(status) = filter.status {
            q = q.bind(status.as_str());
        }
        q.bind(filter.effective_limit())
            .bind(filter.effective_offset())
            .fetch_all(executor)
            .await
    }

    /// Live jobs whose stage has not moved since `older_than`, oldest first.
    pub async fn list_stalled<'e>(
        executor: impl PgExecutor<'e>,
        older_than: Timestamp,
        limit: i64,
    ) -> Result<Vec<JobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status IN ($1, $2) AND stage_updated_at < $3 \
             ORDER BY stage_updated_at ASC \
             LIMIT $4"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(LIVE_STATUSES[0].as_str())
            .bind(LIVE_STATUSES[1].as_str())
            .bind(older_than)
            .bind(limit)
            .fetch_all(executor)
            .await
    }
}
