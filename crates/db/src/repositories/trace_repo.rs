//! Repository for the append-only `job_traces` table.

use brickyard_core::trace::NewTraceEvent;
use brickyard_core::types::{JobId, Timestamp};
use sqlx::PgExecutor;

use crate::models::trace::TraceRow;

/// Column list for `job_traces` queries.
const COLUMNS: &str = "\
    id, job_id, step, node_name, status, duration_ms, \
    input, output, message, created_at";

pub struct TraceRepo;

impl TraceRepo {
    pub async fn insert<'e>(
        executor: impl PgExecutor<'e>,
        job_id: JobId,
        event: &NewTraceEvent,
        created_at: Timestamp,
    ) -> Result<TraceRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO job_traces \
                 (job_id, step, node_name, status, duration_ms, input, output, message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TraceRow>(&query)
            .bind(job_id)
            .bind(&event.step)
            .bind(&event.node_name)
            .bind(event.status.as_str())
            .bind(event.duration_ms)
            .bind(&event.input)
            .bind(&event.output)
            .bind(&event.message)
            .bind(created_at)
            .fetch_one(executor)
            .await
    }

    /// All events for a job, ascending by `created_at` then insertion order.
    pub async fn list_for_job<'e>(
        executor: impl PgExecutor<'e>,
        job_id: JobId,
    ) -> Result<Vec<TraceRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM job_traces \
             WHERE job_id = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, TraceRow>(&query)
            .bind(job_id)
            .fetch_all(executor)
            .await
    }
}
