//! Row model for the `job_traces` table.

use brickyard_core::trace::TraceEvent;
use brickyard_core::types::{JobId, Timestamp};
use sqlx::FromRow;

use crate::store::StoreError;

/// A row from the `job_traces` table.
#[derive(Debug, Clone, FromRow)]
pub struct TraceRow {
    pub id: i64,
    pub job_id: JobId,
    pub step: String,
    pub node_name: String,
    pub status: String,
    pub duration_ms: Option<i64>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub message: Option<String>,
    pub created_at: Timestamp,
}

impl TryFrom<TraceRow> for TraceEvent {
    type Error = StoreError;

    fn try_from(row: TraceRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(|e: brickyard_core::error::CoreError| {
            StoreError::Serialization {
                id: row.id.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(TraceEvent {
            id: row.id,
            job_id: row.job_id,
            step: row.step,
            node_name: row.node_name,
            status,
            duration_ms: row.duration_ms,
            input: row.input,
            output: row.output,
            message: row.message,
            created_at: row.created_at,
        })
    }
}
