//! Row model for the `jobs` table.

use brickyard_core::job::{GenerationParams, Job, JobResults};
use brickyard_core::types::{JobId, Timestamp};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::store::StoreError;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: JobId,
    pub owner_id: String,
    pub title: Option<String>,
    pub status: String,
    pub stage: String,
    pub source_image_url: String,
    pub params: Json<GenerationParams>,
    pub error_message: Option<String>,
    pub results: Json<JobResults>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub stage_updated_at: Timestamp,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |e: brickyard_core::error::CoreError| StoreError::Serialization {
            id: row.id.to_string(),
            reason: e.to_string(),
        };
        let status = row.status.parse().map_err(corrupt)?;
        let stage = row.stage.parse().map_err(corrupt)?;

        Ok(Job {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            status,
            stage,
            source_image_url: row.source_image_url,
            params: row.params.0,
            error_message: row.error_message,
            results: row.results.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            stage_updated_at: row.stage_updated_at,
        })
    }
}
