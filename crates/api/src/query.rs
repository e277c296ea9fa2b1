//! Query parameter types for API handlers.

use brickyard_core::job::JobStatus;
use brickyard_db::store::JobFilter;
use serde::Deserialize;

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListParams {
    pub owner_id: Option<String>,
    /// e.g. `?status=RUNNING`
    pub status: Option<JobStatus>,
    /// Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<JobListParams> for JobFilter {
    fn from(params: JobListParams) -> Self {
        JobFilter {
            owner_id: params.owner_id,
            status: params.status,
            limit: params.limit,
            offset: params.offset,
        }
    }
}
