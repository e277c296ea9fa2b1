//! Handlers for the `/jobs` resource.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use brickyard_core::job::NewJob;
use brickyard_core::types::JobId;
use brickyard_db::store::JobFilter;

use crate::error::AppResult;
use crate::query::JobListParams;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Submit a new generation job. Returns 201 with the created job, which
/// is already on the request queue. When the request cannot be queued the
/// job is stored as `FAILED` and 503 is returned with its id.
pub async fn create_job(
    State(state): State<AppState>,
    Json(input): Json<NewJob>,
) -> AppResult<impl IntoResponse> {
    let job = state.orchestrator.create_job(input).await?;

    tracing::info!(
        job_id = %job.id,
        owner_id = %job.owner_id,
        source_type = job.params.source_type.as_str(),
        "Job submitted",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Newest first. Filters by `owner_id` and `status`.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListParams>,
) -> AppResult<impl IntoResponse> {
    let filter = JobFilter::from(params);
    let jobs = state.orchestrator.list_jobs(&filter).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.orchestrator.get_job(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/jobs/{id}/traces
///
/// Trace events in the order the worker produced them.
pub async fn list_traces(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let traces = state.orchestrator.list_traces(job_id).await?;
    Ok(Json(DataResponse { data: traces }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Cancel a live job. Returns 204, or 409 when the job already ended.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<StatusCode> {
    state.orchestrator.cancel(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
