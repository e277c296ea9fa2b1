//! Worker callback handlers for `/internal/jobs/{id}/...`.
//!
//! Workers retry these calls, so each one is safe to repeat. Success is a
//! bare 200; a job that ended earlier is not an error.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use brickyard_core::job::{JobResults, JobStage, JobStatus};
use brickyard_core::trace::NewTraceEvent;
use brickyard_core::types::JobId;
use serde::Deserialize;

use crate::error::AppResult;
use crate::middleware::internal_token::InternalCaller;
use crate::state::AppState;

/// Body of a stage report. An empty object is a heartbeat.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: Option<JobStage>,
    pub status: Option<JobStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    /// Blank or missing falls back to a generic message.
    #[serde(default)]
    pub message: Option<String>,
}

/// POST /internal/jobs/{id}/stage
pub async fn update_stage(
    _caller: InternalCaller,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(report): Json<StageReport>,
) -> AppResult<StatusCode> {
    let job = state
        .orchestrator
        .update_stage(job_id, report.stage, report.status)
        .await?;

    tracing::debug!(
        job_id = %job_id,
        stage = %job.stage,
        status = %job.status,
        "Stage report applied",
    );

    Ok(StatusCode::OK)
}

/// POST /internal/jobs/{id}/results
pub async fn update_results(
    _caller: InternalCaller,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(patch): Json<JobResults>,
) -> AppResult<StatusCode> {
    state.orchestrator.update_results(job_id, patch).await?;
    Ok(StatusCode::OK)
}

/// POST /internal/jobs/{id}/fail
pub async fn fail_job(
    _caller: InternalCaller,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(report): Json<FailureReport>,
) -> AppResult<StatusCode> {
    let message = report.message.unwrap_or_default();
    state.orchestrator.mark_failed(job_id, &message).await?;
    Ok(StatusCode::OK)
}

/// POST /internal/jobs/{id}/trace
///
/// Storage failures are logged and swallowed; only an unknown job or an
/// invalid event is rejected.
pub async fn record_trace(
    _caller: InternalCaller,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(event): Json<NewTraceEvent>,
) -> AppResult<StatusCode> {
    state.orchestrator.record_trace(job_id, event).await?;
    Ok(StatusCode::OK)
}
