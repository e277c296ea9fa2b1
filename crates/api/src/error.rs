use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use brickyard_core::error::CoreError;
use brickyard_pipeline::JobError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`JobError`] and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `brickyard_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An orchestrator failure.
    #[error(transparent)]
    Job(#[from] JobError),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Unauthorized(msg) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
                }
            },

            // --- Orchestrator errors ---
            AppError::Job(err) => match err {
                JobError::NotFound { job_id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("Job with id {job_id} not found"),
                ),
                JobError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                JobError::Conflict { reason, .. } => {
                    (StatusCode::CONFLICT, "CONFLICT", reason.clone())
                }
                JobError::DispatchFailure { job_id, source } => {
                    tracing::error!(job_id = %job_id, error = %source, "Job dispatch failed");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "DISPATCH_FAILED",
                        "The job was recorded but could not be queued for generation".to_string(),
                    )
                }
                JobError::Storage { job_id, source } => {
                    tracing::error!(job_id = ?job_id, error = %source, "Job storage error");
                    internal()
                }
            },

            // --- HTTP-specific errors ---
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });

        // The failed job still exists, so clients get its id to poll.
        if let AppError::Job(JobError::DispatchFailure { job_id, .. }) = &self {
            body["jobId"] = json!(job_id);
        }

        (status, axum::Json(body)).into_response()
    }
}
