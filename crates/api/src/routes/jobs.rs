use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{jobs, stream};
use crate::state::AppState;

/// Routes mounted at `/api/v1/jobs`.
///
/// ```text
/// GET    /                list jobs (?owner_id, status, limit, offset)
/// POST   /                submit a job
/// GET    /{id}            get a job
/// POST   /{id}/cancel     cancel a job
/// GET    /{id}/traces     list trace events
/// GET    /{id}/events     live event stream
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::create_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/traces", get(jobs::list_traces))
        .route("/{id}/events", get(stream::job_events))
}
