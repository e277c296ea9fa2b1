pub mod health;
pub mod internal;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Client-facing routes, mounted under `/api/v1`.
///
/// ```text
/// /jobs                       list, submit
/// /jobs/{id}                  get
/// /jobs/{id}/cancel           cancel
/// /jobs/{id}/traces           execution trace
/// /jobs/{id}/events           live lifecycle stream (SSE)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}
