use axum::routing::post;
use axum::Router;

use crate::handlers::internal;
use crate::state::AppState;

/// Worker callback routes, mounted at `/internal`.
///
/// Every route requires the `X-Internal-Token` header when a token is
/// configured.
///
/// ```text
/// POST /jobs/{id}/stage       stage/status report or heartbeat
/// POST /jobs/{id}/results     sparse result merge
/// POST /jobs/{id}/fail        mark failed
/// POST /jobs/{id}/trace       append a trace event
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs/{id}/stage", post(internal::update_stage))
        .route("/jobs/{id}/results", post(internal::update_results))
        .route("/jobs/{id}/fail", post(internal::fail_job))
        .route("/jobs/{id}/trace", post(internal::record_trace))
}
