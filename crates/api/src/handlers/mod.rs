//! Request handlers.
//!
//! `jobs` and `stream` serve client routes; `internal` serves worker
//! callbacks. All of them delegate to the shared
//! [`JobOrchestrator`](brickyard_pipeline::JobOrchestrator) and map errors
//! via [`AppError`](crate::error::AppError).

pub mod internal;
pub mod jobs;
pub mod stream;
