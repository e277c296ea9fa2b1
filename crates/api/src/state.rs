use std::sync::Arc;

use brickyard_events::EventBus;
use brickyard_pipeline::JobOrchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Every job read and mutation goes through the orchestrator.
    pub orchestrator: Arc<JobOrchestrator>,
    pub config: Arc<ServerConfig>,
    /// Job lifecycle events feeding the live stream.
    pub event_bus: Arc<EventBus>,
}
