//! Execution trace recorder.
//!
//! Trace events are diagnostic: a failed write is logged and dropped and
//! never fails the caller.

use std::sync::Arc;

use brickyard_core::job_events;
use brickyard_core::trace::{NewTraceEvent, TraceEvent};
use brickyard_core::types::JobId;
use brickyard_db::store::{StoreError, TraceStore};
use brickyard_events::{EventBus, JobEvent};
use chrono::Utc;

pub struct TraceRecorder {
    store: Arc<dyn TraceStore>,
    events: Arc<EventBus>,
}

impl TraceRecorder {
    pub fn new(store: Arc<dyn TraceStore>, events: Arc<EventBus>) -> Self {
        Self { store, events }
    }

    /// Append a trace event. Returns the stored event, or `None` when the
    /// write failed.
    pub async fn record(&self, job_id: JobId, event: NewTraceEvent) -> Option<TraceEvent> {
        let step = event.step.clone();
        match self.store.append(job_id, event, Utc::now()).await {
            Ok(stored) => {
                tracing::debug!(
                    job_id = %job_id,
                    step = %stored.step,
                    node = %stored.node_name,
                    status = %stored.status,
                    "Trace event recorded",
                );
                self.events.publish(
                    JobEvent::new(job_events::JOB_TRACE, job_id)
                        .with_payload(serde_json::to_value(&stored).unwrap_or_default()),
                );
                Some(stored)
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job_id,
                    step = %step,
                    error = %e,
                    "Failed to record trace event",
                );
                None
            }
        }
    }

    /// All events for a job in read order.
    pub async fn list(&self, job_id: JobId) -> Result<Vec<TraceEvent>, StoreError> {
        self.store.list_for_job(job_id).await
    }
}
