//! Server-sent event stream of one job's lifecycle.
//!
//! The first event is always `connected` carrying the current job
//! snapshot; after that every bus event for the job is forwarded with its
//! event type as the SSE event name. The stream ends after the event that
//! takes the job to a terminal state; jobs that already ended get the
//! snapshot only.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use brickyard_core::job_events::{self, JOB_CONNECTED};
use brickyard_core::types::JobId;
use brickyard_events::JobEvent;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

/// GET /api/v1/jobs/{id}/events
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<Sse<KeepAliveStream<EventStream>>> {
    // Subscribe before the snapshot read so nothing falls in between.
    let receiver = state.event_bus.subscribe();
    let job = state.orchestrator.get_job(job_id).await?;

    let connected = Event::default()
        .event(JOB_CONNECTED)
        .json_data(&job)
        .map_err(|e| AppError::InternalError(format!("Failed to encode job snapshot: {e}")))?;
    let snapshot = stream::once(async move { Ok(connected) });

    let events: EventStream = if job.is_terminal() {
        snapshot.boxed()
    } else {
        let updates = stream::unfold(
            Some(BroadcastStream::new(receiver)),
            move |remaining| async move {
                let Some(mut receiver) = remaining else {
                    return None;
                };
                loop {
                    let Some(message) = receiver.next().await else {
                        return None;
                    };
                    match message {
                        Ok(event) if event.job_id == job_id => {
                            let ended = job_events::is_terminal(&event.event_type);
                            match to_sse(&event) {
                                Some(sse) => {
                                    let next = (!ended).then_some(receiver);
                                    return Some((Ok::<_, Infallible>(sse), next));
                                }
                                None if ended => return None,
                                None => {}
                            }
                        }
                        Ok(_) => {}
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            tracing::warn!(job_id = %job_id, skipped, "Job event stream lagged");
                        }
                    }
                }
            },
        );
        snapshot.chain(updates).boxed()
    };

    tracing::debug!(job_id = %job_id, "Job event stream opened");

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

fn to_sse(event: &JobEvent) -> Option<Event> {
    match Event::default()
        .event(event.event_type.as_str())
        .json_data(&event.payload)
    {
        Ok(sse) => Some(sse),
        Err(e) => {
            tracing::error!(
                job_id = %event.job_id,
                event_type = %event.event_type,
                error = %e,
                "Failed to encode job event",
            );
            None
        }
    }
}
