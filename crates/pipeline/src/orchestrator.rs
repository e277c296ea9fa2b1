//! The job orchestrator.
//!
//! Owns no state of its own: every mutation is expressed as a pure state
//! machine step from `brickyard_core::job` and handed to the store's
//! atomic update, so concurrent reports for one job serialize in the
//! store and terminal states stay frozen.

use std::sync::Arc;
use std::time::Duration;

use brickyard_core::envelope::{RequestEnvelope, ResultEnvelope, ResultOutcome};
use brickyard_core::job::{Job, JobResults, JobStage, JobStatus, NewJob};
use brickyard_core::job_events;
use brickyard_core::retry::RetryPolicy;
use brickyard_core::trace::{NewTraceEvent, TraceEvent};
use brickyard_core::types::{new_job_id, JobId};
use brickyard_db::store::{JobFilter, JobMutation, JobStore, TraceStore, UpdateOutcome};
use brickyard_events::{EventBus, JobEvent, MessageQueue};
use chrono::Utc;

use crate::dispatcher::Dispatcher;
use crate::error::JobError;
use crate::recorder::TraceRecorder;

/// Upper bound on jobs failed by one stalled-job sweep.
const STALE_SWEEP_BATCH: i64 = 100;

pub struct JobOrchestrator {
    jobs: Arc<dyn JobStore>,
    recorder: TraceRecorder,
    dispatcher: Dispatcher,
    events: Arc<EventBus>,
    retry: RetryPolicy,
}

impl JobOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        traces: Arc<dyn TraceStore>,
        queue: Arc<dyn MessageQueue>,
        events: Arc<EventBus>,
        request_queue: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            jobs,
            recorder: TraceRecorder::new(traces, Arc::clone(&events)),
            dispatcher: Dispatcher::new(queue, request_queue, retry.clone()),
            events,
            retry,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    // -----------------------------------------------------------------------
    // Client operations
    // -----------------------------------------------------------------------

    /// Persist a new `QUEUED` job, then publish its request envelope.
    ///
    /// If every publish attempt fails the job is marked `FAILED` and
    /// [`JobError::DispatchFailure`] is returned with its id. Writing the
    /// failure is retried under the same policy as the publish.
    pub async fn create_job(&self, input: NewJob) -> Result<Job, JobError> {
        input.validate()?;

        let now = Utc::now();
        let job = Job::queued(new_job_id(), input, now);
        self.jobs
            .insert(&job)
            .await
            .map_err(|e| JobError::storage(job.id, e))?;

        tracing::info!(
            job_id = %job.id,
            owner_id = %job.owner_id,
            budget = job.params.budget,
            "Job created",
        );
        self.publish(job_events::JOB_CREATED, &job);

        let request = RequestEnvelope::for_job(&job, now);
        match self.dispatcher.dispatch(request).await {
            Ok(_) => Ok(job),
            Err(source) => {
                tracing::error!(job_id = %job.id, error = %source, "Dispatch failed");
                let message = format!("dispatch failed: {source}");
                self.fail_undispatched(job.id, &message).await;
                Err(JobError::DispatchFailure {
                    job_id: job.id,
                    source,
                })
            }
        }
    }

    pub async fn get_job(&self, id: JobId) -> Result<Job, JobError> {
        self.jobs
            .get(id)
            .await
            .map_err(|e| JobError::storage(id, e))?
            .ok_or(JobError::NotFound { job_id: id })
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        self.jobs
            .list(filter)
            .await
            .map_err(|e| JobError::storage(None, e))
    }

    /// Mark a live job `CANCELED`. Workers already running it are not told.
    pub async fn cancel(&self, id: JobId) -> Result<Job, JobError> {
        let now = Utc::now();
        let (job, changed) = self
            .apply(id, "cancel", Box::new(move |job: &Job| job.cancel(now).ok()))
            .await?;

        if !changed {
            return Err(JobError::Conflict {
                job_id: id,
                reason: format!("job is already {} and cannot be canceled", job.status),
            });
        }
        Ok(job)
    }

    pub async fn list_traces(&self, id: JobId) -> Result<Vec<TraceEvent>, JobError> {
        self.get_job(id).await?;
        self.recorder
            .list(id)
            .await
            .map_err(|e| JobError::storage(id, e))
    }

    // -----------------------------------------------------------------------
    // Worker callbacks
    // -----------------------------------------------------------------------

    /// Stage/status report. Both `None` is a heartbeat.
    pub async fn update_stage(
        &self,
        id: JobId,
        stage: Option<JobStage>,
        status: Option<JobStatus>,
    ) -> Result<Job, JobError> {
        let now = Utc::now();
        self.apply(
            id,
            "update_stage",
            Box::new(move |job: &Job| job.advance_stage(stage, status, now)),
        )
        .await
        .map(|(job, _)| job)
    }

    /// Sparse-merge result fields.
    pub async fn update_results(&self, id: JobId, patch: JobResults) -> Result<Job, JobError> {
        let now = Utc::now();
        self.apply(
            id,
            "update_results",
            Box::new(move |job: &Job| job.merge_results(&patch, now)),
        )
        .await
        .map(|(job, _)| job)
    }

    /// Move a live job to `FAILED`. A job that already ended keeps its
    /// first outcome.
    pub async fn mark_failed(&self, id: JobId, message: &str) -> Result<Job, JobError> {
        let now = Utc::now();
        let message = message.to_string();
        self.apply(
            id,
            "mark_failed",
            Box::new(move |job: &Job| job.mark_failed(&message, now)),
        )
        .await
        .map(|(job, _)| job)
    }

    /// Record a worker trace event. The job must exist; the write itself
    /// is best effort.
    pub async fn record_trace(&self, id: JobId, event: NewTraceEvent) -> Result<(), JobError> {
        event.validate()?;
        self.get_job(id).await?;
        self.recorder.record(id, event).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Result envelopes
    // -----------------------------------------------------------------------

    /// Apply a `RESULT` envelope. Success merges every artifact and
    /// completes the job in one atomic step; failure marks it failed.
    /// Applying the same envelope twice leaves the same record.
    pub async fn apply_result(&self, result: ResultEnvelope) -> Result<Job, JobError> {
        let job_id = result.job_id;
        match result.outcome {
            ResultOutcome::Success(artifacts) => {
                let patch = artifacts.to_patch();
                let now = Utc::now();
                self.apply(
                    job_id,
                    "apply_result",
                    Box::new(move |job: &Job| {
                        let merged = job.merge_results(&patch, now);
                        merged
                            .as_ref()
                            .unwrap_or(job)
                            .advance_stage(None, Some(JobStatus::Done), now)
                    }),
                )
                .await
                .map(|(job, _)| job)
            }
            ResultOutcome::Failure { error_message } => {
                self.mark_failed(job_id, &error_message).await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Fail live jobs whose stage has not moved for `timeout`. Returns the
    /// number of jobs failed.
    pub async fn fail_stalled(&self, timeout: Duration) -> Result<usize, JobError> {
        let secs = timeout.as_secs();
        let cutoff = Utc::now() - chrono::Duration::seconds(secs as i64);
        let stalled = self
            .jobs
            .list_stalled(cutoff, STALE_SWEEP_BATCH)
            .await
            .map_err(|e| JobError::storage(None, e))?;

        let mut failed = 0;
        for job in stalled {
            let now = Utc::now();
            let message = format!("stalled: no stage progress for {secs}s");
            // Re-check inside the update: the job may have moved since the scan.
            let mutation: JobMutation = Box::new(move |job: &Job| {
                if job.stage_updated_at < cutoff {
                    job.mark_failed(&message, now)
                } else {
                    None
                }
            });
            match self.apply(job.id, "fail_stalled", mutation).await {
                Ok((_, true)) => failed += 1,
                Ok((_, false)) => {}
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to fail stalled job");
                }
            }
        }
        Ok(failed)
    }

    pub async fn storage_healthy(&self) -> bool {
        match self.jobs.health_check().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Job store health check failed");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Mark an undispatched job failed, retrying storage errors with
    /// backoff. A record that still cannot be written stays `QUEUED` for
    /// the stalled-job sweep.
    async fn fail_undispatched(&self, id: JobId, message: &str) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match self.mark_failed(id, message).await {
                Ok(_) => return,
                Err(e) => e,
            };
            match self.retry.delay_after(attempt).filter(|_| err.is_retriable()) {
                Some(delay) => {
                    tracing::warn!(
                        job_id = %id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Failed to record dispatch failure, retrying",
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::error!(
                        job_id = %id,
                        attempts = attempt,
                        error = %err,
                        "Failed to record dispatch failure, leaving job for the stalled-job sweep",
                    );
                    return;
                }
            }
        }
    }

    /// Run `mutation` atomically. The flag says whether anything was written.
    async fn apply(
        &self,
        id: JobId,
        operation: &'static str,
        mutation: JobMutation,
    ) -> Result<(Job, bool), JobError> {
        let outcome = self
            .jobs
            .update(id, mutation)
            .await
            .map_err(|e| JobError::storage(id, e))?;

        match outcome {
            UpdateOutcome::NotFound => Err(JobError::NotFound { job_id: id }),
            UpdateOutcome::Unchanged(job) => {
                if job.is_terminal() {
                    tracing::debug!(
                        job_id = %id,
                        status = %job.status,
                        operation,
                        "Update ignored for terminal job",
                    );
                }
                Ok((job, false))
            }
            UpdateOutcome::Updated { before, after } => {
                self.announce(&before, &after);
                Ok((after, true))
            }
        }
    }

    /// Log and publish what changed between two snapshots.
    fn announce(&self, before: &Job, after: &Job) {
        if before.results != after.results {
            self.publish(job_events::JOB_RESULTS, after);
        }

        if before.status == after.status && before.stage == after.stage {
            return;
        }

        let event_type = match after.status {
            JobStatus::Done => {
                tracing::info!(job_id = %after.id, "Job completed");
                job_events::JOB_COMPLETED
            }
            JobStatus::Failed => {
                tracing::warn!(
                    job_id = %after.id,
                    stage = %after.stage,
                    error = after.error_message.as_deref().unwrap_or_default(),
                    "Job failed",
                );
                job_events::JOB_FAILED
            }
            JobStatus::Canceled => {
                tracing::info!(job_id = %after.id, "Job cancelled");
                job_events::JOB_CANCELLED
            }
            JobStatus::Queued | JobStatus::Running => {
                tracing::info!(
                    job_id = %after.id,
                    status = %after.status,
                    stage = %after.stage,
                    "Job stage advanced",
                );
                job_events::JOB_STAGE
            }
        };
        self.publish(event_type, after);
    }

    fn publish(&self, event_type: &str, job: &Job) {
        self.events.publish(
            JobEvent::new(event_type, job.id)
                .with_payload(serde_json::to_value(job).unwrap_or_default()),
        );
    }
}
