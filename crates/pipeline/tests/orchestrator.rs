//! End-to-end orchestrator behaviour against the in-memory stores.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use brickyard_core::envelope::{self, MessageEnvelope, ResultArtifacts, ResultEnvelope};
use brickyard_core::job::Job;
use brickyard_core::job::{
    GenerationParams, JobResults, JobStage, JobStatus, NewJob, SourceType, DEFAULT_FAILURE_MESSAGE,
};
use brickyard_core::job_events;
use brickyard_core::retry::RetryPolicy;
use brickyard_core::trace::{NewTraceEvent, TraceEvent, TraceEventStatus};
use brickyard_core::types::{JobId, Timestamp};
use brickyard_db::memory::{MemoryJobStore, MemoryTraceStore};
use brickyard_db::store::{
    JobFilter, JobMutation, JobStore, StoreError, TraceStore, UpdateOutcome,
};
use brickyard_events::{Delivery, EventBus, LocalQueue, MessageQueue, QueueError, Subscription};
use brickyard_pipeline::{DispatchError, JobError, JobOrchestrator};
use chrono::Utc;

const REQUESTS: &str = "generation-requests";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Harness {
    orchestrator: Arc<JobOrchestrator>,
    queue: Arc<LocalQueue>,
    events: Arc<EventBus>,
}

fn harness() -> Harness {
    harness_with(Arc::new(MemoryTraceStore::new()))
}

fn harness_with(traces: Arc<dyn TraceStore>) -> Harness {
    let queue = Arc::new(LocalQueue::new());
    let events = Arc::new(EventBus::default());
    let orchestrator = Arc::new(JobOrchestrator::new(
        Arc::new(MemoryJobStore::new()),
        traces,
        queue.clone(),
        Arc::clone(&events),
        REQUESTS,
        RetryPolicy::default(),
    ));
    Harness {
        orchestrator,
        queue,
        events,
    }
}

fn new_job() -> NewJob {
    NewJob {
        owner_id: "user-1".into(),
        title: Some("dragon".into()),
        source_image_url: "s3://uploads/s1.png".into(),
        params: GenerationParams {
            age: "6-7".into(),
            budget: 150,
            language: "en".into(),
            source_type: SourceType::Image,
        },
    }
}

fn trace(step: &str, created_at: Option<Timestamp>) -> NewTraceEvent {
    NewTraceEvent {
        step: step.into(),
        node_name: "brickify".into(),
        status: TraceEventStatus::Success,
        duration_ms: Some(42),
        input: Some(serde_json::json!({"budget": 150})),
        output: None,
        message: None,
        created_at,
    }
}

/// Publishes always fail.
struct DownQueue;

#[async_trait]
impl MessageQueue for DownQueue {
    async fn publish(&self, _queue: &str, _body: String) -> Result<String, QueueError> {
        Err(QueueError::Unavailable("broker down".into()))
    }

    async fn subscribe(&self, queue: &str) -> Result<Subscription, QueueError> {
        Err(QueueError::Unavailable(queue.into()))
    }

    async fn redeliver(
        &self,
        _queue: &str,
        _delivery: Delivery,
        _delay: Duration,
    ) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("broker down".into()))
    }
}

/// Memory store whose next `failures` updates fail.
#[derive(Default)]
struct FlakyJobStore {
    inner: MemoryJobStore,
    failures: AtomicU32,
}

impl FlakyJobStore {
    fn fail_next(&self, updates: u32) {
        self.failures.store(updates, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for FlakyJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.insert(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        self.inner.list(filter).await
    }

    async fn list_stalled(
        &self,
        older_than: Timestamp,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        self.inner.list_stalled(older_than, limit).await
    }

    async fn update(&self, id: JobId, mutation: JobMutation) -> Result<UpdateOutcome, StoreError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.update(id, mutation).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        multiplier: 2.0,
    }
}

fn orchestrator_over(jobs: Arc<FlakyJobStore>, queue: Arc<dyn MessageQueue>) -> JobOrchestrator {
    JobOrchestrator::new(
        jobs,
        Arc::new(MemoryTraceStore::new()),
        queue,
        Arc::new(EventBus::default()),
        REQUESTS,
        fast_retry(3),
    )
}

/// Trace writes always fail.
struct BrokenTraceStore;

#[async_trait]
impl TraceStore for BrokenTraceStore {
    async fn append(
        &self,
        _job_id: JobId,
        _event: NewTraceEvent,
        _received_at: Timestamp,
    ) -> Result<TraceEvent, StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }

    async fn list_for_job(&self, _job_id: JobId) -> Result<Vec<TraceEvent>, StoreError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Creation and dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_persists_then_publishes_request() {
    let h = harness();
    let job = h.orchestrator.create_job(new_job()).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    let stored = h.orchestrator.get_job(job.id).await.unwrap();
    assert_eq!(stored, job);

    let mut sub = h.queue.subscribe(REQUESTS).await.unwrap();
    let delivery = sub.next().await.unwrap();
    let request = assert_matches!(
        envelope::decode(&delivery.body).unwrap(),
        MessageEnvelope::Request(r) => r
    );
    assert_eq!(request.job_id, job.id);
    assert_eq!(request.budget, 150);
    assert_eq!(request.source_image_url, "s3://uploads/s1.png");
}

#[tokio::test]
async fn create_rejects_invalid_input() {
    let h = harness();
    let mut input = new_job();
    input.params.budget = -5;
    assert_matches!(
        h.orchestrator.create_job(input).await,
        Err(JobError::Validation(_))
    );
}

#[tokio::test]
async fn exhausted_dispatch_fails_job_and_reports_id() {
    let jobs = Arc::new(MemoryJobStore::new());
    let orchestrator = JobOrchestrator::new(
        jobs.clone(),
        Arc::new(MemoryTraceStore::new()),
        Arc::new(DownQueue),
        Arc::new(EventBus::default()),
        REQUESTS,
        RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            multiplier: 2.0,
        },
    );

    let err = orchestrator.create_job(new_job()).await.unwrap_err();
    let job_id = assert_matches!(
        err,
        JobError::DispatchFailure {
            job_id,
            source: DispatchError::Exhausted { attempts: 2, .. },
        } => job_id
    );

    let job = orchestrator.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .error_message
        .unwrap()
        .starts_with("dispatch failed: "));
}

#[tokio::test]
async fn dispatch_failure_is_recorded_despite_transient_store_errors() {
    let jobs = Arc::new(FlakyJobStore::default());
    let orchestrator = orchestrator_over(jobs.clone(), Arc::new(DownQueue));

    // Two failed writes fit inside the three-attempt policy.
    jobs.fail_next(2);
    let err = orchestrator.create_job(new_job()).await.unwrap_err();
    let job_id = assert_matches!(err, JobError::DispatchFailure { job_id, .. } => job_id);

    let job = orchestrator.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().starts_with("dispatch failed: "));
}

#[tokio::test]
async fn unrecordable_dispatch_failure_is_left_for_the_sweep() {
    let jobs = Arc::new(FlakyJobStore::default());
    let orchestrator = orchestrator_over(jobs.clone(), Arc::new(DownQueue));

    jobs.fail_next(3);
    let err = orchestrator.create_job(new_job()).await.unwrap_err();
    let job_id = assert_matches!(err, JobError::DispatchFailure { job_id, .. } => job_id);
    assert_eq!(
        orchestrator.get_job(job_id).await.unwrap().status,
        JobStatus::Queued
    );

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(orchestrator.fail_stalled(Duration::ZERO).await.unwrap(), 1);
    assert_eq!(
        orchestrator.get_job(job_id).await.unwrap().status,
        JobStatus::Failed
    );
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stage_update_moves_job_to_running() {
    let h = harness();
    let job = h.orchestrator.create_job(new_job()).await.unwrap();

    let updated = h
        .orchestrator
        .update_stage(job.id, Some(JobStage::Generating), Some(JobStatus::Running))
        .await
        .unwrap();
    assert_eq!(updated.status, JobStatus::Running);
    assert_eq!(updated.stage, JobStage::Generating);
    assert!(updated.stage_updated_at >= job.stage_updated_at);
}

#[tokio::test]
async fn sparse_result_updates_accumulate() {
    let h = harness();
    let job = h.orchestrator.create_job(new_job()).await.unwrap();

    h.orchestrator
        .update_results(
            job.id,
            JobResults {
                model_key: Some("m1".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let updated = h
        .orchestrator
        .update_results(
            job.id,
            JobResults {
                bom_key: Some("b1".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.results.model_key.as_deref(), Some("m1"));
    assert_eq!(updated.results.bom_key.as_deref(), Some("b1"));
}

#[tokio::test]
async fn callbacks_on_unknown_job_are_not_found() {
    let h = harness();
    let unknown = brickyard_core::types::new_job_id();

    assert_matches!(
        h.orchestrator.update_stage(unknown, Some(JobStage::Model), None).await,
        Err(JobError::NotFound { job_id }) if job_id == unknown
    );
    assert_matches!(
        h.orchestrator.update_results(unknown, JobResults::default()).await,
        Err(JobError::NotFound { .. })
    );
    assert_matches!(
        h.orchestrator.mark_failed(unknown, "boom").await,
        Err(JobError::NotFound { .. })
    );
    assert_matches!(
        h.orchestrator.record_trace(unknown, trace("x", None)).await,
        Err(JobError::NotFound { .. })
    );
}

#[tokio::test]
async fn callbacks_are_idempotent() {
    let h = harness();
    let job = h.orchestrator.create_job(new_job()).await.unwrap();
    let patch = JobResults {
        preview_image_url: Some("s3://out/p.png".into()),
        ..Default::default()
    };

    let once = h
        .orchestrator
        .update_stage(job.id, Some(JobStage::Rendering), None)
        .await
        .unwrap();
    let twice = h
        .orchestrator
        .update_stage(job.id, Some(JobStage::Rendering), None)
        .await
        .unwrap();
    assert_eq!((once.status, once.stage), (twice.status, twice.stage));
    assert_eq!(once.stage_updated_at, twice.stage_updated_at);

    let once = h.orchestrator.update_results(job.id, patch.clone()).await.unwrap();
    let twice = h.orchestrator.update_results(job.id, patch).await.unwrap();
    assert_eq!(once, twice);

    let once = h.orchestrator.mark_failed(job.id, "gpu lost").await.unwrap();
    let twice = h.orchestrator.mark_failed(job.id, "gpu lost again").await.unwrap();
    assert_eq!(once, twice);
    assert_eq!(twice.error_message.as_deref(), Some("gpu lost"));
}

#[tokio::test]
async fn failure_is_not_overwritten_by_late_success() {
    let h = harness();
    let job = h.orchestrator.create_job(new_job()).await.unwrap();
    h.orchestrator
        .update_stage(job.id, Some(JobStage::Generating), Some(JobStatus::Running))
        .await
        .unwrap();
    h.orchestrator.mark_failed(job.id, "worker crashed").await.unwrap();

    let late = ResultEnvelope::success(
        job.id,
        Utc::now(),
        ResultArtifacts {
            glb_url: Some("s3://out/late.glb".into()),
            ..Default::default()
        },
    );
    let after = h.orchestrator.apply_result(late).await.unwrap();

    assert_eq!(after.status, JobStatus::Failed);
    assert_eq!(after.error_message.as_deref(), Some("worker crashed"));
    assert!(after.results.glb_url.is_none());
}

#[tokio::test]
async fn cancel_live_job_then_conflict() {
    let h = harness();
    let job = h.orchestrator.create_job(new_job()).await.unwrap();

    let canceled = h.orchestrator.cancel(job.id).await.unwrap();
    assert_eq!(canceled.status, JobStatus::Canceled);

    assert_matches!(
        h.orchestrator.cancel(job.id).await,
        Err(JobError::Conflict { job_id, .. }) if job_id == job.id
    );

    // Late worker reports do not revive a cancelled job.
    let after = h
        .orchestrator
        .update_stage(job.id, Some(JobStage::Packaging), Some(JobStatus::Running))
        .await
        .unwrap();
    assert_eq!(after.status, JobStatus::Canceled);
}

// ---------------------------------------------------------------------------
// Result envelopes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn success_result_merges_artifacts_and_completes() {
    let h = harness();
    let job = h.orchestrator.create_job(new_job()).await.unwrap();

    let done = h
        .orchestrator
        .apply_result(ResultEnvelope::success(
            job.id,
            Utc::now(),
            ResultArtifacts {
                ldr_url: Some("s3://out/m.ldr".into()),
                parts: Some(312),
                tags: Some(vec!["dragon".into()]),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.stage, JobStage::Done);
    assert_eq!(done.results.ldr_url.as_deref(), Some("s3://out/m.ldr"));
    assert_eq!(done.results.parts, Some(312));
    assert_eq!(done.results.suggested_tags, Some(vec!["dragon".to_string()]));
    assert!(done.error_message.is_none());
}

#[tokio::test]
async fn duplicate_failure_result_yields_one_failed_state() {
    let h = harness();
    let job = h.orchestrator.create_job(new_job()).await.unwrap();
    let failure = ResultEnvelope::failure(job.id, Utc::now(), "timeout");

    let first = h.orchestrator.apply_result(failure.clone()).await.unwrap();
    let second = h.orchestrator.apply_result(failure).await.unwrap();

    assert_eq!(first.status, JobStatus::Failed);
    assert_eq!(first, second);
    assert_eq!(second.error_message.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn result_with_zone_less_timestamp_completes_job() {
    let h = harness();
    let job = h.orchestrator.create_job(new_job()).await.unwrap();
    let text = format!(
        r#"{{"kind":"RESULT","jobId":"{}","timestamp":"2024-05-01T10:00:00.123",
            "success":true,"glbUrl":"s3://out/m.glb"}}"#,
        job.id
    );

    let result = envelope::decode_result(&text).unwrap();
    let done = h.orchestrator.apply_result(result).await.unwrap();

    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.results.glb_url.as_deref(), Some("s3://out/m.glb"));
}

// ---------------------------------------------------------------------------
// Traces
// ---------------------------------------------------------------------------

#[tokio::test]
async fn traces_read_back_by_created_at() {
    let h = harness();
    let job = h.orchestrator.create_job(new_job()).await.unwrap();
    let t1 = Utc::now();
    let t2 = t1 + chrono::Duration::milliseconds(250);

    let (a, b) = tokio::join!(
        h.orchestrator.record_trace(job.id, trace("late", Some(t2))),
        h.orchestrator.record_trace(job.id, trace("early", Some(t1))),
    );
    a.unwrap();
    b.unwrap();

    let events = h.orchestrator.list_traces(job.id).await.unwrap();
    let steps: Vec<_> = events.iter().map(|e| e.step.as_str()).collect();
    assert_eq!(steps, ["early", "late"]);
    assert_eq!(events[0].created_at, t1);
}

#[tokio::test]
async fn trace_write_failure_is_swallowed() {
    let h = harness_with(Arc::new(BrokenTraceStore));
    let job = h.orchestrator.create_job(new_job()).await.unwrap();

    h.orchestrator
        .record_trace(job.id, trace("step", None))
        .await
        .unwrap();
    assert!(h.orchestrator.list_traces(job.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_trace_event_is_rejected() {
    let h = harness();
    let job = h.orchestrator.create_job(new_job()).await.unwrap();
    assert_matches!(
        h.orchestrator.record_trace(job.id, trace("  ", None)).await,
        Err(JobError::Validation(_))
    );
}

// ---------------------------------------------------------------------------
// Concurrency, sweeps, and events
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callbacks_lose_no_fields() {
    let h = harness();
    let job = h.orchestrator.create_job(new_job()).await.unwrap();

    let patches = [
        JobResults {
            preview_image_url: Some("p".into()),
            ..Default::default()
        },
        JobResults {
            model_key: Some("m".into()),
            ..Default::default()
        },
        JobResults {
            blueprint_pdf_key: Some("bp".into()),
            ..Default::default()
        },
        JobResults {
            bom_key: Some("b".into()),
            ..Default::default()
        },
        JobResults {
            glb_url: Some("g".into()),
            ..Default::default()
        },
    ];

    let job_id = job.id;
    let mut handles = Vec::new();
    for patch in patches {
        let orchestrator = Arc::clone(&h.orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator.update_results(job_id, patch).await.unwrap();
        }));
    }
    let orchestrator = Arc::clone(&h.orchestrator);
    handles.push(tokio::spawn(async move {
        orchestrator
            .update_stage(job_id, Some(JobStage::Verifying), None)
            .await
            .unwrap();
    }));
    for handle in handles {
        handle.await.unwrap();
    }

    let stored = h.orchestrator.get_job(job.id).await.unwrap();
    assert_eq!(stored.results.preview_image_url.as_deref(), Some("p"));
    assert_eq!(stored.results.model_key.as_deref(), Some("m"));
    assert_eq!(stored.results.blueprint_pdf_key.as_deref(), Some("bp"));
    assert_eq!(stored.results.bom_key.as_deref(), Some("b"));
    assert_eq!(stored.results.glb_url.as_deref(), Some("g"));
    assert_eq!(stored.stage, JobStage::Verifying);
    assert_eq!(stored.status, JobStatus::Running);
}

#[tokio::test]
async fn stalled_sweep_fails_only_live_jobs() {
    let h = harness();
    let live = h.orchestrator.create_job(new_job()).await.unwrap();
    let done = h.orchestrator.create_job(new_job()).await.unwrap();
    h.orchestrator
        .update_stage(done.id, None, Some(JobStatus::Done))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let failed = h.orchestrator.fail_stalled(Duration::ZERO).await.unwrap();
    assert_eq!(failed, 1);

    let live = h.orchestrator.get_job(live.id).await.unwrap();
    assert_eq!(live.status, JobStatus::Failed);
    assert_eq!(
        live.error_message.as_deref(),
        Some("stalled: no stage progress for 0s")
    );
    let done = h.orchestrator.get_job(done.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Done);
}

#[tokio::test]
async fn stalled_sweep_continues_past_a_failed_write() {
    let jobs = Arc::new(FlakyJobStore::default());
    let orchestrator = orchestrator_over(jobs.clone(), Arc::new(LocalQueue::new()));
    let first = orchestrator.create_job(new_job()).await.unwrap();
    let second = orchestrator.create_job(new_job()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    jobs.fail_next(1);
    assert_eq!(orchestrator.fail_stalled(Duration::ZERO).await.unwrap(), 1);

    let mut statuses = Vec::new();
    for id in [first.id, second.id] {
        statuses.push(orchestrator.get_job(id).await.unwrap().status);
    }
    statuses.sort();
    assert_eq!(statuses, [JobStatus::Queued, JobStatus::Failed]);
}

#[tokio::test]
async fn bare_failed_status_gets_default_message() {
    let h = harness();
    let job = h.orchestrator.create_job(new_job()).await.unwrap();
    let failed = h
        .orchestrator
        .update_stage(job.id, None, Some(JobStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed.error_message.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
}

#[tokio::test]
async fn lifecycle_changes_are_published() {
    let h = harness();
    let mut rx = h.events.subscribe();
    let job = h.orchestrator.create_job(new_job()).await.unwrap();
    h.orchestrator
        .update_stage(job.id, Some(JobStage::Model), None)
        .await
        .unwrap();
    h.orchestrator.mark_failed(job.id, "boom").await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, job.id);
        seen.push(event.event_type);
    }
    assert_eq!(
        seen,
        [
            job_events::JOB_CREATED,
            job_events::JOB_STAGE,
            job_events::JOB_FAILED
        ]
    );
}
