//! PostgreSQL store tests. Run with a database:
//! `DATABASE_URL=postgres://... cargo test -p brickyard-db -- --ignored`

use assert_matches::assert_matches;
use brickyard_core::job::{GenerationParams, Job, JobResults, JobStage, JobStatus, NewJob, SourceType};
use brickyard_core::trace::{NewTraceEvent, TraceEventStatus};
use brickyard_db::pg::{PgJobStore, PgTraceStore};
use brickyard_db::store::{JobFilter, JobStore, TraceStore, UpdateOutcome};
use chrono::{Duration, DurationRound, Utc};
use sqlx::PgPool;

fn new_job(owner: &str) -> Job {
    // Postgres keeps microseconds; truncate so round-trips compare equal.
    let now = Utc::now().duration_trunc(Duration::microseconds(1)).unwrap();
    Job::queued(
        uuid::Uuid::now_v7(),
        NewJob {
            owner_id: owner.into(),
            title: Some("tower".into()),
            source_image_url: "s3://uploads/t.png".into(),
            params: GenerationParams {
                age: "8-10".into(),
                budget: 400,
                language: "en".into(),
                source_type: SourceType::Prompt,
            },
        },
        now,
    )
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn insert_get_round_trip(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = new_job("u1");
    store.insert(&job).await.unwrap();

    let loaded = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(loaded, job);
    assert!(store.get(uuid::Uuid::now_v7()).await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn update_writes_lifecycle_columns(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = new_job("u1");
    store.insert(&job).await.unwrap();

    let now = job.created_at + Duration::seconds(3);
    let outcome = store
        .update(
            job.id,
            Box::new(move |job: &Job| {
                job.advance_stage(Some(JobStage::Generating), None, now)
                    .and_then(|next| {
                        next.merge_results(
                            &JobResults {
                                model_key: Some("m1".into()),
                                ..Default::default()
                            },
                            now,
                        )
                    })
            }),
        )
        .await
        .unwrap();
    assert_matches!(outcome, UpdateOutcome::Updated { ref after, .. } if after.status == JobStatus::Running);

    let loaded = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(loaded.stage, JobStage::Generating);
    assert_eq!(loaded.results.model_key.as_deref(), Some("m1"));
    assert_eq!(loaded.stage_updated_at, now);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn failed_requires_message_at_schema_level(pool: PgPool) {
    let store = PgJobStore::new(pool.clone());
    let job = new_job("u1");
    store.insert(&job).await.unwrap();

    let result = sqlx::query("UPDATE jobs SET status = 'FAILED' WHERE id = $1")
        .bind(job.id)
        .execute(&pool)
        .await;
    assert!(result.is_err());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn list_and_stalled_queries(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let a = new_job("u1");
    let b = new_job("u2");
    store.insert(&a).await.unwrap();
    store.insert(&b).await.unwrap();

    let mine = store
        .list(&JobFilter {
            owner_id: Some("u1".into()),
            status: Some(JobStatus::Queued),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, a.id);

    let stalled = store
        .list_stalled(Utc::now() + Duration::seconds(1), 10)
        .await
        .unwrap();
    assert_eq!(stalled.len(), 2);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn traces_ordered_by_created_at(pool: PgPool) {
    let jobs = PgJobStore::new(pool.clone());
    let traces = PgTraceStore::new(pool);
    let job = new_job("u1");
    jobs.insert(&job).await.unwrap();

    let t1 = job.created_at + Duration::milliseconds(10);
    let t2 = job.created_at + Duration::milliseconds(20);
    for (step, at) in [("late", t2), ("early", t1)] {
        traces
            .append(
                job.id,
                NewTraceEvent {
                    step: step.into(),
                    node_name: "n".into(),
                    status: TraceEventStatus::Start,
                    duration_ms: None,
                    input: Some(serde_json::json!({"k": 1})),
                    output: None,
                    message: None,
                    created_at: Some(at),
                },
                Utc::now(),
            )
            .await
            .unwrap();
    }

    let events = traces.list_for_job(job.id).await.unwrap();
    let steps: Vec<_> = events.iter().map(|e| e.step.as_str()).collect();
    assert_eq!(steps, ["early", "late"]);
    assert_eq!(events[0].input.as_ref().unwrap()["k"], 1);
}
