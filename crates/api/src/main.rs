use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use brickyard_db::memory::{MemoryJobStore, MemoryTraceStore};
use brickyard_db::pg::{PgJobStore, PgTraceStore};
use brickyard_db::store::{JobStore, TraceStore};
use brickyard_events::{EventBus, LocalQueue, MessageQueue, SqsQueue};
use brickyard_pipeline::JobOrchestrator;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use brickyard_api::background;
use brickyard_api::config::{PipelineConfig, QueueBackend, ServerConfig};
use brickyard_api::engine::consumer::ResultConsumer;
use brickyard_api::router::build_app_router;
use brickyard_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "brickyard_api=debug,brickyard_pipeline=debug,tower_http=debug".into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let pipeline = PipelineConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::info!(
        backend = ?pipeline.queue_backend,
        request_queue = %pipeline.request_queue,
        result_queue = %pipeline.result_queue,
        "Loaded pipeline configuration",
    );
    if config.internal_api_token.is_none() {
        tracing::warn!("INTERNAL_API_TOKEN not set, worker callback routes are unauthenticated");
    }

    // --- Storage ---
    let (jobs, traces): (Arc<dyn JobStore>, Arc<dyn TraceStore>) =
        match std::env::var("DATABASE_URL") {
            Ok(database_url) => {
                let pool = brickyard_db::create_pool(&database_url)
                    .await
                    .expect("Failed to connect to database");
                tracing::info!("Database connection pool created");

                brickyard_db::health_check(&pool)
                    .await
                    .expect("Database health check failed");
                tracing::info!("Database health check passed");

                brickyard_db::run_migrations(&pool)
                    .await
                    .expect("Failed to run database migrations");
                tracing::info!("Database migrations applied");

                (
                    Arc::new(PgJobStore::new(pool.clone())),
                    Arc::new(PgTraceStore::new(pool)),
                )
            }
            Err(_) => {
                tracing::warn!("DATABASE_URL not set, jobs are kept in memory only");
                (
                    Arc::new(MemoryJobStore::new()),
                    Arc::new(MemoryTraceStore::new()),
                )
            }
        };

    // --- Message queue ---
    let queue: Arc<dyn MessageQueue> = match pipeline.queue_backend {
        QueueBackend::Sqs => {
            let sqs = SqsQueue::from_env().await;
            for name in [&pipeline.request_queue, &pipeline.result_queue] {
                let url = sqs
                    .queue_url(name)
                    .await
                    .unwrap_or_else(|e| panic!("Failed to resolve SQS queue '{name}': {e}"));
                tracing::info!(queue = %name, url = %url, "SQS queue resolved");
            }
            Arc::new(sqs)
        }
        QueueBackend::Local => {
            tracing::warn!(
                capacity = pipeline.local_queue_capacity,
                "QUEUE_BACKEND=local, requests stay in this process and no external worker can receive them",
            );
            Arc::new(LocalQueue::with_capacity(pipeline.local_queue_capacity))
        }
    };

    // --- Events, orchestrator ---
    let event_bus = Arc::new(EventBus::default());
    let orchestrator = Arc::new(JobOrchestrator::new(
        jobs,
        traces,
        Arc::clone(&queue),
        Arc::clone(&event_bus),
        pipeline.request_queue.clone(),
        pipeline.retry_policy(),
    ));

    // --- Background tasks ---
    let cancel = CancellationToken::new();

    let consumer = ResultConsumer::new(
        Arc::clone(&orchestrator),
        Arc::clone(&queue),
        pipeline.result_queue.clone(),
        pipeline.consumer_dedup_capacity,
    )
    .with_max_attempts(pipeline.consumer_max_attempts);
    let consumer_handle = tokio::spawn(consumer.run(cancel.clone()));

    let sweep_handle = pipeline.stale_job_timeout().map(|timeout| {
        tokio::spawn(background::stale_jobs::run(
            Arc::clone(&orchestrator),
            timeout,
            pipeline.stale_sweep_interval(),
            cancel.clone(),
        ))
    });
    if sweep_handle.is_none() {
        tracing::info!("Stalled job sweep disabled");
    }

    // --- App state & router ---
    let state = AppState {
        orchestrator,
        config: Arc::new(config.clone()),
        event_bus,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("HOST must be a valid IP address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    cancel.cancel();
    if tokio::time::timeout(grace, consumer_handle).await.is_err() {
        tracing::warn!("Result consumer did not stop in time");
    }
    if let Some(handle) = sweep_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    queue.close();

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
