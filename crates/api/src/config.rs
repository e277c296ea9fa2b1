use std::str::FromStr;
use std::time::Duration;

use brickyard_core::retry::RetryPolicy;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long to wait for background tasks on shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Shared secret for the worker callback routes. Unset leaves them open.
    pub internal_api_token: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    /// | `INTERNAL_API_TOKEN`    | unset                   |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let internal_api_token = std::env::var("INTERNAL_API_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            internal_api_token,
        }
    }
}

/// Which message queue carries envelopes to and from workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    /// Amazon SQS, configured from the standard AWS environment.
    Sqs,
    /// In-process queue. Nothing outside the server can reach it.
    Local,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqs" => Ok(QueueBackend::Sqs),
            "local" => Ok(QueueBackend::Local),
            other => Err(format!("unknown queue backend '{other}'")),
        }
    }
}

/// Queue names and tuning for dispatch, result consumption, and sweeps.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queue_backend: QueueBackend,
    /// Buffered messages per queue for [`QueueBackend::Local`].
    pub local_queue_capacity: usize,
    pub request_queue: String,
    pub result_queue: String,
    pub dispatch_max_attempts: u32,
    pub dispatch_initial_backoff_ms: u64,
    pub dispatch_max_backoff_ms: u64,
    /// Number of recently applied result message ids remembered.
    pub consumer_dedup_capacity: usize,
    /// Deliveries of one result message before it is dropped.
    pub consumer_max_attempts: u32,
    /// `0` disables the stalled-job sweep.
    pub stale_job_timeout_secs: u64,
    pub stale_sweep_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_backend: QueueBackend::Sqs,
            local_queue_capacity: 10_000,
            request_queue: "generation-requests".into(),
            result_queue: "generation-results".into(),
            dispatch_max_attempts: 3,
            dispatch_initial_backoff_ms: 200,
            dispatch_max_backoff_ms: 5000,
            consumer_dedup_capacity: 1000,
            consumer_max_attempts: 5,
            stale_job_timeout_secs: 1800,
            stale_sweep_interval_secs: 60,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

impl PipelineConfig {
    /// Load pipeline settings from environment variables with defaults.
    ///
    /// | Env Var                       | Default               |
    /// |-------------------------------|-----------------------|
    /// | `QUEUE_BACKEND`               | `sqs` (or `local`)    |
    /// | `LOCAL_QUEUE_CAPACITY`        | `10000`               |
    /// | `REQUEST_QUEUE`               | `generation-requests` |
    /// | `RESULT_QUEUE`                | `generation-results`  |
    /// | `DISPATCH_MAX_ATTEMPTS`       | `3`                   |
    /// | `DISPATCH_INITIAL_BACKOFF_MS` | `200`                 |
    /// | `DISPATCH_MAX_BACKOFF_MS`     | `5000`                |
    /// | `CONSUMER_DEDUP_CAPACITY`     | `1000`                |
    /// | `CONSUMER_MAX_ATTEMPTS`       | `5`                   |
    /// | `STALE_JOB_TIMEOUT_SECS`      | `1800` (`0` disables) |
    /// | `STALE_SWEEP_INTERVAL_SECS`   | `60`                  |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_backend: env_or("QUEUE_BACKEND", defaults.queue_backend),
            local_queue_capacity: env_or("LOCAL_QUEUE_CAPACITY", defaults.local_queue_capacity),
            request_queue: env_or("REQUEST_QUEUE", defaults.request_queue),
            result_queue: env_or("RESULT_QUEUE", defaults.result_queue),
            dispatch_max_attempts: env_or("DISPATCH_MAX_ATTEMPTS", defaults.dispatch_max_attempts),
            dispatch_initial_backoff_ms: env_or(
                "DISPATCH_INITIAL_BACKOFF_MS",
                defaults.dispatch_initial_backoff_ms,
            ),
            dispatch_max_backoff_ms: env_or(
                "DISPATCH_MAX_BACKOFF_MS",
                defaults.dispatch_max_backoff_ms,
            ),
            consumer_dedup_capacity: env_or(
                "CONSUMER_DEDUP_CAPACITY",
                defaults.consumer_dedup_capacity,
            ),
            consumer_max_attempts: env_or("CONSUMER_MAX_ATTEMPTS", defaults.consumer_max_attempts),
            stale_job_timeout_secs: env_or(
                "STALE_JOB_TIMEOUT_SECS",
                defaults.stale_job_timeout_secs,
            ),
            stale_sweep_interval_secs: env_or(
                "STALE_SWEEP_INTERVAL_SECS",
                defaults.stale_sweep_interval_secs,
            ),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.dispatch_max_attempts.max(1),
            initial_delay: Duration::from_millis(self.dispatch_initial_backoff_ms),
            max_delay: Duration::from_millis(self.dispatch_max_backoff_ms),
            ..Default::default()
        }
    }

    /// `None` when the sweep is disabled.
    pub fn stale_job_timeout(&self) -> Option<Duration> {
        (self.stale_job_timeout_secs > 0).then(|| Duration::from_secs(self.stale_job_timeout_secs))
    }

    pub fn stale_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.stale_sweep_interval_secs.max(1))
    }
}
