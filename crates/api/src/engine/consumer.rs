//! Result queue consumer.
//!
//! Deliveries are at-least-once and unordered. Each one is decoded,
//! checked against the ids already applied, and handed to
//! [`JobOrchestrator::apply_result`]. Only storage failures are worth
//! another attempt, and only up to a fixed number of deliveries; every
//! other delivery is acknowledged once handled.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use brickyard_core::envelope;
use brickyard_events::{Delivery, MessageQueue};
use brickyard_pipeline::{JobError, JobOrchestrator};
use tokio_util::sync::CancellationToken;

/// Base pause before a failed delivery is seen again. Scaled by attempt.
const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// Deliveries of one message before it is dropped.
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 5;

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Applied,
    /// Already applied under the same message id.
    Duplicate,
    /// Undecodable, wrong kind, unknown job, or otherwise not applicable.
    Discarded,
    /// Handed back to the queue after a transient failure.
    Redelivered,
    /// Still failing on its last allowed attempt; dropped.
    Exhausted,
}

/// Bounded set of recently applied message ids, oldest evicted first.
#[derive(Debug)]
struct SeenMessages {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenMessages {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: String) {
        if self.capacity == 0 || !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

pub struct ResultConsumer {
    orchestrator: Arc<JobOrchestrator>,
    queue: Arc<dyn MessageQueue>,
    result_queue: String,
    seen: SeenMessages,
    redelivery_delay: Duration,
    max_attempts: u32,
}

impl ResultConsumer {
    pub fn new(
        orchestrator: Arc<JobOrchestrator>,
        queue: Arc<dyn MessageQueue>,
        result_queue: impl Into<String>,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            orchestrator,
            queue,
            result_queue: result_queue.into(),
            seen: SeenMessages::new(dedup_capacity),
            redelivery_delay: DEFAULT_REDELIVERY_DELAY,
            max_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
        }
    }

    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Consume the result queue until `cancel` fires or the queue closes.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut subscription = match self.queue.subscribe(&self.result_queue).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(
                    queue = %self.result_queue,
                    error = %e,
                    "Result consumer failed to subscribe",
                );
                return;
            }
        };

        tracing::info!(queue = %self.result_queue, "Result consumer started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Result consumer stopping");
                    break;
                }
                delivery = subscription.next() => match delivery {
                    Some(delivery) => {
                        self.handle(delivery).await;
                    }
                    None => {
                        tracing::info!(queue = %self.result_queue, "Result queue closed");
                        break;
                    }
                },
            }
        }
    }

    /// Process a single delivery.
    pub async fn handle(&mut self, delivery: Delivery) -> DeliveryOutcome {
        let outcome = match self.apply(&delivery).await {
            Ok(outcome) => outcome,
            Err(e) => return self.retry_later(delivery, e).await,
        };
        self.acknowledge(&delivery).await;
        outcome
    }

    /// Decode and apply. Errors are the retriable failures only.
    async fn apply(&mut self, delivery: &Delivery) -> Result<DeliveryOutcome, JobError> {
        if self.seen.contains(&delivery.message_id) {
            tracing::debug!(
                message_id = %delivery.message_id,
                "Skipping already applied result",
            );
            return Ok(DeliveryOutcome::Duplicate);
        }

        let result = match envelope::decode_result(&delivery.body) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    message_id = %delivery.message_id,
                    error = %e,
                    "Discarding undecodable result message",
                );
                return Ok(DeliveryOutcome::Discarded);
            }
        };
        let job_id = result.job_id;

        match self.orchestrator.apply_result(result).await {
            Ok(job) => {
                tracing::debug!(
                    job_id = %job_id,
                    message_id = %delivery.message_id,
                    status = %job.status,
                    "Result applied",
                );
                self.seen.insert(delivery.message_id.clone());
                Ok(DeliveryOutcome::Applied)
            }
            Err(e) if e.is_retriable() => Err(e),
            Err(JobError::NotFound { .. }) => {
                tracing::warn!(
                    job_id = %job_id,
                    message_id = %delivery.message_id,
                    "Discarding result for unknown job",
                );
                Ok(DeliveryOutcome::Discarded)
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    message_id = %delivery.message_id,
                    error = %e,
                    "Discarding inapplicable result",
                );
                Ok(DeliveryOutcome::Discarded)
            }
        }
    }

    /// Hand the delivery back with a delay that grows per attempt, or drop
    /// it once the attempts are used up. Never waits for the delay itself.
    async fn retry_later(&self, delivery: Delivery, error: JobError) -> DeliveryOutcome {
        if delivery.attempt >= self.max_attempts {
            tracing::error!(
                message_id = %delivery.message_id,
                attempts = delivery.attempt,
                error = %error,
                "Dropping result after repeated failures",
            );
            self.acknowledge(&delivery).await;
            return DeliveryOutcome::Exhausted;
        }

        let delay = self.redelivery_delay * delivery.attempt;
        tracing::warn!(
            message_id = %delivery.message_id,
            attempt = delivery.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Result could not be applied, redelivering",
        );

        let message_id = delivery.message_id.clone();
        match self.queue.redeliver(&self.result_queue, delivery, delay).await {
            Ok(()) => DeliveryOutcome::Redelivered,
            Err(e) => {
                tracing::error!(
                    message_id = %message_id,
                    error = %e,
                    "Failed to redeliver result",
                );
                DeliveryOutcome::Discarded
            }
        }
    }

    async fn acknowledge(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(&self.result_queue, delivery).await {
            tracing::warn!(
                message_id = %delivery.message_id,
                error = %e,
                "Failed to acknowledge result message",
            );
        }
    }
}
