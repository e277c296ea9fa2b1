//! Outbound dispatcher: publishes `REQUEST` envelopes with bounded retry.
//!
//! The caller persists the job before dispatching, so a failed publish
//! can always be recorded against an existing record.

use std::sync::Arc;

use brickyard_core::envelope::{self, EnvelopeError, MessageEnvelope, RequestEnvelope};
use brickyard_core::retry::RetryPolicy;
use brickyard_events::{MessageQueue, QueueError};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("could not encode request: {0}")]
    Encode(#[from] EnvelopeError),

    #[error("publish failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: QueueError,
    },
}

pub struct Dispatcher {
    queue: Arc<dyn MessageQueue>,
    request_queue: String,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn MessageQueue>, request_queue: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            queue,
            request_queue: request_queue.into(),
            retry,
        }
    }

    /// Publish the request, retrying with backoff. Returns the message id.
    pub async fn dispatch(&self, request: RequestEnvelope) -> Result<String, DispatchError> {
        let job_id = request.job_id;
        let body = envelope::encode(&MessageEnvelope::Request(request))?;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.queue.publish(&self.request_queue, body.clone()).await {
                Ok(message_id) => {
                    tracing::info!(
                        job_id = %job_id,
                        message_id = %message_id,
                        attempt,
                        queue = %self.request_queue,
                        "Request dispatched",
                    );
                    return Ok(message_id);
                }
                Err(e) => match self.retry.delay_after(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            job_id = %job_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Publish failed, retrying",
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(DispatchError::Exhausted {
                            attempts: attempt,
                            source: e,
                        });
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use brickyard_core::job::SourceType;
    use brickyard_events::{Delivery, LocalQueue, Subscription};
    use chrono::Utc;

    use super::*;

    /// Fails the first `failures` publishes, then forwards to a local queue.
    struct FlakyQueue {
        failures: u32,
        calls: AtomicU32,
        inner: LocalQueue,
    }

    #[async_trait]
    impl MessageQueue for FlakyQueue {
        async fn publish(&self, queue: &str, body: String) -> Result<String, QueueError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(QueueError::Unavailable("broker down".into()));
            }
            self.inner.publish(queue, body).await
        }

        async fn subscribe(&self, queue: &str) -> Result<Subscription, QueueError> {
            self.inner.subscribe(queue).await
        }

        async fn redeliver(
            &self,
            queue: &str,
            delivery: Delivery,
            delay: Duration,
        ) -> Result<(), QueueError> {
            self.inner.redeliver(queue, delivery, delay).await
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    fn request() -> RequestEnvelope {
        RequestEnvelope {
            job_id: uuid::Uuid::now_v7(),
            timestamp: Utc::now(),
            owner_id: "u1".into(),
            source_image_url: "s3://uploads/a.png".into(),
            age: "6-7".into(),
            budget: 100,
            language: "en".into(),
            source_type: SourceType::Image,
        }
    }

    #[tokio::test]
    async fn retries_until_publish_succeeds() {
        let queue = Arc::new(FlakyQueue {
            failures: 2,
            calls: AtomicU32::new(0),
            inner: LocalQueue::new(),
        });
        let dispatcher = Dispatcher::new(queue.clone(), "requests", fast_policy(3));
        let request = request();

        dispatcher.dispatch(request.clone()).await.unwrap();
        assert_eq!(queue.calls.load(Ordering::SeqCst), 3);

        let mut sub = queue.subscribe("requests").await.unwrap();
        let delivered = envelope::decode(&sub.next().await.unwrap().body).unwrap();
        assert_eq!(delivered, MessageEnvelope::Request(request));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let queue = Arc::new(FlakyQueue {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
            inner: LocalQueue::new(),
        });
        let dispatcher = Dispatcher::new(queue.clone(), "requests", fast_policy(3));

        let err = dispatcher.dispatch(request()).await.unwrap_err();
        assert_matches!(err, DispatchError::Exhausted { attempts: 3, .. });
        assert_eq!(queue.calls.load(Ordering::SeqCst), 3);
    }
}
