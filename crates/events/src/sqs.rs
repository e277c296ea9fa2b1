//! Amazon SQS implementation of [`MessageQueue`].
//!
//! Queue names are resolved to URLs once and cached; a name that already
//! is a URL is used as is. Each subscription runs a long-poll task that
//! feeds a bounded channel, so a slow consumer stops the polling instead
//! of buffering without limit. A delivery stays invisible on the broker
//! until it is acknowledged (deleted) or returned with a new visibility
//! timeout; the attempt count is SQS's approximate receive count.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName};
use aws_sdk_sqs::Client;
use brickyard_core::retry::RetryPolicy;
use tokio::sync::mpsc;

use crate::queue::{Delivery, MessageQueue, QueueError, Subscription};

/// Long-poll wait per receive call (the SQS maximum).
const WAIT_TIME_SECS: i32 = 20;

/// Messages fetched per receive call (the SQS maximum).
const MAX_MESSAGES: i32 = 10;

/// Deliveries held between the poller and the consumer.
const PREFETCH: usize = 32;

/// Longest visibility timeout SQS accepts (12 hours).
const MAX_VISIBILITY_SECS: u64 = 43_200;

/// Longest per-message send delay SQS accepts (15 minutes).
const MAX_SEND_DELAY_SECS: u64 = 900;

fn unavailable<E>(e: E) -> QueueError
where
    E: std::error::Error,
{
    QueueError::Unavailable(DisplayErrorContext(e).to_string())
}

pub struct SqsQueue {
    client: Client,
    urls: Mutex<HashMap<String, String>>,
}

impl SqsQueue {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            urls: Mutex::new(HashMap::new()),
        }
    }

    /// Build a client from the standard AWS environment (region,
    /// credentials, and `AWS_ENDPOINT_URL` for local emulators).
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }

    /// Resolve (and cache) a queue's URL. Fails if the queue does not
    /// exist or the broker cannot be reached.
    pub async fn queue_url(&self, queue: &str) -> Result<String, QueueError> {
        if queue.starts_with("https://") || queue.starts_with("http://") {
            return Ok(queue.to_string());
        }
        if let Some(url) = self
            .urls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(queue)
        {
            return Ok(url.clone());
        }

        let output = self
            .client
            .get_queue_url()
            .queue_name(queue)
            .send()
            .await
            .map_err(unavailable)?;
        let url = output
            .queue_url()
            .ok_or_else(|| QueueError::Unavailable(format!("no URL returned for queue '{queue}'")))?
            .to_string();

        tracing::debug!(queue, url = %url, "Resolved queue URL");
        self.urls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(queue.to_string(), url.clone());
        Ok(url)
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn publish(&self, queue: &str, body: String) -> Result<String, QueueError> {
        let url = self.queue_url(queue).await?;
        let output = self
            .client
            .send_message()
            .queue_url(url)
            .message_body(body)
            .send()
            .await
            .map_err(unavailable)?;
        let message_id = output.message_id().unwrap_or_default().to_string();
        tracing::debug!(queue, message_id = %message_id, "Message published");
        Ok(message_id)
    }

    async fn subscribe(&self, queue: &str) -> Result<Subscription, QueueError> {
        let url = self.queue_url(queue).await?;
        let (sender, receiver) = mpsc::channel(PREFETCH);
        tokio::spawn(poll(self.client.clone(), queue.to_string(), url, sender));
        Ok(Subscription::new(queue, receiver))
    }

    async fn ack(&self, queue: &str, delivery: &Delivery) -> Result<(), QueueError> {
        let Some(receipt) = delivery.receipt.as_deref() else {
            return Ok(());
        };
        let url = self.queue_url(queue).await?;
        self.client
            .delete_message()
            .queue_url(url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn redeliver(
        &self,
        queue: &str,
        delivery: Delivery,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let url = self.queue_url(queue).await?;
        match delivery.receipt {
            // Still held by us: shorten its invisibility to the delay.
            Some(receipt) => {
                let secs = delay.as_secs().min(MAX_VISIBILITY_SECS) as i32;
                self.client
                    .change_message_visibility()
                    .queue_url(url)
                    .receipt_handle(receipt)
                    .visibility_timeout(secs)
                    .send()
                    .await
                    .map_err(unavailable)?;
            }
            None => {
                let secs = delay.as_secs().min(MAX_SEND_DELAY_SECS) as i32;
                self.client
                    .send_message()
                    .queue_url(url)
                    .message_body(delivery.body)
                    .delay_seconds(secs)
                    .send()
                    .await
                    .map_err(unavailable)?;
            }
        }
        tracing::debug!(
            queue,
            message_id = %delivery.message_id,
            attempt = delivery.attempt,
            "Message returned for redelivery",
        );
        Ok(())
    }
}

/// Long-poll `url` until the subscription is dropped.
async fn poll(client: Client, queue: String, url: String, sender: mpsc::Sender<Delivery>) {
    let backoff = RetryPolicy {
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        ..Default::default()
    };
    let mut delay = backoff.initial_delay;

    tracing::info!(queue = %queue, "Queue poller started");

    loop {
        let received = tokio::select! {
            _ = sender.closed() => break,
            received = client
                .receive_message()
                .queue_url(&url)
                .max_number_of_messages(MAX_MESSAGES)
                .wait_time_seconds(WAIT_TIME_SECS)
                .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
                .send() => received,
        };

        match received {
            Ok(output) => {
                delay = backoff.initial_delay;
                for message in output.messages() {
                    let Some(delivery) = to_delivery(message) else {
                        tracing::warn!(queue = %queue, "Skipping message without id or body");
                        continue;
                    };
                    if sender.send(delivery).await.is_err() {
                        tracing::info!(queue = %queue, "Queue poller stopped");
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    queue = %queue,
                    delay_ms = delay.as_millis() as u64,
                    error = %DisplayErrorContext(&e),
                    "Receive failed, backing off",
                );
                tokio::select! {
                    _ = sender.closed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = backoff.next_delay(delay);
            }
        }
    }

    tracing::info!(queue = %queue, "Queue poller stopped");
}

fn to_delivery(message: &Message) -> Option<Delivery> {
    let attempt = message
        .attributes()
        .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse().ok())
        .unwrap_or(1);

    Some(Delivery {
        message_id: message.message_id()?.to_string(),
        body: message.body()?.to_string(),
        attempt,
        receipt: message.receipt_handle().map(str::to_string),
    })
}
