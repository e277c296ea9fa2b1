//! At-least-once message queue contract and its in-process implementation.
//!
//! Envelopes travel as JSON text. A consumer acknowledges each delivery
//! it is done with, or hands it back with [`MessageQueue::redeliver`]; the
//! queue then delivers it again with a higher attempt count. Ordering
//! across deliveries is not guaranteed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default number of undelivered messages a [`LocalQueue`] holds per queue.
pub const DEFAULT_LOCAL_CAPACITY: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue '{0}' is closed")]
    Closed(String),

    #[error("Queue '{0}' already has a subscriber")]
    AlreadySubscribed(String),

    #[error("Queue '{0}' is full")]
    Full(String),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// One delivery of a message to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned id, stable across redeliveries of the same message.
    pub message_id: String,
    pub body: String,
    /// 1 on first delivery.
    pub attempt: u32,
    /// Broker handle needed to acknowledge or return this delivery.
    pub receipt: Option<String>,
}

impl Delivery {
    /// A first delivery with no broker receipt.
    pub fn new(message_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            attempt: 1,
            receipt: None,
        }
    }
}

/// Stream of deliveries for one queue.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    receiver: mpsc::Receiver<Delivery>,
}

impl Subscription {
    pub fn new(queue: impl Into<String>, receiver: mpsc::Receiver<Delivery>) -> Self {
        Self {
            queue: queue.into(),
            receiver,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Next delivery, or `None` once the queue is closed and drained.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueue `body`, returning the assigned message id.
    async fn publish(&self, queue: &str, body: String) -> Result<String, QueueError>;

    async fn subscribe(&self, queue: &str) -> Result<Subscription, QueueError>;

    /// Mark a delivery as processed so it is not delivered again.
    ///
    /// Queues that forget a message once it is handed out need not
    /// override this.
    async fn ack(&self, _queue: &str, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }

    /// Put a delivery back for another attempt, visible again after
    /// `delay`. Returns without waiting for the delay.
    async fn redeliver(
        &self,
        queue: &str,
        delivery: Delivery,
        delay: Duration,
    ) -> Result<(), QueueError>;

    /// Stop accepting messages. Subscriptions end once drained.
    fn close(&self) {}
}

struct Channel {
    sender: mpsc::Sender<Delivery>,
    receiver: Option<mpsc::Receiver<Delivery>>,
}

impl Channel {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

/// In-process queue with one subscriber per queue name.
///
/// Messages published before the subscriber attaches are buffered up to
/// the queue's capacity; publishing to a full queue fails. Nothing outside
/// the process can reach it, so it only suits development and tests.
pub struct LocalQueue {
    channels: Mutex<HashMap<String, Channel>>,
    closed: Mutex<bool>,
    capacity: usize,
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOCAL_CAPACITY)
    }
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            closed: Mutex::new(false),
            capacity: capacity.max(1),
        }
    }

    /// Stop accepting messages and end every subscription once drained.
    pub fn close(&self) {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn sender(&self, queue: &str) -> Result<mpsc::Sender<Delivery>, QueueError> {
        if *self.closed.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(QueueError::Closed(queue.to_string()));
        }
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let channel = channels
            .entry(queue.to_string())
            .or_insert_with(|| Channel::new(self.capacity));
        Ok(channel.sender.clone())
    }

    fn send(&self, queue: &str, delivery: Delivery) -> Result<(), QueueError> {
        self.sender(queue)?
            .try_send(delivery)
            .map_err(|e| match e {
                TrySendError::Full(_) => QueueError::Full(queue.to_string()),
                TrySendError::Closed(_) => QueueError::Closed(queue.to_string()),
            })
    }
}

#[async_trait]
impl MessageQueue for LocalQueue {
    async fn publish(&self, queue: &str, body: String) -> Result<String, QueueError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        self.send(queue, Delivery::new(message_id.clone(), body))?;
        tracing::debug!(queue, message_id = %message_id, "Message published");
        Ok(message_id)
    }

    async fn subscribe(&self, queue: &str) -> Result<Subscription, QueueError> {
        if *self.closed.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(QueueError::Closed(queue.to_string()));
        }
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let channel = channels
            .entry(queue.to_string())
            .or_insert_with(|| Channel::new(self.capacity));
        let receiver = channel
            .receiver
            .take()
            .ok_or_else(|| QueueError::AlreadySubscribed(queue.to_string()))?;
        Ok(Subscription::new(queue, receiver))
    }

    async fn redeliver(
        &self,
        queue: &str,
        delivery: Delivery,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let attempt = delivery.attempt + 1;
        let delivery = Delivery { attempt, ..delivery };
        tracing::debug!(
            queue,
            message_id = %delivery.message_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Message returned for redelivery",
        );

        if delay.is_zero() {
            return self.send(queue, delivery);
        }

        let sender = self.sender(queue)?;
        let queue = queue.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let message_id = delivery.message_id.clone();
            if sender.send(delivery).await.is_err() {
                tracing::warn!(
                    queue = %queue,
                    message_id = %message_id,
                    "Queue closed before redelivery",
                );
            }
        });
        Ok(())
    }

    fn close(&self) {
        LocalQueue::close(self);
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn buffered_until_subscribed() {
        let queue = LocalQueue::new();
        let id = queue.publish("results", "hello".into()).await.unwrap();

        let mut sub = queue.subscribe("results").await.unwrap();
        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.message_id, id);
        assert_eq!(delivery.body, "hello");
        assert_eq!(delivery.attempt, 1);
        assert_eq!(sub.queue(), "results");
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let queue = LocalQueue::new();
        queue.publish("a", "for-a".into()).await.unwrap();
        queue.publish("b", "for-b".into()).await.unwrap();

        let mut b = queue.subscribe("b").await.unwrap();
        assert_eq!(b.next().await.unwrap().body, "for-b");
    }

    #[tokio::test]
    async fn single_subscriber_per_queue() {
        let queue = LocalQueue::new();
        let _first = queue.subscribe("q").await.unwrap();
        assert_matches!(
            queue.subscribe("q").await,
            Err(QueueError::AlreadySubscribed(name)) if name == "q"
        );
    }

    #[tokio::test]
    async fn redelivery_keeps_id_and_bumps_attempt() {
        let queue = LocalQueue::new();
        let mut sub = queue.subscribe("q").await.unwrap();
        queue.publish("q", "body".into()).await.unwrap();

        let first = sub.next().await.unwrap();
        queue
            .redeliver("q", first.clone(), Duration::ZERO)
            .await
            .unwrap();
        let second = sub.next().await.unwrap();

        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn delayed_redelivery_returns_immediately() {
        let queue = LocalQueue::new();
        let mut sub = queue.subscribe("q").await.unwrap();
        queue.publish("q", "body".into()).await.unwrap();
        let first = sub.next().await.unwrap();

        tokio::time::timeout(
            Duration::from_millis(100),
            queue.redeliver("q", first, Duration::from_millis(300)),
        )
        .await
        .expect("redeliver waited for the delay")
        .unwrap();

        let second = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn publish_to_full_queue_fails() {
        let queue = LocalQueue::with_capacity(1);
        queue.publish("q", "one".into()).await.unwrap();
        assert_matches!(
            queue.publish("q", "two".into()).await,
            Err(QueueError::Full(name)) if name == "q"
        );
    }

    #[tokio::test]
    async fn close_ends_subscriptions_and_rejects_publish() {
        let queue = LocalQueue::new();
        let mut sub = queue.subscribe("q").await.unwrap();
        queue.close();

        assert!(sub.next().await.is_none());
        assert_matches!(queue.publish("q", "x".into()).await, Err(QueueError::Closed(_)));
    }
}
