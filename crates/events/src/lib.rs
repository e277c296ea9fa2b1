//! Event and message plumbing for the job pipeline.
//!
//! - [`EventBus`]: in-process publish/subscribe hub for [`JobEvent`]s,
//!   backed by `tokio::sync::broadcast`. Feeds the live job stream.
//! - [`MessageQueue`]: at-least-once queue contract used to exchange
//!   envelopes with workers. [`SqsQueue`] talks to Amazon SQS;
//!   [`LocalQueue`] is the bounded in-process implementation for
//!   development and tests.

pub mod bus;
pub mod queue;
pub mod sqs;

pub use bus::{EventBus, JobEvent};
pub use queue::{Delivery, LocalQueue, MessageQueue, QueueError, Subscription};
pub use sqs::SqsQueue;
