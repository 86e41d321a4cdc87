//! Message transport abstraction.
//!
//! The transport is a durable, partitioned, at-least-once channel. A
//! message polled by one member of a consumer group is invisible to the
//! other members until it is acknowledged or its claim lapses, in which
//! case it is delivered again.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::PipelineError;

/// Acknowledgment returned once the transport has durably accepted a
/// published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the message was written to.
    pub topic: String,
    /// Transport-assigned position of the message within its topic.
    pub offset: i64,
}

/// A message handed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Topic the message was read from.
    pub topic: String,
    /// Position of the message within its topic.
    pub offset: i64,
    /// How many times this message has been handed to the group,
    /// including this delivery.
    pub delivery_attempt: i32,
    /// Raw serialized payload.
    pub payload: Vec<u8>,
}

/// Publishing half of the transport. Shared by concurrent publish tasks.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes `payload` to `topic` and waits for the delivery
    /// acknowledgment. `partition_key` selects the ordering domain.
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        payload: Vec<u8>,
    ) -> Result<Delivery, PipelineError>;
}

/// Consuming half of the transport: one member of a consumer group.
#[async_trait]
pub trait Subscription: Send {
    /// Waits up to `timeout` for the next message. `Ok(None)` means the
    /// wait elapsed with nothing to deliver.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ReceivedMessage>, PipelineError>;

    /// Marks `message` as processed so it is never delivered to this group
    /// again.
    async fn acknowledge(&mut self, message: &ReceivedMessage) -> Result<(), PipelineError>;
}
