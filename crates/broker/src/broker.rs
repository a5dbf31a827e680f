use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{Delivery, Message, Result};

/// A stream of deliveries from one queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

/// Core trait for message broker implementations.
///
/// Queues are durable: a message published to a declared queue is kept
/// until a consumer acknowledges it, even if no consumer is attached yet.
/// Delivery is at-least-once. All implementations must be thread-safe.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declares a plain queue. Declaring an existing queue is a no-op.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Publishes a message straight to a queue.
    async fn publish(&self, queue: &str, message: Message) -> Result<()>;

    /// Declares a queue fed by the delayed-delivery exchange.
    async fn declare_delayed_queue(&self, queue: &str) -> Result<()>;

    /// Publishes a message that becomes visible on `queue` only after `delay`.
    ///
    /// The deferral travels in the `x-delay` header (milliseconds).
    async fn publish_delayed(&self, queue: &str, message: Message, delay: Duration)
    -> Result<()>;

    /// Starts consuming a queue.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream>;
}
