use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::Notify;

use crate::{Acknowledger, Broker, BrokerError, Delivery, DeliveryStream, Message, Result};

#[derive(Debug)]
struct Queued {
    message: Message,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: Mutex<VecDeque<Queued>>,
    notify: Notify,
}

impl QueueState {
    fn push(&self, queued: Queued) {
        self.ready
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(queued);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Queued> {
        self.ready
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    fn len(&self) -> usize {
        self.ready
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    async fn next(self: Arc<Self>) -> Option<(Result<Delivery>, Arc<Self>)> {
        loop {
            if let Some(queued) = self.pop() {
                let acker = InMemoryAcker {
                    queue: Arc::clone(&self),
                    message: queued.message.clone(),
                };
                let delivery = Delivery::new(queued.message, queued.redelivered, Box::new(acker));
                return Some((Ok(delivery), self));
            }
            self.notify.notified().await;
        }
    }
}

struct InMemoryAcker {
    queue: Arc<QueueState>,
    message: Message,
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self) -> Result<()> {
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        if requeue {
            self.queue.push(Queued {
                message: self.message.clone(),
                redelivered: true,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryBrokerState {
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
    delayed_queues: Mutex<HashSet<String>>,
    failing_publishes: AtomicUsize,
}

/// In-memory broker for testing and single-process setups.
///
/// Mirrors the delivery semantics relied on by the transaction layer:
/// durable queues, at-least-once delivery with requeue on nack, and delayed
/// messages that only become visible once their `x-delay` has elapsed.
/// Delayed delivery is driven by tokio timers, so a runtime is required.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<InMemoryBrokerState>,
}

impl InMemoryBroker {
    /// Creates a new broker with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` publishes fail with a transient connection error.
    pub fn fail_next_publishes(&self, count: usize) {
        self.state.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// Returns the number of messages waiting on a queue (0 if undeclared).
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.lookup(queue).map_or(0, |q| q.len())
    }

    /// Returns true if the queue has been declared.
    pub fn has_queue(&self, queue: &str) -> bool {
        self.lookup(queue).is_some()
    }

    fn lookup(&self, queue: &str) -> Option<Arc<QueueState>> {
        self.state
            .queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(queue)
            .cloned()
    }

    fn queue(&self, queue: &str) -> Result<Arc<QueueState>> {
        self.lookup(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))
    }

    fn take_injected_failure(&self) -> Result<()> {
        let injected = self
            .state
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(BrokerError::ConnectionLost(
                "in-memory broker configured to fail".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.state
            .queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, message: Message) -> Result<()> {
        self.take_injected_failure()?;
        self.queue(queue)?.push(Queued {
            message,
            redelivered: false,
        });
        Ok(())
    }

    async fn declare_delayed_queue(&self, queue: &str) -> Result<()> {
        self.declare_queue(queue).await?;
        self.state
            .delayed_queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(queue.to_string());
        Ok(())
    }

    async fn publish_delayed(
        &self,
        queue: &str,
        message: Message,
        delay: Duration,
    ) -> Result<()> {
        self.take_injected_failure()?;
        let is_delayed = self
            .state
            .delayed_queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(queue);
        if !is_delayed {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }

        let target = self.queue(queue)?;
        let message = message.with_delay(delay);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            target.push(Queued {
                message,
                redelivered: false,
            });
        });
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        let state = self.queue(queue)?;
        let deliveries = stream::unfold(state, |state| state.next());
        Ok(Box::pin(deliveries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HeaderValue, X_DELAY_HEADER};
    use futures_util::StreamExt;
    use std::time::Instant;

    #[tokio::test]
    async fn publish_before_consume_is_retained() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("job").await.unwrap();
        broker.publish("job", Message::new("hello")).await.unwrap();
        assert_eq!(broker.queue_depth("job"), 1);

        let mut deliveries = broker.consume("job").await.unwrap();
        let delivery = deliveries.next().await.unwrap().unwrap();
        assert_eq!(delivery.message.payload, b"hello");
        assert!(!delivery.redelivered);
        delivery.ack().await.unwrap();
        assert_eq!(broker.queue_depth("job"), 0);
    }

    #[tokio::test]
    async fn publish_to_undeclared_queue_fails() {
        let broker = InMemoryBroker::new();
        let result = broker.publish("missing", Message::new("x")).await;
        assert!(matches!(result, Err(BrokerError::QueueNotFound(_))));
    }

    #[tokio::test]
    async fn nack_with_requeue_redelivers() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("job").await.unwrap();
        broker.publish("job", Message::new("again")).await.unwrap();

        let mut deliveries = broker.consume("job").await.unwrap();
        let first = deliveries.next().await.unwrap().unwrap();
        first.nack(true).await.unwrap();

        let second = deliveries.next().await.unwrap().unwrap();
        assert!(second.redelivered);
        assert_eq!(second.message.payload, b"again");
        second.nack(false).await.unwrap();
        assert_eq!(broker.queue_depth("job"), 0);
    }

    #[tokio::test]
    async fn delayed_message_is_held_until_delay_elapses() {
        let broker = InMemoryBroker::new();
        broker.declare_delayed_queue("transactionCheck2").await.unwrap();

        let start = Instant::now();
        broker
            .publish_delayed(
                "transactionCheck2",
                Message::new("transactionId1"),
                Duration::from_millis(200),
            )
            .await
            .unwrap();
        assert_eq!(broker.queue_depth("transactionCheck2"), 0);

        let mut deliveries = broker.consume("transactionCheck2").await.unwrap();
        let delivery = deliveries.next().await.unwrap().unwrap();

        assert!(start.elapsed() >= Duration::from_millis(190));
        assert_eq!(
            delivery.message.header(X_DELAY_HEADER),
            Some(&HeaderValue::Int(200))
        );
        assert_eq!(delivery.message.payload, b"transactionId1");
    }

    #[tokio::test]
    async fn delayed_publish_requires_delayed_queue() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("plain").await.unwrap();
        let result = broker
            .publish_delayed("plain", Message::new("x"), Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(BrokerError::QueueNotFound(_))));
    }

    #[tokio::test]
    async fn injected_failures_are_transient_and_bounded() {
        let broker = InMemoryBroker::new();
        broker.declare_queue("job").await.unwrap();
        broker.fail_next_publishes(2);

        for _ in 0..2 {
            let err = broker.publish("job", Message::new("x")).await.unwrap_err();
            assert!(err.is_transient());
        }
        broker.publish("job", Message::new("x")).await.unwrap();
        assert_eq!(broker.queue_depth("job"), 1);
    }
}
