//! Long-lived consumer task with acknowledge-after-effect semantics.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::{Broker, Delivery, Message, RetryPolicy};

/// Processes one consumed message.
///
/// The delivery is acknowledged only after `handle` returns `Ok`, so a crash
/// between receipt and effect leaves the message on the queue.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    type Error: std::fmt::Display + Send;

    async fn handle(&self, message: &Message) -> Result<(), Self::Error>;
}

/// Spawns a task consuming `queue` until aborted.
///
/// When the delivery stream fails or ends (connection loss), the task
/// re-subscribes with the policy's backoff. A failed first delivery is
/// requeued once; a failed redelivery is rejected and logged.
pub fn spawn_consumer<B, H>(
    broker: Arc<B>,
    queue: String,
    handler: Arc<H>,
    policy: RetryPolicy,
) -> JoinHandle<()>
where
    B: Broker + ?Sized + 'static,
    H: DeliveryHandler,
{
    tokio::spawn(async move {
        let mut failures: u32 = 0;
        loop {
            match broker.consume(&queue).await {
                Ok(mut deliveries) => {
                    tracing::debug!(%queue, "consumer attached");
                    failures = 0;
                    while let Some(next) = deliveries.next().await {
                        match next {
                            Ok(delivery) => settle(handler.as_ref(), &queue, delivery).await,
                            Err(e) => {
                                tracing::warn!(%queue, error = %e, "delivery stream failed");
                                break;
                            }
                        }
                    }
                    tracing::warn!(%queue, "delivery stream ended, re-subscribing");
                }
                Err(e) => {
                    tracing::warn!(%queue, error = %e, "failed to start consumer");
                }
            }

            failures = failures.saturating_add(1);
            tokio::time::sleep(policy.delay_for(failures)).await;
        }
    })
}

async fn settle<H: DeliveryHandler>(handler: &H, queue: &str, delivery: Delivery) {
    match handler.handle(&delivery.message).await {
        Ok(()) => {
            if let Err(e) = delivery.ack().await {
                tracing::warn!(%queue, error = %e, "failed to acknowledge delivery");
            }
        }
        Err(e) => {
            let requeue = !delivery.redelivered;
            tracing::error!(
                %queue,
                error = %e,
                redelivered = delivery.redelivered,
                requeue,
                "message handler failed"
            );
            metrics::counter!("broker_handler_failures_total").increment(1);
            if let Err(e) = delivery.nack(requeue).await {
                tracing::warn!(%queue, error = %e, "failed to reject delivery");
            }
        }
    }
}
