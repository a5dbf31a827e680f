//! Commit/rollback signalling between the orchestrator and participants.
//!
//! Each participant owns one durable queue named after its id. Outcomes for
//! every transaction the participant joined arrive on that queue and are
//! handed to a long-lived [`OutcomeHandler`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use broker::{Broker, DeliveryHandler, Message, RetryPolicy, retry, spawn_consumer};
use common::{ParticipantId, TransactionId};
use tokio::task::JoinHandle;

use crate::error::{Result, TransactionError};
use crate::messages::{OutcomeAction, OutcomeMessage};

/// Receives outcomes consumed from a participant's queue.
///
/// Delivery is at-least-once: implementations must treat a repeated
/// outcome for the same transaction as a no-op. Returning an error leaves
/// the message for one redelivery.
#[async_trait]
pub trait OutcomeHandler: Send + Sync + 'static {
    async fn on_outcome(&self, outcome: OutcomeMessage) -> Result<()>;
}

type ListenKey = (ParticipantId, TransactionId);

/// Queue carrying outcomes addressed to a participant.
pub fn outcome_queue(participant_id: &ParticipantId) -> String {
    participant_id.to_string()
}

/// Publish/subscribe of transaction outcomes over a [`Broker`].
pub struct TransactionBus<B: ?Sized> {
    broker: Arc<B>,
    policy: RetryPolicy,
    listening: Arc<Mutex<HashSet<ListenKey>>>,
}

impl<B: ?Sized> Clone for TransactionBus<B> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            policy: self.policy,
            listening: Arc::clone(&self.listening),
        }
    }
}

impl<B> TransactionBus<B>
where
    B: Broker + ?Sized + 'static,
{
    pub fn new(broker: Arc<B>) -> Self {
        Self {
            broker,
            policy: RetryPolicy::default(),
            listening: Arc::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    /// Makes sure an outcome for `(participant, transaction)` published from
    /// now on is retained until this process consumes it.
    #[tracing::instrument(skip(self))]
    pub async fn listen(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> Result<()> {
        let key = (participant_id.clone(), transaction_id.clone());
        if self.is_listening(participant_id, transaction_id) {
            return Ok(());
        }

        let queue = outcome_queue(participant_id);
        retry(self.policy, || self.broker.declare_queue(&queue)).await?;

        self.listening
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key);
        tracing::debug!("listening for outcome");
        Ok(())
    }

    /// Returns true while an outcome for the pair is still awaited.
    pub fn is_listening(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> bool {
        self.listening
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&(participant_id.clone(), transaction_id.clone()))
    }

    /// Stops tracking a pair once its outcome has been applied.
    pub fn forget(&self, participant_id: &ParticipantId, transaction_id: &TransactionId) {
        self.listening
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&(participant_id.clone(), transaction_id.clone()));
    }

    /// Spawns the consumer delivering every outcome for `participant_id`
    /// to `handler`.
    pub async fn on_outcome<H>(
        &self,
        participant_id: &ParticipantId,
        handler: Arc<H>,
    ) -> Result<JoinHandle<()>>
    where
        H: OutcomeHandler,
    {
        let queue = outcome_queue(participant_id);
        retry(self.policy, || self.broker.declare_queue(&queue)).await?;

        tracing::info!(%queue, "outcome consumer started");
        Ok(spawn_consumer(
            Arc::clone(&self.broker),
            queue,
            Arc::new(OutcomeDelivery { handler }),
            self.policy,
        ))
    }

    /// Sends one commit or rollback decision to a participant.
    ///
    /// Transient broker failures are retried with the same message; the
    /// error is returned once the retry policy is exhausted.
    #[tracing::instrument(skip(self))]
    pub async fn publish_outcome(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
        action: OutcomeAction,
    ) -> Result<()> {
        let queue = outcome_queue(participant_id);
        let message = OutcomeMessage {
            id: transaction_id.clone(),
            action,
        }
        .to_message()?;

        retry(self.policy, || {
            let message = message.clone();
            let queue = queue.as_str();
            async move {
                self.broker.declare_queue(queue).await?;
                self.broker.publish(queue, message).await
            }
        })
        .await?;

        metrics::counter!("outcomes_published_total", "action" => action.as_str()).increment(1);
        tracing::info!("outcome published");
        Ok(())
    }
}

struct OutcomeDelivery<H> {
    handler: Arc<H>,
}

#[async_trait]
impl<H: OutcomeHandler> DeliveryHandler for OutcomeDelivery<H> {
    type Error = TransactionError;

    async fn handle(&self, message: &Message) -> Result<()> {
        match OutcomeMessage::from_message(message) {
            Ok(outcome) => self.handler.on_outcome(outcome).await,
            Err(e) => {
                tracing::error!(error = %e, "dropping undecodable outcome message");
                Ok(())
            }
        }
    }
}
