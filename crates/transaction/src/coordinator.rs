//! Orchestrator-side helper for opening and finishing transactions.

use std::sync::Arc;

use broker::{Broker, RetryPolicy};
use common::{ParticipantId, TransactionId};

use crate::bus::TransactionBus;
use crate::error::{Result, TransactionError};
use crate::messages::OutcomeAction;
use crate::watchdog::{WatchdogArm, WatchdogConfig};

/// A transaction in progress: its id and the participants it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: TransactionId,
    participants: Vec<ParticipantId>,
}

impl Transaction {
    fn new() -> Self {
        Self {
            id: TransactionId::new(),
            participants: Vec::new(),
        }
    }

    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    /// Participants in enlistment order.
    pub fn participants(&self) -> &[ParticipantId] {
        &self.participants
    }

    fn add(&mut self, participant_id: ParticipantId) -> bool {
        if self.participants.contains(&participant_id) {
            return false;
        }
        self.participants.push(participant_id);
        true
    }
}

/// Starts transactions and publishes their outcome to every participant.
///
/// The coordinator only signals. It decides nothing; the caller sequences
/// the participant requests and picks commit or rollback.
pub struct TransactionCoordinator<B: ?Sized> {
    bus: TransactionBus<B>,
    watchdog: Option<WatchdogArm<B>>,
}

impl<B> TransactionCoordinator<B>
where
    B: Broker + ?Sized + 'static,
{
    pub fn new(broker: Arc<B>) -> Self {
        Self {
            bus: TransactionBus::new(broker),
            watchdog: None,
        }
    }

    /// Also arms a watchdog for each participant as it is enlisted.
    pub fn with_watchdog(mut self, config: WatchdogConfig) -> Self {
        self.watchdog = Some(WatchdogArm::new(Arc::clone(self.bus.broker()), config));
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.bus = self.bus.with_retry_policy(policy);
        self.watchdog = self.watchdog.map(|arm| arm.with_retry_policy(policy));
        self
    }

    /// Opens a transaction with a fresh id.
    pub fn begin(&self) -> Transaction {
        let transaction = Transaction::new();
        tracing::info!(transaction_id = %transaction.id, "transaction started");
        transaction
    }

    /// Adds a participant; enlisting the same participant twice is a no-op.
    #[tracing::instrument(skip(self, transaction), fields(transaction_id = %transaction.id))]
    pub async fn enlist(
        &self,
        transaction: &mut Transaction,
        participant_id: impl Into<ParticipantId> + std::fmt::Debug,
    ) -> Result<()> {
        let participant_id = participant_id.into();
        if !transaction.add(participant_id.clone()) {
            return Ok(());
        }
        if let Some(arm) = &self.watchdog {
            arm.arm(&participant_id, &transaction.id).await?;
        }
        Ok(())
    }

    /// Tells every participant to keep its writes.
    pub async fn commit(&self, transaction: &Transaction) -> Result<()> {
        self.finish(transaction, OutcomeAction::Commit).await
    }

    /// Tells every participant to compensate its writes.
    pub async fn rollback(&self, transaction: &Transaction) -> Result<()> {
        self.finish(transaction, OutcomeAction::Rollback).await
    }

    /// Publishes to every participant even if one of them fails, then
    /// reports the first failure.
    #[tracing::instrument(skip(self, transaction), fields(transaction_id = %transaction.id))]
    async fn finish(&self, transaction: &Transaction, action: OutcomeAction) -> Result<()> {
        let mut first_error: Option<TransactionError> = None;
        for participant_id in &transaction.participants {
            if let Err(e) = self
                .bus
                .publish_outcome(participant_id, &transaction.id, action)
                .await
            {
                tracing::error!(%participant_id, error = %e, "failed to publish outcome");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!(
                    participants = transaction.participants.len(),
                    "transaction finished"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::InMemoryBroker;
    use std::time::Duration;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_begin_generates_unique_ids() {
        let coordinator = TransactionCoordinator::new(Arc::new(InMemoryBroker::new()));
        let a = coordinator.begin();
        let b = coordinator.begin();
        assert_ne!(a.id(), b.id());
        assert!(a.participants().is_empty());
    }

    #[tokio::test]
    async fn test_enlist_deduplicates() {
        let coordinator = TransactionCoordinator::new(Arc::new(InMemoryBroker::new()));
        let mut transaction = coordinator.begin();
        coordinator.enlist(&mut transaction, "job").await.unwrap();
        coordinator.enlist(&mut transaction, "event").await.unwrap();
        coordinator.enlist(&mut transaction, "job").await.unwrap();

        assert_eq!(
            transaction.participants(),
            &[ParticipantId::new("job"), ParticipantId::new("event")]
        );
    }

    #[tokio::test]
    async fn test_commit_publishes_to_every_participant() {
        let broker = Arc::new(InMemoryBroker::new());
        let coordinator = TransactionCoordinator::new(Arc::clone(&broker));
        let mut transaction = coordinator.begin();
        coordinator.enlist(&mut transaction, "job").await.unwrap();
        coordinator.enlist(&mut transaction, "event").await.unwrap();

        coordinator.commit(&transaction).await.unwrap();

        assert_eq!(broker.queue_depth("job"), 1);
        assert_eq!(broker.queue_depth("event"), 1);
    }

    #[tokio::test]
    async fn test_enlist_arms_watchdog_when_configured() {
        let broker = Arc::new(InMemoryBroker::new());
        let coordinator = TransactionCoordinator::new(Arc::clone(&broker))
            .with_watchdog(WatchdogConfig::default());
        let mut transaction = coordinator.begin();
        coordinator.enlist(&mut transaction, "job").await.unwrap();

        assert!(broker.has_queue("transactionCheck.job"));
    }

    #[tokio::test]
    async fn test_rollback_retries_through_transient_failures() {
        let broker = Arc::new(InMemoryBroker::new());
        let coordinator =
            TransactionCoordinator::new(Arc::clone(&broker)).with_retry_policy(fast());
        let mut transaction = coordinator.begin();
        coordinator.enlist(&mut transaction, "job").await.unwrap();

        broker.fail_next_publishes(3);
        coordinator.rollback(&transaction).await.unwrap();
        assert_eq!(broker.queue_depth("job"), 1);
    }

    #[tokio::test]
    async fn test_failure_for_one_participant_does_not_skip_others() {
        let broker = Arc::new(InMemoryBroker::new());
        let coordinator = TransactionCoordinator::new(Arc::clone(&broker))
            .with_retry_policy(RetryPolicy::none());
        let mut transaction = coordinator.begin();
        coordinator.enlist(&mut transaction, "job").await.unwrap();
        coordinator.enlist(&mut transaction, "event").await.unwrap();

        broker.fail_next_publishes(1);
        let result = coordinator.rollback(&transaction).await;

        assert!(result.is_err());
        assert_eq!(broker.queue_depth("job"), 0);
        assert_eq!(broker.queue_depth("event"), 1);
    }
}
