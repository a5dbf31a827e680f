//! Delayed-delivery watchdog for transactions that never get an outcome.
//!
//! Arming publishes a [`WatchdogMessage`] to the participant's delayed queue.
//! The broker holds it for the configured interval; when it is delivered,
//! [`DelayedWatchdog::fire`] rolls the transaction back if its ledger still
//! exists. Ledger absence is the only cancellation signal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker::{Broker, DeliveryHandler, Message, RetryPolicy, retry, spawn_consumer};
use common::{ParticipantId, TransactionId};
use ledger::CompensationLedger;
use tokio::task::JoinHandle;

use crate::bus::TransactionBus;
use crate::error::{Result, TransactionError};
use crate::messages::WatchdogMessage;
use crate::runner::{CompensationRunner, RunOutcome};
use crate::state::WatchdogState;

/// Watchdog timing and queue naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// How long the broker holds a watchdog message before delivering it.
    pub interval: Duration,
    /// Prefix of the per-participant delayed queue.
    pub queue_prefix: String,
}

impl Default for WatchdogConfig {
    /// Default: 500ms on `transactionCheck.<participant>`
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            queue_prefix: "transactionCheck".to_string(),
        }
    }
}

impl WatchdogConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Delayed queue consumed by the given participant.
    pub fn queue_for(&self, participant_id: &ParticipantId) -> String {
        format!("{}.{}", self.queue_prefix, participant_id)
    }
}

/// Publishing side: arms watchdogs.
pub struct WatchdogArm<B: ?Sized> {
    broker: Arc<B>,
    config: WatchdogConfig,
    policy: RetryPolicy,
}

impl<B: ?Sized> Clone for WatchdogArm<B> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            config: self.config.clone(),
            policy: self.policy,
        }
    }
}

impl<B> WatchdogArm<B>
where
    B: Broker + ?Sized,
{
    pub fn new(broker: Arc<B>, config: WatchdogConfig) -> Self {
        Self {
            broker,
            config,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Schedules a check of `(participant, transaction)` after the interval.
    #[tracing::instrument(skip(self), fields(interval_ms = self.config.interval.as_millis() as u64))]
    pub async fn arm(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> Result<()> {
        let queue = self.config.queue_for(participant_id);
        let message =
            WatchdogMessage::new(participant_id.clone(), transaction_id.clone()).to_message()?;

        retry(self.policy, || {
            let message = message.clone();
            let queue = queue.as_str();
            async move {
                self.broker.declare_delayed_queue(queue).await?;
                self.broker
                    .publish_delayed(queue, message, self.config.interval)
                    .await
            }
        })
        .await?;

        metrics::counter!("watchdog_armed_total").increment(1);
        tracing::debug!(%queue, "watchdog armed");
        Ok(())
    }
}

/// Consuming side: fires watchdogs for one participant.
pub struct DelayedWatchdog<L, B: ?Sized> {
    participant_id: ParticipantId,
    runner: CompensationRunner<L>,
    broker: Arc<B>,
    arm: WatchdogArm<B>,
    bus: Option<TransactionBus<B>>,
    config: WatchdogConfig,
    policy: RetryPolicy,
}

impl<L: Clone, B: ?Sized> Clone for DelayedWatchdog<L, B> {
    fn clone(&self) -> Self {
        Self {
            participant_id: self.participant_id.clone(),
            runner: self.runner.clone(),
            broker: Arc::clone(&self.broker),
            arm: self.arm.clone(),
            bus: self.bus.clone(),
            config: self.config.clone(),
            policy: self.policy,
        }
    }
}

impl<L, B> DelayedWatchdog<L, B>
where
    L: CompensationLedger + Clone + 'static,
    B: Broker + ?Sized + 'static,
{
    /// Creates a watchdog sharing the runner (and so the pair locks) of the
    /// participant's outcome path.
    pub fn new(
        participant_id: ParticipantId,
        runner: CompensationRunner<L>,
        broker: Arc<B>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            participant_id,
            runner,
            arm: WatchdogArm::new(Arc::clone(&broker), config.clone()),
            broker,
            bus: None,
            config,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.arm = self.arm.with_retry_policy(policy);
        self.policy = policy;
        self
    }

    /// Stops tracking the outcome of a transaction once the watchdog settles it.
    pub fn with_bus(mut self, bus: TransactionBus<B>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Handles a delivered watchdog message for this participant.
    ///
    /// The existence check and the rollback run under the pair lock, so a
    /// concurrent commit or rollback either completes first (the watchdog
    /// resolves) or waits for the forced rollback (and becomes a no-op).
    #[tracing::instrument(skip(self), fields(participant_id = %self.participant_id))]
    pub async fn fire(&self, transaction_id: &TransactionId) -> Result<WatchdogState> {
        let _guard = self.runner.lock(&self.participant_id, transaction_id).await;

        let exists = self
            .runner
            .ledger()
            .exists(&self.participant_id, transaction_id)
            .await?;
        let state = WatchdogState::Armed.on_delivery(exists);
        if state == WatchdogState::Resolved {
            self.settled(transaction_id, state);
            tracing::debug!("watchdog expired after outcome, nothing to do");
            return Ok(state);
        }

        tracing::warn!("no outcome received in time, forcing rollback");
        let outcome = self
            .runner
            .run_locked(&self.participant_id, transaction_id)
            .await?;
        let state = match outcome {
            RunOutcome::AlreadyResolved => WatchdogState::Resolved,
            RunOutcome::Compensated { .. } => state,
        };
        self.settled(transaction_id, state);
        Ok(state)
    }

    /// Fires the watchdog; a rollback that fails for a reason other than a
    /// missing handler is retried one interval later.
    pub async fn fire_or_rearm(&self, transaction_id: &TransactionId) -> Result<()> {
        match self.fire(transaction_id).await {
            Ok(_) => Ok(()),
            Err(e @ TransactionError::UnregisteredAction { .. }) => Err(e),
            Err(e) => {
                tracing::warn!(%transaction_id, error = %e, "forced rollback failed, re-arming watchdog");
                self.arm.arm(&self.participant_id, transaction_id).await?;
                metrics::counter!("watchdog_rearmed_total").increment(1);
                Ok(())
            }
        }
    }

    fn settled(&self, transaction_id: &TransactionId, state: WatchdogState) {
        match state {
            WatchdogState::Fired => metrics::counter!("watchdog_fired_total").increment(1),
            _ => metrics::counter!("watchdog_resolved_total").increment(1),
        }
        if let Some(bus) = &self.bus {
            bus.forget(&self.participant_id, transaction_id);
        }
    }

    /// Declares the delayed queue and spawns its consumer.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        let queue = self.config.queue_for(&self.participant_id);
        retry(self.policy, || self.broker.declare_delayed_queue(&queue)).await?;

        tracing::info!(%queue, "watchdog consumer started");
        Ok(spawn_consumer(
            Arc::clone(&self.broker),
            queue,
            Arc::new(WatchdogDelivery {
                watchdog: self.clone(),
            }),
            self.policy,
        ))
    }
}

struct WatchdogDelivery<L, B: ?Sized> {
    watchdog: DelayedWatchdog<L, B>,
}

#[async_trait]
impl<L, B> DeliveryHandler for WatchdogDelivery<L, B>
where
    L: CompensationLedger + Clone + 'static,
    B: Broker + ?Sized + 'static,
{
    type Error = TransactionError;

    async fn handle(&self, message: &Message) -> Result<()> {
        let check = match WatchdogMessage::from_message(message) {
            Ok(check) => check,
            Err(e) => {
                tracing::error!(error = %e, "dropping undecodable watchdog message");
                return Ok(());
            }
        };
        if check.participant_id != self.watchdog.participant_id {
            tracing::warn!(
                expected = %self.watchdog.participant_id,
                received = %check.participant_id,
                "dropping watchdog message for another participant"
            );
            return Ok(());
        }

        self.watchdog.fire_or_rearm(&check.transaction_id).await
    }
}
