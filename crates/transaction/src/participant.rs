//! Participant-side wiring of bus, runner and watchdog.

use std::sync::Arc;

use async_trait::async_trait;
use broker::{Broker, RetryPolicy};
use common::{ParticipantId, TransactionId};
use ledger::{CompensationLedger, SequenceNumber};
use tokio::task::JoinHandle;

use crate::bus::{OutcomeHandler, TransactionBus};
use crate::error::Result;
use crate::messages::{OutcomeAction, OutcomeMessage};
use crate::registry::CompensationRegistry;
use crate::runner::CompensationRunner;
use crate::watchdog::{DelayedWatchdog, WatchdogArm, WatchdogConfig};

/// Participant tuning.
#[derive(Debug, Clone)]
pub struct ParticipantConfig {
    pub watchdog: WatchdogConfig,
    pub retry: RetryPolicy,
    /// Arm a watchdog when the first compensation of a transaction is recorded.
    pub arm_on_first_entry: bool,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            watchdog: WatchdogConfig::default(),
            retry: RetryPolicy::default(),
            arm_on_first_entry: true,
        }
    }
}

/// One service taking part in compensating transactions.
///
/// Route handlers call [`observe`](Self::observe) when a request carries a
/// transaction id and [`record`](Self::record) after each successful local
/// write. [`start`](Self::start) attaches the outcome and watchdog
/// consumers, which apply commit or rollback to the recorded entries.
pub struct Participant<L, B: ?Sized> {
    id: ParticipantId,
    ledger: L,
    runner: CompensationRunner<L>,
    bus: TransactionBus<B>,
    arm: WatchdogArm<B>,
    watchdog: DelayedWatchdog<L, B>,
    arm_on_first_entry: bool,
}

impl<L: Clone, B: ?Sized> Clone for Participant<L, B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            ledger: self.ledger.clone(),
            runner: self.runner.clone(),
            bus: self.bus.clone(),
            arm: self.arm.clone(),
            watchdog: self.watchdog.clone(),
            arm_on_first_entry: self.arm_on_first_entry,
        }
    }
}

impl<L, B> Participant<L, B>
where
    L: CompensationLedger + Clone + 'static,
    B: Broker + ?Sized + 'static,
{
    /// Creates a participant with the default watchdog interval and retry policy.
    pub fn new(
        id: impl Into<ParticipantId>,
        ledger: L,
        broker: Arc<B>,
        registry: CompensationRegistry,
    ) -> Self {
        Self::with_config(id, ledger, broker, registry, ParticipantConfig::default())
    }

    pub fn with_config(
        id: impl Into<ParticipantId>,
        ledger: L,
        broker: Arc<B>,
        registry: CompensationRegistry,
        config: ParticipantConfig,
    ) -> Self {
        let id = id.into();
        let runner = CompensationRunner::new(ledger.clone(), registry);
        let bus = TransactionBus::new(Arc::clone(&broker)).with_retry_policy(config.retry);
        let arm = WatchdogArm::new(Arc::clone(&broker), config.watchdog.clone())
            .with_retry_policy(config.retry);
        let watchdog = DelayedWatchdog::new(id.clone(), runner.clone(), broker, config.watchdog)
            .with_retry_policy(config.retry)
            .with_bus(bus.clone());

        Self {
            id,
            ledger,
            runner,
            bus,
            arm,
            watchdog,
            arm_on_first_entry: config.arm_on_first_entry,
        }
    }

    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn runner(&self) -> &CompensationRunner<L> {
        &self.runner
    }

    pub fn bus(&self) -> &TransactionBus<B> {
        &self.bus
    }

    pub fn watchdog(&self) -> &DelayedWatchdog<L, B> {
        &self.watchdog
    }

    /// Registers interest in the outcome of a transaction seen on a request.
    pub async fn observe(&self, transaction_id: &TransactionId) -> Result<()> {
        self.bus.listen(&self.id, transaction_id).await
    }

    /// Records the reversal of a local write that just succeeded.
    ///
    /// The first entry of a transaction also arms its watchdog. A failed
    /// append is returned to the caller, who must treat the write as failed.
    #[tracing::instrument(skip_all, fields(participant_id = %self.id, %transaction_id, %action))]
    pub async fn record(
        &self,
        transaction_id: &TransactionId,
        action: &str,
        target_id: &str,
        payload: serde_json::Value,
    ) -> Result<SequenceNumber> {
        let sequence = self
            .ledger
            .append(&self.id, transaction_id, action, target_id, payload)
            .await?;
        tracing::debug!(%sequence, "compensation recorded");

        if sequence.is_first() && self.arm_on_first_entry {
            // The entry is durable; a later recover() re-arms if this fails.
            if let Err(e) = self.arm.arm(&self.id, transaction_id).await {
                tracing::error!(error = %e, "failed to arm watchdog");
            }
        }
        Ok(sequence)
    }

    /// Applies a commit or rollback decision. Repeated outcomes are no-ops.
    #[tracing::instrument(skip(self), fields(participant_id = %self.id))]
    pub async fn handle_outcome(&self, outcome: &OutcomeMessage) -> Result<()> {
        match outcome.action {
            OutcomeAction::Commit => {
                self.runner.discard(&self.id, &outcome.id).await?;
            }
            OutcomeAction::Rollback => {
                self.runner.run(&self.id, &outcome.id).await?;
            }
        }
        self.bus.forget(&self.id, &outcome.id);
        metrics::counter!("outcomes_handled_total", "action" => outcome.action.as_str())
            .increment(1);
        Ok(())
    }

    /// Attaches the outcome and watchdog consumers.
    pub async fn start(&self) -> Result<ParticipantHandle> {
        let outcomes = self.bus.on_outcome(&self.id, Arc::new(self.clone())).await?;
        let watchdog = match self.watchdog.start().await {
            Ok(handle) => handle,
            Err(e) => {
                outcomes.abort();
                return Err(e);
            }
        };

        tracing::info!(participant_id = %self.id, "participant started");
        Ok(ParticipantHandle { outcomes, watchdog })
    }

    /// Re-arms watchdogs for ledgers left open by a previous process.
    ///
    /// Returns the number of transactions re-armed.
    #[tracing::instrument(skip(self), fields(participant_id = %self.id))]
    pub async fn recover(&self) -> Result<usize> {
        let open = self.ledger.open_transactions(&self.id).await?;
        for transaction_id in &open {
            self.bus.listen(&self.id, transaction_id).await?;
            self.arm.arm(&self.id, transaction_id).await?;
        }
        if !open.is_empty() {
            tracing::info!(count = open.len(), "re-armed watchdogs for open transactions");
        }
        Ok(open.len())
    }
}

#[async_trait]
impl<L, B> OutcomeHandler for Participant<L, B>
where
    L: CompensationLedger + Clone + 'static,
    B: Broker + ?Sized + 'static,
{
    async fn on_outcome(&self, outcome: OutcomeMessage) -> Result<()> {
        self.handle_outcome(&outcome).await
    }
}

/// Consumer tasks of a started participant.
#[derive(Debug)]
pub struct ParticipantHandle {
    outcomes: JoinHandle<()>,
    watchdog: JoinHandle<()>,
}

impl ParticipantHandle {
    pub fn is_running(&self) -> bool {
        !self.outcomes.is_finished() && !self.watchdog.is_finished()
    }

    /// Stops both consumers. Unacknowledged deliveries go back to the broker.
    pub fn shutdown(self) {
        self.outcomes.abort();
        self.watchdog.abort();
    }
}
