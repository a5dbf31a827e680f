//! Replays or discards the compensation ledger of one transaction.

use std::sync::Arc;
use std::time::Instant;

use common::{ParticipantId, TransactionId};
use ledger::CompensationLedger;

use crate::error::{Result, TransactionError};
use crate::locks::{PairGuard, PairLocks};
use crate::registry::CompensationRegistry;

/// What a rollback run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every entry was reversed and the ledger removed.
    Compensated { entries: usize },

    /// No ledger existed; an earlier outcome already handled the pair.
    AlreadyResolved,
}

impl RunOutcome {
    pub fn is_compensated(&self) -> bool {
        matches!(self, RunOutcome::Compensated { .. })
    }
}

/// Executes compensation entries through the registered reversal handlers.
///
/// Runs for the same `(participant, transaction)` pair are mutually
/// exclusive; runs for different pairs proceed concurrently.
#[derive(Clone)]
pub struct CompensationRunner<L> {
    ledger: L,
    registry: Arc<CompensationRegistry>,
    locks: PairLocks,
}

impl<L> CompensationRunner<L>
where
    L: CompensationLedger,
{
    /// Creates a runner dispatching to the given registry.
    pub fn new(ledger: L, registry: CompensationRegistry) -> Self {
        Self {
            ledger,
            registry: Arc::new(registry),
            locks: PairLocks::new(),
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn registry(&self) -> &CompensationRegistry {
        &self.registry
    }

    /// Acquires the pair lock shared by rollback, commit and watchdog firing.
    pub async fn lock(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> PairGuard {
        self.locks.acquire(participant_id, transaction_id).await
    }

    /// Rolls back a transaction: reverses every entry newest first, then
    /// removes the ledger.
    ///
    /// On failure the ledger is kept so that a later run resumes. Calling
    /// `run` for an already resolved pair returns
    /// [`RunOutcome::AlreadyResolved`] without invoking any handler.
    #[tracing::instrument(skip_all, fields(%participant_id, %transaction_id))]
    pub async fn run(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> Result<RunOutcome> {
        let _guard = self.lock(participant_id, transaction_id).await;
        self.run_locked(participant_id, transaction_id).await
    }

    /// Commits a transaction by dropping its ledger without replaying it.
    ///
    /// Returns false if the ledger was already gone.
    #[tracing::instrument(skip_all, fields(%participant_id, %transaction_id))]
    pub async fn discard(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> Result<bool> {
        let _guard = self.lock(participant_id, transaction_id).await;
        let removed = self.ledger.remove(participant_id, transaction_id).await?;
        if removed {
            tracing::info!("compensations discarded on commit");
        } else {
            tracing::debug!("commit for already resolved transaction");
        }
        Ok(removed)
    }

    /// Body of [`run`](Self::run); the caller must hold the pair lock.
    pub(crate) async fn run_locked(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> Result<RunOutcome> {
        let entries = self
            .ledger
            .entries_for(participant_id, transaction_id)
            .await?;
        if entries.is_empty() {
            tracing::debug!("no ledger, rollback is a no-op");
            metrics::counter!("compensation_runs_total", "result" => "noop").increment(1);
            return Ok(RunOutcome::AlreadyResolved);
        }

        // Fail fast before any reversal runs.
        if let Some(entry) = entries.iter().find(|e| !self.registry.contains(&e.action)) {
            tracing::error!(action = %entry.action, "no compensation handler registered");
            metrics::counter!("compensation_runs_total", "result" => "unregistered").increment(1);
            return Err(TransactionError::UnregisteredAction {
                action: entry.action.clone(),
                transaction_id: transaction_id.clone(),
            });
        }

        let start = Instant::now();
        for entry in &entries {
            let handler = self.registry.get(&entry.action).ok_or_else(|| {
                TransactionError::UnregisteredAction {
                    action: entry.action.clone(),
                    transaction_id: transaction_id.clone(),
                }
            })?;

            tracing::info!(
                sequence = %entry.sequence,
                action = %entry.action,
                target_id = %entry.target_id,
                "compensating"
            );
            if let Err(e) = handler.compensate(entry).await {
                tracing::error!(
                    sequence = %entry.sequence,
                    action = %entry.action,
                    error = %e,
                    "compensation failed, ledger retained"
                );
                metrics::counter!("compensation_failures_total").increment(1);
                metrics::counter!("compensation_runs_total", "result" => "failed").increment(1);
                return Err(TransactionError::CompensationFailed {
                    participant_id: participant_id.clone(),
                    transaction_id: transaction_id.clone(),
                    action: entry.action.clone(),
                    sequence: entry.sequence,
                    reason: e.to_string(),
                });
            }
            metrics::counter!("compensations_executed_total").increment(1);
        }

        self.ledger.remove(participant_id, transaction_id).await?;

        metrics::counter!("compensation_runs_total", "result" => "compensated").increment(1);
        metrics::histogram!("compensation_run_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        tracing::info!(entries = entries.len(), "transaction rolled back");

        Ok(RunOutcome::Compensated {
            entries: entries.len(),
        })
    }
}
