use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::entry::sort_for_replay;
use crate::{
    CompensationEntry, LedgerError, ParticipantId, Result, SequenceNumber, TransactionId,
    store::CompensationLedger,
};

type LedgerKey = (ParticipantId, TransactionId);

/// In-memory compensation ledger for testing and single-process setups.
///
/// Provides the same interface as the PostgreSQL implementation but loses
/// its contents on restart.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    ledgers: Arc<RwLock<HashMap<LedgerKey, Vec<CompensationEntry>>>>,
    fail_on_append: Arc<AtomicBool>,
}

impl InMemoryLedger {
    /// Creates a new empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent appends fail as if the backing store were down.
    pub fn set_fail_on_append(&self, fail: bool) {
        self.fail_on_append.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of open ledgers across all participants.
    pub async fn ledger_count(&self) -> usize {
        self.ledgers.read().await.len()
    }

    /// Clears every ledger.
    pub async fn clear(&self) {
        self.ledgers.write().await.clear();
    }
}

#[async_trait]
impl CompensationLedger for InMemoryLedger {
    async fn append(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
        action: &str,
        target_id: &str,
        payload: serde_json::Value,
    ) -> Result<SequenceNumber> {
        if self.fail_on_append.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable(
                "in-memory ledger configured to fail".to_string(),
            ));
        }

        let mut ledgers = self.ledgers.write().await;
        let entries = ledgers
            .entry((participant_id.clone(), transaction_id.clone()))
            .or_default();

        let sequence = entries
            .iter()
            .map(|e| e.sequence)
            .max()
            .unwrap_or(SequenceNumber::initial())
            .next();

        entries.push(CompensationEntry {
            participant_id: participant_id.clone(),
            transaction_id: transaction_id.clone(),
            sequence,
            action: action.to_string(),
            target_id: target_id.to_string(),
            payload,
            recorded_at: Utc::now(),
        });

        metrics::counter!("compensations_appended_total").increment(1);
        Ok(sequence)
    }

    async fn entries_for(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> Result<Vec<CompensationEntry>> {
        let ledgers = self.ledgers.read().await;
        let mut entries = ledgers
            .get(&(participant_id.clone(), transaction_id.clone()))
            .cloned()
            .unwrap_or_default();
        sort_for_replay(&mut entries);
        Ok(entries)
    }

    async fn remove(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> Result<bool> {
        let mut ledgers = self.ledgers.write().await;
        Ok(ledgers
            .remove(&(participant_id.clone(), transaction_id.clone()))
            .is_some())
    }

    async fn exists(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> Result<bool> {
        let ledgers = self.ledgers.read().await;
        Ok(ledgers
            .get(&(participant_id.clone(), transaction_id.clone()))
            .is_some_and(|entries| !entries.is_empty()))
    }

    async fn open_transactions(
        &self,
        participant_id: &ParticipantId,
    ) -> Result<Vec<TransactionId>> {
        let ledgers = self.ledgers.read().await;
        let mut open: Vec<TransactionId> = ledgers
            .keys()
            .filter(|(participant, _)| participant == participant_id)
            .map(|(_, transaction)| transaction.clone())
            .collect();
        open.sort();
        Ok(open)
    }
}
