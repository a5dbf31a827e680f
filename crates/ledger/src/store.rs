use async_trait::async_trait;

use crate::{CompensationEntry, ParticipantId, Result, SequenceNumber, TransactionId};

/// Core trait for compensation ledger implementations.
///
/// A ledger is keyed by `(participant, transaction)`. It is created by the
/// first append and disappears when removed; all mutation is atomic per key.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait CompensationLedger: Send + Sync {
    /// Appends an entry and returns the sequence number assigned to it.
    ///
    /// The entry must be durable before this returns: callers treat a
    /// failed append as a failed local write.
    async fn append(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
        action: &str,
        target_id: &str,
        payload: serde_json::Value,
    ) -> Result<SequenceNumber>;

    /// Retrieves every entry of the ledger, highest sequence first.
    ///
    /// Returns an empty vector when no ledger exists.
    async fn entries_for(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> Result<Vec<CompensationEntry>>;

    /// Deletes the ledger.
    ///
    /// Removing an absent ledger is a no-op. Returns true if entries were
    /// actually deleted.
    async fn remove(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> Result<bool>;

    /// Checks whether a ledger exists (has at least one entry).
    async fn exists(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> Result<bool>;

    /// Lists the transactions that still have a ledger for this participant.
    async fn open_transactions(&self, participant_id: &ParticipantId)
    -> Result<Vec<TransactionId>>;
}
