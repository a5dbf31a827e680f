//! Transaction layer error types.

use broker::BrokerError;
use common::{ParticipantId, TransactionId};
use ledger::{LedgerError, SequenceNumber};
use thiserror::Error;

/// Errors that can occur while signalling outcomes or compensating.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// A ledger entry names an action with no registered reversal.
    ///
    /// This is a configuration error; the ledger is kept for diagnosis.
    #[error("No compensation handler registered for action '{action}' (transaction {transaction_id})")]
    UnregisteredAction {
        action: String,
        transaction_id: TransactionId,
    },

    /// A reversal handler failed; the ledger is kept so the run can resume.
    #[error("Compensation '{action}' #{sequence} for {participant_id}/{transaction_id} failed: {reason}")]
    CompensationFailed {
        participant_id: ParticipantId,
        transaction_id: TransactionId,
        action: String,
        sequence: SequenceNumber,
        reason: String,
    },

    /// A consumed message could not be interpreted.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Broker error.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Ledger error.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransactionError {
    /// Returns true if the failure may clear up on its own (broker hiccup).
    pub fn is_transient(&self) -> bool {
        matches!(self, TransactionError::Broker(e) if e.is_transient())
    }
}

/// Convenience type alias for transaction results.
pub type Result<T> = std::result::Result<T, TransactionError>;
