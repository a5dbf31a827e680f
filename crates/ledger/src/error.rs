use thiserror::Error;

use crate::{ParticipantId, TransactionId};

/// Errors that can occur when reading or writing the compensation ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Concurrent appends kept colliding on the next sequence number.
    #[error(
        "Sequence conflict for {participant_id}/{transaction_id} after {attempts} attempts"
    )]
    SequenceConflict {
        participant_id: ParticipantId,
        transaction_id: TransactionId,
        attempts: u32,
    },

    /// The backing store refused the operation.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
