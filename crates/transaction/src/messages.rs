//! Wire messages exchanged over the broker.

use broker::Message;
use chrono::{DateTime, Utc};
use common::{ParticipantId, TransactionId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransactionError};

/// HTTP header carrying the transaction id on requests to participants.
pub const TRANSACTION_ID_HEADER: &str = "transaction_id";

/// Final decision for a transaction, as sent to each participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeAction {
    /// Keep the local writes; discard the compensations.
    #[serde(rename = "c")]
    Commit,

    /// Undo the local writes by replaying the compensations.
    #[serde(rename = "r")]
    Rollback,
}

impl OutcomeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeAction::Commit => "c",
            OutcomeAction::Rollback => "r",
        }
    }
}

impl std::fmt::Display for OutcomeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{ "id": <transactionId>, "action": "c" | "r" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeMessage {
    pub id: TransactionId,
    pub action: OutcomeAction,
}

impl OutcomeMessage {
    pub fn commit(id: TransactionId) -> Self {
        Self {
            id,
            action: OutcomeAction::Commit,
        }
    }

    pub fn rollback(id: TransactionId) -> Self {
        Self {
            id,
            action: OutcomeAction::Rollback,
        }
    }

    /// Encodes the outcome as a JSON broker message.
    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::json(self)?)
    }

    /// Decodes an outcome from a consumed broker message.
    pub fn from_message(message: &Message) -> Result<Self> {
        serde_json::from_slice(&message.payload)
            .map_err(|e| TransactionError::MalformedMessage(format!("outcome: {e}")))
    }
}

/// Delayed message asking a participant to check whether a transaction
/// was ever resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogMessage {
    pub transaction_id: TransactionId,
    pub participant_id: ParticipantId,
    pub armed_at: DateTime<Utc>,
}

impl WatchdogMessage {
    pub fn new(participant_id: ParticipantId, transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            participant_id,
            armed_at: Utc::now(),
        }
    }

    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::json(self)?)
    }

    pub fn from_message(message: &Message) -> Result<Self> {
        serde_json::from_slice(&message.payload)
            .map_err(|e| TransactionError::MalformedMessage(format!("watchdog: {e}")))
    }
}
