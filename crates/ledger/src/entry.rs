use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ParticipantId, TransactionId};

/// Position of an entry within one `(participant, transaction)` ledger.
///
/// Sequence numbers start at 1 for the first entry and increment by 1 for
/// each subsequent append. They are the only ordering authority for replay.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(i64);

impl SequenceNumber {
    /// Creates a sequence number from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the sequence (0) of a ledger that has no entries yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the sequence (1) assigned to the first entry.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next sequence number.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true if this is the first entry of its ledger.
    pub fn is_first(&self) -> bool {
        self.0 == 1
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SequenceNumber {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<SequenceNumber> for i64 {
    fn from(sequence: SequenceNumber) -> Self {
        sequence.0
    }
}

/// One pending compensation: enough information to reverse a local write.
///
/// Entries are write-once. They are appended and later removed together with
/// the rest of their ledger, never modified in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationEntry {
    /// Participant that performed the original write.
    pub participant_id: ParticipantId,

    /// Saga run the write belongs to.
    pub transaction_id: TransactionId,

    /// Replay position, assigned at append time.
    pub sequence: SequenceNumber,

    /// Name of the registered reversal (e.g. "create", "update", "delete").
    pub action: String,

    /// Identifier of the record the write touched.
    pub target_id: String,

    /// State needed to reverse the write (pre-update snapshot, deleted record, ...).
    pub payload: serde_json::Value,

    /// When the entry was appended.
    pub recorded_at: DateTime<Utc>,
}

impl CompensationEntry {
    /// Deserializes the payload into a concrete type.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Sorts entries newest first, the order in which they are compensated.
pub(crate) fn sort_for_replay(entries: &mut [CompensationEntry]) {
    entries.sort_by(|a, b| b.sequence.cmp(&a.sequence));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sequence: i64, action: &str) -> CompensationEntry {
        CompensationEntry {
            participant_id: ParticipantId::new("job"),
            transaction_id: TransactionId::from("tx-1"),
            sequence: SequenceNumber::new(sequence),
            action: action.to_string(),
            target_id: "42".to_string(),
            payload: serde_json::json!({"publishingDate": "2024-01-01"}),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn sequence_ordering() {
        let s1 = SequenceNumber::new(1);
        let s2 = SequenceNumber::new(2);
        assert!(s1 < s2);
        assert_eq!(s1.next(), s2);
    }

    #[test]
    fn sequence_initial_and_first() {
        assert_eq!(SequenceNumber::initial().as_i64(), 0);
        assert_eq!(SequenceNumber::initial().next(), SequenceNumber::first());
        assert!(SequenceNumber::first().is_first());
        assert!(!SequenceNumber::new(2).is_first());
    }

    #[test]
    fn replay_order_is_descending() {
        let mut entries = vec![entry(2, "update"), entry(1, "create"), entry(3, "delete")];
        sort_for_replay(&mut entries);

        let order: Vec<i64> = entries.iter().map(|e| e.sequence.as_i64()).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn payload_as_decodes_snapshot() {
        #[derive(Deserialize)]
        struct Snapshot {
            #[serde(rename = "publishingDate")]
            publishing_date: String,
        }

        let snapshot: Snapshot = entry(1, "update").payload_as().unwrap();
        assert_eq!(snapshot.publishing_date, "2024-01-01");
    }
}
