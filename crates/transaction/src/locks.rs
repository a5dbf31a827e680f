//! Per-`(participant, transaction)` mutual exclusion.
//!
//! Replay, commit and watchdog firing for the same pair serialize on one of
//! these locks. Different pairs never contend, and no process-wide lock is
//! held across I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use common::{ParticipantId, TransactionId};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type PairKey = (ParticipantId, TransactionId);

/// Table of async locks keyed by `(participant, transaction)`.
///
/// Entries are created on demand and dropped once no task holds or waits
/// for them, so the table only grows with in-flight work.
#[derive(Debug, Clone, Default)]
pub struct PairLocks {
    table: Arc<Mutex<HashMap<PairKey, Arc<AsyncMutex<()>>>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the pair is free and returns a guard holding it.
    pub async fn acquire(
        &self,
        participant_id: &ParticipantId,
        transaction_id: &TransactionId,
    ) -> PairGuard {
        let key = (participant_id.clone(), transaction_id.clone());
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(table.entry(key.clone()).or_default())
        };

        let guard = lock.lock_owned().await;
        PairGuard {
            guard: Some(guard),
            key: Some(key),
            table: Arc::clone(&self.table),
        }
    }

    /// Number of pairs currently locked or awaited.
    pub fn in_flight(&self) -> usize {
        self.table.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

/// Holds a pair lock until dropped.
#[derive(Debug)]
pub struct PairGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: Option<PairKey>,
    table: Arc<Mutex<HashMap<PairKey, Arc<AsyncMutex<()>>>>>,
}

impl Drop for PairGuard {
    fn drop(&mut self) {
        // Release first so the strong count below only sees waiters.
        drop(self.guard.take());

        let Some(key) = self.key.take() else {
            return;
        };
        let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(lock) = table.get(&key)
            && Arc::strong_count(lock) == 1
        {
            table.remove(&key);
        }
    }
}
