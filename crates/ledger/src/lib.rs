//! Durable record of pending compensations.
//!
//! Every participant appends one [`CompensationEntry`] per reversible local
//! write. Entries for a `(participant, transaction)` pair are replayed newest
//! first on rollback and dropped as a whole on commit.

pub mod entry;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{ParticipantId, TransactionId};
pub use entry::{CompensationEntry, SequenceNumber};
pub use error::{LedgerError, Result};
pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use store::CompensationLedger;
