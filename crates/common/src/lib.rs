//! Identifiers shared by every crate of the compensating-transaction system.

pub mod types;

pub use types::{ParticipantId, TransactionId};
