//! Compensating transactions over a message broker.
//!
//! Participants record one compensation per reversible local write. The
//! orchestrator later publishes commit or rollback on the
//! [`TransactionBus`]; each participant then discards or replays its ledger
//! through the [`CompensationRunner`]. A [`DelayedWatchdog`] rolls back
//! transactions whose outcome never arrives.
//!
//! Delivery is at-least-once everywhere. Every path treats a missing ledger
//! as "already resolved", which makes duplicate outcomes and late watchdog
//! messages harmless.

pub mod bus;
pub mod coordinator;
pub mod error;
pub mod locks;
pub mod messages;
pub mod participant;
pub mod registry;
pub mod runner;
pub mod state;
pub mod watchdog;

pub use bus::{OutcomeHandler, TransactionBus, outcome_queue};
pub use coordinator::{Transaction, TransactionCoordinator};
pub use error::{Result, TransactionError};
pub use locks::{PairGuard, PairLocks};
pub use messages::{OutcomeAction, OutcomeMessage, TRANSACTION_ID_HEADER, WatchdogMessage};
pub use participant::{Participant, ParticipantConfig, ParticipantHandle};
pub use registry::{
    CompensationHandler, CompensationRegistry, HandlerError, HandlerFn, HandlerResult, handler_fn,
};
pub use runner::{CompensationRunner, RunOutcome};
pub use state::WatchdogState;
pub use watchdog::{DelayedWatchdog, WatchdogArm, WatchdogConfig};
