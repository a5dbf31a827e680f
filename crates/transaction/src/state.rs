//! Watchdog state machine.

use serde::{Deserialize, Serialize};

/// The state of a watchdog for one `(participant, transaction)` pair.
///
/// State transitions:
/// ```text
/// Armed ──┬──► Resolved   (ledger already gone when the delayed message arrives)
///         └──► Fired      (ledger still present; rollback forced)
/// ```
///
/// There is no cancel message. A watchdog counts as resolved once the
/// ledger it guards has been removed by an explicit outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WatchdogState {
    /// A delayed message is in flight.
    #[default]
    Armed,

    /// An outcome was applied before the delayed message fired (terminal state).
    Resolved,

    /// The delayed message found an open ledger and rolled it back (terminal state).
    Fired,
}

impl WatchdogState {
    /// Returns true if the delayed message may still force a rollback.
    pub fn can_fire(&self) -> bool {
        matches!(self, WatchdogState::Armed)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatchdogState::Resolved | WatchdogState::Fired)
    }

    /// State reached when the delayed message is delivered.
    pub fn on_delivery(self, ledger_exists: bool) -> Self {
        match (self, ledger_exists) {
            (WatchdogState::Armed, true) => WatchdogState::Fired,
            (WatchdogState::Armed, false) => WatchdogState::Resolved,
            (terminal, _) => terminal,
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchdogState::Armed => "Armed",
            WatchdogState::Resolved => "Resolved",
            WatchdogState::Fired => "Fired",
        }
    }
}

impl std::fmt::Display for WatchdogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_armed() {
        assert_eq!(WatchdogState::default(), WatchdogState::Armed);
    }

    #[test]
    fn test_can_fire() {
        assert!(WatchdogState::Armed.can_fire());
        assert!(!WatchdogState::Resolved.can_fire());
        assert!(!WatchdogState::Fired.can_fire());
    }

    #[test]
    fn test_is_terminal() {
        assert!(!WatchdogState::Armed.is_terminal());
        assert!(WatchdogState::Resolved.is_terminal());
        assert!(WatchdogState::Fired.is_terminal());
    }

    #[test]
    fn test_delivery_with_open_ledger_fires() {
        assert_eq!(WatchdogState::Armed.on_delivery(true), WatchdogState::Fired);
    }

    #[test]
    fn test_delivery_without_ledger_resolves() {
        assert_eq!(
            WatchdogState::Armed.on_delivery(false),
            WatchdogState::Resolved
        );
    }

    #[test]
    fn test_terminal_states_absorb_deliveries() {
        assert_eq!(
            WatchdogState::Fired.on_delivery(true),
            WatchdogState::Fired
        );
        assert_eq!(
            WatchdogState::Resolved.on_delivery(true),
            WatchdogState::Resolved
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(WatchdogState::Armed.to_string(), "Armed");
        assert_eq!(WatchdogState::Fired.to_string(), "Fired");
    }
}
