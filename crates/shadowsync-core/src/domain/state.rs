//! Sync engine state machine

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a sync engine
///
/// Transitions:
/// - `InitialScan -> Active` when the first full pass completes
/// - `InitialScan | Active -> Failed` on fatal misconfiguration
///   (e.g. the root resolves to a file)
/// - `* -> Canceled` on user stop
///
/// `Failed` and `Canceled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// First full pass over the root is still in progress
    InitialScan,
    /// Steady state: notify-driven incremental reconciliation
    Active,
    /// Fatal error; the engine will not process further events
    Failed,
    /// Stopped by the user; cache operations and callbacks are inhibited
    Canceled,
}

impl SyncState {
    /// Returns whether the state admits no further transitions
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, SyncState::Failed | SyncState::Canceled)
    }

    /// Returns whether a transition to `next` is allowed
    #[must_use]
    pub const fn can_transition(self, next: SyncState) -> bool {
        match (self, next) {
            (_, SyncState::Canceled) => true,
            (SyncState::InitialScan, SyncState::Active) => true,
            (SyncState::InitialScan | SyncState::Active, SyncState::Failed) => true,
            _ => false,
        }
    }
}

impl Display for SyncState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::InitialScan => "initial_scan",
            SyncState::Active => "active",
            SyncState::Failed => "failed",
            SyncState::Canceled => "canceled",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_scan_to_active() {
        assert!(SyncState::InitialScan.can_transition(SyncState::Active));
    }

    #[test]
    fn test_failure_paths() {
        assert!(SyncState::InitialScan.can_transition(SyncState::Failed));
        assert!(SyncState::Active.can_transition(SyncState::Failed));
        assert!(!SyncState::Failed.can_transition(SyncState::Active));
    }

    #[test]
    fn test_cancel_from_anywhere() {
        for s in [
            SyncState::InitialScan,
            SyncState::Active,
            SyncState::Failed,
            SyncState::Canceled,
        ] {
            assert!(s.can_transition(SyncState::Canceled));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(SyncState::Failed.is_terminal());
        assert!(SyncState::Canceled.is_terminal());
        assert!(!SyncState::Active.is_terminal());
        assert!(!SyncState::InitialScan.is_terminal());
    }

    #[test]
    fn test_no_reverse_transition() {
        assert!(!SyncState::Active.can_transition(SyncState::InitialScan));
    }
}
