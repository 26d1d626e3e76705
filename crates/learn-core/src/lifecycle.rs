//! Lifecycle phases for a loaded game instance and the fixed transition table.
//!
//! The adjacency table is exhaustive: any transition not listed here is
//! illegal. The async manager that drives transitions and runs hooks lives in
//! the `runtime` crate; this module only answers "is this move legal".

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use thiserror::Error;

/// Governed stage of a loaded game instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GamePhase {
    Unloaded,
    Loading,
    Loaded,
    Initializing,
    Initialized,
    Starting,
    Running,
    Paused,
    Resuming,
    Completing,
    Completed,
    Error,
}

impl GamePhase {
    pub const ALL: [GamePhase; 12] = [
        GamePhase::Unloaded,
        GamePhase::Loading,
        GamePhase::Loaded,
        GamePhase::Initializing,
        GamePhase::Initialized,
        GamePhase::Starting,
        GamePhase::Running,
        GamePhase::Paused,
        GamePhase::Resuming,
        GamePhase::Completing,
        GamePhase::Completed,
        GamePhase::Error,
    ];

    /// Phases reachable from this one in a single transition.
    pub fn successors(self) -> &'static [GamePhase] {
        use GamePhase::*;
        match self {
            Unloaded => &[Loading],
            Loading => &[Loaded, Error],
            Loaded => &[Initializing, Unloaded],
            Initializing => &[Initialized, Error],
            Initialized => &[Starting, Unloaded],
            Starting => &[Running, Error],
            Running => &[Paused, Completing, Error],
            Paused => &[Resuming, Completing, Error],
            Resuming => &[Running, Error],
            Completing => &[Completed, Error],
            Completed => &[Unloaded],
            Error => &[Unloaded],
        }
    }

    /// True if `target` is a legal next phase.
    pub fn can_transition(self, target: GamePhase) -> bool {
        self.successors().contains(&target)
    }

    /// Terminal phases: the only way out is back to `Unloaded`.
    pub fn is_terminal(self) -> bool {
        matches!(self, GamePhase::Completed | GamePhase::Error)
    }
}

impl Default for GamePhase {
    fn default() -> Self {
        GamePhase::Unloaded
    }
}

/// Errors raised by lifecycle transition validation.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid phase transition {from} -> {to} for instance {instance}")]
    InvalidTransition {
        instance: String,
        from: GamePhase,
        to: GamePhase,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        use GamePhase::*;
        let path = [
            Unloaded,
            Loading,
            Loaded,
            Initializing,
            Initialized,
            Starting,
            Running,
            Paused,
            Resuming,
            Running,
            Completing,
            Completed,
            Unloaded,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        use GamePhase::*;
        assert!(!Unloaded.can_transition(Running));
        assert!(!Running.can_transition(Starting));
        assert!(!Completed.can_transition(Running));
        assert!(!Paused.can_transition(Paused));
        assert!(!Error.can_transition(Running));
    }

    #[test]
    fn terminal_phases_only_reach_unloaded() {
        for phase in [GamePhase::Completed, GamePhase::Error] {
            assert!(phase.is_terminal());
            assert_eq!(phase.successors(), &[GamePhase::Unloaded]);
        }
    }

    #[test]
    fn every_phase_has_successors_except_none() {
        for phase in GamePhase::ALL {
            assert!(!phase.successors().is_empty());
        }
    }
}
