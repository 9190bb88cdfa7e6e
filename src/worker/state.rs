//! Stream worker state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a stream worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Compiling the rule and opening broker resources.
    Starting,
    /// Consuming messages.
    Running,
    /// Stop observed, closing broker resources.
    Stopping,
    /// Exited after a stop request.
    Stopped,
    /// Exited on a configuration or broker error.
    Failed,
}

impl WorkerState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, target),
            (Starting, Running) | (Starting, Stopping) | (Starting, Failed) |
            (Running, Stopping) | (Running, Failed) |
            (Stopping, Stopped) | (Stopping, Failed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A state transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: WorkerState,
    pub to: WorkerState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

impl StateTransition {
    pub fn new(from: WorkerState, to: WorkerState, reason: Option<String>) -> Self {
        Self {
            from,
            to,
            timestamp: Utc::now(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        use WorkerState::*;
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
    }

    #[test]
    fn terminal_states_are_final() {
        use WorkerState::*;
        for target in [Starting, Running, Stopping, Stopped, Failed] {
            assert!(!Stopped.can_transition_to(target));
            assert!(!Failed.can_transition_to(target));
        }
        assert!(Stopped.is_terminal());
        assert!(Failed.is_terminal());
        assert!(Running.is_active());
    }

    #[test]
    fn cannot_skip_stopping() {
        assert!(!WorkerState::Running.can_transition_to(WorkerState::Stopped));
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&WorkerState::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(WorkerState::Failed.to_string(), "failed");
    }
}
