//! The session state machine.
//!
//! Transitions are a total function of (current state, event): every pair
//! maps to a state, and pairs outside the legal transition table map to
//! `Failed`. No transition suspends; I/O happens before its event is sent.

use tracing::debug;

use super::types::{SessionEvent, SessionState};

/// Drives one session through its bounded set of states.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: SessionState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Initializing,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_failed(&self) -> bool {
        self.state == SessionState::Failed
    }

    /// Apply an event and return the new state.
    pub fn apply(&mut self, event: &SessionEvent) -> SessionState {
        use SessionEvent as E;
        use SessionState as S;

        let next = match (self.state, event) {
            (S::Initializing, E::HarLoaded) => S::AwaitingWorkflowSelection,
            (S::Initializing, E::LoadFailed { .. }) => S::Failed,
            (S::AwaitingWorkflowSelection, E::WorkflowSelected) => S::ProcessingDependencies,
            (S::ProcessingDependencies, E::NodeProcessed { ready: true, queue_empty: true }) => {
                S::ReadyForEmission
            }
            (S::ProcessingDependencies, E::NodeProcessed { .. }) => S::ProcessingDependencies,
            (S::ReadyForEmission, E::Emitted) => S::Emitted,
            (_, E::Failure { .. }) => S::Failed,
            // Everything else is an invariant violation.
            _ => S::Failed,
        };

        if next != self.state {
            debug!(from = %self.state, to = %next, "session state transition");
        }
        self.state = next;
        next
    }
}
