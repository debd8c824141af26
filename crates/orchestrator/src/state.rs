//! Saga lifecycle states.

use serde::{Deserialize, Serialize};

/// Where a saga is in its lifecycle.
///
/// ```text
/// NotStarted ──► Running ──┬──────────────────► Committed
///                          └──► Compensating ──► Aborted
/// ```
///
/// Terminal states are never stored: the engine destroys the in-memory
/// instance at the moment it becomes terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Built and registered, first command not yet emitted.
    #[default]
    NotStarted,

    /// Awaiting the outcome of the current step.
    Running,

    /// An error outcome arrived; compensations are being emitted.
    Compensating,

    /// Every step's success outcome was consumed (terminal).
    Committed,

    /// Compensation sweep finished after a failure (terminal).
    Aborted,
}

impl SagaState {
    /// Returns true once the saga cannot make further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Committed | SagaState::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "NotStarted",
            SagaState::Running => "Running",
            SagaState::Compensating => "Compensating",
            SagaState::Committed => "Committed",
            SagaState::Aborted => "Aborted",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
