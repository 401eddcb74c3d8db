//! Stage status enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a stage.
///
/// A stage moves `Pending -> Running -> {Succeeded | Failed}` when it runs,
/// or straight from `Pending` to `Succeeded` (already satisfied) or
/// `Blocked` (a dependency failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not started in this invocation.
    #[default]
    Pending,
    /// Stage commands are executing.
    Running,
    /// Stage completed successfully or was already satisfied.
    Succeeded,
    /// Stage failed or was interrupted.
    Failed,
    /// Stage was not executed because a dependency failed.
    Blocked,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Blocked)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Blocked)
    }

    /// Returns true if a stage in this status may move to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => matches!(next, Self::Succeeded | Self::Failed),
            Self::Succeeded | Self::Failed | Self::Blocked => false,
        }
    }
}
