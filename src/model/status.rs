use serde::{Deserialize, Serialize};
use std::fmt;

/// Action lifecycle states.
///
/// Created as `Unpublished`, transitioned to `Pending` at enqueue,
/// `Processing` when a consumer claims the action, then terminal
/// `Completed` or `Failed`. The transition graph is monotonic; terminal
/// states admit no further writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Constructed locally, not yet enqueued
    Unpublished,
    /// Enqueued and awaiting a worker
    Pending,
    /// Claimed by a worker and executing
    Processing,
    /// Handler returned successfully
    Completed,
    /// Handler or dispatch failed
    Failed,
}

impl ActionStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check whether a transition to `target` follows the lifecycle graph.
    pub fn can_transition_to(&self, target: ActionStatus) -> bool {
        matches!(
            (self, target),
            (Self::Unpublished, Self::Pending)
                | (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl Default for ActionStatus {
    fn default() -> Self {
        Self::Unpublished
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unpublished => write!(f, "unpublished"),
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpublished" => Ok(Self::Unpublished),
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid action status: {s}")),
        }
    }
}
