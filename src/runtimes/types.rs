//! Runtime execution types: thread identity and lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a workflow thread (a durable, resumable execution).
pub type ThreadId = String;

/// Lifecycle state of a workflow thread.
///
/// Transitions: `Running → (AwaitingExternal | ParallelJoin)* →
/// Completed | Failed | GaveUp`. The suspension states are informational
/// snapshots of where a running thread is blocked; the three terminal
/// states are final.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    /// Actively interpreting nodes.
    Running,
    /// Suspended inside a node awaiting the external collaborator.
    AwaitingExternal,
    /// Suspended at a fan-out barrier waiting for branches to finish.
    ParallelJoin,
    /// Reached `End`.
    Completed,
    /// A fatal error aborted the thread; its last good checkpoint is
    /// retained.
    Failed,
    /// A loop guard exhausted its iteration budget and routed to the
    /// give-up terminal.
    GaveUp,
}

impl ThreadStatus {
    /// Whether the thread can make further progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::GaveUp)
    }
}

impl std::str::FromStr for ThreadStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "awaiting_external" => Ok(Self::AwaitingExternal),
            "parallel_join" => Ok(Self::ParallelJoin),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "gave_up" => Ok(Self::GaveUp),
            other => Err(format!("unknown thread status: {other}")),
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Running => "running",
            Self::AwaitingExternal => "awaiting_external",
            Self::ParallelJoin => "parallel_join",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::GaveUp => "gave_up",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(ThreadStatus::Completed.is_terminal());
        assert!(ThreadStatus::Failed.is_terminal());
        assert!(ThreadStatus::GaveUp.is_terminal());
        assert!(!ThreadStatus::Running.is_terminal());
        assert!(!ThreadStatus::ParallelJoin.is_terminal());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ThreadStatus::AwaitingExternal).unwrap();
        assert_eq!(json, "\"awaiting_external\"");
    }
}
