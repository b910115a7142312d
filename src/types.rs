//! Core identity types for the Loomflow workflow framework.
//!
//! This module defines the fundamental vocabulary used to identify nodes
//! in workflow graphs. Runtime execution types (thread ids, statuses) live
//! in [`crate::runtimes::types`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a node within a workflow graph.
///
/// `NodeKind` serves as the unique identifier for nodes in the executable
/// plan. Three virtual terminals exist alongside user-registered nodes:
///
/// - [`Start`](Self::Start): entry marker, never executed.
/// - [`End`](Self::End): successful terminal, never executed.
/// - [`GiveUp`](Self::GiveUp): terminal reached when a loop guard trips,
///   never executed. A thread ending here reports `GaveUp` rather than
///   `Completed`.
///
/// # Persistence
///
/// `NodeKind` supports serde as well as a compact string form via
/// [`encode`](Self::encode)/[`decode`](Self::decode) used by the
/// checkpoint store.
///
/// # Examples
///
/// ```rust
/// use loomflow::types::NodeKind;
///
/// let fetch = NodeKind::Custom("fetch".to_string());
/// assert_eq!(fetch.encode(), "Custom:fetch");
/// assert_eq!(NodeKind::decode("Custom:fetch"), fetch);
/// assert_eq!(NodeKind::decode("GiveUp"), NodeKind::GiveUp);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Virtual entry point. The first edge of every graph leaves Start.
    Start,

    /// Virtual successful terminal. Threads arriving here complete.
    End,

    /// Virtual give-up terminal. Loop guards route here when their
    /// iteration budget is exhausted; threads arriving here end with
    /// `GaveUp` status instead of `Completed`.
    GiveUp,

    /// User-registered node identified by name. The name should be unique
    /// within the workflow; common patterns are verb-style step names
    /// ("plan", "search", "summarize").
    Custom(String),
}

impl NodeKind {
    /// Encode a NodeKind into its persisted string form.
    ///
    /// - `Start` → `"Start"`
    /// - `End` → `"End"`
    /// - `GiveUp` → `"GiveUp"`
    /// - `Custom("x")` → `"Custom:x"`
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            NodeKind::Start => "Start".to_string(),
            NodeKind::End => "End".to_string(),
            NodeKind::GiveUp => "GiveUp".to_string(),
            NodeKind::Custom(s) => format!("Custom:{s}"),
        }
    }

    /// Decode a persisted string form back into a NodeKind.
    ///
    /// Unknown formats fall back to `Custom(s)` for forward compatibility.
    pub fn decode(s: &str) -> Self {
        if s == "Start" {
            NodeKind::Start
        } else if s == "End" {
            NodeKind::End
        } else if s == "GiveUp" {
            NodeKind::GiveUp
        } else if let Some(rest) = s.strip_prefix("Custom:") {
            NodeKind::Custom(rest.to_string())
        } else {
            NodeKind::Custom(s.to_string())
        }
    }

    /// Returns `true` for any of the three virtual terminals/markers.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::Start | Self::End | Self::GiveUp)
    }

    /// Returns `true` if this node ends a thread (`End` or `GiveUp`).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::GiveUp)
    }

    /// Returns `true` if this is a user-registered node.
    #[must_use]
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::End => write!(f, "End"),
            Self::GiveUp => write!(f, "GiveUp"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

// Developer experience: allow string literals where a NodeKind is expected.
impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        match s {
            "Start" => NodeKind::Start,
            "End" => NodeKind::End,
            "GiveUp" => NodeKind::GiveUp,
            other => NodeKind::Custom(other.to_string()),
        }
    }
}
