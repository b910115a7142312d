//! Structured error events accumulated in workflow state.
//!
//! Branch failures under `degrade-continue`, resilience exhaustion a node
//! chose to absorb, and engine-level faults all land here as
//! [`ErrorEvent`]s so a thread's error history travels with its
//! checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::telemetry::{FormatterMode, PlainFormatter, TelemetryFormatter};

/// An error event with scope, cause chain, tags, and free-form context.
///
/// # JSON form
///
/// ```json
/// {
///   "when": "2026-08-01T10:30:00Z",
///   "scope": { "scope": "node", "kind": "Custom:search", "step": 3 },
///   "error": { "message": "provider timed out", "cause": null, "details": {} },
///   "tags": ["retryable"],
///   "context": { "attempts": 3 }
/// }
/// ```
///
/// # Examples
///
/// ```
/// use loomflow::channels::errors::{ErrorEvent, Fault};
/// use serde_json::json;
///
/// let event = ErrorEvent::node("search", 3, Fault::msg("provider timed out"))
///     .with_tag("retryable")
///     .with_context(json!({"attempts": 3}));
/// assert_eq!(event.tags, vec!["retryable"]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ErrorEvent {
    #[serde(default = "chrono::Utc::now")]
    pub when: DateTime<Utc>,
    #[serde(default)]
    pub scope: ErrorScope,
    #[serde(default)]
    pub error: Fault,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl ErrorEvent {
    /// Create a node-scoped error event.
    pub fn node<S: Into<String>>(kind: S, step: u64, error: Fault) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Node {
                kind: kind.into(),
                step,
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    /// Create a branch-scoped error event (fan-out wave failures).
    pub fn branch<S: Into<String>>(entry: S, step: u64, error: Fault) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Branch {
                entry: entry.into(),
                step,
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    /// Create a thread-scoped error event (engine faults).
    pub fn thread<S: Into<String>>(thread: S, step: u64, error: Fault) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Thread {
                thread: thread.into(),
                step,
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    /// Create an app-scoped error event.
    pub fn app(error: Fault) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::App,
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    /// Add a single tag.
    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Replace the tag list.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Attach context metadata.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// Where in the system an error originated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ErrorScope {
    /// A node step function.
    Node { kind: String, step: u64 },
    /// A fan-out branch, identified by its entry node.
    Branch { entry: String, step: u64 },
    /// The engine, on behalf of a whole thread.
    Thread { thread: String, step: u64 },
    #[default]
    App,
}

/// Cause-chained error detail carried inside an [`ErrorEvent`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fault {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<Fault>>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Default for Fault {
    fn default() -> Self {
        Fault {
            message: String::new(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c as &dyn std::error::Error)
    }
}

impl Fault {
    pub fn msg<M: Into<String>>(m: M) -> Self {
        Fault {
            message: m.into(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_cause(mut self, cause: Fault) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

/// Format error events with explicit color mode control.
///
/// - [`FormatterMode::Auto`]: detects TTY capability on stderr
/// - [`FormatterMode::Colored`]: always emits ANSI codes
/// - [`FormatterMode::Plain`]: never emits ANSI codes
pub fn pretty_print_with_mode(events: &[ErrorEvent], mode: FormatterMode) -> String {
    let formatter = PlainFormatter::with_mode(mode);
    let renders = formatter.render_errors(events);
    let mut out = String::new();
    for (idx, render) in renders.into_iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        for line in render.lines {
            out.push_str(&line);
        }
    }
    out
}

/// Format error events as human-readable text, auto-detecting color.
pub fn pretty_print(events: &[ErrorEvent]) -> String {
    pretty_print_with_mode(events, FormatterMode::Auto)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_round_trip() {
        let event = ErrorEvent::node("search", 1, Fault::msg("boom").with_cause(Fault::msg("io")))
            .with_tag("retryable");
        let json = serde_json::to_string(&event).unwrap();
        let back: ErrorEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn plain_rendering_has_no_ansi() {
        let events = vec![ErrorEvent::node("parse", 1, Fault::msg("parse failed"))];
        let out = pretty_print_with_mode(&events, FormatterMode::Plain);
        assert!(out.contains("parse failed"));
        assert!(!out.contains("\x1b["));
    }
}
