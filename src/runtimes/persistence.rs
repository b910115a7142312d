/*!
Persistence models for checkpoints and the administrative export/import
surface.

Design goals:
- Explicit serde-friendly structs decoupled from in-memory types.
- Conversion logic localized here (From / into_* helpers) so backend code
  stays lean and declarative.
- Forward compatibility: unknown `NodeKind` encodings round-trip as
  `NodeKind::Custom(encoded)`; fields missing from the current schema are
  dropped on restore, fields missing from the payload fall back to
  schema defaults.

No I/O happens in this module; it is pure data transformation.
*/

use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::channels::errors::ErrorEvent;
use crate::channels::{Channel, ErrorsChannel};
use crate::runtimes::checkpointer::Checkpoint;
use crate::runtimes::types::ThreadStatus;
use crate::state::{StateSchema, VersionedState};
use crate::types::NodeKind;

/// One persisted state field: name, value, channel version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedField {
    pub name: String,
    pub value: Value,
    pub version: u32,
}

/// Persisted error log with version metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedErrors {
    pub version: u32,
    #[serde(default)]
    pub events: Vec<ErrorEvent>,
}

impl Default for PersistedErrors {
    fn default() -> Self {
        Self {
            version: 1,
            events: Vec::new(),
        }
    }
}

/// Complete persisted shape of a `VersionedState`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedState {
    /// Fields in schema declaration order.
    pub fields: Vec<PersistedField>,
    #[serde(default)]
    pub errors: PersistedErrors,
}

impl From<&VersionedState> for PersistedState {
    fn from(state: &VersionedState) -> Self {
        PersistedState {
            fields: state
                .to_parts()
                .into_iter()
                .map(|(name, value, version)| PersistedField {
                    name,
                    value,
                    version,
                })
                .collect(),
            errors: PersistedErrors {
                version: state.errors.version(),
                events: state.errors.snapshot(),
            },
        }
    }
}

impl PersistedState {
    /// Rebuild a live state against the current schema.
    pub fn into_state(self, schema: Arc<StateSchema>) -> VersionedState {
        let values: FxHashMap<String, (Value, u32)> = self
            .fields
            .into_iter()
            .map(|field| (field.name, (field.value, field.version)))
            .collect();
        let errors = ErrorsChannel::new(self.errors.events, self.errors.version);
        VersionedState::from_parts(schema, values, errors)
    }
}

/// Full persisted checkpoint representation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedCheckpoint {
    pub thread_id: String,
    pub sequence: u64,
    pub step: u64,
    pub status: ThreadStatus,
    /// Encoded via `NodeKind::encode()`.
    pub next_node: String,
    pub state: PersistedState,
    /// RFC3339 creation time (keeps `chrono::DateTime` out of the wire
    /// shape).
    pub created_at: String,
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub forked_from: Option<String>,
}

impl From<&Checkpoint> for PersistedCheckpoint {
    fn from(cp: &Checkpoint) -> Self {
        PersistedCheckpoint {
            thread_id: cp.thread_id.clone(),
            sequence: cp.sequence,
            step: cp.step,
            status: cp.status,
            next_node: cp.next_node.encode(),
            state: PersistedState::from(&cp.state),
            created_at: cp.created_at.to_rfc3339(),
            importance: cp.importance,
            owner: cp.owner.clone(),
            forked_from: cp.forked_from.clone(),
        }
    }
}

impl PersistedCheckpoint {
    /// Rebuild a live checkpoint against the current schema.
    pub fn into_checkpoint(self, schema: Arc<StateSchema>) -> Checkpoint {
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Checkpoint {
            thread_id: self.thread_id,
            sequence: self.sequence,
            state: self.state.into_state(schema),
            next_node: NodeKind::decode(&self.next_node),
            status: self.status,
            step: self.step,
            created_at,
            importance: self.importance,
            owner: self.owner,
            forked_from: self.forked_from,
        }
    }
}

/// Portable document for the administrative export/import surface.
///
/// Exporting wraps a thread's latest checkpoint; importing forks it
/// under a new thread id with provenance pointing at the source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortableThread {
    pub thread_id: String,
    pub exported_at: String,
    pub checkpoint: PersistedCheckpoint,
}

impl PortableThread {
    pub fn new(checkpoint: &Checkpoint) -> Self {
        Self {
            thread_id: checkpoint.thread_id.clone(),
            exported_at: Utc::now().to_rfc3339(),
            checkpoint: PersistedCheckpoint::from(checkpoint),
        }
    }
}

/// Serialization errors for persistence models.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("missing field: {0}")]
    #[diagnostic(code(loomflow::persistence::missing_field))]
    MissingField(&'static str),

    #[error("JSON serialization/deserialization failed: {source}")]
    #[diagnostic(
        code(loomflow::persistence::serde),
        help("Ensure the JSON structure matches the Persisted* types.")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },

    #[error("persistence error: {0}")]
    #[diagnostic(code(loomflow::persistence::other))]
    Other(String),
}

impl From<serde_json::Error> for PersistenceError {
    fn from(source: serde_json::Error) -> Self {
        PersistenceError::Serde { source }
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducers::MergePolicy;
    use serde_json::json;

    fn schema() -> StateSchema {
        StateSchema::new()
            .field("topic", MergePolicy::Replace)
            .field("results", MergePolicy::Append)
    }

    #[test]
    fn state_round_trip() {
        let state = VersionedState::builder(schema())
            .with_value("topic", json!("persistence"))
            .with_value("results", json!(["a"]))
            .build();
        let persisted = PersistedState::from(&state);
        let restored = persisted.into_state(state.schema().clone());
        assert_eq!(state, restored);
    }

    #[test]
    fn checkpoint_round_trip() {
        let state = VersionedState::new(Arc::new(schema()));
        let checkpoint = Checkpoint::draft(
            "t1",
            state,
            NodeKind::Custom("search".into()),
            ThreadStatus::Running,
            3,
        )
        .with_importance(0.7)
        .with_owner(Some("alice".to_string()));

        let persisted = PersistedCheckpoint::from(&checkpoint);
        let json = serde_json::to_string(&persisted).unwrap();
        let parsed: PersistedCheckpoint = serde_json::from_str(&json).unwrap();
        let restored = parsed.into_checkpoint(checkpoint.state.schema().clone());

        assert_eq!(restored.thread_id, "t1");
        assert_eq!(restored.next_node, NodeKind::Custom("search".into()));
        assert_eq!(restored.status, ThreadStatus::Running);
        assert_eq!(restored.step, 3);
        assert_eq!(restored.importance, 0.7);
        assert_eq!(restored.owner.as_deref(), Some("alice"));
    }
}
