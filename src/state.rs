//! Versioned workflow state: a schema of named fields, each with its own
//! merge policy and version counter, plus a dedicated error log.
//!
//! # Core types
//!
//! - [`StateSchema`] / [`FieldSpec`]: the ordered declaration of fields and
//!   their [`MergePolicy`](crate::reducers::MergePolicy)s
//! - [`VersionedState`]: the live container mutated only through reducer
//!   application at merge barriers
//! - [`StateSnapshot`]: the immutable view handed to nodes and routers
//!
//! # Examples
//!
//! ```rust
//! use loomflow::reducers::MergePolicy;
//! use loomflow::state::{StateSchema, VersionedState};
//! use serde_json::json;
//!
//! let schema = StateSchema::new()
//!     .field("topic", MergePolicy::Replace)
//!     .field("results", MergePolicy::Append)
//!     .field("success_count", MergePolicy::Sum);
//!
//! let state = VersionedState::builder(schema)
//!     .with_value("topic", json!("rust workflows"))
//!     .build();
//!
//! let snapshot = state.snapshot();
//! assert_eq!(snapshot.field("topic"), Some(&json!("rust workflows")));
//! assert_eq!(snapshot.field("results"), Some(&serde_json::Value::Null));
//! ```

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::channels::errors::ErrorEvent;
use crate::channels::{Channel, ErrorsChannel, FieldChannel};
use crate::reducers::MergePolicy;

/// Declaration of a single state field.
#[derive(Clone, Debug)]
pub struct FieldSpec {
    /// Field name, unique within the schema.
    pub name: String,
    /// Merge strategy applied when the field receives an update.
    pub policy: MergePolicy,
    /// Initial value at thread start. Defaults to `Null`, which `append`
    /// and `sum` treat as empty/zero.
    pub default: Value,
}

/// Ordered set of field declarations.
///
/// The schema is fixed at graph build time; the compiler uses it both to
/// construct the reducer registry and to run the concurrent-write
/// conflict analysis over fan-out branches.
#[derive(Clone, Debug, Default)]
pub struct StateSchema {
    fields: Vec<FieldSpec>,
}

impl StateSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field with a `Null` default.
    #[must_use]
    pub fn field(self, name: impl Into<String>, policy: MergePolicy) -> Self {
        self.field_with_default(name, policy, Value::Null)
    }

    /// Declare a field with an explicit initial value.
    #[must_use]
    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        policy: MergePolicy,
        default: Value,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            policy,
            default,
        });
        self
    }

    /// Declared fields in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Look up a field declaration by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    /// Whether a field is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// The live state container for one workflow thread.
///
/// Fields are mutated exclusively through reducer application at merge
/// barriers; nodes only ever see [`StateSnapshot`]s. Each field carries a
/// version counter bumped by the barrier when its content changed, which
/// persistence uses for change detection.
#[derive(Clone, Debug)]
pub struct VersionedState {
    schema: Arc<StateSchema>,
    fields: FxHashMap<String, FieldChannel>,
    /// Accumulated error events (branch failures under degrade-continue,
    /// absorbed resilience exhaustion, engine faults).
    pub errors: ErrorsChannel,
}

impl VersionedState {
    /// Create a state with every schema field at its default value.
    #[must_use]
    pub fn new(schema: Arc<StateSchema>) -> Self {
        let mut fields = FxHashMap::default();
        for spec in schema.fields() {
            fields.insert(spec.name.clone(), FieldChannel::new(spec.default.clone(), 1));
        }
        Self {
            schema,
            fields,
            errors: ErrorsChannel::default(),
        }
    }

    /// Fluent construction with seeded initial values.
    #[must_use]
    pub fn builder(schema: StateSchema) -> VersionedStateBuilder {
        VersionedStateBuilder {
            state: Self::new(Arc::new(schema)),
        }
    }

    /// The schema this state was created from.
    pub fn schema(&self) -> &Arc<StateSchema> {
        &self.schema
    }

    /// Borrow a field channel.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldChannel> {
        self.fields.get(name)
    }

    /// Mutable access for reducers and the merge barrier.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldChannel> {
        self.fields.get_mut(name)
    }

    /// Create an immutable snapshot of the current state.
    ///
    /// Clones every field value, so cost is proportional to state size;
    /// the engine takes one snapshot per node execution.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        let mut fields = FxHashMap::default();
        let mut versions = FxHashMap::default();
        for (name, channel) in &self.fields {
            fields.insert(name.clone(), channel.snapshot());
            versions.insert(name.clone(), channel.version());
        }
        StateSnapshot {
            fields,
            versions,
            errors: self.errors.snapshot(),
            errors_version: self.errors.version(),
        }
    }

    /// Restore from persisted parts. Fields absent from `values` fall back
    /// to schema defaults; fields absent from the schema are dropped.
    #[must_use]
    pub fn from_parts(
        schema: Arc<StateSchema>,
        values: FxHashMap<String, (Value, u32)>,
        errors: ErrorsChannel,
    ) -> Self {
        let mut state = Self::new(schema);
        for (name, (value, version)) in values {
            if let Some(channel) = state.fields.get_mut(&name) {
                *channel = FieldChannel::new(value, version);
            }
        }
        state.errors = errors;
        state
    }

    /// Field values and versions in schema declaration order, for
    /// persistence.
    #[must_use]
    pub fn to_parts(&self) -> Vec<(String, Value, u32)> {
        self.schema
            .fields()
            .iter()
            .filter_map(|spec| {
                self.fields
                    .get(&spec.name)
                    .map(|ch| (spec.name.clone(), ch.snapshot(), ch.version()))
            })
            .collect()
    }
}

impl PartialEq for VersionedState {
    fn eq(&self, other: &Self) -> bool {
        self.to_parts() == other.to_parts() && self.errors == other.errors
    }
}

/// Immutable view of state handed to nodes and routers.
#[derive(Clone, Debug, Default)]
pub struct StateSnapshot {
    fields: FxHashMap<String, Value>,
    versions: FxHashMap<String, u32>,
    /// Error events at snapshot time.
    pub errors: Vec<ErrorEvent>,
    /// Errors channel version at snapshot time.
    pub errors_version: u32,
}

impl StateSnapshot {
    /// Value of a field, if declared.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Version of a field's channel at snapshot time.
    #[must_use]
    pub fn field_version(&self, name: &str) -> Option<u32> {
        self.versions.get(name).copied()
    }

    /// Integer convenience accessor (`Null` reads as 0, matching the
    /// `sum` reducer's treatment of unset counters).
    #[must_use]
    pub fn field_i64(&self, name: &str) -> i64 {
        match self.fields.get(name) {
            Some(Value::Null) | None => 0,
            Some(v) => v.as_i64().unwrap_or(0),
        }
    }

    /// Array-length convenience accessor (`Null` reads as empty).
    #[must_use]
    pub fn field_len(&self, name: &str) -> usize {
        self.fields
            .get(name)
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0)
    }

    /// All field values.
    pub fn fields(&self) -> &FxHashMap<String, Value> {
        &self.fields
    }

    /// Overlay extra field values (used to scope a task descriptor's
    /// input into a branch's view without touching shared state).
    #[must_use]
    pub fn overlaid(mut self, overlay: &FxHashMap<String, Value>) -> Self {
        for (k, v) in overlay {
            self.fields.insert(k.clone(), v.clone());
        }
        self
    }
}

/// Builder for seeding initial state values.
#[derive(Debug)]
pub struct VersionedStateBuilder {
    state: VersionedState,
}

impl VersionedStateBuilder {
    /// Seed an initial value for a declared field. Seeding an undeclared
    /// field is ignored; declarations belong on the schema.
    #[must_use]
    pub fn with_value(mut self, name: &str, value: Value) -> Self {
        if let Some(channel) = self.state.field_mut(name) {
            *channel.get_mut() = value;
        } else {
            tracing::warn!(field = name, "ignoring seed for undeclared field");
        }
        self
    }

    #[must_use]
    pub fn build(self) -> VersionedState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> StateSchema {
        StateSchema::new()
            .field("topic", MergePolicy::Replace)
            .field_with_default("results", MergePolicy::Append, json!([]))
            .field("count", MergePolicy::Sum)
    }

    #[test]
    fn defaults_and_seeding() {
        let state = VersionedState::builder(schema())
            .with_value("topic", json!("graphs"))
            .build();
        let snap = state.snapshot();
        assert_eq!(snap.field("topic"), Some(&json!("graphs")));
        assert_eq!(snap.field("results"), Some(&json!([])));
        assert_eq!(snap.field_i64("count"), 0);
    }

    #[test]
    fn snapshot_is_independent() {
        let mut state = VersionedState::new(Arc::new(schema()));
        let snap = state.snapshot();
        *state.field_mut("topic").unwrap().get_mut() = json!("changed");
        assert_eq!(snap.field("topic"), Some(&Value::Null));
    }

    #[test]
    fn parts_round_trip() {
        let state = VersionedState::builder(schema())
            .with_value("results", json!(["a", "b"]))
            .build();
        let schema = state.schema().clone();
        let parts: FxHashMap<String, (Value, u32)> = state
            .to_parts()
            .into_iter()
            .map(|(name, value, version)| (name, (value, version)))
            .collect();
        let restored = VersionedState::from_parts(schema, parts, state.errors.clone());
        assert_eq!(state, restored);
    }

    #[test]
    fn overlay_scopes_branch_input() {
        let state = VersionedState::new(Arc::new(schema()));
        let mut overlay = FxHashMap::default();
        overlay.insert("topic".to_string(), json!("branch-only"));
        let snap = state.snapshot().overlaid(&overlay);
        assert_eq!(snap.field("topic"), Some(&json!("branch-only")));
        // Shared state remains untouched.
        assert_eq!(state.snapshot().field("topic"), Some(&Value::Null));
    }
}
