//! Field-to-reducer dispatch built from a state schema.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::instrument;

use crate::channels::Channel;
use crate::node::NodePartial;
use crate::state::{StateSchema, VersionedState};

use super::{Reducer, ReducerError};

/// Maps each declared field to the reducer implementing its merge policy.
///
/// Built once at graph compile time from the [`StateSchema`]; the engine
/// applies it at every merge barrier. Writes to fields missing from the
/// schema are rejected rather than silently inserted.
#[derive(Clone)]
pub struct ReducerRegistry {
    reducers: FxHashMap<String, Arc<dyn Reducer>>,
}

impl ReducerRegistry {
    /// Build the registry from a schema.
    #[must_use]
    pub fn from_schema(schema: &StateSchema) -> Self {
        let mut reducers = FxHashMap::default();
        for spec in schema.fields() {
            reducers.insert(spec.name.clone(), spec.policy.build_reducer());
        }
        Self { reducers }
    }

    /// Whether a reducer is registered for `field`.
    #[must_use]
    pub fn covers(&self, field: &str) -> bool {
        self.reducers.contains_key(field)
    }

    /// Merge a single field update into the state.
    ///
    /// Does not bump versions; the barrier in
    /// [`Workflow::apply_partials`](crate::workflow::Workflow::apply_partials)
    /// owns version accounting.
    pub fn merge_field(
        &self,
        state: &mut VersionedState,
        field: &str,
        update: &Value,
    ) -> Result<(), ReducerError> {
        let reducer = self
            .reducers
            .get(field)
            .ok_or_else(|| ReducerError::UnknownField {
                field: field.to_string(),
            })?;
        let channel = state
            .field_mut(field)
            .ok_or_else(|| ReducerError::UnknownField {
                field: field.to_string(),
            })?;
        let merged = reducer.merge(field, channel.value(), update)?;
        *channel.get_mut() = merged;
        Ok(())
    }

    /// Apply one partial's field writes in deterministic (sorted) order.
    #[instrument(skip(self, state, partial), err)]
    pub fn apply(
        &self,
        state: &mut VersionedState,
        partial: &NodePartial,
    ) -> Result<(), ReducerError> {
        if let Some(fields) = &partial.fields {
            // Sort keys so one partial's writes land in a stable order.
            let mut pairs: Vec<_> = fields.iter().collect();
            pairs.sort_by(|(left, _), (right, _)| left.cmp(right));
            for (field, update) in pairs {
                self.merge_field(state, field, update)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducers::MergePolicy;
    use crate::utils::collections::field_map;
    use serde_json::json;

    fn schema() -> StateSchema {
        StateSchema::new()
            .field("topic", MergePolicy::Replace)
            .field("results", MergePolicy::Append)
            .field("hits", MergePolicy::Sum)
    }

    #[test]
    fn applies_each_policy() {
        let schema = schema();
        let registry = ReducerRegistry::from_schema(&schema);
        let mut state = VersionedState::new(Arc::new(schema));

        let partial = NodePartial::new().with_fields(field_map([
            ("topic", json!("rust")),
            ("results", json!(["a"])),
            ("hits", json!(2)),
        ]));
        registry.apply(&mut state, &partial).unwrap();
        registry.apply(&mut state, &partial).unwrap();

        let snap = state.snapshot();
        assert_eq!(snap.field("topic"), Some(&json!("rust")));
        assert_eq!(snap.field("results"), Some(&json!(["a", "a"])));
        assert_eq!(snap.field("hits"), Some(&json!(4)));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let schema = schema();
        let registry = ReducerRegistry::from_schema(&schema);
        let mut state = VersionedState::new(Arc::new(schema));

        let partial = NodePartial::new().with_fields(field_map([("bogus", json!(1))]));
        let err = registry.apply(&mut state, &partial).unwrap_err();
        assert!(matches!(err, ReducerError::UnknownField { .. }));
    }
}
