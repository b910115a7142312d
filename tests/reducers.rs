use proptest::prelude::*;
use serde_json::json;

use loomflow::channels::Channel;
use loomflow::channels::errors::{ErrorEvent, Fault};
use loomflow::node::NodePartial;
use loomflow::reducers::{MergePolicy, ReducerRegistry};
use loomflow::state::{StateSchema, VersionedState};
use std::sync::Arc;

mod common;
use common::*;

fn merge_schema() -> StateSchema {
    StateSchema::new()
        .field("bag", MergePolicy::Append)
        .field("total", MergePolicy::Sum)
}

fn apply_in_order(values: &[i64]) -> VersionedState {
    let schema = merge_schema();
    let registry = ReducerRegistry::from_schema(&schema);
    let mut state = VersionedState::new(Arc::new(schema));
    for value in values {
        let partial = NodePartial::new()
            .with_field("bag", json!([value]))
            .with_field("total", json!(value));
        registry.apply(&mut state, &partial).unwrap();
    }
    state
}

fn summarize(state: &VersionedState) -> (Vec<i64>, i64) {
    let mut bag: Vec<i64> = field_value(state, "bag")
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect();
    bag.sort_unstable();
    let total = field_value(state, "total").as_i64().unwrap();
    (bag, total)
}

proptest! {
    /// Append and sum fields must converge to the same value no matter
    /// in which order parallel writers' updates arrive.
    #[test]
    fn merge_is_arrival_order_independent(
        values in proptest::collection::vec(-1_000i64..1_000, 1..8),
        rotation in 0usize..8,
    ) {
        let identity = summarize(&apply_in_order(&values));

        let mut reversed = values.clone();
        reversed.reverse();
        prop_assert_eq!(summarize(&apply_in_order(&reversed)), identity.clone());

        let mut rotated = values.clone();
        rotated.rotate_left(rotation % values.len().max(1));
        prop_assert_eq!(summarize(&apply_in_order(&rotated)), identity);
    }
}

#[test]
fn barrier_bumps_versions_once_per_changed_field() {
    let schema = research_schema();
    let workflow = loomflow::graphs::GraphBuilder::new(schema)
        .add_node(custom("write"), WriteFields::one("topic", json!("x")))
        .add_edge(loomflow::types::NodeKind::Start, custom("write"))
        .add_edge(custom("write"), loomflow::types::NodeKind::End)
        .with_engine_config(silent_config())
        .compile()
        .unwrap();

    let mut state = workflow.initial_state();
    let before = state.field("results").unwrap().version();

    // Two partials touching the same field in one barrier: one bump.
    let partials = vec![
        NodePartial::new().with_field("results", json!(["a"])),
        NodePartial::new().with_field("results", json!(["b"])),
    ];
    let outcome = workflow.apply_partials(&mut state, partials).unwrap();
    assert_eq!(outcome.updated_fields, vec!["results".to_string()]);
    assert_eq!(state.field("results").unwrap().version(), before + 1);
    assert_eq!(field_value(&state, "results"), json!(["a", "b"]));

    // A barrier that changes nothing does not bump.
    let noop = vec![NodePartial::new().with_field("topic", field_value(&state, "topic"))];
    let outcome = workflow.apply_partials(&mut state, noop).unwrap();
    assert!(outcome.updated_fields.is_empty());
}

#[test]
fn barrier_orders_error_events_stably() {
    let schema = research_schema();
    let workflow = loomflow::graphs::GraphBuilder::new(schema)
        .add_node(custom("write"), WriteFields::one("topic", json!("x")))
        .add_edge(loomflow::types::NodeKind::Start, custom("write"))
        .add_edge(custom("write"), loomflow::types::NodeKind::End)
        .with_engine_config(silent_config())
        .compile()
        .unwrap();

    let mut state = workflow.initial_state();
    let partials = vec![
        NodePartial::new().with_errors(vec![ErrorEvent::branch("b", 1, Fault::msg("late"))]),
        NodePartial::new().with_errors(vec![ErrorEvent::node("a", 1, Fault::msg("early"))]),
    ];
    let outcome = workflow.apply_partials(&mut state, partials).unwrap();

    // Node-scoped events sort ahead of branch-scoped ones regardless of
    // the order partials arrived in.
    assert_eq!(outcome.errors.len(), 2);
    assert!(matches!(
        outcome.errors[0].scope,
        loomflow::channels::errors::ErrorScope::Node { .. }
    ));
    assert_eq!(state.errors.len(), 2);
}

#[test]
fn unknown_field_write_is_rejected_at_the_barrier() {
    let schema = merge_schema();
    let registry = ReducerRegistry::from_schema(&schema);
    let mut state = VersionedState::new(Arc::new(schema));
    let partial = NodePartial::new().with_field("undeclared", json!(1));
    assert!(registry.apply(&mut state, &partial).is_err());
}
