use std::sync::Arc;

use serde_json::json;

use loomflow::control::{FanOutSpec, LoopGuard};
use loomflow::graphs::{CompileViolation, GraphBuilder, Router};
use loomflow::reducers::MergePolicy;
use loomflow::state::StateSchema;
use loomflow::types::NodeKind;

mod common;
use common::*;

#[test]
fn valid_linear_graph_compiles() {
    let workflow = GraphBuilder::new(research_schema())
        .add_node(custom("write"), WriteFields::one("topic", json!("t")))
        .add_edge(NodeKind::Start, custom("write"))
        .add_edge(custom("write"), NodeKind::End)
        .with_engine_config(silent_config())
        .compile()
        .unwrap();
    assert_eq!(workflow.entry(), Some(custom("write")));
}

#[test]
fn compile_reports_every_violation_at_once() {
    let err = GraphBuilder::new(research_schema())
        .add_node(custom("a"), WriteFields::one("topic", json!("t")))
        // Dangling edge target.
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), custom("ghost"))
        // Router label mapped to an unregistered node.
        .add_router(
            custom("a"),
            Router::new(Arc::new(|_| "go".to_string())).route("go", custom("nowhere")),
        )
        // Guard with an undeclared counter field.
        .add_loop_guard(custom("a"), LoopGuard::new("missing_counter", 3))
        .compile()
        .unwrap_err();

    assert!(err.violations.len() >= 3, "got: {err}");
    assert!(err.violations.iter().any(|v| matches!(
        v,
        CompileViolation::UnknownEdgeTarget { .. }
    )));
    assert!(err.violations.iter().any(|v| matches!(
        v,
        CompileViolation::UnknownRouterTarget { .. }
    )));
    assert!(err.violations.iter().any(|v| matches!(
        v,
        CompileViolation::GuardCounterUndeclared { .. }
    )));
}

#[test]
fn missing_entry_edge_is_a_violation() {
    let err = GraphBuilder::new(research_schema())
        .add_node(custom("a"), WriteFields::one("topic", json!("t")))
        .add_edge(custom("a"), NodeKind::End)
        .compile()
        .unwrap_err();
    assert!(err
        .violations
        .iter()
        .any(|v| matches!(v, CompileViolation::NoEntryEdge)));
    // "a" has an edge but nothing reaches it from Start.
    assert!(err
        .violations
        .iter()
        .any(|v| matches!(v, CompileViolation::UnreachableNode { .. })));
}

#[test]
fn unguarded_cycle_is_rejected() {
    let err = GraphBuilder::new(research_schema())
        .add_node(custom("a"), WriteFields::one("topic", json!("t")))
        .add_node(custom("b"), WriteFields::one("topic", json!("t")))
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), custom("b"))
        .add_edge(custom("b"), custom("a"))
        .add_edge(custom("b"), NodeKind::End)
        .compile()
        .unwrap_err();
    assert!(err
        .violations
        .iter()
        .any(|v| matches!(v, CompileViolation::UnguardedCycle { .. })));
}

#[test]
fn guarded_cycle_compiles() {
    let schema = StateSchema::new()
        .field("topic", MergePolicy::Replace)
        .field("iterations", MergePolicy::Sum);
    GraphBuilder::new(schema)
        .add_node(custom("a"), WriteFields::one("topic", json!("t")))
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), custom("a"))
        .add_loop_guard(custom("a"), LoopGuard::new("iterations", 3))
        .compile()
        .unwrap();
}

#[test]
fn guard_counter_must_use_sum_policy() {
    let schema = StateSchema::new()
        .field("topic", MergePolicy::Replace)
        .field("iterations", MergePolicy::Replace);
    let err = GraphBuilder::new(schema)
        .add_node(custom("a"), WriteFields::one("topic", json!("t")))
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), custom("a"))
        .add_loop_guard(custom("a"), LoopGuard::new("iterations", 3))
        .compile()
        .unwrap_err();
    assert!(err
        .violations
        .iter()
        .any(|v| matches!(v, CompileViolation::GuardCounterNotSum { .. })));
}

#[test]
fn replace_field_written_inside_fan_out_is_a_reducer_conflict() {
    // `summary` is replace; writing it from a parallel branch is unsafe.
    let err = GraphBuilder::new(research_schema())
        .add_node(custom("plan"), FanOutFixed { descriptors: vec![] })
        .add_node(custom("branch"), WriteFields::one("summary", json!("s")))
        .add_node(custom("join"), WriteFields::one("topic", json!("t")))
        .add_edge(NodeKind::Start, custom("plan"))
        .add_edge(custom("branch"), custom("join"))
        .add_edge(custom("join"), NodeKind::End)
        .add_fan_out(
            custom("plan"),
            FanOutSpec::new(vec![custom("branch")], custom("join")),
        )
        .compile()
        .unwrap_err();
    assert!(err.violations.iter().any(|v| matches!(
        v,
        CompileViolation::ReducerConflict { field, .. } if field == "summary"
    )));
}

#[test]
fn append_and_sum_writes_inside_fan_out_are_allowed() {
    GraphBuilder::new(research_schema())
        .add_node(custom("plan"), FanOutFixed { descriptors: vec![] })
        .add_node(custom("branch"), SearchBranch)
        .add_node(custom("join"), WriteFields::one("summary", json!("s")))
        .add_edge(NodeKind::Start, custom("plan"))
        .add_edge(custom("branch"), custom("join"))
        .add_edge(custom("join"), NodeKind::End)
        .add_fan_out(
            custom("plan"),
            FanOutSpec::new(vec![custom("branch")], custom("join")),
        )
        .compile()
        .unwrap();
}

#[test]
fn declared_write_to_undeclared_field_is_rejected() {
    let err = GraphBuilder::new(StateSchema::new())
        .add_node(custom("a"), WriteFields::one("mystery", json!(1)))
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), NodeKind::End)
        .compile()
        .unwrap_err();
    assert!(err.violations.iter().any(|v| matches!(
        v,
        CompileViolation::UndeclaredWriteField { field, .. } if field == "mystery"
    )));
}

#[test]
fn no_terminal_path_is_rejected() {
    let schema = StateSchema::new()
        .field("topic", MergePolicy::Replace)
        .field("iterations", MergePolicy::Sum);
    // Every edge loops; no terminal is reachable and the cycle carries
    // no guard.
    let err = GraphBuilder::new(schema)
        .add_node(custom("a"), WriteFields::one("topic", json!("t")))
        .add_edge(NodeKind::Start, custom("a"))
        .add_edge(custom("a"), custom("a"))
        .compile()
        .unwrap_err();
    assert!(err
        .violations
        .iter()
        .any(|v| matches!(v, CompileViolation::NoTerminalPath)));
    assert!(err
        .violations
        .iter()
        .any(|v| matches!(v, CompileViolation::UnguardedCycle { .. })));
}
