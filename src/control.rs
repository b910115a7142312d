//! Control-flow primitives for dynamic fan-out and loop containment.
//!
//! Task descriptors are emitted by nodes to request a parallel wave;
//! fan-out specs and loop guards are declared on the graph so the
//! compiler can validate them. Keeping routing intent separate from state
//! updates means nodes never mutate the frontier directly.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::types::NodeKind;

/// One branch of a dynamic fan-out wave.
///
/// Owned transiently by the engine for the duration of the wave. The
/// `input` overlay is scoped to the branch: it is layered onto the
/// branch's state snapshot and never merged into shared state.
#[derive(Clone, Debug)]
pub struct TaskDescriptor {
    /// Entry node of the subgraph this branch runs. Must be one of the
    /// entries declared on the originating node's [`FanOutSpec`].
    pub entry: NodeKind,
    /// Branch-scoped input fields overlaid on the wave snapshot.
    pub input: FxHashMap<String, Value>,
    /// Optional label for diagnostics.
    pub label: Option<String>,
}

impl TaskDescriptor {
    pub fn new(entry: impl Into<NodeKind>) -> Self {
        Self {
            entry: entry.into(),
            input: FxHashMap::default(),
            label: None,
        }
    }

    /// Add one branch-scoped input field.
    #[must_use]
    pub fn with_input(mut self, field: impl Into<String>, value: Value) -> Self {
        self.input.insert(field.into(), value);
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// How a fan-out wave treats branch failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// Any branch's fatal error aborts the wave and fails the thread.
    FailFast,
    /// Branch failures are captured into the `errors` channel; successes
    /// merge normally and the join always runs once every branch has
    /// finished. The default, suited to research/aggregation waves.
    #[default]
    DegradeContinue,
}

/// Declaration of a node's fan-out behavior.
///
/// Declared at build time so the compiler can validate the join target
/// and run the reducer-conflict analysis over everything reachable from
/// the branch entries.
#[derive(Clone, Debug)]
pub struct FanOutSpec {
    /// Subgraph entry nodes that task descriptors may target.
    pub branch_entries: Vec<NodeKind>,
    /// Node the engine advances to once the wave has joined.
    pub join: NodeKind,
    /// Failure handling for the wave.
    pub policy: JoinPolicy,
}

impl FanOutSpec {
    pub fn new(branch_entries: Vec<NodeKind>, join: impl Into<NodeKind>) -> Self {
        Self {
            branch_entries,
            join: join.into(),
            policy: JoinPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: JoinPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Iteration containment for a cycle-bearing node.
///
/// After the guarded node runs, the engine increments `counter_field`
/// (which must be declared `sum` on the schema) and, once the counter
/// reaches `max_iterations`, routes to `give_up` instead of following the
/// node's normal edges. Every cycle must carry at least one guard, so no
/// graph can loop unboundedly by construction.
#[derive(Clone, Debug)]
pub struct LoopGuard {
    /// Schema field holding the iteration counter.
    pub counter_field: String,
    /// Inclusive iteration budget.
    pub max_iterations: u64,
    /// Where to route once the budget is exhausted.
    pub give_up: NodeKind,
}

impl LoopGuard {
    /// Guard routing to the virtual give-up terminal.
    pub fn new(counter_field: impl Into<String>, max_iterations: u64) -> Self {
        Self {
            counter_field: counter_field.into(),
            max_iterations,
            give_up: NodeKind::GiveUp,
        }
    }

    /// Route to a custom node (e.g. a partial-result summarizer) instead
    /// of the virtual terminal.
    #[must_use]
    pub fn with_give_up(mut self, give_up: impl Into<NodeKind>) -> Self {
        self.give_up = give_up.into();
        self
    }
}
