//! Graph validation and compilation into an executable [`Workflow`].
//!
//! Compilation collects *every* violation before failing so a broken
//! graph can be fixed in one pass instead of error-by-error.

use std::fmt;
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use super::builder::GraphBuilder;
use super::iteration::{cyclic_nodes, reachable_from};
use crate::reducers::{MergePolicy, ReducerRegistry};
use crate::types::NodeKind;
use crate::workflow::Workflow;

/// A single problem found during graph validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileViolation {
    #[error("no edge leaves Start; the graph has no entry")]
    NoEntryEdge,

    #[error("edge leaves terminal node {from}")]
    EdgeFromTerminal { from: String },

    #[error("edge {from} -> {to} leaves an unregistered node")]
    UnknownEdgeSource { from: String, to: String },

    #[error("edge {from} -> {to} targets an unregistered node")]
    UnknownEdgeTarget { from: String, to: String },

    #[error("edge {from} -> Start re-enters the entry marker")]
    EdgeIntoStart { from: String },

    #[error("router attached to unregistered node {from}")]
    RouterOnUnknownNode { from: String },

    #[error("router on {from} declares no labels")]
    EmptyRouter { from: String },

    #[error("router on {from} maps label {label:?} to unregistered node {target}")]
    UnknownRouterTarget {
        from: String,
        label: String,
        target: String,
    },

    #[error("fan-out declared on unregistered node {origin}")]
    FanOutOnUnknownNode { origin: String },

    #[error("fan-out on {origin} declares no branch entries")]
    EmptyFanOut { origin: String },

    #[error("fan-out on {origin} references unregistered node {node} as {role}")]
    UnknownFanOutNode {
        origin: String,
        node: String,
        role: &'static str,
    },

    #[error("loop guard attached to unregistered node {node}")]
    GuardOnUnknownNode { node: String },

    #[error("loop guard on {node} counts via undeclared field {field}")]
    GuardCounterUndeclared { node: String, field: String },

    #[error(
        "loop guard on {node} requires field {field} to use the sum policy (found {policy})"
    )]
    GuardCounterNotSum {
        node: String,
        field: String,
        policy: String,
    },

    #[error("loop guard on {node} routes to unregistered give-up node {target}")]
    UnknownGiveUpTarget { node: String, target: String },

    #[error("no path from Start reaches a terminal (End or GiveUp)")]
    NoTerminalPath,

    #[error("node {node} is registered but unreachable from Start")]
    UnreachableNode { node: String },

    #[error("cycle through [{nodes}] has no loop guard")]
    UnguardedCycle { nodes: String },

    #[error("node {node} declares a write to undeclared field {field}")]
    UndeclaredWriteField { node: String, field: String },

    #[error(
        "field {field} written by {node} inside fan-out {origin} uses non-associative policy \
         {policy}; concurrently writable fields need append, sum, or a custom merge"
    )]
    ReducerConflict {
        origin: String,
        node: String,
        field: String,
        policy: String,
    },
}

/// Aggregated compile failure carrying every violation found.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub violations: Vec<CompileViolation>,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "graph compilation failed with {} violation(s):",
            self.violations.len()
        )?;
        for (i, violation) in self.violations.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, violation)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

impl Diagnostic for CompileError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new("loomflow::graphs::compile"))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(
            "All violations are listed; fix them in one pass and recompile.",
        ))
    }
}

impl GraphBuilder {
    /// Validate the graph and produce an immutable executable [`Workflow`].
    ///
    /// Checks, in order: edge endpoints, router label maps, fan-out
    /// declarations, loop guards, terminal reachability, dead nodes,
    /// unguarded cycles, and the reducer-conflict analysis over fan-out
    /// branches. Every violation found is reported, not just the first.
    pub fn compile(self) -> Result<Workflow, CompileError> {
        let mut violations: Vec<CompileViolation> = Vec::new();

        let registered = |kind: &NodeKind| self.nodes.contains_key(kind);
        let push_unique = |violations: &mut Vec<CompileViolation>, v: CompileViolation| {
            if !violations.contains(&v) {
                violations.push(v);
            }
        };

        // Edge endpoint validation.
        if self
            .edges
            .get(&NodeKind::Start)
            .map(|targets| targets.is_empty())
            .unwrap_or(true)
        {
            violations.push(CompileViolation::NoEntryEdge);
        }
        for (from, targets) in &self.edges {
            match from {
                NodeKind::End | NodeKind::GiveUp => {
                    violations.push(CompileViolation::EdgeFromTerminal {
                        from: from.encode(),
                    });
                }
                NodeKind::Custom(_) if !registered(from) => {
                    for to in targets {
                        violations.push(CompileViolation::UnknownEdgeSource {
                            from: from.encode(),
                            to: to.encode(),
                        });
                    }
                }
                _ => {}
            }
            for to in targets {
                match to {
                    NodeKind::Start => violations.push(CompileViolation::EdgeIntoStart {
                        from: from.encode(),
                    }),
                    NodeKind::Custom(_) if !registered(to) => {
                        violations.push(CompileViolation::UnknownEdgeTarget {
                            from: from.encode(),
                            to: to.encode(),
                        });
                    }
                    _ => {}
                }
            }
        }

        // Router validation.
        for (from, router) in &self.routers {
            if from.is_custom() && !registered(from) {
                violations.push(CompileViolation::RouterOnUnknownNode {
                    from: from.encode(),
                });
            }
            if router.routes().is_empty() {
                violations.push(CompileViolation::EmptyRouter {
                    from: from.encode(),
                });
            }
            for (label, target) in router.routes() {
                if target.is_custom() && !registered(target) {
                    violations.push(CompileViolation::UnknownRouterTarget {
                        from: from.encode(),
                        label: label.clone(),
                        target: target.encode(),
                    });
                }
            }
        }

        // Fan-out validation.
        for (origin, spec) in &self.fan_outs {
            if !registered(origin) {
                violations.push(CompileViolation::FanOutOnUnknownNode {
                    origin: origin.encode(),
                });
            }
            if spec.branch_entries.is_empty() {
                violations.push(CompileViolation::EmptyFanOut {
                    origin: origin.encode(),
                });
            }
            for entry in &spec.branch_entries {
                if !registered(entry) {
                    violations.push(CompileViolation::UnknownFanOutNode {
                        origin: origin.encode(),
                        node: entry.encode(),
                        role: "branch entry",
                    });
                }
            }
            if spec.join.is_custom() && !registered(&spec.join) {
                violations.push(CompileViolation::UnknownFanOutNode {
                    origin: origin.encode(),
                    node: spec.join.encode(),
                    role: "join",
                });
            }
        }

        // Loop guard validation.
        for (node, guard) in &self.guards {
            if !registered(node) {
                violations.push(CompileViolation::GuardOnUnknownNode {
                    node: node.encode(),
                });
            }
            match self.schema.get(&guard.counter_field) {
                None => violations.push(CompileViolation::GuardCounterUndeclared {
                    node: node.encode(),
                    field: guard.counter_field.clone(),
                }),
                Some(spec) => {
                    if !matches!(spec.policy, MergePolicy::Sum) {
                        violations.push(CompileViolation::GuardCounterNotSum {
                            node: node.encode(),
                            field: guard.counter_field.clone(),
                            policy: spec.policy.label().to_string(),
                        });
                    }
                }
            }
            if guard.give_up.is_custom() && !registered(&guard.give_up) {
                violations.push(CompileViolation::UnknownGiveUpTarget {
                    node: node.encode(),
                    target: guard.give_up.encode(),
                });
            }
        }

        // Routing successor map used by the reachability and cycle scans.
        let successors = self.successor_map();

        let reached = reachable_from(&successors, &NodeKind::Start);
        if !reached.contains(&NodeKind::End) && !reached.contains(&NodeKind::GiveUp) {
            violations.push(CompileViolation::NoTerminalPath);
        }
        let mut unreachable: Vec<String> = self
            .nodes
            .keys()
            .filter(|kind| !reached.contains(*kind))
            .map(|kind| kind.encode())
            .collect();
        unreachable.sort();
        for node in unreachable {
            violations.push(CompileViolation::UnreachableNode { node });
        }

        // Every cycle must pass through a guarded node.
        let guarded: FxHashSet<NodeKind> = self.guards.keys().cloned().collect();
        let unguarded_cyclic = cyclic_nodes(&successors, &guarded);
        if !unguarded_cyclic.is_empty() {
            let mut names: Vec<String> =
                unguarded_cyclic.iter().map(|kind| kind.encode()).collect();
            names.sort();
            violations.push(CompileViolation::UnguardedCycle {
                nodes: names.join(", "),
            });
        }

        // Declared writes must exist in the schema.
        {
            let mut node_ids: Vec<&NodeKind> = self.nodes.keys().collect();
            node_ids.sort_by_key(|kind| kind.encode());
            for kind in node_ids {
                let node = &self.nodes[kind];
                for field in node.declared_writes() {
                    if !self.schema.contains(&field) {
                        push_unique(
                            &mut violations,
                            CompileViolation::UndeclaredWriteField {
                                node: kind.encode(),
                                field,
                            },
                        );
                    }
                }
            }
        }

        // Reducer conflict analysis: anything written inside a fan-out
        // branch may run concurrently with its siblings (and with other
        // descriptors running the same subgraph), so replace-fields are
        // rejected there.
        let mut fan_out_origins: Vec<&NodeKind> = self.fan_outs.keys().collect();
        fan_out_origins.sort_by_key(|kind| kind.encode());
        for origin in fan_out_origins {
            let spec = &self.fan_outs[origin];
            for entry in &spec.branch_entries {
                for branch_node in self.branch_nodes(&successors, entry, &spec.join) {
                    let Some(node) = self.nodes.get(&branch_node) else {
                        continue;
                    };
                    for field in node.declared_writes() {
                        let Some(field_spec) = self.schema.get(&field) else {
                            continue; // already reported above
                        };
                        if !field_spec.policy.is_concurrency_safe() {
                            push_unique(
                                &mut violations,
                                CompileViolation::ReducerConflict {
                                    origin: origin.encode(),
                                    node: branch_node.encode(),
                                    field,
                                    policy: field_spec.policy.label().to_string(),
                                },
                            );
                        }
                    }
                }
            }
        }

        if !violations.is_empty() {
            return Err(CompileError { violations });
        }

        let registry = ReducerRegistry::from_schema(&self.schema);
        Ok(Workflow::from_parts(
            Arc::new(self.schema),
            self.nodes,
            self.edges,
            self.routers,
            self.fan_outs,
            self.guards,
            registry,
            self.engine_config,
        ))
    }

    /// Successor map covering every way control can move: static edges,
    /// router targets, guard give-up routes, and fan-out origin → entry /
    /// origin → join hops.
    fn successor_map(&self) -> FxHashMap<NodeKind, Vec<NodeKind>> {
        let mut successors: FxHashMap<NodeKind, Vec<NodeKind>> = FxHashMap::default();
        for (from, targets) in &self.edges {
            successors
                .entry(from.clone())
                .or_default()
                .extend(targets.iter().cloned());
        }
        for (from, router) in &self.routers {
            let entry = successors.entry(from.clone()).or_default();
            entry.extend(router.routes().iter().map(|(_, target)| target.clone()));
        }
        for (node, guard) in &self.guards {
            successors
                .entry(node.clone())
                .or_default()
                .push(guard.give_up.clone());
        }
        for (origin, spec) in &self.fan_outs {
            let entry = successors.entry(origin.clone()).or_default();
            entry.extend(spec.branch_entries.iter().cloned());
            entry.push(spec.join.clone());
        }
        successors
    }

    /// Custom nodes a branch can touch: BFS from the entry, stopping at
    /// the join node and at terminals.
    fn branch_nodes(
        &self,
        successors: &FxHashMap<NodeKind, Vec<NodeKind>>,
        entry: &NodeKind,
        join: &NodeKind,
    ) -> Vec<NodeKind> {
        let mut seen: FxHashSet<NodeKind> = FxHashSet::default();
        let mut queue = vec![entry.clone()];
        let mut result = Vec::new();
        while let Some(node) = queue.pop() {
            if node == *join || node.is_terminal() || !seen.insert(node.clone()) {
                continue;
            }
            if node.is_custom() {
                result.push(node.clone());
            }
            for next in successors.get(&node).into_iter().flatten() {
                queue.push(next.clone());
            }
        }
        result.sort_by_key(|kind| kind.encode());
        result
    }
}
