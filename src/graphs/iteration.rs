//! Graph traversal helpers used by compile-time validation.
//!
//! Small hand-rolled BFS passes over the routing successor map: terminal
//! reachability, dead-node detection, and the cycle scan backing the
//! loop-guard coverage check.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

use crate::types::NodeKind;

/// All nodes reachable from `start` (inclusive) following `successors`.
pub(super) fn reachable_from(
    successors: &FxHashMap<NodeKind, Vec<NodeKind>>,
    start: &NodeKind,
) -> FxHashSet<NodeKind> {
    let mut seen: FxHashSet<NodeKind> = FxHashSet::default();
    let mut queue: VecDeque<NodeKind> = VecDeque::new();
    seen.insert(start.clone());
    queue.push_back(start.clone());
    while let Some(node) = queue.pop_front() {
        if let Some(nexts) = successors.get(&node) {
            for next in nexts {
                if seen.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            }
        }
    }
    seen
}

/// Nodes lying on at least one cycle that avoids every node in
/// `excluded`.
///
/// A node is cyclic when it can reach itself through one or more edges.
/// Running the scan with the guarded nodes excluded answers the coverage
/// question directly: any node still cyclic afterwards lies on a cycle no
/// guard can interrupt.
pub(super) fn cyclic_nodes(
    successors: &FxHashMap<NodeKind, Vec<NodeKind>>,
    excluded: &FxHashSet<NodeKind>,
) -> FxHashSet<NodeKind> {
    let mut cyclic = FxHashSet::default();
    for node in successors.keys() {
        if excluded.contains(node) {
            continue;
        }
        // BFS from the node's successors; finding the node again closes a cycle.
        let mut seen: FxHashSet<NodeKind> = FxHashSet::default();
        let mut queue: VecDeque<NodeKind> = VecDeque::new();
        for next in successors.get(node).into_iter().flatten() {
            if excluded.contains(next) {
                continue;
            }
            if seen.insert(next.clone()) {
                queue.push_back(next.clone());
            }
        }
        while let Some(current) = queue.pop_front() {
            if current == *node {
                cyclic.insert(node.clone());
                break;
            }
            for next in successors.get(&current).into_iter().flatten() {
                if excluded.contains(next) {
                    continue;
                }
                if seen.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            }
        }
    }
    cyclic
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(name: &str) -> NodeKind {
        NodeKind::Custom(name.to_string())
    }

    fn graph(edges: &[(&str, &str)]) -> FxHashMap<NodeKind, Vec<NodeKind>> {
        let mut map: FxHashMap<NodeKind, Vec<NodeKind>> = FxHashMap::default();
        for (from, to) in edges {
            map.entry(NodeKind::from(*from))
                .or_default()
                .push(NodeKind::from(*to));
        }
        map
    }

    #[test]
    fn reachability_follows_edges() {
        let successors = graph(&[("Start", "a"), ("a", "b"), ("b", "End"), ("c", "End")]);
        let reached = reachable_from(&successors, &NodeKind::Start);
        assert!(reached.contains(&custom("a")));
        assert!(reached.contains(&custom("b")));
        assert!(reached.contains(&NodeKind::End));
        assert!(!reached.contains(&custom("c")));
    }

    #[test]
    fn self_loop_is_cyclic() {
        let successors = graph(&[("a", "a"), ("a", "End")]);
        let cyclic = cyclic_nodes(&successors, &FxHashSet::default());
        assert!(cyclic.contains(&custom("a")));
    }

    #[test]
    fn two_node_cycle_is_cyclic() {
        let successors = graph(&[("a", "b"), ("b", "a")]);
        let cyclic = cyclic_nodes(&successors, &FxHashSet::default());
        assert_eq!(cyclic.len(), 2);
    }

    #[test]
    fn excluding_a_node_breaks_its_cycles() {
        let successors = graph(&[("a", "b"), ("b", "a")]);
        let mut excluded = FxHashSet::default();
        excluded.insert(custom("a"));
        let cyclic = cyclic_nodes(&successors, &excluded);
        assert!(cyclic.is_empty());
    }

    #[test]
    fn acyclic_graph_has_no_cyclic_nodes() {
        let successors = graph(&[("Start", "a"), ("a", "b"), ("b", "End")]);
        assert!(cyclic_nodes(&successors, &FxHashSet::default()).is_empty());
    }
}
