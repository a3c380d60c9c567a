//! Topological scheduling
//!
//! Kahn's algorithm over the connection list. Ties are broken by the
//! order nodes appear in the input, so the same graph always yields the
//! same order. Nodes on a cycle, or downstream of one, never reach
//! in-degree zero; they are returned as `excluded` instead of failing.

use std::collections::{HashMap, VecDeque};

use crate::types::{Connection, Node, NodeId};

/// Result of scheduling a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOrder {
    /// Executable node ids, dependencies first
    pub order: Vec<NodeId>,
    /// Node ids left out because of a cycle, in input order
    pub excluded: Vec<NodeId>,
}

/// Compute a topological order for `nodes`.
///
/// Connections whose endpoints are not in `nodes` are ignored.
pub fn topological_order(nodes: &[Node], connections: &[Connection]) -> ExecutionOrder {
    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();

    for connection in connections {
        if !in_degree.contains_key(connection.from.as_str()) {
            continue;
        }
        if let Some(degree) = in_degree.get_mut(connection.to.as_str()) {
            *degree += 1;
            successors
                .entry(connection.from.as_str())
                .or_default()
                .push(connection.to.as_str());
        }
    }

    let mut queue: VecDeque<&str> = nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(node_id) = queue.pop_front() {
        order.push(node_id.to_string());
        for &next in successors.get(node_id).map(Vec::as_slice).unwrap_or_default() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    let excluded: Vec<NodeId> = nodes
        .iter()
        .filter(|n| in_degree.get(n.id.as_str()).is_some_and(|d| *d > 0))
        .map(|n| n.id.clone())
        .collect();

    if !excluded.is_empty() {
        log::warn!("Excluding {} node(s) on or behind a cycle: {:?}", excluded.len(), excluded);
    }

    ExecutionOrder { order, excluded }
}
