//! Execution ordering and cycle handling.
//!
//! The order is a FIFO Kahn traversal: nodes whose in-degree is zero are
//! queued in node insertion order, and targets are released in edge insertion
//! order as their last predecessor is popped. The same node and edge lists
//! therefore always yield the same order.
//!
//! Nodes on a cycle, or downstream of one, never reach in-degree zero. They
//! are reported as omitted; `CyclePolicy::Reject` turns that into an error
//! naming the strongly connected components involved.

use std::collections::{HashMap, VecDeque};

use datumflow_types::config::CyclePolicy;
use datumflow_types::pipeline::{Edge, Node};
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;

// ---------------------------------------------------------------------------
// Execution plan
// ---------------------------------------------------------------------------

/// Resolved execution order for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Node IDs in dispatch order.
    pub order: Vec<String>,
    /// Node IDs that can never become ready, in insertion order.
    pub omitted: Vec<String>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Position of a node in the order.
    pub fn position(&self, node_id: &str) -> Option<usize> {
        self.order.iter().position(|id| id == node_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// The graph has at least one dependency cycle and the policy rejects it.
    #[error("cycle detected involving nodes {}", format_cycles(.cycles))]
    CycleDetected { cycles: Vec<Vec<String>> },
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| format!("[{}]", c.join(" -> ")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Compute the plan and apply the cycle policy.
pub fn plan(
    nodes: &[Node],
    edges: &[Edge],
    policy: CyclePolicy,
) -> Result<ExecutionPlan, TopologyError> {
    let plan = resolve_order(nodes, edges);

    if !plan.omitted.is_empty() {
        match policy {
            CyclePolicy::Omit => {
                tracing::warn!(
                    omitted = ?plan.omitted,
                    "nodes on or behind a dependency cycle will not run"
                );
            }
            CyclePolicy::Reject => {
                return Err(TopologyError::CycleDetected {
                    cycles: find_cycles(nodes, edges),
                });
            }
        }
    }

    Ok(plan)
}

/// Kahn's algorithm over the node and edge lists.
///
/// Edges naming an unknown node are ignored. Repeated node IDs keep their
/// first occurrence only.
pub fn resolve_order(nodes: &[Node], edges: &[Edge]) -> ExecutionPlan {
    let index = first_occurrence_index(nodes);

    let mut in_degree = vec![0usize; nodes.len()];
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for edge in edges {
        let (Some(&from), Some(&to)) = (
            index.get(edge.source.as_str()),
            index.get(edge.target.as_str()),
        ) else {
            tracing::warn!(
                source = edge.source.as_str(),
                target = edge.target.as_str(),
                "ignoring edge with unknown endpoint"
            );
            continue;
        };
        outgoing[from].push(to);
        in_degree[to] += 1;
    }

    let canonical = |i: usize| index.get(nodes[i].id.as_str()) == Some(&i);

    let mut queue: VecDeque<usize> = (0..nodes.len())
        .filter(|&i| canonical(i) && in_degree[i] == 0)
        .collect();
    let mut visited = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(current) = queue.pop_front() {
        visited[current] = true;
        order.push(nodes[current].id.clone());

        for &next in &outgoing[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    let omitted = (0..nodes.len())
        .filter(|&i| canonical(i) && !visited[i])
        .map(|i| nodes[i].id.clone())
        .collect();

    ExecutionPlan { order, omitted }
}

/// Edges whose endpoints both name a node, in insertion order.
///
/// This is the edge set `resolve_order` orders by; binding reads upstream
/// producers from the same set.
pub fn known_edges(nodes: &[Node], edges: &[Edge]) -> Vec<Edge> {
    let index = first_occurrence_index(nodes);
    edges
        .iter()
        .filter(|e| index.contains_key(e.source.as_str()) && index.contains_key(e.target.as_str()))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Cycle diagnostics
// ---------------------------------------------------------------------------

/// Strongly connected components that form cycles (size > 1 or a self-loop).
///
/// Members of each cycle are listed in node insertion order; cycles are
/// ordered by their first member.
pub fn find_cycles(nodes: &[Node], edges: &[Edge]) -> Vec<Vec<String>> {
    let index = first_occurrence_index(nodes);

    let mut graph = DiGraph::<usize, ()>::new();
    let mut graph_idx = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        if index.get(node.id.as_str()) == Some(&i) {
            graph_idx.insert(i, graph.add_node(i));
        }
    }
    for edge in edges {
        if let (Some(from), Some(to)) = (
            index.get(edge.source.as_str()),
            index.get(edge.target.as_str()),
        ) {
            graph.add_edge(graph_idx[from], graph_idx[to], ());
        }
    }

    let mut cycles: Vec<Vec<usize>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.find_edge(scc[0], scc[0]).is_some())
        .map(|scc| {
            let mut members: Vec<usize> = scc.into_iter().map(|n| graph[n]).collect();
            members.sort_unstable();
            members
        })
        .collect();
    cycles.sort_by_key(|members| members[0]);

    cycles
        .into_iter()
        .map(|members| members.into_iter().map(|i| nodes[i].id.clone()).collect())
        .collect()
}

fn first_occurrence_index(nodes: &[Node]) -> HashMap<&str, usize> {
    let mut index = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        if index.contains_key(node.id.as_str()) {
            tracing::warn!(node_id = node.id.as_str(), "ignoring repeated node ID");
            continue;
        }
        index.insert(node.id.as_str(), i);
    }
    index
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
