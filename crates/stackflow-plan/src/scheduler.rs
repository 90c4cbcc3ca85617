//! Execution order scheduler
//!
//! Kahn's algorithm over every edge kind. Ready nodes are kept in an
//! ordered set so ties break by node id and the order is reproducible.

use crate::error::{PlanError, Result};
use crate::graph::ResourceGraph;
use crate::node::{NodeId, ResourceKind, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Create through the control plane
    Create,
    /// Already exists; only its resolved fields are used
    Bind,
}

impl std::fmt::Display for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepAction::Create => write!(f, "create"),
            StepAction::Bind => write!(f, "bind"),
        }
    }
}

/// One provisioning operation of the plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: usize,
    pub node: NodeId,
    pub kind: ResourceKind,
    pub action: StepAction,

    /// Direct predecessors; all come earlier in the plan
    pub depends_on: Vec<NodeId>,

    /// Resolved values the configuration refers to
    pub references: Vec<ValueRef>,

    pub configuration: serde_json::Value,
}

/// Topological order of every node in the graph
pub fn order(graph: &ResourceGraph) -> Result<Vec<NodeId>> {
    let mut in_degree: HashMap<&NodeId, usize> = graph
        .node_ids()
        .map(|id| (id, graph.predecessors(id).len()))
        .collect();
    let mut ready: BTreeSet<&NodeId> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut sorted = Vec::with_capacity(graph.len());
    while let Some(id) = ready.pop_first() {
        sorted.push(id.clone());
        for next in graph.successors(id) {
            if let Some(d) = in_degree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(next);
                }
            }
        }
    }

    if sorted.len() < graph.len() {
        let placed: BTreeSet<&NodeId> = sorted.iter().collect();
        let cycle: Vec<NodeId> = graph
            .node_ids()
            .filter(|id| !placed.contains(id))
            .filter(|id| graph.transitive_dependents(id).contains(*id))
            .cloned()
            .collect();
        tracing::warn!(nodes = ?cycle, "Dependency cycle detected");
        return Err(PlanError::CycleDetected(cycle));
    }

    Ok(sorted)
}

/// Order the graph into plan steps carrying their configuration
pub fn schedule(
    graph: &ResourceGraph,
    configurations: &BTreeMap<NodeId, serde_json::Value>,
) -> Result<Vec<PlanStep>> {
    let order = order(graph)?;
    let mut steps = Vec::with_capacity(order.len());

    for (index, id) in order.into_iter().enumerate() {
        let node = graph
            .node(&id)
            .ok_or_else(|| PlanError::NodeNotFound(id.clone()))?;
        let configuration = configurations
            .get(&id)
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let mut references = ValueRef::scan(&configuration.to_string());
        references.sort();
        references.dedup();

        steps.push(PlanStep {
            index,
            kind: node.kind,
            action: if node.is_existing() {
                StepAction::Bind
            } else {
                StepAction::Create
            },
            depends_on: graph.predecessors(&id).into_iter().cloned().collect(),
            references,
            configuration,
            node: id,
        });
    }

    Ok(steps)
}
