//! Resource graph
//!
//! Nodes keyed by id, typed dependency edges, and adjacency indices in both
//! directions. Insertion order carries no meaning; the scheduler decides
//! execution order.

use crate::error::{PlanError, Result};
use crate::node::{NodeId, NodeStatus, ResourceKind, ResourceNode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

/// Relationship between two nodes. `from` is provisioned before `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    /// `from` contains `to` (network → partition → cluster → instance)
    Containment,
    /// `from` (consumer) reaches `to` (resource) over the network
    NetworkAccess,
    /// `from` (identity source) is trusted by `to` (role)
    Trust,
    /// Ordering with no data flowing between the nodes
    ExplicitOrder,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EdgeKind::Containment => "containment",
            EdgeKind::NetworkAccess => "network-access",
            EdgeKind::Trust => "trust",
            EdgeKind::ExplicitOrder => "explicit-order",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

impl DependencyEdge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>, kind: EdgeKind) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
        }
    }
}

/// In-memory resource graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceGraph {
    nodes: BTreeMap<NodeId, ResourceNode>,
    edges: BTreeSet<DependencyEdge>,
    #[serde(skip)]
    outgoing: HashMap<NodeId, Vec<(EdgeKind, NodeId)>>,
    #[serde(skip)]
    incoming: HashMap<NodeId, Vec<(EdgeKind, NodeId)>>,
    #[serde(skip)]
    parent: HashMap<NodeId, NodeId>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Add a node; ids must be unique
    pub fn add_node(&mut self, node: ResourceNode) -> Result<NodeId> {
        if self.nodes.contains_key(&node.id) {
            return Err(PlanError::validation(
                node.entry().unwrap_or(node.id.as_str()),
                format!("node id '{}' is already in use", node.id),
            ));
        }
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        Ok(id)
    }

    /// Add an edge; both endpoints must already exist
    pub fn add_edge(&mut self, from: &NodeId, to: &NodeId, kind: EdgeKind) -> Result<()> {
        for endpoint in [from, to] {
            if !self.nodes.contains_key(endpoint) {
                let other = if endpoint == from { to } else { from };
                return Err(PlanError::unresolved(other.as_str(), endpoint.as_str()));
            }
        }
        if from == to {
            return Err(PlanError::CycleDetected(vec![from.clone()]));
        }

        let edge = DependencyEdge::new(from.clone(), to.clone(), kind);
        if self.edges.contains(&edge) {
            return Ok(());
        }

        if kind == EdgeKind::Containment {
            if let Some(existing) = self.parent.get(to) {
                return Err(PlanError::validation(
                    to.as_str(),
                    format!("already contained by '{}', cannot also be contained by '{}'", existing, from),
                ));
            }
            if self.ancestors(from).contains(to) {
                return Err(PlanError::CycleDetected(vec![from.clone(), to.clone()]));
            }
            self.parent.insert(to.clone(), from.clone());
        }

        self.outgoing
            .entry(from.clone())
            .or_default()
            .push((kind, to.clone()));
        self.incoming
            .entry(to.clone())
            .or_default()
            .push((kind, from.clone()));
        self.edges.insert(edge);
        Ok(())
    }

    pub fn node(&self, id: &NodeId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut ResourceNode> {
        self.nodes.get_mut(id)
    }

    /// Nodes in id order
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn nodes_of_kind(&self, kind: ResourceKind) -> Vec<&ResourceNode> {
        self.nodes.values().filter(|n| n.kind == kind).collect()
    }

    /// Edges in (from, to, kind) order
    pub fn edges(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.iter()
    }

    pub fn edges_of_kind(&self, kind: EdgeKind) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }

    /// Targets of outgoing edges of `kind`
    pub fn neighbors(&self, id: &NodeId, kind: EdgeKind) -> Vec<&NodeId> {
        self.outgoing
            .get(id)
            .map(|out| out.iter().filter(|(k, _)| *k == kind).map(|(_, n)| n).collect())
            .unwrap_or_default()
    }

    /// Direct successors over every edge kind
    pub fn successors(&self, id: &NodeId) -> BTreeSet<&NodeId> {
        self.outgoing
            .get(id)
            .map(|out| out.iter().map(|(_, n)| n).collect())
            .unwrap_or_default()
    }

    /// Direct predecessors over every edge kind
    pub fn predecessors(&self, id: &NodeId) -> BTreeSet<&NodeId> {
        self.incoming
            .get(id)
            .map(|inc| inc.iter().map(|(_, n)| n).collect())
            .unwrap_or_default()
    }

    /// Containing parent, if any
    pub fn parent(&self, id: &NodeId) -> Option<&NodeId> {
        self.parent.get(id)
    }

    fn ancestors(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut current = self.parent.get(id);
        while let Some(p) = current {
            if !seen.insert(p.clone()) {
                break;
            }
            current = self.parent.get(p);
        }
        seen
    }

    /// Every node reachable from `id` over any edge, excluding `id`
    pub fn transitive_dependents(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&NodeId> = self.successors(id).into_iter().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.clone()) {
                queue.extend(self.successors(next));
            }
        }
        seen
    }

    /// Every node `id` transitively depends on, excluding `id`
    pub fn transitive_dependencies(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&NodeId> = self.predecessors(id).into_iter().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.clone()) {
                queue.extend(self.predecessors(next));
            }
        }
        seen
    }

    /// Move a node to `status`, enforcing the lifecycle
    pub fn set_status(&mut self, id: &NodeId, status: NodeStatus) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| PlanError::NodeNotFound(id.clone()))?;
        if node.status == status {
            return Ok(());
        }
        if !node.status.can_transition_to(status) {
            return Err(PlanError::InvalidTransition {
                node: id.clone(),
                from: node.status,
                to: status,
            });
        }
        node.status = status;
        Ok(())
    }

    /// Rebuild adjacency indices (after deserialization)
    pub fn reindex(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
        self.parent.clear();
        for edge in &self.edges {
            self.outgoing
                .entry(edge.from.clone())
                .or_default()
                .push((edge.kind, edge.to.clone()));
            self.incoming
                .entry(edge.to.clone())
                .or_default()
                .push((edge.kind, edge.from.clone()));
            if edge.kind == EdgeKind::Containment {
                self.parent.insert(edge.to.clone(), edge.from.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeConfig;
    use stackflow_core::{RegistryConfig, TagMutability};

    fn node(id: &str) -> ResourceNode {
        ResourceNode::new(
            id,
            ResourceKind::Registry,
            NodeConfig::Registry(RegistryConfig {
                scan_on_push: false,
                tag_mutability: TagMutability::Mutable,
            }),
            id,
        )
    }

    fn graph(ids: &[&str]) -> ResourceGraph {
        let mut g = ResourceGraph::new();
        for id in ids {
            g.add_node(node(id)).unwrap();
        }
        g
    }

    #[test]
    fn test_duplicate_node_is_rejected() {
        let mut g = graph(&["a"]);
        assert!(matches!(
            g.add_node(node("a")),
            Err(PlanError::Validation { .. })
        ));
    }

    #[test]
    fn test_edge_requires_both_endpoints() {
        let mut g = graph(&["a"]);
        let err = g
            .add_edge(&"a".into(), &"missing".into(), EdgeKind::ExplicitOrder)
            .unwrap_err();
        assert_eq!(err, PlanError::unresolved("a", "missing"));
        assert_eq!(g.edges().count(), 0);
    }

    #[test]
    fn test_neighbors_by_kind() {
        let mut g = graph(&["a", "b", "c"]);
        g.add_edge(&"a".into(), &"b".into(), EdgeKind::NetworkAccess).unwrap();
        g.add_edge(&"a".into(), &"c".into(), EdgeKind::ExplicitOrder).unwrap();

        assert_eq!(g.neighbors(&"a".into(), EdgeKind::NetworkAccess), vec![&NodeId::new("b")]);
        assert_eq!(g.neighbors(&"a".into(), EdgeKind::ExplicitOrder), vec![&NodeId::new("c")]);
        assert!(g.neighbors(&"b".into(), EdgeKind::NetworkAccess).is_empty());
        assert_eq!(g.predecessors(&"b".into()).len(), 1);
    }

    #[test]
    fn test_duplicate_edge_is_idempotent() {
        let mut g = graph(&["a", "b"]);
        g.add_edge(&"a".into(), &"b".into(), EdgeKind::Trust).unwrap();
        g.add_edge(&"a".into(), &"b".into(), EdgeKind::Trust).unwrap();
        assert_eq!(g.edges().count(), 1);
        assert_eq!(g.successors(&"a".into()).len(), 1);
    }

    #[test]
    fn test_single_containing_parent() {
        let mut g = graph(&["a", "b", "c"]);
        g.add_edge(&"a".into(), &"c".into(), EdgeKind::Containment).unwrap();
        assert!(g.add_edge(&"b".into(), &"c".into(), EdgeKind::Containment).is_err());
        assert_eq!(g.parent(&"c".into()), Some(&NodeId::new("a")));
    }

    #[test]
    fn test_containment_cycle_is_rejected() {
        let mut g = graph(&["a", "b"]);
        g.add_edge(&"a".into(), &"b".into(), EdgeKind::Containment).unwrap();
        assert!(matches!(
            g.add_edge(&"b".into(), &"a".into(), EdgeKind::Containment),
            Err(PlanError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_transitive_dependents() {
        let mut g = graph(&["a", "b", "c", "d"]);
        g.add_edge(&"a".into(), &"b".into(), EdgeKind::ExplicitOrder).unwrap();
        g.add_edge(&"b".into(), &"c".into(), EdgeKind::ExplicitOrder).unwrap();

        let dependents = g.transitive_dependents(&"a".into());
        assert!(dependents.contains(&NodeId::new("b")));
        assert!(dependents.contains(&NodeId::new("c")));
        assert!(!dependents.contains(&NodeId::new("d")));

        let dependencies = g.transitive_dependencies(&"c".into());
        assert_eq!(dependencies.len(), 2);
    }

    #[test]
    fn test_status_lifecycle_enforced() {
        let mut g = graph(&["a"]);
        let id = NodeId::new("a");
        assert!(g.set_status(&id, NodeStatus::Retired).is_err());
        g.set_status(&id, NodeStatus::Planned).unwrap();
        g.set_status(&id, NodeStatus::Provisioned).unwrap();
        g.set_status(&id, NodeStatus::Retired).unwrap();
        assert_eq!(g.node(&id).unwrap().status, NodeStatus::Retired);
    }

    #[test]
    fn test_reindex_after_roundtrip() {
        let mut g = graph(&["a", "b"]);
        g.add_edge(&"a".into(), &"b".into(), EdgeKind::Containment).unwrap();

        let json = serde_json::to_string(&g).unwrap();
        let mut restored: ResourceGraph = serde_json::from_str(&json).unwrap();
        restored.reindex();
        assert_eq!(restored.parent(&"b".into()), Some(&NodeId::new("a")));
        assert_eq!(restored.successors(&"a".into()).len(), 1);
    }
}
