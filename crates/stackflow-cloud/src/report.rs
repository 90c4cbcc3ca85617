//! Apply and teardown reports

use serde::{Deserialize, Serialize};
use stackflow_plan::{NodeId, NodeStatus, Output, ResourceKind};
use std::fmt;

/// Terminal state of one node after an apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node: NodeId,
    pub kind: ResourceKind,
    pub status: NodeStatus,

    /// True for existing resources that were bound, not created
    pub bound: bool,
    pub provider_id: Option<String>,

    /// Control-plane create attempts made
    pub attempts: u32,

    /// Failure message, or the failed dependency for blocked nodes
    pub message: Option<String>,
}

/// Result of executing a plan. Partial success is reported node by node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    pub plan: String,
    pub fingerprint: String,

    /// Every node in plan order
    pub nodes: Vec<NodeReport>,

    pub outputs: Vec<Output>,

    /// Outputs that could not be projected, with the reason
    pub unavailable_outputs: Vec<(String, String)>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.nodes.iter().all(|n| n.status == NodeStatus::Provisioned)
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| &n.node == id)
    }

    pub fn with_status(&self, status: NodeStatus) -> Vec<&NodeReport> {
        self.nodes.iter().filter(|n| n.status == status).collect()
    }

    pub fn summary(&self) -> ApplySummary {
        let count = |status| self.nodes.iter().filter(|n| n.status == status && !n.bound).count();
        ApplySummary {
            provisioned: count(NodeStatus::Provisioned),
            bound: self.nodes.iter().filter(|n| n.bound).count(),
            failed: count(NodeStatus::Failed),
            blocked: count(NodeStatus::Blocked),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplySummary {
    pub provisioned: usize,
    pub bound: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} provisioned, {} bound, {} failed, {} blocked",
            self.provisioned, self.bound, self.failed, self.blocked
        )
    }
}

/// Result of retiring a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeardownReport {
    /// Deleted nodes, in deletion order
    pub retired: Vec<NodeId>,

    /// Deletions the control plane rejected
    pub failed: Vec<(NodeId, String)>,

    /// Nodes left in place because something still depends on them
    pub kept: Vec<NodeId>,
}

impl TeardownReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.kept.is_empty()
    }
}
