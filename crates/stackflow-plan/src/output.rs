//! Output projector

use crate::error::{PlanError, Result};
use crate::graph::ResourceGraph;
use crate::node::{NodeId, NodeStatus};
use serde::{Deserialize, Serialize};
use stackflow_core::OutputDecl;
use std::fmt;

const SENSITIVE_MARKERS: [&str; 4] = ["secret", "password", "credential", "token"];

/// Whether a field carries credential material
pub fn is_sensitive_field(field: &str) -> bool {
    let field = field.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|m| field.contains(m))
}

/// A named value extracted from a provisioned node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub node: NodeId,
    pub field: String,
    pub value: serde_json::Value,
    pub sensitive: bool,
}

impl Output {
    /// Value for display; sensitive values are redacted
    pub fn display_value(&self) -> String {
        if self.sensitive {
            return "(sensitive)".to_string();
        }
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.display_value())
    }
}

/// Extract every declared output. Each referenced node must be provisioned
/// and carry the field.
pub fn project(graph: &ResourceGraph, outputs: &[OutputDecl]) -> Result<Vec<Output>> {
    outputs.iter().map(|decl| project_one(graph, decl)).collect()
}

fn project_one(graph: &ResourceGraph, decl: &OutputDecl) -> Result<Output> {
    let unavailable = |reason: String| PlanError::OutputUnavailable {
        output: decl.name.clone(),
        reason,
    };

    let id = NodeId::new(decl.node.as_str());
    let node = graph
        .node(&id)
        .ok_or_else(|| unavailable(format!("node '{}' is not in the graph", id)))?;
    if node.status != NodeStatus::Provisioned {
        return Err(unavailable(format!("node '{}' is {}, not provisioned", id, node.status)));
    }
    let value = node
        .attribute(&decl.field)
        .cloned()
        .ok_or_else(|| unavailable(format!("node '{}' has no field '{}'", id, decl.field)))?;

    Ok(Output {
        name: decl.name.clone(),
        node: id,
        field: decl.field.clone(),
        value,
        sensitive: decl.sensitive.unwrap_or_else(|| is_sensitive_field(&decl.field)),
    })
}
