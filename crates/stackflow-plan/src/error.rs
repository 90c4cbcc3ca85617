//! Planning error types

use crate::node::{NodeId, NodeStatus};
use stackflow_core::TopologyError;
use thiserror::Error;

/// Planning errors
///
/// Structural errors (`Validation`, `DependencyUnresolved`, `CycleDetected`)
/// abort the whole plan before any control-plane call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Validation error in '{entry}': {message}")]
    Validation { entry: String, message: String },

    #[error("Unresolved dependency: '{from}' references '{to}', which does not exist")]
    DependencyUnresolved { from: String, to: String },

    #[error("Cycle detected between: {}", join(.0))]
    CycleDetected(Vec<NodeId>),

    #[error("Conflict for '{key}': {message}")]
    Conflict { key: String, message: String },

    #[error("Output '{output}' unavailable: {reason}")]
    OutputUnavailable { output: String, reason: String },

    #[error("Existence check failed for '{key}': {message}")]
    ExistenceCheck { key: String, message: String },

    #[error("Invalid status transition for '{node}': {from} -> {to}")]
    InvalidTransition {
        node: NodeId,
        from: NodeStatus,
        to: NodeStatus,
    },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("{} errors in topology:\n{}", .0.len(), list(.0))]
    Invalid(Vec<PlanError>),
}

fn join(ids: &[NodeId]) -> String {
    ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ")
}

fn list(errors: &[PlanError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

impl PlanError {
    pub fn validation(entry: impl Into<String>, message: impl Into<String>) -> Self {
        PlanError::Validation {
            entry: entry.into(),
            message: message.into(),
        }
    }

    pub fn unresolved(from: impl Into<String>, to: impl Into<String>) -> Self {
        PlanError::DependencyUnresolved {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Collapse a list of errors into one
    pub fn from_many(mut errors: Vec<PlanError>) -> Option<PlanError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(PlanError::Invalid(errors)),
        }
    }

    /// Every leaf error, flattening `Invalid`
    pub fn errors(&self) -> Vec<&PlanError> {
        match self {
            PlanError::Invalid(errors) => errors.iter().flat_map(|e| e.errors()).collect(),
            other => vec![other],
        }
    }

    /// Entry name the error is attributed to, if any
    pub fn entry(&self) -> Option<&str> {
        match self {
            PlanError::Validation { entry, .. } => Some(entry),
            PlanError::DependencyUnresolved { from, .. } => Some(from),
            _ => None,
        }
    }
}

impl From<TopologyError> for PlanError {
    fn from(err: TopologyError) -> Self {
        match err {
            TopologyError::InvalidOption { entry, message } => PlanError::Validation { entry, message },
            other => PlanError::Validation {
                entry: "topology".to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for PlanError {
    fn from(err: serde_json::Error) -> Self {
        PlanError::Json(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_many() {
        assert!(PlanError::from_many(vec![]).is_none());

        let single = PlanError::from_many(vec![PlanError::validation("orders", "bad")]).unwrap();
        assert!(matches!(single, PlanError::Validation { .. }));

        let many = PlanError::from_many(vec![
            PlanError::validation("orders", "bad"),
            PlanError::unresolved("workloads", "missing"),
        ])
        .unwrap();
        assert_eq!(many.errors().len(), 2);
        assert!(many.to_string().contains("2 errors"));
    }

    #[test]
    fn test_topology_error_maps_to_validation() {
        let err: PlanError = TopologyError::option("orders", "missing required 'engine-version'").into();
        assert_eq!(err.entry(), Some("orders"));
    }

    #[test]
    fn test_cycle_display() {
        let err = PlanError::CycleDetected(vec![NodeId::new("a"), NodeId::new("b")]);
        assert_eq!(err.to_string(), "Cycle detected between: a, b");
    }
}
