//! Control-plane and execution error types

use stackflow_plan::{NodeId, PlanError};
use thiserror::Error;

/// Cloud errors
#[derive(Error, Debug)]
pub enum CloudError {
    /// A node could not be brought to Provisioned
    #[error("Provisioning of '{node}' failed after {attempts} attempt(s): {message}")]
    ProvisioningFailure {
        node: NodeId,
        attempts: u32,
        message: String,
    },

    /// Control-plane call failed; `retryable` marks throttling and other
    /// transient conditions
    #[error("Control plane error: {message}")]
    Api { message: String, retryable: bool },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("'{node}' needs {reference}, which is not resolved")]
    UnresolvedReference { node: NodeId, reference: String },

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn api(message: impl Into<String>) -> Self {
        CloudError::Api {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        CloudError::Api {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloudError::Api { retryable: true, .. } | CloudError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
