//! Control-plane trait definition

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stackflow_plan::{NodeId, ResourceKind};
use std::collections::BTreeMap;
use std::time::Duration;

/// External control plane that creates, describes and deletes resources.
///
/// Implementations must treat `create` as idempotent for a given
/// `idempotency_token`: a retried request returns the resource the first
/// attempt created instead of creating another.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Returns the control plane name (e.g., "aws", "simulated")
    fn name(&self) -> &str;

    /// Start creating a resource
    async fn create(&self, request: &CreateRequest) -> Result<Created>;

    /// Current state of a resource
    async fn describe(&self, kind: ResourceKind, provider_id: &str) -> Result<Description>;

    /// Delete a resource
    async fn delete(&self, kind: ResourceKind, provider_id: &str) -> Result<()>;
}

/// Request to create one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub node: NodeId,
    pub kind: ResourceKind,

    /// Stable across retries and re-runs of the same plan
    pub idempotency_token: String,

    /// Configuration with every reference substituted
    pub configuration: serde_json::Value,
}

/// Acknowledgement of a create request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    pub provider_id: String,
}

/// Lifecycle reported by `describe`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum Availability {
    Pending,
    Available,
    Failed(String),
}

/// Result of `describe`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub availability: Availability,

    /// Resolved fields (endpoint, arn, …); complete once available
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Retry configuration for control-plane calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10000),
            backoff_multiplier: 2.0,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(8000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(10000)); // capped at max
    }

    #[test]
    fn test_immediate_retry() {
        let config = RetryConfig::immediate(4);
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }
}
