//! Simulated control plane
//!
//! Deterministic in-memory control plane. Every resource becomes available
//! after a configurable number of `describe` polls and reports the resolved
//! fields its kind defines. Failures can be injected per node. An optional
//! latency keeps mutations in flight long enough to observe concurrency.

use crate::error::{CloudError, Result};
use crate::provider::{Availability, ControlPlane, CreateRequest, Created, Description};
use async_trait::async_trait;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use stackflow_plan::{NodeId, ResourceKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
struct SimResource {
    node: NodeId,
    kind: ResourceKind,
    configuration: Value,
    polls: u32,
}

#[derive(Debug, Default)]
struct Inner {
    by_token: HashMap<String, String>,
    resources: BTreeMap<String, SimResource>,
    create_calls: HashMap<NodeId, u32>,
    created: Vec<NodeId>,
    deleted: Vec<NodeId>,
}

/// In-memory control plane with failure injection
#[derive(Debug, Default)]
pub struct SimulatedControlPlane {
    inner: Mutex<Inner>,
    failing: HashMap<NodeId, String>,
    flaky: HashMap<NodeId, u32>,
    failing_deletes: HashMap<NodeId, String>,
    pending_polls: u32,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Counts one create or delete as in flight until dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimulatedControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creating `node` always fails
    pub fn fail(mut self, node: impl Into<NodeId>, message: impl Into<String>) -> Self {
        self.failing.insert(node.into(), message.into());
        self
    }

    /// The first `failures` creates of `node` fail with a transient error
    pub fn flaky(mut self, node: impl Into<NodeId>, failures: u32) -> Self {
        self.flaky.insert(node.into(), failures);
        self
    }

    /// Deleting `node` always fails
    pub fn fail_delete(mut self, node: impl Into<NodeId>, message: impl Into<String>) -> Self {
        self.failing_deletes.insert(node.into(), message.into());
        self
    }

    /// Resources report `Pending` for this many polls before becoming available
    pub fn pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Every create and delete takes at least `latency`
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Most creates and deletes ever in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Nodes in the order their resources were created
    pub fn created(&self) -> Vec<NodeId> {
        self.lock().created.clone()
    }

    /// Nodes in the order their resources were deleted
    pub fn deleted(&self) -> Vec<NodeId> {
        self.lock().deleted.clone()
    }

    /// Create calls received for `node`, retries included
    pub fn create_calls(&self, node: &NodeId) -> u32 {
        self.lock().create_calls.get(node).copied().unwrap_or(0)
    }

    /// Configuration the control plane received for `node`
    pub fn configuration(&self, node: &NodeId) -> Option<Value> {
        self.lock()
            .resources
            .values()
            .find(|r| &r.node == node)
            .map(|r| r.configuration.clone())
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        InFlight(&self.in_flight)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves the data consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ControlPlane for SimulatedControlPlane {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn create(&self, request: &CreateRequest) -> Result<Created> {
        let _in_flight = self.enter().await;
        let mut inner = self.lock();
        let calls = {
            let calls = inner.create_calls.entry(request.node.clone()).or_default();
            *calls += 1;
            *calls
        };

        if let Some(provider_id) = inner.by_token.get(&request.idempotency_token) {
            return Ok(Created {
                provider_id: provider_id.clone(),
            });
        }
        if let Some(message) = self.failing.get(&request.node) {
            return Err(CloudError::api(message.clone()));
        }
        if self.flaky.get(&request.node).is_some_and(|n| calls <= *n) {
            return Err(CloudError::transient(format!("throttled creating {}", request.node)));
        }

        let provider_id = format!("sim-{}-{}", request.kind, request.node);
        inner
            .by_token
            .insert(request.idempotency_token.clone(), provider_id.clone());
        inner.resources.insert(
            provider_id.clone(),
            SimResource {
                node: request.node.clone(),
                kind: request.kind,
                configuration: request.configuration.clone(),
                polls: 0,
            },
        );
        inner.created.push(request.node.clone());
        Ok(Created { provider_id })
    }

    async fn describe(&self, kind: ResourceKind, provider_id: &str) -> Result<Description> {
        let mut inner = self.lock();
        let resource = inner
            .resources
            .get_mut(provider_id)
            .filter(|r| r.kind == kind)
            .ok_or_else(|| CloudError::ResourceNotFound(provider_id.to_string()))?;

        if resource.polls < self.pending_polls {
            resource.polls += 1;
            return Ok(Description {
                availability: Availability::Pending,
                attributes: BTreeMap::new(),
            });
        }

        Ok(Description {
            availability: Availability::Available,
            attributes: attributes(provider_id, resource),
        })
    }

    async fn delete(&self, kind: ResourceKind, provider_id: &str) -> Result<()> {
        let _in_flight = self.enter().await;
        let mut inner = self.lock();
        let node = match inner.resources.get(provider_id) {
            Some(r) if r.kind == kind => r.node.clone(),
            _ => return Err(CloudError::ResourceNotFound(provider_id.to_string())),
        };
        if let Some(message) = self.failing_deletes.get(&node) {
            return Err(CloudError::api(message.clone()));
        }
        inner.resources.remove(provider_id);
        inner.deleted.push(node);
        Ok(())
    }
}

/// Deterministic address in 10.0.0.0/8 derived from the node id
fn address(node: &NodeId, salt: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", salt, node).as_bytes());
    format!("10.{}.{}.{}", digest[0], digest[1], digest[2].max(1))
}

fn attributes(provider_id: &str, resource: &SimResource) -> BTreeMap<String, Value> {
    let node = &resource.node;
    let mut attrs = BTreeMap::from([
        ("arn".to_string(), json!(format!("arn:sim:{}::{}", resource.kind, node))),
        ("id".to_string(), json!(provider_id)),
    ]);
    let mut set = |key: &str, value: Value| {
        attrs.insert(key.to_string(), value);
    };

    match resource.kind {
        ResourceKind::SecurityGroup => set("group_id", json!(format!("sg-{}", node))),
        ResourceKind::Cluster => {
            let issuer = format!("oidc.sim/id/{}", node);
            set("endpoint", json!(format!("https://{}.cluster.sim", node)));
            set("issuer_url", json!(format!("https://{}", issuer)));
            set("oidc_issuer", json!(issuer));
            set("security_group_id", json!(format!("sg-{}-cluster", node)));
        }
        ResourceKind::Broker => {
            let brokers = resource.configuration["brokers"].as_u64().unwrap_or(1);
            let list: Vec<String> = (1..=brokers).map(|i| format!("b-{}.{}.sim:9092", i, node)).collect();
            set("bootstrap_brokers", json!(list.join(",")));
        }
        ResourceKind::DatabaseCluster => {
            let port = match resource.configuration["engine"].as_str() {
                Some("aurora-mysql") => 3306,
                _ => 5432,
            };
            set("endpoint", json!(format!("{}.cluster.sim", node)));
            set("reader_endpoint", json!(format!("{}.cluster-ro.sim", node)));
            set("credentials_secret", json!(format!("arn:sim:secret::{}-credentials", node)));
            set("port", json!(port));
        }
        ResourceKind::DatabaseInstance => set("endpoint", json!(format!("{}.instance.sim", node))),
        ResourceKind::Registry => set("repository_uri", json!(format!("registry.sim/{}", node))),
        ResourceKind::IdentityProvider => {
            let url = resource.configuration["url"].as_str().unwrap_or_default();
            set("oidc_issuer", json!(url.trim_start_matches("https://")));
        }
        ResourceKind::Instance => {
            set("private_ip", json!(address(node, "private")));
            set("public_ip", json!(address(node, "public")));
        }
        ResourceKind::Network
        | ResourceKind::Partition
        | ResourceKind::Endpoint
        | ResourceKind::Table
        | ResourceKind::Role
        | ResourceKind::Policy => {}
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(node: &str, kind: ResourceKind, token: &str) -> CreateRequest {
        CreateRequest {
            node: NodeId::new(node),
            kind,
            idempotency_token: token.to_string(),
            configuration: json!({ "engine": "aurora-mysql" }),
        }
    }

    #[test]
    fn test_create_is_idempotent_per_token() {
        tokio_test::block_on(async {
            let cp = SimulatedControlPlane::new();
            let first = cp.create(&request("orders", ResourceKind::DatabaseCluster, "t1")).await.unwrap();
            let again = cp.create(&request("orders", ResourceKind::DatabaseCluster, "t1")).await.unwrap();
            assert_eq!(first, again);
            assert_eq!(cp.created().len(), 1);
            assert_eq!(cp.create_calls(&NodeId::new("orders")), 2);
        });
    }

    #[tokio::test]
    async fn test_describe_reports_kind_fields() {
        let cp = SimulatedControlPlane::new().pending_polls(1);
        let created = cp
            .create(&request("orders", ResourceKind::DatabaseCluster, "t1"))
            .await
            .unwrap();

        let pending = cp.describe(ResourceKind::DatabaseCluster, &created.provider_id).await.unwrap();
        assert_eq!(pending.availability, Availability::Pending);

        let ready = cp.describe(ResourceKind::DatabaseCluster, &created.provider_id).await.unwrap();
        assert_eq!(ready.availability, Availability::Available);
        for field in ResourceKind::DatabaseCluster.resolved_fields() {
            assert!(ready.attributes.contains_key(*field), "missing {}", field);
        }
        assert_eq!(ready.attributes["port"], 3306);
    }

    #[tokio::test]
    async fn test_flaky_then_succeeds() {
        let cp = SimulatedControlPlane::new().flaky("images", 1);
        let first = cp.create(&request("images", ResourceKind::Registry, "t")).await;
        assert!(first.unwrap_err().is_retryable());
        assert!(cp.create(&request("images", ResourceKind::Registry, "t")).await.is_ok());
    }

    #[tokio::test]
    async fn test_peak_in_flight_counts_overlapping_creates() {
        let cp = SimulatedControlPlane::new().latency(Duration::from_millis(20));
        let a = request("a", ResourceKind::Registry, "ta");
        let b = request("b", ResourceKind::Registry, "tb");
        let (first, second) = tokio::join!(cp.create(&a), cp.create(&b));
        assert!(first.is_ok() && second.is_ok());
        assert_eq!(cp.peak_in_flight(), 2);

        cp.create(&request("c", ResourceKind::Registry, "tc")).await.unwrap();
        assert_eq!(cp.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_delete_unknown_resource() {
        let cp = SimulatedControlPlane::new();
        let err = cp.delete(ResourceKind::Registry, "sim-registry-x").await.unwrap_err();
        assert!(matches!(err, CloudError::ResourceNotFound(_)));
    }
}
