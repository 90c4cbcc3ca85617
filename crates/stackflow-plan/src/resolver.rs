//! Existence resolver for account-wide singletons
//!
//! A singleton (an identity provider bound to one cluster issuer) is looked
//! up by a deterministic key. The first request for a key asks the injected
//! [`ExistenceCheck`]; every later request in the same run is answered from
//! the cache and yields the same node.

use crate::error::{PlanError, Result};
use crate::graph::{EdgeKind, ResourceGraph};
use crate::node::{IssuerSource, NodeConfig, NodeId, NodeOrigin, NodeStatus, ResourceKind, ResourceNode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const WORKLOAD_AUDIENCE: &str = "sts.amazonaws.com";

/// Stable identity of a singleton within an account and region
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LookupKey {
    pub kind: ResourceKind,
    pub account: String,
    pub region: String,
    pub identity: String,
}

impl LookupKey {
    pub fn new(
        kind: ResourceKind,
        account: impl Into<String>,
        region: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            account: account.into(),
            region: region.into(),
            identity: identity.into(),
        }
    }

    /// Key of the identity provider federating a cluster's issuer
    pub fn identity_provider(account: &str, region: &str, cluster: &str) -> Self {
        Self::new(
            ResourceKind::IdentityProvider,
            account,
            region,
            format!("cluster/{}", cluster),
        )
    }

    /// SHA-256 of the key, hex encoded
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.kind, self.account, self.region, self.identity)
    }
}

/// A resource the existence check found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingRef {
    pub provider_id: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Existence-check collaborator. Must be idempotent and side-effect free.
pub trait ExistenceCheck: Send + Sync {
    fn exists(&self, key: &LookupKey) -> Result<Option<ExistingRef>>;
}

/// Nothing exists yet
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExisting;

impl ExistenceCheck for NoExisting {
    fn exists(&self, _key: &LookupKey) -> Result<Option<ExistingRef>> {
        Ok(None)
    }
}

/// Existence check backed by a fixed set of references; counts queries
#[derive(Debug, Default)]
pub struct InMemoryExistence {
    existing: HashMap<LookupKey, ExistingRef>,
    queries: AtomicUsize,
}

impl InMemoryExistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: LookupKey, existing: ExistingRef) -> Self {
        self.existing.insert(key, existing);
        self
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl ExistenceCheck for InMemoryExistence {
    fn exists(&self, key: &LookupKey) -> Result<Option<ExistingRef>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.existing.get(key).cloned())
    }
}

/// Cached resolution of one lookup key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSingleton {
    pub lookup_key: LookupKey,
    pub existing: Option<ExistingRef>,
    pub node: NodeId,
}

/// Per-run resolver; the cache lives exactly as long as the planning run
pub struct ExistenceResolver<'a> {
    check: &'a dyn ExistenceCheck,
    account: String,
    region: String,
    cache: BTreeMap<LookupKey, GlobalSingleton>,
    /// Keys whose resolution failed; reported once, never queried again
    failed: BTreeSet<LookupKey>,
}

impl<'a> ExistenceResolver<'a> {
    pub fn new(check: &'a dyn ExistenceCheck, account: &str, region: &str) -> Self {
        Self {
            check,
            account: account.to_string(),
            region: region.to_string(),
            cache: BTreeMap::new(),
            failed: BTreeSet::new(),
        }
    }

    /// Resolve the identity provider for `cluster`, binding an existing one
    /// or emitting a new node. Returns the provider's node id, or `None`
    /// when an earlier request for the same key already failed.
    pub fn identity_provider(&mut self, graph: &mut ResourceGraph, cluster: &NodeId) -> Result<Option<NodeId>> {
        let key = LookupKey::identity_provider(&self.account, &self.region, cluster.as_str());
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(key = %key, node = %cached.node, "Singleton resolved from cache");
            return Ok(Some(cached.node.clone()));
        }
        if self.failed.contains(&key) {
            tracing::debug!(key = %key, "Singleton resolution already failed");
            return Ok(None);
        }

        match self.resolve_identity_provider(graph, cluster, &key) {
            Ok(id) => Ok(Some(id)),
            Err(err) => {
                self.failed.insert(key);
                Err(err)
            }
        }
    }

    fn resolve_identity_provider(
        &mut self,
        graph: &mut ResourceGraph,
        cluster: &NodeId,
        key: &LookupKey,
    ) -> Result<NodeId> {
        let key = key.clone();
        let existing = self.check.exists(&key)?;
        let id = NodeId::new(format!("oidc-{}", cluster));
        let config = NodeConfig::IdentityProvider {
            issuer: IssuerSource::Cluster {
                cluster: cluster.clone(),
            },
            audience: WORKLOAD_AUDIENCE.to_string(),
        };

        match &existing {
            Some(found) => {
                verify(&key, found)?;
                let mut node = ResourceNode::new(id.clone(), ResourceKind::IdentityProvider, config, "");
                node.origin = NodeOrigin::Existing {
                    provider_id: found.provider_id.clone(),
                };
                node.provider_id = Some(found.provider_id.clone());
                node.attributes = found.attributes.clone();
                graph.add_node(node)?;
                graph.set_status(&id, NodeStatus::Provisioned)?;
                tracing::info!(key = %key, provider_id = %found.provider_id, "Binding existing singleton");
            }
            None => {
                graph.add_node(ResourceNode::new(
                    id.clone(),
                    ResourceKind::IdentityProvider,
                    config,
                    cluster.as_str(),
                ))?;
                graph.add_edge(cluster, &id, EdgeKind::ExplicitOrder)?;
                tracing::debug!(key = %key, node = %id, "Singleton will be created");
            }
        }

        self.cache.insert(
            key.clone(),
            GlobalSingleton {
                lookup_key: key,
                existing,
                node: id.clone(),
            },
        );
        Ok(id)
    }

    pub fn singletons(&self) -> impl Iterator<Item = &GlobalSingleton> {
        self.cache.values()
    }
}

fn verify(key: &LookupKey, found: &ExistingRef) -> Result<()> {
    if found.kind != key.kind {
        return Err(PlanError::Conflict {
            key: key.to_string(),
            message: format!("existing resource '{}' is a {}, expected {}", found.provider_id, found.kind, key.kind),
        });
    }
    if let Some(recorded) = found.attributes.get("lookup_key").and_then(|v| v.as_str())
        && recorded != key.to_string()
    {
        return Err(PlanError::Conflict {
            key: key.to_string(),
            message: format!(
                "existing resource '{}' was recorded under '{}'",
                found.provider_id, recorded
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_core::{ClusterConfig, PartitionRole};

    fn graph_with_cluster() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph
            .add_node(
                ResourceNode::new(
                    "workloads",
                    ResourceKind::Cluster,
                    NodeConfig::Cluster(ClusterConfig {
                        version: "1.32".into(),
                        logging: Vec::new(),
                        node_group: None,
                    }),
                    "workloads",
                )
                .in_partition(Some(PartitionRole::PrivateEgress)),
            )
            .unwrap();
        graph
    }

    fn existing(kind: ResourceKind) -> ExistingRef {
        ExistingRef {
            provider_id: "oidc.eks.us-east-1.amazonaws.com/id/ABC".into(),
            kind,
            attributes: BTreeMap::from([(
                "arn".to_string(),
                serde_json::json!("arn:aws:iam::123456789012:oidc-provider/oidc.eks.us-east-1.amazonaws.com/id/ABC"),
            )]),
        }
    }

    #[test]
    fn test_lookup_key_format() {
        let key = LookupKey::identity_provider("123456789012", "us-east-1", "workloads");
        assert_eq!(key.to_string(), "identity-provider:123456789012:us-east-1:cluster/workloads");
        assert_eq!(key.digest().len(), 64);
        assert_eq!(key.digest(), key.clone().digest());
    }

    #[test]
    fn test_second_request_uses_cache() {
        let check = InMemoryExistence::new();
        let mut graph = graph_with_cluster();
        let mut resolver = ExistenceResolver::new(&check, "123456789012", "us-east-1");
        let cluster = NodeId::new("workloads");

        let first = resolver.identity_provider(&mut graph, &cluster).unwrap().unwrap();
        let second = resolver.identity_provider(&mut graph, &cluster).unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(check.query_count(), 1);
        assert_eq!(graph.nodes_of_kind(ResourceKind::IdentityProvider).len(), 1);
        assert_eq!(graph.node(&first).unwrap().status, NodeStatus::Declared);
    }

    #[test]
    fn test_binds_existing_provider() {
        let key = LookupKey::identity_provider("123456789012", "us-east-1", "workloads");
        let check = InMemoryExistence::new().with(key, existing(ResourceKind::IdentityProvider));
        let mut graph = graph_with_cluster();
        let mut resolver = ExistenceResolver::new(&check, "123456789012", "us-east-1");

        let id = resolver
            .identity_provider(&mut graph, &NodeId::new("workloads"))
            .unwrap()
            .unwrap();
        let node = graph.node(&id).unwrap();
        assert!(node.is_existing());
        assert_eq!(node.status, NodeStatus::Provisioned);
        assert!(node.attribute("arn").is_some());
        // Bound providers are not ordered after the cluster
        assert!(graph.predecessors(&id).is_empty());
    }

    #[test]
    fn test_kind_mismatch_is_conflict() {
        let key = LookupKey::identity_provider("123456789012", "us-east-1", "workloads");
        let check = InMemoryExistence::new().with(key, existing(ResourceKind::Role));
        let mut graph = graph_with_cluster();
        let mut resolver = ExistenceResolver::new(&check, "123456789012", "us-east-1");

        let err = resolver
            .identity_provider(&mut graph, &NodeId::new("workloads"))
            .unwrap_err();
        assert!(matches!(err, PlanError::Conflict { .. }));
    }

    #[test]
    fn test_conflict_is_reported_once() {
        let key = LookupKey::identity_provider("123456789012", "us-east-1", "workloads");
        let check = InMemoryExistence::new().with(key, existing(ResourceKind::Role));
        let mut graph = graph_with_cluster();
        let mut resolver = ExistenceResolver::new(&check, "123456789012", "us-east-1");
        let cluster = NodeId::new("workloads");

        assert!(resolver.identity_provider(&mut graph, &cluster).is_err());
        assert_eq!(resolver.identity_provider(&mut graph, &cluster).unwrap(), None);
        assert_eq!(check.query_count(), 1);
        assert_eq!(resolver.singletons().count(), 0);
        assert!(graph.nodes_of_kind(ResourceKind::IdentityProvider).is_empty());
    }

    #[test]
    fn test_recorded_key_mismatch_is_conflict() {
        let key = LookupKey::identity_provider("123456789012", "us-east-1", "workloads");
        let mut found = existing(ResourceKind::IdentityProvider);
        found.attributes.insert(
            "lookup_key".into(),
            serde_json::json!("identity-provider:123456789012:us-east-1:cluster/other"),
        );
        let check = InMemoryExistence::new().with(key, found);
        let mut graph = graph_with_cluster();
        let mut resolver = ExistenceResolver::new(&check, "123456789012", "us-east-1");

        assert!(matches!(
            resolver.identity_provider(&mut graph, &NodeId::new("workloads")),
            Err(PlanError::Conflict { .. })
        ));
    }
}
