//! Resource nodes

use crate::partition::Subnet;
use serde::{Deserialize, Serialize};
use stackflow_core::{
    BrokerConfig, ClusterConfig, DatabaseConfig, DeclaredKind, InstanceConfig, PartitionRole,
    PermissionRequest, PrincipalSpec, RegistryConfig, TableConfig,
};
use std::collections::BTreeMap;
use std::fmt;

/// Node identifier, unique within a graph and stable across re-planning
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reference to one of this node's resolved fields
    pub fn field(&self, field: impl Into<String>) -> ValueRef {
        ValueRef {
            node: self.clone(),
            field: field.into(),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// Kind of a node in the resource graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    Partition,
    Endpoint,
    SecurityGroup,
    Cluster,
    Broker,
    DatabaseCluster,
    DatabaseInstance,
    Table,
    Registry,
    Role,
    Policy,
    IdentityProvider,
    Instance,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Partition => "partition",
            ResourceKind::Endpoint => "endpoint",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Broker => "broker",
            ResourceKind::DatabaseCluster => "database-cluster",
            ResourceKind::DatabaseInstance => "database-instance",
            ResourceKind::Table => "table",
            ResourceKind::Registry => "registry",
            ResourceKind::Role => "role",
            ResourceKind::Policy => "policy",
            ResourceKind::IdentityProvider => "identity-provider",
            ResourceKind::Instance => "instance",
        }
    }

    /// Fields the control plane resolves once the node is provisioned
    pub fn resolved_fields(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::SecurityGroup => &["arn", "id", "group_id"],
            ResourceKind::Cluster => &["arn", "id", "endpoint", "issuer_url", "oidc_issuer", "security_group_id"],
            ResourceKind::Broker => &["arn", "id", "bootstrap_brokers"],
            ResourceKind::DatabaseCluster => {
                &["arn", "id", "endpoint", "reader_endpoint", "credentials_secret", "port"]
            }
            ResourceKind::DatabaseInstance => &["arn", "id", "endpoint"],
            ResourceKind::Registry => &["arn", "id", "repository_uri"],
            ResourceKind::IdentityProvider => &["arn", "id", "oidc_issuer"],
            ResourceKind::Instance => &["arn", "id", "public_ip", "private_ip"],
            _ => &["arn", "id"],
        }
    }
}

impl From<DeclaredKind> for ResourceKind {
    /// Kind of the primary node a declaration produces
    fn from(kind: DeclaredKind) -> Self {
        match kind {
            DeclaredKind::Cluster => ResourceKind::Cluster,
            DeclaredKind::Broker => ResourceKind::Broker,
            DeclaredKind::Database => ResourceKind::DatabaseCluster,
            DeclaredKind::Table => ResourceKind::Table,
            DeclaredKind::Registry => ResourceKind::Registry,
            DeclaredKind::Role => ResourceKind::Role,
            DeclaredKind::Instance => ResourceKind::Instance,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Emitted by a provisioner
    Declared,
    /// Every inbound edge resolved; ready for execution
    Planned,
    /// Control-plane operation succeeded, resolved fields known
    Provisioned,
    /// Control-plane operation failed
    Failed,
    /// A transitive dependency failed
    Blocked,
    /// Torn down
    Retired,
}

impl NodeStatus {
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (self, next),
            (Declared, Planned)
                | (Declared, Provisioned)
                | (Planned, Provisioned)
                | (Planned, Failed)
                | (Planned, Blocked)
                | (Provisioned, Retired)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Provisioned | NodeStatus::Failed | NodeStatus::Blocked | NodeStatus::Retired
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Declared => "declared",
            NodeStatus::Planned => "planned",
            NodeStatus::Provisioned => "provisioned",
            NodeStatus::Failed => "failed",
            NodeStatus::Blocked => "blocked",
            NodeStatus::Retired => "retired",
        };
        f.write_str(s)
    }
}

/// Reference to a value only known once `node` is provisioned.
/// Rendered as `${node.field}` inside request configurations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValueRef {
    pub node: NodeId,
    pub field: String,
}

impl ValueRef {
    pub fn placeholder(&self) -> String {
        self.to_string()
    }

    /// Every `${node.field}` placeholder in `text`
    pub fn scan(text: &str) -> Vec<ValueRef> {
        let mut refs = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else { break };
            if let Some((node, field)) = after[..end].rsplit_once('.')
                && !node.is_empty()
                && !field.is_empty()
            {
                refs.push(NodeId::new(node).field(field));
            }
            rest = &after[end + 1..];
        }
        refs
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.node, self.field)
    }
}

/// Where the issuer of an identity provider comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum IssuerSource {
    /// Discovered from a cluster after it is provisioned
    Cluster { cluster: NodeId },
}

/// Kind-specific configuration of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NodeConfig {
    Network {
        name: String,
        cidr: String,
        zones: Vec<String>,
    },
    Partition {
        role: PartitionRole,
        cidr: String,
        subnets: Vec<Subnet>,
    },
    Endpoint {
        service: String,
        route_partitions: Vec<PartitionRole>,
    },
    SecurityGroup {
        owner: NodeId,
        allow_all_outbound: bool,
    },
    Cluster(ClusterConfig),
    Broker(BrokerConfig),
    DatabaseCluster(DatabaseConfig),
    DatabaseInstance {
        cluster: NodeId,
        instance_class: String,
        writer: bool,
    },
    Table(TableConfig),
    Registry(RegistryConfig),
    Role {
        trusted_by: Vec<PrincipalSpec>,
        managed_policies: Vec<String>,
    },
    Policy {
        role: NodeId,
        permissions: Vec<PermissionRequest>,
    },
    IdentityProvider {
        issuer: IssuerSource,
        audience: String,
    },
    Instance(InstanceConfig),
}

impl NodeConfig {
    /// Port consumers reach the resource on
    pub fn service_port(&self) -> Option<u16> {
        match self {
            NodeConfig::Cluster(_) => Some(443),
            NodeConfig::Broker(_) => Some(9092),
            NodeConfig::DatabaseCluster(c) => Some(c.engine.default_port()),
            NodeConfig::Instance(c) => Some(c.admin_ingress.as_ref().map(|i| i.port).unwrap_or(22)),
            _ => None,
        }
    }
}

/// How a node came to be in the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "kebab-case")]
pub enum NodeOrigin {
    /// Produced from a topology entry (or the network declaration)
    Declared { entry: String },
    /// Bound to a resource that already exists; never created or deleted
    Existing { provider_id: String },
}

/// A single resource instance in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: NodeId,
    pub kind: ResourceKind,

    /// Network partition the node lives in
    pub partition: Option<PartitionRole>,

    pub config: NodeConfig,
    pub status: NodeStatus,
    pub origin: NodeOrigin,

    /// Provider-assigned identifier once provisioned
    pub provider_id: Option<String>,

    /// Fields resolved after provisioning (endpoint, issuer_url, …)
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl ResourceNode {
    pub fn new(
        id: impl Into<NodeId>,
        kind: ResourceKind,
        config: NodeConfig,
        entry: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            partition: None,
            config,
            status: NodeStatus::Declared,
            origin: NodeOrigin::Declared {
                entry: entry.into(),
            },
            provider_id: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn in_partition(mut self, role: Option<PartitionRole>) -> Self {
        self.partition = role;
        self
    }

    pub fn is_existing(&self) -> bool {
        matches!(self.origin, NodeOrigin::Existing { .. })
    }

    /// Topology entry that produced the node
    pub fn entry(&self) -> Option<&str> {
        match &self.origin {
            NodeOrigin::Declared { entry } => Some(entry),
            NodeOrigin::Existing { .. } => None,
        }
    }

    pub fn attribute(&self, field: &str) -> Option<&serde_json::Value> {
        self.attributes.get(field)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(NodeStatus::Declared.can_transition_to(NodeStatus::Planned));
        assert!(NodeStatus::Planned.can_transition_to(NodeStatus::Blocked));
        assert!(NodeStatus::Provisioned.can_transition_to(NodeStatus::Retired));
        assert!(!NodeStatus::Failed.can_transition_to(NodeStatus::Provisioned));
        assert!(!NodeStatus::Declared.can_transition_to(NodeStatus::Retired));
        assert!(!NodeStatus::Retired.can_transition_to(NodeStatus::Planned));
    }

    #[test]
    fn test_value_ref_placeholder() {
        let r = NodeId::new("workloads").field("oidc_issuer");
        assert_eq!(r.placeholder(), "${workloads.oidc_issuer}");
    }

    #[test]
    fn test_value_ref_scan() {
        let text = "arn:${oidc-workloads.arn}/x and ${workloads.oidc_issuer}:sub $notref {x}";
        let refs = ValueRef::scan(text);
        assert_eq!(
            refs,
            vec![
                NodeId::new("oidc-workloads").field("arn"),
                NodeId::new("workloads").field("oidc_issuer"),
            ]
        );
    }

    #[test]
    fn test_value_ref_scan_unterminated() {
        assert!(ValueRef::scan("${workloads.arn").is_empty());
        assert!(ValueRef::scan("${nofield}").is_empty());
    }
}
