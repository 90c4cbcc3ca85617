//! Provisioning plan

use crate::error::Result;
use crate::graph::ResourceGraph;
use crate::node::{IssuerSource, NodeConfig, NodeId, ResourceKind, ResourceNode};
use crate::partition::NetworkPlan;
use crate::policy::AccessArtifacts;
use crate::provisioner::node_role_id;
use crate::resolver::GlobalSingleton;
use crate::scheduler::{PlanStep, StepAction};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use stackflow_core::OutputDecl;
use std::collections::BTreeMap;

/// Validated, ordered plan for one topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningPlan {
    pub name: String,
    pub account: String,
    pub region: String,
    pub network: NetworkPlan,
    pub graph: ResourceGraph,
    pub steps: Vec<PlanStep>,
    pub artifacts: AccessArtifacts,
    pub singletons: Vec<GlobalSingleton>,
    pub outputs: Vec<OutputDecl>,

    /// SHA-256 over the graph, steps and artifacts
    pub fingerprint: String,
}

impl ProvisioningPlan {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        account: String,
        region: String,
        network: NetworkPlan,
        graph: ResourceGraph,
        steps: Vec<PlanStep>,
        artifacts: AccessArtifacts,
        singletons: Vec<GlobalSingleton>,
        outputs: Vec<OutputDecl>,
    ) -> Result<Self> {
        let fingerprint = fingerprint(&graph, &steps, &artifacts)?;
        Ok(Self {
            name,
            account,
            region,
            network,
            graph,
            steps,
            artifacts,
            singletons,
            outputs,
            fingerprint,
        })
    }

    pub fn step(&self, node: &NodeId) -> Option<&PlanStep> {
        self.steps.iter().find(|s| &s.node == node)
    }

    /// Position of a node in the plan
    pub fn position(&self, node: &NodeId) -> Option<usize> {
        self.step(node).map(|s| s.index)
    }

    /// Teardown order: strict reverse of the plan, bound nodes excluded
    pub fn retirement_order(&self) -> Vec<NodeId> {
        self.steps
            .iter()
            .rev()
            .filter(|s| s.action == StepAction::Create)
            .map(|s| s.node.clone())
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        let count = |action: StepAction| self.steps.iter().filter(|s| s.action == action).count();
        PlanSummary {
            create: count(StepAction::Create),
            bind: count(StepAction::Bind),
            security_rules: self.artifacts.security_rules.len(),
            identity_bindings: self.artifacts.bindings.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub bind: usize,
    pub security_rules: usize,
    pub identity_bindings: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} existing, {} security rules, {} identity bindings",
            self.create, self.bind, self.security_rules, self.identity_bindings
        )
    }
}

fn fingerprint(graph: &ResourceGraph, steps: &[PlanStep], artifacts: &AccessArtifacts) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(graph)?);
    hasher.update(serde_json::to_vec(steps)?);
    hasher.update(serde_json::to_vec(artifacts)?);
    Ok(format!("{:x}", hasher.finalize()))
}

fn placeholder(node: &NodeId, field: &str) -> Value {
    Value::String(node.field(field).placeholder())
}

/// Request configuration for every node: the node's own configuration plus
/// the synthesized documents and the references it needs.
pub(crate) fn configurations(
    graph: &ResourceGraph,
    artifacts: &AccessArtifacts,
) -> Result<BTreeMap<NodeId, Value>> {
    graph
        .nodes()
        .map(|node| Ok((node.id.clone(), configuration(graph, artifacts, node)?)))
        .collect()
}

fn configuration(graph: &ResourceGraph, artifacts: &AccessArtifacts, node: &ResourceNode) -> Result<Value> {
    let mut map = match serde_json::to_value(&node.config)? {
        Value::Object(map) => map,
        other => return Ok(other),
    };

    map.insert("name".into(), json!(node.id));
    if let Some(partition) = node.partition {
        map.insert("partition".into(), json!(partition));
    }
    let parent = graph.parent(&node.id);

    match &node.config {
        NodeConfig::Partition { .. } | NodeConfig::Endpoint { .. } => {
            if let Some(network) = parent {
                map.insert("network_id".into(), placeholder(network, "id"));
            }
        }
        NodeConfig::SecurityGroup { .. } => {
            if let Some(parent) = parent {
                let field = match graph.node(parent).map(|p| p.kind) {
                    Some(ResourceKind::Cluster) => "security_group_id",
                    _ => "id",
                };
                let key = if field == "id" { "network_id" } else { "group_id" };
                map.insert(key.into(), placeholder(parent, field));
            }
            map.insert(
                "ingress".into(),
                serde_json::to_value(artifacts.rules_for(&node.id))?,
            );
        }
        NodeConfig::Cluster(_)
        | NodeConfig::Broker(_)
        | NodeConfig::DatabaseCluster(_)
        | NodeConfig::Instance(_) => {
            if let Some(partition) = parent {
                map.insert("subnet_group".into(), placeholder(partition, "id"));
            }
            // Groups created ahead of the resource are handed to it
            for sg in graph.predecessors(&node.id) {
                if let Some(ResourceNode {
                    config: NodeConfig::SecurityGroup { owner, .. },
                    ..
                }) = graph.node(sg)
                    && owner == &node.id
                {
                    map.insert("security_group_id".into(), placeholder(sg, "group_id"));
                }
            }
            if let NodeConfig::Cluster(cluster) = &node.config
                && cluster.node_group.is_some()
            {
                let role = node_role_id(node.id.as_str());
                if graph.node(&role).is_some() {
                    map.insert("node_role_arn".into(), placeholder(&role, "arn"));
                }
            }
        }
        NodeConfig::DatabaseInstance { cluster, .. } => {
            map.insert("cluster_id".into(), placeholder(cluster, "id"));
        }
        NodeConfig::Role { .. } => {
            if let Some(document) = artifacts.trust_document(&node.id) {
                map.insert("assume_role_policy".into(), serde_json::to_value(document)?);
            }
        }
        NodeConfig::Policy { role, .. } => {
            map.insert("role_arn".into(), placeholder(role, "arn"));
            if let Some(document) = artifacts.permission_document(&node.id) {
                map.insert("document".into(), serde_json::to_value(document)?);
            }
        }
        NodeConfig::IdentityProvider { issuer, audience } => {
            let IssuerSource::Cluster { cluster } = issuer;
            map.insert("url".into(), placeholder(cluster, "issuer_url"));
            map.insert("client_ids".into(), json!([audience]));
        }
        NodeConfig::Network { .. } | NodeConfig::Table(_) | NodeConfig::Registry(_) => {}
    }

    Ok(Value::Object(map))
}
