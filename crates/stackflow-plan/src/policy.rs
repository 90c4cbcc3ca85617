//! Access policy synthesizer
//!
//! Derives network ingress rules, trust policies, identity bindings and
//! permission statements from the relationships in a completed graph.
//! Values only known after provisioning are carried as `${node.field}`
//! placeholders.

use crate::context::PlanningContext;
use crate::error::{PlanError, Result};
use crate::graph::{EdgeKind, ResourceGraph};
use crate::node::{IssuerSource, NodeConfig, NodeId, ResourceKind, ResourceNode};
use serde::{Deserialize, Serialize};
use stackflow_core::{DeclaredKind, PermissionScope, PrincipalSpec};
use std::collections::{BTreeMap, BTreeSet};

pub const POLICY_VERSION: &str = "2012-10-17";
pub const ASSUME_ROLE: &str = "sts:AssumeRole";
pub const ASSUME_ROLE_WITH_WEB_IDENTITY: &str = "sts:AssumeRoleWithWebIdentity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self { from: port, to: port }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

/// Where allowed traffic originates
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RuleSource {
    /// A consumer's security group
    SecurityGroup { node: NodeId, group_id: String },
    /// An address block (administrative ingress)
    Cidr { cidr: String },
}

/// Generated network rule attached to the target's security group
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecurityRule {
    pub source: RuleSource,
    /// Resource being reached
    pub target: NodeId,
    /// Security group the rule is attached to
    pub security_group: NodeId,
    pub protocol: Protocol,
    pub ports: PortRange,
    pub direction: Direction,
    pub description: String,
}

/// Issuer plus subject match for a federated principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalCondition {
    pub issuer: String,
    pub subjects: Vec<String>,
    pub audience: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TrustPrincipal {
    Federated { provider: NodeId, arn: String },
    Service { services: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustPolicy {
    pub role: NodeId,
    pub principal: TrustPrincipal,
    pub condition: Option<PrincipalCondition>,
    /// ARN of the role being assumed
    pub resource: String,
    pub actions: BTreeSet<String>,
}

/// One permission statement, resources sorted
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionStatement {
    pub kind: DeclaredKind,
    pub resources: Vec<String>,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityBinding {
    pub federated_principal: String,
    pub provider: NodeId,
    pub role: NodeId,
    pub subjects: Vec<String>,
    pub policies: Vec<PermissionStatement>,
}

/// Rendered policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<BTreeMap<String, Vec<String>>>,
    pub action: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<BTreeMap<String, BTreeMap<String, Vec<String>>>>,
}

impl PolicyStatement {
    fn allow(action: Vec<String>) -> Self {
        Self {
            effect: "Allow".to_string(),
            principal: None,
            action,
            resource: None,
            condition: None,
        }
    }
}

/// Everything the synthesizer derives for one plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessArtifacts {
    pub security_rules: Vec<SecurityRule>,
    pub trust_policies: Vec<TrustPolicy>,
    pub bindings: Vec<IdentityBinding>,
    /// Statements keyed by policy node
    pub permissions: BTreeMap<NodeId, Vec<PermissionStatement>>,
}

impl AccessArtifacts {
    /// Rules attached to a security group
    pub fn rules_for(&self, security_group: &NodeId) -> Vec<&SecurityRule> {
        self.security_rules
            .iter()
            .filter(|r| &r.security_group == security_group)
            .collect()
    }

    pub fn trust_document(&self, role: &NodeId) -> Option<PolicyDocument> {
        let statement: Vec<PolicyStatement> = self
            .trust_policies
            .iter()
            .filter(|t| &t.role == role)
            .map(|t| {
                let mut s = PolicyStatement::allow(t.actions.iter().cloned().collect());
                s.principal = Some(match &t.principal {
                    TrustPrincipal::Federated { arn, .. } => {
                        BTreeMap::from([("Federated".to_string(), vec![arn.clone()])])
                    }
                    TrustPrincipal::Service { services } => {
                        BTreeMap::from([("Service".to_string(), services.clone())])
                    }
                });
                s.condition = t.condition.as_ref().map(|c| {
                    BTreeMap::from([(
                        "StringEquals".to_string(),
                        BTreeMap::from([
                            (format!("{}:aud", c.issuer), vec![c.audience.clone()]),
                            (format!("{}:sub", c.issuer), c.subjects.clone()),
                        ]),
                    )])
                });
                s
            })
            .collect();
        (!statement.is_empty()).then(|| PolicyDocument {
            version: POLICY_VERSION.to_string(),
            statement,
        })
    }

    pub fn permission_document(&self, policy: &NodeId) -> Option<PolicyDocument> {
        let statements = self.permissions.get(policy)?;
        Some(PolicyDocument {
            version: POLICY_VERSION.to_string(),
            statement: statements
                .iter()
                .map(|p| {
                    let mut s = PolicyStatement::allow(p.actions.clone());
                    s.resource = Some(p.resources.clone());
                    s
                })
                .collect(),
        })
    }
}

/// Value of `field` on `node`: the resolved value when known, else a placeholder
fn resolved(node: &ResourceNode, field: &str) -> String {
    match node.attribute(field).and_then(|v| v.as_str()) {
        Some(value) => value.to_string(),
        None => node.id.field(field).placeholder(),
    }
}

/// Arn and issuer of an identity provider
fn provider_identity(ctx: &PlanningContext, provider: &ResourceNode) -> (String, String) {
    let arn = provider.attribute("arn").and_then(|v| v.as_str());
    let issuer = provider.attribute("oidc_issuer").and_then(|v| v.as_str());
    match (&provider.provider_id, arn, issuer) {
        (_, Some(arn), Some(issuer)) => (arn.to_string(), issuer.to_string()),
        // Bound providers are identified by their issuer
        (Some(id), arn, _) if provider.is_existing() => (
            arn.map(str::to_string)
                .unwrap_or_else(|| ctx.identity_provider_arn(id)),
            id.clone(),
        ),
        _ => (resolved(provider, "arn"), resolved(provider, "oidc_issuer")),
    }
}

/// Derive every access artifact from the graph
pub fn synthesize(ctx: &PlanningContext, graph: &ResourceGraph) -> Result<AccessArtifacts> {
    let mut errors = Vec::new();
    let mut artifacts = AccessArtifacts::default();

    let groups: BTreeMap<&NodeId, &ResourceNode> = graph
        .nodes_of_kind(ResourceKind::SecurityGroup)
        .into_iter()
        .filter_map(|sg| match &sg.config {
            NodeConfig::SecurityGroup { owner, .. } => Some((owner, sg)),
            _ => None,
        })
        .collect();

    for edge in graph.edges_of_kind(EdgeKind::NetworkAccess) {
        match network_rule(graph, &groups, &edge.from, &edge.to) {
            Ok(rule) => artifacts.security_rules.push(rule),
            Err(e) => errors.push(e),
        }
    }
    for node in graph.nodes_of_kind(ResourceKind::Instance) {
        if let NodeConfig::Instance(config) = &node.config
            && let Some(ingress) = &config.admin_ingress
            && let Some(sg) = groups.get(&node.id)
        {
            artifacts.security_rules.push(SecurityRule {
                source: RuleSource::Cidr {
                    cidr: ingress.cidr.clone(),
                },
                target: node.id.clone(),
                security_group: sg.id.clone(),
                protocol: Protocol::Tcp,
                ports: PortRange::single(ingress.port),
                direction: Direction::Ingress,
                description: format!("admin access to {} from {}", node.id, ingress.cidr),
            });
        }
    }
    artifacts.security_rules.sort();

    for policy in graph.nodes_of_kind(ResourceKind::Policy) {
        if let NodeConfig::Policy { role, permissions } = &policy.config {
            let mut statements = Vec::new();
            for request in permissions {
                match permission_resources(ctx, graph, role, request.kind, &request.scope) {
                    Ok(resources) => statements.push(PermissionStatement {
                        kind: request.kind,
                        resources,
                        actions: request.actions.clone(),
                    }),
                    Err(e) => errors.push(e),
                }
            }
            statements.sort();
            artifacts.permissions.insert(policy.id.clone(), statements);
        }
    }

    for role in graph.nodes_of_kind(ResourceKind::Role) {
        if let NodeConfig::Role { trusted_by, .. } = &role.config {
            trust_for_role(ctx, graph, role, trusted_by, &mut artifacts);
        }
    }

    if let Some(err) = PlanError::from_many(errors) {
        return Err(err);
    }

    tracing::debug!(
        rules = artifacts.security_rules.len(),
        trust_policies = artifacts.trust_policies.len(),
        bindings = artifacts.bindings.len(),
        "Synthesized access artifacts"
    );
    Ok(artifacts)
}

fn network_rule(
    graph: &ResourceGraph,
    groups: &BTreeMap<&NodeId, &ResourceNode>,
    consumer: &NodeId,
    resource: &NodeId,
) -> Result<SecurityRule> {
    let no_group = |id: &NodeId| PlanError::validation(id.as_str(), "no security group to attach network access to");
    let source = groups.get(consumer).ok_or_else(|| no_group(consumer))?;
    let target = groups.get(resource).ok_or_else(|| no_group(resource))?;
    let port = graph
        .node(resource)
        .and_then(|n| n.config.service_port())
        .ok_or_else(|| PlanError::validation(resource.as_str(), "resource has no service port"))?;

    Ok(SecurityRule {
        source: RuleSource::SecurityGroup {
            node: source.id.clone(),
            group_id: resolved(source, "group_id"),
        },
        target: resource.clone(),
        security_group: target.id.clone(),
        protocol: Protocol::Tcp,
        ports: PortRange::single(port),
        direction: Direction::Ingress,
        description: format!("{} to {}", consumer, resource),
    })
}

/// Primary nodes declared with `kind`, in id order
fn declared_primaries(graph: &ResourceGraph, kind: DeclaredKind) -> Vec<&ResourceNode> {
    graph
        .nodes_of_kind(kind.into())
        .into_iter()
        .filter(|n| n.entry() == Some(n.id.as_str()))
        .collect()
}

fn permission_resources(
    ctx: &PlanningContext,
    graph: &ResourceGraph,
    role: &NodeId,
    kind: DeclaredKind,
    scope: &PermissionScope,
) -> Result<Vec<String>> {
    let mut resources = match scope {
        PermissionScope::Account => vec![ctx.account_arn(kind)],
        PermissionScope::AllDeclared => {
            let names: Vec<String> = declared_primaries(graph, kind)
                .iter()
                .map(|n| ctx.arn(kind, n.id.as_str()))
                .collect();
            if names.is_empty() {
                return Err(PlanError::validation(
                    role.as_str(),
                    format!("permission on {} resources, but none are declared", kind),
                ));
            }
            names
        }
        PermissionScope::Named(names) => {
            let mut arns = Vec::with_capacity(names.len());
            for name in names {
                let id = NodeId::new(name.as_str());
                match graph.node(&id) {
                    Some(node) if node.kind == ResourceKind::from(kind) && node.entry() == Some(name.as_str()) => {
                        arns.push(ctx.arn(kind, name))
                    }
                    Some(node) => {
                        return Err(PlanError::validation(
                            role.as_str(),
                            format!("permission names '{}', which is a {}, not a {}", name, node.kind, kind),
                        ));
                    }
                    None => return Err(PlanError::unresolved(role.as_str(), name.as_str())),
                }
            }
            arns
        }
    };
    resources.sort();
    resources.dedup();
    Ok(resources)
}

fn trust_for_role(
    ctx: &PlanningContext,
    graph: &ResourceGraph,
    role: &ResourceNode,
    trusted_by: &[PrincipalSpec],
    artifacts: &mut AccessArtifacts,
) {
    let role_arn = ctx.arn(DeclaredKind::Role, role.id.as_str());

    let mut services: Vec<String> = trusted_by
        .iter()
        .filter_map(|p| match p {
            PrincipalSpec::Service { service } => Some(service.clone()),
            PrincipalSpec::Workload { .. } => None,
        })
        .collect();
    services.sort();
    services.dedup();
    if !services.is_empty() {
        artifacts.trust_policies.push(TrustPolicy {
            role: role.id.clone(),
            principal: TrustPrincipal::Service { services },
            condition: None,
            resource: role_arn.clone(),
            actions: BTreeSet::from([ASSUME_ROLE.to_string()]),
        });
    }

    let policies = graph
        .neighbors(&role.id, EdgeKind::Containment)
        .into_iter()
        .filter_map(|id| artifacts.permissions.get(id))
        .flatten()
        .cloned()
        .collect::<Vec<_>>();

    // Trust edges run provider -> role
    let providers: Vec<&NodeId> = graph
        .predecessors(&role.id)
        .into_iter()
        .filter(|p| graph.neighbors(p, EdgeKind::Trust).contains(&&role.id))
        .collect();

    for provider_id in providers {
        let Some(provider) = graph.node(provider_id) else {
            continue;
        };
        let NodeConfig::IdentityProvider {
            issuer: IssuerSource::Cluster { cluster },
            audience,
        } = &provider.config
        else {
            continue;
        };

        let mut subjects: Vec<String> = trusted_by
            .iter()
            .filter_map(|p| match p {
                PrincipalSpec::Workload {
                    cluster: c,
                    namespace,
                    service_account,
                } if c == cluster.as_str() => {
                    Some(format!("system:serviceaccount:{}:{}", namespace, service_account))
                }
                _ => None,
            })
            .collect();
        subjects.sort();
        subjects.dedup();

        let (arn, issuer) = provider_identity(ctx, provider);
        artifacts.trust_policies.push(TrustPolicy {
            role: role.id.clone(),
            principal: TrustPrincipal::Federated {
                provider: provider.id.clone(),
                arn: arn.clone(),
            },
            condition: Some(PrincipalCondition {
                issuer,
                subjects: subjects.clone(),
                audience: audience.clone(),
            }),
            resource: role_arn.clone(),
            actions: BTreeSet::from([ASSUME_ROLE_WITH_WEB_IDENTITY.to_string()]),
        });
        artifacts.bindings.push(IdentityBinding {
            federated_principal: arn,
            provider: provider.id.clone(),
            role: role.id.clone(),
            subjects,
            policies: policies.clone(),
        });
    }
}
