//! Service provisioners
//!
//! One provisioner per declared kind. Each is a pure function from a
//! declaration and its partition assignment to a [`Fragment`] of nodes and
//! edges. Node ids derive from the declared name only, so re-planning the
//! same topology yields the same ids.

mod broker;
mod cluster;
mod database;
mod instance;
mod registry;
mod role;
mod table;

use crate::context::PlanningContext;
use crate::error::{PlanError, Result};
use crate::graph::{DependencyEdge, EdgeKind, ResourceGraph};
use crate::node::{NodeConfig, NodeId, ResourceKind, ResourceNode};
use crate::partition::PartitionAssignment;
use stackflow_core::{Declaration, DeclaredKind, KindConfig};

/// Nodes and edges produced for one declaration
#[derive(Debug, Clone)]
pub struct Fragment {
    pub entry: String,
    pub kind: DeclaredKind,
    pub primary: NodeId,
    pub security_group: Option<NodeId>,
    /// Port consumers reach the primary node on
    pub port: Option<u16>,
    pub nodes: Vec<ResourceNode>,
    pub edges: Vec<DependencyEdge>,
}

impl Fragment {
    fn new(decl: &Declaration, primary: ResourceNode) -> Self {
        Self {
            entry: decl.name.clone(),
            kind: decl.kind,
            primary: primary.id.clone(),
            security_group: None,
            port: None,
            nodes: vec![primary],
            edges: Vec::new(),
        }
    }

    fn node(&mut self, kind: ResourceKind, id: impl Into<NodeId>, config: NodeConfig) -> NodeId {
        let partition = self.nodes.first().and_then(|n| n.partition);
        let node = ResourceNode::new(id, kind, config, self.entry.clone()).in_partition(partition);
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    fn edge(&mut self, from: &NodeId, to: &NodeId, kind: EdgeKind) {
        self.edges
            .push(DependencyEdge::new(from.clone(), to.clone(), kind));
    }

    /// Place the primary node in its partition behind a security group.
    ///
    /// A `managed` group is created by the primary resource itself and is
    /// contained by it; otherwise the group is created first in the network.
    fn place(&mut self, ctx: &PlanningContext, assignment: &PartitionAssignment, managed: bool) {
        let primary = self.primary.clone();
        let port = self.nodes.first().and_then(|n| n.config.service_port());
        self.edge(&assignment.node, &primary, EdgeKind::Containment);

        let sg = self.node(
            ResourceKind::SecurityGroup,
            format!("{}-sg", self.entry),
            NodeConfig::SecurityGroup {
                owner: primary.clone(),
                allow_all_outbound: true,
            },
        );
        if managed {
            self.edge(&primary, &sg, EdgeKind::Containment);
        } else {
            self.edge(&ctx.network.network_node_id(), &sg, EdgeKind::Containment);
            self.edge(&sg, &primary, EdgeKind::ExplicitOrder);
        }

        self.security_group = Some(sg);
        self.port = port;
    }

    /// Merge into the graph; either every node and edge lands or none does
    pub fn merge_into(self, graph: &mut ResourceGraph) -> Result<()> {
        let mut staged = graph.clone();
        for node in self.nodes {
            staged.add_node(node)?;
        }
        for edge in &self.edges {
            staged.add_edge(&edge.from, &edge.to, edge.kind)?;
        }
        *graph = staged;
        Ok(())
    }
}

/// Validate a declaration and emit its fragment
pub fn provision(ctx: &PlanningContext, decl: &Declaration) -> Result<Fragment> {
    if !decl.trusted_by.is_empty() && decl.kind != DeclaredKind::Role {
        return Err(PlanError::validation(
            &decl.name,
            format!("trusted-by is only valid on roles, not {}", decl.kind),
        ));
    }
    if !decl.access_to.is_empty() && !decl.kind.is_networked() {
        return Err(PlanError::validation(
            &decl.name,
            format!("{} resources are not in the network and cannot declare access-to", decl.kind),
        ));
    }

    let config = KindConfig::from_settings(decl.kind, &decl.name, &decl.options)?;
    let assignment = ctx.network.assign(&decl.name, decl.kind, decl.role.as_deref())?;
    let partition = assignment.as_ref().map(|a| a.role);

    let fragment = match (config, assignment) {
        (KindConfig::Cluster(c), Some(a)) => cluster::provision(ctx, decl, c, &a),
        (KindConfig::Broker(c), Some(a)) => broker::provision(ctx, decl, c, &a)?,
        (KindConfig::Database(c), Some(a)) => database::provision(ctx, decl, c, &a),
        (KindConfig::Instance(c), Some(a)) => instance::provision(ctx, decl, c, &a),
        (KindConfig::Table(c), None) => table::provision(decl, c),
        (KindConfig::Registry(c), None) => registry::provision(decl, c),
        (KindConfig::Role(c), None) => role::provision(decl, c)?,
        (_, _) => {
            return Err(PlanError::validation(
                &decl.name,
                format!("{} resources cannot be placed in a partition", decl.kind),
            ));
        }
    };

    tracing::debug!(
        entry = %decl.name,
        kind = %decl.kind,
        partition = ?partition,
        nodes = fragment.nodes.len(),
        "Provisioned declaration"
    );

    Ok(fragment)
}

/// Primary node for a declaration
/// Worker node role a cluster with a node group creates
pub(crate) fn node_role_id(cluster: &str) -> NodeId {
    NodeId::new(format!("{}-node-role", cluster))
}

fn primary(
    decl: &Declaration,
    kind: ResourceKind,
    config: NodeConfig,
    assignment: Option<&PartitionAssignment>,
) -> ResourceNode {
    ResourceNode::new(decl.name.as_str(), kind, config, decl.name.clone())
        .in_partition(assignment.map(|a| a.role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_core::{NetworkSpec, Setting, SettingValue, Settings, Target, Topology};

    pub(crate) fn ctx() -> PlanningContext {
        PlanningContext::from_topology(&Topology {
            name: "test".into(),
            target: Target::new("123456789012", "us-east-1"),
            network: NetworkSpec {
                name: "core".into(),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap()
    }

    fn s(v: &str) -> SettingValue {
        SettingValue::String(v.to_string())
    }

    #[test]
    fn test_trusted_by_only_on_roles() {
        let decl = Declaration::new(DeclaredKind::Table, "customer")
            .with_options(Settings::new().with(Setting::new("partition-key").with_arg(s("id"))))
            .with_trust(stackflow_core::PrincipalSpec::Service {
                service: "ec2.amazonaws.com".into(),
            });
        assert!(matches!(
            provision(&ctx(), &decl),
            Err(PlanError::Validation { .. })
        ));
    }

    #[test]
    fn test_access_to_requires_network() {
        let decl = Declaration::new(DeclaredKind::Registry, "images").with_access_to("orders");
        assert!(provision(&ctx(), &decl).is_err());
    }

    #[test]
    fn test_merge_is_atomic() {
        let ctx = ctx();
        let mut graph = ResourceGraph::new();
        ctx.network.emit(&mut graph).unwrap();
        let before = graph.len();

        let decl = Declaration::new(DeclaredKind::Registry, "images");
        let mut fragment = provision(&ctx, &decl).unwrap();
        fragment.edges.push(DependencyEdge::new("images", "missing", EdgeKind::ExplicitOrder));

        assert!(fragment.merge_into(&mut graph).is_err());
        assert_eq!(graph.len(), before);
        assert!(!graph.contains(&NodeId::new("images")));
    }
}
