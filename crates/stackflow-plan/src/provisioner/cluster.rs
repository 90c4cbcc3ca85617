use super::{Fragment, node_role_id, primary};
use crate::context::PlanningContext;
use crate::graph::EdgeKind;
use crate::node::{NodeConfig, ResourceKind, ResourceNode};
use crate::partition::PartitionAssignment;
use stackflow_core::{ClusterConfig, Declaration, PrincipalSpec};

/// Managed policies every worker node role carries
pub const NODE_ROLE_POLICIES: [&str; 3] = [
    "AmazonEC2ContainerRegistryReadOnly",
    "AmazonEKSWorkerNodePolicy",
    "AmazonEKS_CNI_Policy",
];

pub(super) fn provision(
    ctx: &PlanningContext,
    decl: &Declaration,
    config: ClusterConfig,
    assignment: &PartitionAssignment,
) -> Fragment {
    let has_node_group = config.node_group.is_some();
    let node = primary(
        decl,
        ResourceKind::Cluster,
        NodeConfig::Cluster(config),
        Some(assignment),
    );
    let mut fragment = Fragment::new(decl, node);

    // The cluster creates its own security group
    fragment.place(ctx, assignment, true);

    if has_node_group {
        let role = ResourceNode::new(
            node_role_id(&decl.name),
            ResourceKind::Role,
            NodeConfig::Role {
                trusted_by: vec![PrincipalSpec::Service {
                    service: "ec2.amazonaws.com".to_string(),
                }],
                managed_policies: NODE_ROLE_POLICIES.iter().map(|p| p.to_string()).collect(),
            },
            decl.name.clone(),
        );
        let role_id = role.id.clone();
        fragment.nodes.push(role);
        let cluster = fragment.primary.clone();
        fragment.edge(&role_id, &cluster, EdgeKind::ExplicitOrder);
    }

    fragment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use crate::provisioner::tests::ctx;
    use stackflow_core::{DeclaredKind, NodeGroup, PartitionRole};

    fn config(node_group: bool) -> ClusterConfig {
        ClusterConfig {
            version: "1.32".into(),
            logging: Vec::new(),
            node_group: node_group.then(|| NodeGroup {
                name: "custom".into(),
                instance_type: "t3.medium".into(),
                desired: 2,
                min: 2,
                max: 5,
                disk_size: 20,
            }),
        }
    }

    #[test]
    fn test_cluster_nodes() {
        let ctx = ctx();
        let decl = Declaration::new(DeclaredKind::Cluster, "workloads");
        let assignment = ctx.network.assign("workloads", decl.kind, None).unwrap().unwrap();
        let fragment = provision(&ctx, &decl, config(true), &assignment);

        let ids: Vec<&str> = fragment.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["workloads", "workloads-sg", "workloads-node-role"]);
        assert_eq!(fragment.nodes[0].partition, Some(PartitionRole::PrivateEgress));
        assert_eq!(fragment.nodes[2].partition, None);
        assert_eq!(fragment.port, Some(443));
        assert!(fragment.edges.iter().any(|e| e.from == NodeId::new("workloads")
            && e.to == NodeId::new("workloads-sg")
            && e.kind == EdgeKind::Containment));
    }

    #[test]
    fn test_no_node_role_without_node_group() {
        let ctx = ctx();
        let decl = Declaration::new(DeclaredKind::Cluster, "workloads");
        let assignment = ctx.network.assign("workloads", decl.kind, None).unwrap().unwrap();
        let fragment = provision(&ctx, &decl, config(false), &assignment);
        assert_eq!(fragment.nodes.len(), 2);
    }
}
