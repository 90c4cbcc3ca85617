use super::{Fragment, primary};
use crate::context::PlanningContext;
use crate::graph::EdgeKind;
use crate::node::{NodeConfig, ResourceKind};
use crate::partition::PartitionAssignment;
use stackflow_core::{DatabaseConfig, Declaration};

/// Emits the cluster, its security group, `writer-<name>` and
/// `reader-<name>-<n>` for each replica.
pub(super) fn provision(
    ctx: &PlanningContext,
    decl: &Declaration,
    config: DatabaseConfig,
    assignment: &PartitionAssignment,
) -> Fragment {
    let instance_class = config.instance_class.clone();
    let replicas = config.replicas;

    let node = primary(
        decl,
        ResourceKind::DatabaseCluster,
        NodeConfig::DatabaseCluster(config),
        Some(assignment),
    );
    let mut fragment = Fragment::new(decl, node);
    fragment.place(ctx, assignment, false);

    let cluster = fragment.primary.clone();
    let writer = fragment.node(
        ResourceKind::DatabaseInstance,
        format!("writer-{}", decl.name),
        NodeConfig::DatabaseInstance {
            cluster: cluster.clone(),
            instance_class: instance_class.clone(),
            writer: true,
        },
    );
    fragment.edge(&cluster, &writer, EdgeKind::Containment);

    for n in 0..replicas {
        let reader = fragment.node(
            ResourceKind::DatabaseInstance,
            format!("reader-{}-{}", decl.name, n),
            NodeConfig::DatabaseInstance {
                cluster: cluster.clone(),
                instance_class: instance_class.clone(),
                writer: false,
            },
        );
        fragment.edge(&cluster, &reader, EdgeKind::Containment);
        fragment.edge(&writer, &reader, EdgeKind::ExplicitOrder);
    }

    fragment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::tests::ctx;
    use stackflow_core::{DatabaseEngine, DeclaredKind, PartitionRole};

    #[test]
    fn test_writer_and_readers() {
        let ctx = ctx();
        let decl = Declaration::new(DeclaredKind::Database, "orders");
        let assignment = ctx.network.assign("orders", decl.kind, None).unwrap().unwrap();
        let config = DatabaseConfig {
            engine: DatabaseEngine::AuroraPostgresql,
            engine_version: "14.13".into(),
            instance_class: "r7g.large".into(),
            replicas: 2,
            username: "postgres".into(),
        };

        let fragment = provision(&ctx, &decl, config, &assignment);
        let ids: Vec<&str> = fragment.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["orders", "orders-sg", "writer-orders", "reader-orders-0", "reader-orders-1"]
        );
        assert!(fragment
            .nodes
            .iter()
            .all(|n| n.partition == Some(PartitionRole::PrivateIsolated)));
        assert_eq!(fragment.port, Some(5432));
    }
}
