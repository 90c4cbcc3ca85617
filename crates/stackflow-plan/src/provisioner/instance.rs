use super::{Fragment, primary};
use crate::context::PlanningContext;
use crate::node::{NodeConfig, ResourceKind};
use crate::partition::PartitionAssignment;
use stackflow_core::{Declaration, InstanceConfig};

pub(super) fn provision(
    ctx: &PlanningContext,
    decl: &Declaration,
    config: InstanceConfig,
    assignment: &PartitionAssignment,
) -> Fragment {
    let node = primary(decl, ResourceKind::Instance, NodeConfig::Instance(config), Some(assignment));
    let mut fragment = Fragment::new(decl, node);
    fragment.place(ctx, assignment, false);
    fragment
}
