use super::{Fragment, primary};
use crate::context::PlanningContext;
use crate::error::{PlanError, Result};
use crate::node::{NodeConfig, ResourceKind};
use crate::partition::PartitionAssignment;
use stackflow_core::{BrokerConfig, Declaration};

pub(super) fn provision(
    ctx: &PlanningContext,
    decl: &Declaration,
    config: BrokerConfig,
    assignment: &PartitionAssignment,
) -> Result<Fragment> {
    // Brokers are spread evenly across the zones of the partition
    let zones = assignment.subnets.len() as u32;
    if config.brokers % zones != 0 {
        return Err(PlanError::validation(
            &decl.name,
            format!(
                "brokers ({}) must be a multiple of the zone count ({})",
                config.brokers, zones
            ),
        ));
    }

    let node = primary(decl, ResourceKind::Broker, NodeConfig::Broker(config), Some(assignment));
    let mut fragment = Fragment::new(decl, node);
    fragment.place(ctx, assignment, false);
    Ok(fragment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::tests::ctx;
    use stackflow_core::DeclaredKind;

    fn config(brokers: u32) -> BrokerConfig {
        BrokerConfig {
            version: "3.6.0".into(),
            brokers,
            instance_type: "kafka.m5.large".into(),
            volume_size: 1000,
        }
    }

    #[test]
    fn test_broker_count_must_fill_zones() {
        let ctx = ctx();
        let decl = Declaration::new(DeclaredKind::Broker, "events");
        let assignment = ctx.network.assign("events", decl.kind, None).unwrap().unwrap();

        let fragment = provision(&ctx, &decl, config(6), &assignment).unwrap();
        assert_eq!(fragment.security_group.as_ref().unwrap().as_str(), "events-sg");
        assert_eq!(fragment.port, Some(9092));

        let err = provision(&ctx, &decl, config(4), &assignment).unwrap_err();
        assert!(err.to_string().contains("multiple of the zone count"));
    }
}
