use super::{Fragment, primary};
use crate::node::{NodeConfig, ResourceKind};
use stackflow_core::{Declaration, RegistryConfig};

pub(super) fn provision(decl: &Declaration, config: RegistryConfig) -> Fragment {
    Fragment::new(
        decl,
        primary(decl, ResourceKind::Registry, NodeConfig::Registry(config), None),
    )
}
