use super::{Fragment, primary};
use crate::node::{NodeConfig, ResourceKind};
use stackflow_core::{Declaration, TableConfig};

pub(super) fn provision(decl: &Declaration, config: TableConfig) -> Fragment {
    Fragment::new(decl, primary(decl, ResourceKind::Table, NodeConfig::Table(config), None))
}
