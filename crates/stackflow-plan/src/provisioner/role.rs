use super::{Fragment, primary};
use crate::error::{PlanError, Result};
use crate::graph::EdgeKind;
use crate::node::{NodeConfig, ResourceKind};
use stackflow_core::{Declaration, RoleConfig};

/// Emits the role and, when it requests permissions, `<name>-policy`.
/// Trust towards identity providers is wired by the planner.
pub(super) fn provision(decl: &Declaration, config: RoleConfig) -> Result<Fragment> {
    if decl.trusted_by.is_empty() {
        return Err(PlanError::validation(
            &decl.name,
            "role requires at least one trusted-by principal",
        ));
    }

    let mut trusted_by = decl.trusted_by.clone();
    trusted_by.sort();
    trusted_by.dedup();

    let node = primary(
        decl,
        ResourceKind::Role,
        NodeConfig::Role {
            trusted_by,
            managed_policies: config.managed_policies,
        },
        None,
    );
    let mut fragment = Fragment::new(decl, node);

    if !config.permissions.is_empty() {
        let role = fragment.primary.clone();
        let policy = fragment.node(
            ResourceKind::Policy,
            format!("{}-policy", decl.name),
            NodeConfig::Policy {
                role: role.clone(),
                permissions: config.permissions,
            },
        );
        fragment.edge(&role, &policy, EdgeKind::Containment);
    }

    Ok(fragment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_core::{DeclaredKind, PermissionRequest, PermissionScope, PrincipalSpec};

    #[test]
    fn test_role_requires_principal() {
        let decl = Declaration::new(DeclaredKind::Role, "orders-api");
        assert!(provision(&decl, RoleConfig::default()).is_err());
    }

    #[test]
    fn test_role_with_permissions_emits_policy() {
        let decl = Declaration::new(DeclaredKind::Role, "orders-api").with_trust(PrincipalSpec::Workload {
            cluster: "workloads".into(),
            namespace: "orders".into(),
            service_account: "orders-api".into(),
        });
        let config = RoleConfig {
            managed_policies: Vec::new(),
            permissions: vec![PermissionRequest {
                kind: DeclaredKind::Table,
                actions: vec!["dynamodb:GetItem".into()],
                scope: PermissionScope::AllDeclared,
            }],
        };

        let fragment = provision(&decl, config).unwrap();
        let ids: Vec<&str> = fragment.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["orders-api", "orders-api-policy"]);
        assert!(fragment.security_group.is_none());
    }
}
