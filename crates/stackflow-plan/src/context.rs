//! Immutable planning context threaded through every planning step

use crate::error::{PlanError, Result};
use crate::node::NodeId;
use crate::partition::NetworkPlan;
use stackflow_core::{DeclaredKind, Topology};

/// Everything a planning run knows before the first node is emitted
#[derive(Debug, Clone)]
pub struct PlanningContext {
    pub project: String,
    pub account: String,
    pub region: String,
    pub network: NetworkPlan,
}

impl PlanningContext {
    pub fn from_topology(topology: &Topology) -> Result<Self> {
        let account = topology
            .target
            .account
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| PlanError::validation("target", "account is required"))?;
        if !account.chars().all(|c| c.is_ascii_digit()) {
            return Err(PlanError::validation(
                "target",
                format!("account '{}' must be numeric", account),
            ));
        }
        let region = topology
            .target
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| PlanError::validation("target", "region is required"))?;

        let network = NetworkPlan::plan(&topology.network, &region)?;

        Ok(Self {
            project: topology.name.clone(),
            account,
            region,
            network,
        })
    }

    /// Smallest ARN pattern covering one named resource of `kind`. Instance
    /// ARNs carry the provider-assigned id as a `${name.id}` placeholder.
    pub fn arn(&self, kind: DeclaredKind, name: &str) -> String {
        let (r, a) = (&self.region, &self.account);
        match kind {
            DeclaredKind::Table => format!("arn:aws:dynamodb:{r}:{a}:table/{name}"),
            DeclaredKind::Registry => format!("arn:aws:ecr:{r}:{a}:repository/{name}"),
            DeclaredKind::Broker => format!("arn:aws:kafka:{r}:{a}:cluster/{name}/*"),
            DeclaredKind::Database => format!("arn:aws:rds:{r}:{a}:cluster:{name}"),
            DeclaredKind::Cluster => format!("arn:aws:eks:{r}:{a}:cluster/{name}"),
            DeclaredKind::Role => format!("arn:aws:iam::{a}:role/{name}"),
            DeclaredKind::Instance => {
                let id = NodeId::new(name).field("id").placeholder();
                format!("arn:aws:ec2:{r}:{a}:instance/{id}")
            }
        }
    }

    /// Pattern covering every resource of `kind` in the account and region
    pub fn account_arn(&self, kind: DeclaredKind) -> String {
        let (r, a) = (&self.region, &self.account);
        match kind {
            DeclaredKind::Table => format!("arn:aws:dynamodb:{r}:{a}:table/*"),
            DeclaredKind::Registry => format!("arn:aws:ecr:{r}:{a}:repository/*"),
            DeclaredKind::Broker => format!("arn:aws:kafka:{r}:{a}:cluster/*"),
            DeclaredKind::Database => format!("arn:aws:rds:{r}:{a}:cluster:*"),
            DeclaredKind::Cluster => format!("arn:aws:eks:{r}:{a}:cluster/*"),
            DeclaredKind::Role => format!("arn:aws:iam::{a}:role/*"),
            DeclaredKind::Instance => format!("arn:aws:ec2:{r}:{a}:instance/*"),
        }
    }

    pub fn identity_provider_arn(&self, issuer: &str) -> String {
        format!("arn:aws:iam::{}:oidc-provider/{}", self.account, issuer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_core::Target;

    fn topology() -> Topology {
        Topology {
            name: "core-bank".into(),
            target: Target::new("123456789012", "ap-northeast-2"),
            ..Default::default()
        }
    }

    #[test]
    fn test_requires_account_and_region() {
        let mut t = topology();
        t.target.account = None;
        assert!(PlanningContext::from_topology(&t).is_err());

        let mut t = topology();
        t.target.region = None;
        assert!(PlanningContext::from_topology(&t).is_err());

        let mut t = topology();
        t.target.account = Some("acct-1".into());
        assert!(PlanningContext::from_topology(&t).is_err());
    }

    #[test]
    fn test_arn_patterns() {
        let ctx = PlanningContext::from_topology(&topology()).unwrap();
        assert_eq!(
            ctx.arn(DeclaredKind::Table, "customer"),
            "arn:aws:dynamodb:ap-northeast-2:123456789012:table/customer"
        );
        assert_eq!(
            ctx.arn(DeclaredKind::Broker, "events"),
            "arn:aws:kafka:ap-northeast-2:123456789012:cluster/events/*"
        );
        assert_eq!(
            ctx.arn(DeclaredKind::Instance, "bastion"),
            "arn:aws:ec2:ap-northeast-2:123456789012:instance/${bastion.id}"
        );
        assert_eq!(
            ctx.account_arn(DeclaredKind::Table),
            "arn:aws:dynamodb:ap-northeast-2:123456789012:table/*"
        );
        assert_eq!(ctx.network.zones.len(), 3);
    }
}
