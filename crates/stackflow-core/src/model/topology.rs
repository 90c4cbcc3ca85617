//! Topology model
//!
//! A [`Topology`] is the declarative input: one network, a list of resource
//! declarations and the outputs downstream consumers want.

use super::settings::Settings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_CIDR: &str = "10.0.0.0/16";
pub const DEFAULT_MAX_ZONES: u8 = 3;

/// Whole topology document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    /// Project name (`project "<name>"`, or the directory name)
    pub name: String,

    /// Account/region the plan targets
    pub target: Target,

    /// Network layout
    pub network: NetworkSpec,

    /// Resource declarations in document order
    pub declarations: Vec<Declaration>,

    /// Requested outputs
    pub outputs: Vec<OutputDecl>,
}

impl Topology {
    pub fn declaration(&self, name: &str) -> Option<&Declaration> {
        self.declarations.iter().find(|d| d.name == name)
    }

    pub fn declarations_of(&self, kind: DeclaredKind) -> impl Iterator<Item = &Declaration> {
        self.declarations.iter().filter(move |d| d.kind == kind)
    }
}

/// Target account and region
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl Target {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            region: Some(region.into()),
        }
    }

    /// Fills unset fields from `other`
    pub fn or(self, other: &Target) -> Target {
        Target {
            account: self.account.or_else(|| other.account.clone()),
            region: self.region.or_else(|| other.region.clone()),
        }
    }
}

/// Network declaration (`network "<name>" cidr=… max-zones=…`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    pub cidr: String,
    pub max_zones: i64,

    /// Partition roles as written; empty means every role
    pub partitions: Vec<String>,

    /// Gateway endpoint services (`s3`, `dynamodb`)
    pub gateway_endpoints: Vec<String>,
}

impl Default for NetworkSpec {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            cidr: DEFAULT_CIDR.to_string(),
            max_zones: DEFAULT_MAX_ZONES as i64,
            partitions: Vec::new(),
            gateway_endpoints: Vec::new(),
        }
    }
}

/// Network partition role
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionRole {
    /// Routable from the internet
    Public,
    /// Private with outbound egress
    PrivateEgress,
    /// Private without any route out
    PrivateIsolated,
}

impl PartitionRole {
    /// Fixed order used for address allocation
    pub const ALL: [PartitionRole; 3] = [
        PartitionRole::Public,
        PartitionRole::PrivateEgress,
        PartitionRole::PrivateIsolated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionRole::Public => "public",
            PartitionRole::PrivateEgress => "private-egress",
            PartitionRole::PrivateIsolated => "private-isolated",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            PartitionRole::Public => 0,
            PartitionRole::PrivateEgress => 1,
            PartitionRole::PrivateIsolated => 2,
        }
    }
}

impl fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(PartitionRole::Public),
            "private-egress" | "private_egress" => Ok(PartitionRole::PrivateEgress),
            "private-isolated" | "private_isolated" => Ok(PartitionRole::PrivateIsolated),
            other => Err(format!("unknown partition role '{}'", other)),
        }
    }
}

/// Kind of a topology entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclaredKind {
    Cluster,
    Broker,
    Database,
    Table,
    Registry,
    Role,
    Instance,
}

impl DeclaredKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclaredKind::Cluster => "cluster",
            DeclaredKind::Broker => "broker",
            DeclaredKind::Database => "database",
            DeclaredKind::Table => "table",
            DeclaredKind::Registry => "registry",
            DeclaredKind::Role => "role",
            DeclaredKind::Instance => "instance",
        }
    }

    /// Partition a kind lives in when the entry does not say
    pub fn default_partition(&self) -> Option<PartitionRole> {
        match self {
            DeclaredKind::Cluster | DeclaredKind::Broker => Some(PartitionRole::PrivateEgress),
            DeclaredKind::Database => Some(PartitionRole::PrivateIsolated),
            DeclaredKind::Instance => Some(PartitionRole::Public),
            DeclaredKind::Table | DeclaredKind::Registry | DeclaredKind::Role => None,
        }
    }

    /// Whether the kind is placed inside the network at all
    pub fn is_networked(&self) -> bool {
        self.default_partition().is_some()
    }
}

impl fmt::Display for DeclaredKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeclaredKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cluster" => Ok(DeclaredKind::Cluster),
            "broker" => Ok(DeclaredKind::Broker),
            "database" => Ok(DeclaredKind::Database),
            "table" => Ok(DeclaredKind::Table),
            "registry" => Ok(DeclaredKind::Registry),
            "role" => Ok(DeclaredKind::Role),
            "instance" => Ok(DeclaredKind::Instance),
            other => Err(format!("unknown resource kind '{}'", other)),
        }
    }
}

/// One resource entry of the topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub kind: DeclaredKind,

    /// Partition role as written (`role="private-isolated"`)
    pub role: Option<String>,

    /// Kind-specific options
    pub options: Settings,

    /// Resources this entry needs network access to
    pub access_to: Vec<String>,

    /// Entries that must be provisioned before this one
    pub after: Vec<String>,

    /// Principals allowed to assume this entry (roles only)
    pub trusted_by: Vec<PrincipalSpec>,
}

impl Declaration {
    pub fn new(kind: DeclaredKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            role: None,
            options: Settings::new(),
            access_to: Vec::new(),
            after: Vec::new(),
            trusted_by: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_options(mut self, options: Settings) -> Self {
        self.options = options;
        self
    }

    pub fn with_access_to(mut self, target: impl Into<String>) -> Self {
        self.access_to.push(target.into());
        self
    }

    pub fn with_after(mut self, dependency: impl Into<String>) -> Self {
        self.after.push(dependency.into());
        self
    }

    pub fn with_trust(mut self, principal: PrincipalSpec) -> Self {
        self.trusted_by.push(principal);
        self
    }
}

/// Who may assume a role
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PrincipalSpec {
    /// A workload identity federated through a cluster's issuer
    Workload {
        cluster: String,
        namespace: String,
        service_account: String,
    },
    /// A cloud service principal, e.g. `ec2.amazonaws.com`
    Service { service: String },
}

/// Requested output (`output "<name>" node=… field=…`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDecl {
    pub name: String,
    pub node: String,
    pub field: String,

    /// Explicit sensitivity; `None` lets the projector decide from the field
    pub sensitive: Option<bool>,
}
