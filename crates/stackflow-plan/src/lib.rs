//! StackFlow planner
//!
//! Compiles a [`Topology`](stackflow_core::Topology) into a validated
//! resource graph, a deterministic provisioning order and the access
//! artifacts (network rules, trust and permission policies) derived from
//! the relationships between resources.
//!
//! ```text
//! Topology ─► PlanningContext ─► NetworkPlan ─► provisioners ─► ResourceGraph
//!                                                    │
//!                     ExistenceResolver ◄── wiring ◄─┘
//!                              │
//!                              ▼
//!              policy::synthesize ─► scheduler ─► ProvisioningPlan
//! ```

pub mod context;
pub mod error;
pub mod graph;
pub mod node;
pub mod output;
pub mod partition;
pub mod plan;
pub mod planner;
pub mod policy;
pub mod provisioner;
pub mod resolver;
pub mod scheduler;

pub use context::PlanningContext;
pub use error::{PlanError, Result};
pub use graph::{DependencyEdge, EdgeKind, ResourceGraph};
pub use node::{NodeConfig, NodeId, NodeOrigin, NodeStatus, ResourceKind, ResourceNode, ValueRef};
pub use output::{Output, is_sensitive_field, project};
pub use partition::{Ipv4Cidr, NetworkPlan, PartitionAssignment, PartitionPlan, Subnet};
pub use plan::{PlanSummary, ProvisioningPlan};
pub use planner::{Draft, Planner, compile};
pub use policy::{
    AccessArtifacts, IdentityBinding, PermissionStatement, PolicyDocument, RuleSource, SecurityRule,
    TrustPolicy,
};
pub use resolver::{
    ExistenceCheck, ExistenceResolver, ExistingRef, GlobalSingleton, InMemoryExistence, LookupKey,
    NoExisting,
};
pub use scheduler::{PlanStep, StepAction};
