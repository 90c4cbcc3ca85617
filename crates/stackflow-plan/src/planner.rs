//! Topology-to-provisioning-plan compiler
//!
//! Runs the planning pipeline over an immutable [`PlanningContext`]:
//! network layout, per-declaration provisioning, relationship wiring,
//! singleton resolution, access synthesis and scheduling.

use crate::context::PlanningContext;
use crate::error::{PlanError, Result};
use crate::graph::{EdgeKind, ResourceGraph};
use crate::node::{NodeId, NodeStatus, ValueRef};
use crate::plan::{self, ProvisioningPlan};
use crate::policy;
use crate::provisioner::{self, Fragment};
use crate::resolver::{ExistenceCheck, ExistenceResolver, GlobalSingleton, NoExisting};
use crate::scheduler;
use stackflow_core::{Declaration, DeclaredKind, OutputDecl, PrincipalSpec, Topology};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};

/// Graph built from a topology before access synthesis and scheduling.
/// Entries that failed validation are absent; their errors are in
/// `diagnostics`.
#[derive(Debug, Clone)]
pub struct Draft {
    pub context: PlanningContext,
    pub graph: ResourceGraph,
    pub singletons: Vec<GlobalSingleton>,
    pub outputs: Vec<OutputDecl>,
    pub diagnostics: Vec<PlanError>,
}

impl Draft {
    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Accepted entry: its kind and primary node
struct Entry {
    kind: DeclaredKind,
    primary: NodeId,
}

pub struct Planner<'a> {
    check: &'a dyn ExistenceCheck,
}

impl<'a> Planner<'a> {
    pub fn new(check: &'a dyn ExistenceCheck) -> Self {
        Self { check }
    }

    /// Build the resource graph, collecting every validation error.
    ///
    /// Fails outright only when no graph can be built at all (missing
    /// target, invalid network).
    #[instrument(skip_all, fields(project = %topology.name))]
    pub fn provision(&self, topology: &Topology) -> Result<Draft> {
        let context = PlanningContext::from_topology(topology)?;
        let mut graph = ResourceGraph::new();
        context.network.emit(&mut graph)?;

        let mut diagnostics = Vec::new();
        let mut rejected: BTreeSet<&str> = BTreeSet::new();

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for decl in &topology.declarations {
            *counts.entry(decl.name.as_str()).or_default() += 1;
        }
        for (name, count) in counts.iter().filter(|(_, c)| **c > 1) {
            diagnostics.push(PlanError::validation(
                *name,
                format!("declared {} times; entry names must be unique", count),
            ));
            rejected.insert(*name);
        }

        let mut declarations: Vec<&Declaration> = topology
            .declarations
            .iter()
            .filter(|d| !rejected.contains(d.name.as_str()))
            .collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));

        let mut entries: BTreeMap<&str, Entry> = BTreeMap::new();
        for decl in &declarations {
            let merged = provisioner::provision(&context, decl)
                .and_then(|fragment: Fragment| {
                    let primary = fragment.primary.clone();
                    fragment.merge_into(&mut graph).map(|_| primary)
                });
            match merged {
                Ok(primary) => {
                    entries.insert(
                        decl.name.as_str(),
                        Entry {
                            kind: decl.kind,
                            primary,
                        },
                    );
                }
                Err(err) => {
                    debug!(entry = %decl.name, error = %err, "Declaration rejected");
                    diagnostics.push(err);
                    rejected.insert(decl.name.as_str());
                }
            }
        }

        let mut resolver = ExistenceResolver::new(self.check, &context.account, &context.region);
        let wiring = Wiring {
            topology,
            entries: &entries,
            rejected: &rejected,
        };
        for decl in &declarations {
            if let Some(entry) = entries.get(decl.name.as_str()) {
                wiring.wire(decl, entry, &mut graph, &mut resolver, &mut diagnostics);
            }
        }

        check_outputs(&topology.outputs, &graph, &rejected, &mut diagnostics);

        info!(
            nodes = graph.len(),
            edges = graph.edges().count(),
            rejected = rejected.len(),
            "Resource graph built"
        );

        Ok(Draft {
            singletons: resolver.singletons().cloned().collect(),
            context,
            graph,
            outputs: topology.outputs.clone(),
            diagnostics,
        })
    }

    /// Compile a topology into a provisioning plan. Any structural error
    /// aborts the whole plan.
    #[instrument(skip_all, fields(project = %topology.name))]
    pub fn compile(&self, topology: &Topology) -> Result<ProvisioningPlan> {
        let draft = self.provision(topology)?;
        if let Some(err) = PlanError::from_many(draft.diagnostics) {
            return Err(err);
        }
        let Draft {
            context,
            mut graph,
            singletons,
            outputs,
            ..
        } = draft;

        let artifacts = policy::synthesize(&context, &graph)?;
        let configurations = plan::configurations(&graph, &artifacts)?;
        add_reference_edges(&mut graph, &configurations)?;

        let declared: Vec<NodeId> = graph
            .nodes()
            .filter(|n| n.status == NodeStatus::Declared)
            .map(|n| n.id.clone())
            .collect();
        for id in &declared {
            graph.set_status(id, NodeStatus::Planned)?;
        }

        let steps = scheduler::schedule(&graph, &configurations)?;
        let plan = ProvisioningPlan::new(
            context.project,
            context.account,
            context.region,
            context.network,
            graph,
            steps,
            artifacts,
            singletons,
            outputs,
        )?;

        info!(
            steps = plan.steps.len(),
            fingerprint = %plan.fingerprint,
            summary = %plan.summary(),
            "Provisioning plan compiled"
        );
        Ok(plan)
    }
}

/// Compile with no pre-existing resources
pub fn compile(topology: &Topology) -> Result<ProvisioningPlan> {
    Planner::new(&NoExisting).compile(topology)
}

struct Wiring<'t> {
    topology: &'t Topology,
    entries: &'t BTreeMap<&'t str, Entry>,
    rejected: &'t BTreeSet<&'t str>,
}

impl Wiring<'_> {
    /// Look up a referenced entry. `Ok(None)` means the target was rejected
    /// and its error is already reported.
    fn target(&self, from: &str, name: &str) -> Result<Option<&Entry>> {
        if name == from {
            return Err(PlanError::validation(from, "an entry cannot reference itself"));
        }
        if self.rejected.contains(name) {
            return Ok(None);
        }
        match self.entries.get(name) {
            Some(entry) => Ok(Some(entry)),
            None if self.topology.declaration(name).is_some() => Ok(None),
            None => Err(PlanError::unresolved(from, name)),
        }
    }

    fn wire(
        &self,
        decl: &Declaration,
        entry: &Entry,
        graph: &mut ResourceGraph,
        resolver: &mut ExistenceResolver<'_>,
        diagnostics: &mut Vec<PlanError>,
    ) {
        let mut report = |result: Result<()>| {
            if let Err(err) = result {
                diagnostics.push(err);
            }
        };

        for name in &decl.access_to {
            report(self.target(&decl.name, name).and_then(|target| match target {
                Some(target) if !target.kind.is_networked() => Err(PlanError::validation(
                    &decl.name,
                    format!("'{}' is a {} and is not reachable over the network", name, target.kind),
                )),
                Some(target) => graph.add_edge(&entry.primary, &target.primary, EdgeKind::NetworkAccess),
                None => Ok(()),
            }));
        }

        for name in &decl.after {
            report(self.target(&decl.name, name).and_then(|target| match target {
                Some(target) => graph.add_edge(&target.primary, &entry.primary, EdgeKind::ExplicitOrder),
                None => Ok(()),
            }));
        }

        for principal in &decl.trusted_by {
            let PrincipalSpec::Workload { cluster, .. } = principal else {
                continue;
            };
            report(self.target(&decl.name, cluster).and_then(|target| match target {
                Some(target) if target.kind != DeclaredKind::Cluster => Err(PlanError::validation(
                    &decl.name,
                    format!("trusted-by cluster '{}' is a {}", cluster, target.kind),
                )),
                Some(target) => match resolver.identity_provider(graph, &target.primary)? {
                    Some(provider) => graph.add_edge(&provider, &entry.primary, EdgeKind::Trust),
                    None => Ok(()),
                },
                None => Ok(()),
            }));
        }
    }
}

fn check_outputs(
    outputs: &[OutputDecl],
    graph: &ResourceGraph,
    rejected: &BTreeSet<&str>,
    diagnostics: &mut Vec<PlanError>,
) {
    let mut seen = BTreeSet::new();
    for output in outputs {
        let label = format!("output {}", output.name);
        if !seen.insert(output.name.as_str()) {
            diagnostics.push(PlanError::validation(label, "output names must be unique"));
            continue;
        }
        let Some(node) = graph.node(&NodeId::new(output.node.as_str())) else {
            if !rejected.contains(output.node.as_str()) {
                diagnostics.push(PlanError::unresolved(label, output.node.as_str()));
            }
            continue;
        };
        if !node.kind.resolved_fields().contains(&output.field.as_str()) {
            diagnostics.push(PlanError::validation(
                label,
                format!(
                    "{} nodes have no field '{}' (available: {})",
                    node.kind,
                    output.field,
                    node.kind.resolved_fields().join(", ")
                ),
            ));
        }
    }
}

/// Order every node after the nodes whose values its configuration uses
fn add_reference_edges(
    graph: &mut ResourceGraph,
    configurations: &BTreeMap<NodeId, serde_json::Value>,
) -> Result<()> {
    for (owner, configuration) in configurations {
        if graph.node(owner).is_some_and(|n| n.is_existing()) {
            continue;
        }
        let mut referenced: Vec<NodeId> = ValueRef::scan(&configuration.to_string())
            .into_iter()
            .map(|r| r.node)
            .filter(|n| n != owner)
            .collect();
        referenced.sort();
        referenced.dedup();

        for node in referenced {
            if !graph.contains(&node) {
                return Err(PlanError::unresolved(owner.as_str(), node.as_str()));
            }
            if !graph.successors(&node).contains(owner) {
                graph.add_edge(&node, owner, EdgeKind::ExplicitOrder)?;
            }
        }
    }
    Ok(())
}
