//! Plan executor
//!
//! Runs the steps of a [`ProvisioningPlan`] against a [`ControlPlane`].
//! Steps whose dependencies are all provisioned run concurrently, up to
//! `max_parallel` at a time. A failed node blocks its transitive dependents;
//! independent subtrees keep going.

use crate::error::{CloudError, Result};
use crate::provider::{Availability, ControlPlane, CreateRequest, RetryConfig};
use crate::report::{ApplyReport, NodeReport, TeardownReport};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use sha2::{Digest, Sha256};
use stackflow_plan::{
    NodeId, NodeStatus, PlanStep, ProvisioningPlan, ResourceGraph, ResourceKind, StepAction, ValueRef,
    project,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Executor settings
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Maximum operations in flight
    pub max_parallel: usize,

    /// Retry policy for `create` and `delete`
    pub retry: RetryConfig,

    /// Delay between `describe` polls
    pub poll_interval: Duration,

    /// Polls before a pending resource counts as failed
    pub max_polls: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            retry: RetryConfig::default(),
            poll_interval: Duration::from_secs(5),
            max_polls: 120,
        }
    }
}

/// Idempotency token of a node's create request: SHA-256 of the project,
/// target account, region and node id. Stable across edits to other nodes.
pub fn idempotency_token(node: &NodeId, project: &str, account: &str, region: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [project, account, region] {
        hasher.update(part.as_bytes());
        hasher.update(b":");
    }
    hasher.update(node.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Replace every `${node.field}` in `value` with the provisioned attribute.
/// A string that is exactly one placeholder takes the attribute's JSON value.
pub fn substitute(owner: &NodeId, value: &Value, graph: &ResourceGraph) -> Result<Value> {
    Ok(match value {
        Value::String(s) => substitute_str(owner, s, graph)?,
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| substitute(owner, v, graph))
                .collect::<Result<_>>()?,
        ),
        // Keys can carry references too (issuer-scoped condition keys)
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let key = match substitute_str(owner, k, graph)? {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    Ok((key, substitute(owner, v, graph)?))
                })
                .collect::<Result<_>>()?,
        ),
        other => other.clone(),
    })
}

fn substitute_str(owner: &NodeId, s: &str, graph: &ResourceGraph) -> Result<Value> {
    let refs = ValueRef::scan(s);
    match refs.as_slice() {
        [] => Ok(Value::String(s.to_string())),
        [single] if s == single.placeholder() => resolve(owner, single, graph).cloned(),
        _ => {
            let mut out = s.to_string();
            for reference in &refs {
                let text = match resolve(owner, reference, graph)? {
                    Value::String(t) => t.clone(),
                    other => other.to_string(),
                };
                out = out.replace(&reference.placeholder(), &text);
            }
            Ok(Value::String(out))
        }
    }
}

fn resolve<'g>(owner: &NodeId, reference: &ValueRef, graph: &'g ResourceGraph) -> Result<&'g Value> {
    graph
        .node(&reference.node)
        .filter(|n| n.status == NodeStatus::Provisioned)
        .and_then(|n| n.attribute(&reference.field))
        .ok_or_else(|| CloudError::UnresolvedReference {
            node: owner.clone(),
            reference: reference.to_string(),
        })
}

/// Outcome of one node's create-and-wait
struct Attempted {
    node: NodeId,
    attempts: u32,
    result: Result<(String, BTreeMap<String, Value>)>,
}

pub struct Executor<'a> {
    control_plane: &'a dyn ControlPlane,
    config: ExecutorConfig,
}

impl<'a> Executor<'a> {
    pub fn new(control_plane: &'a dyn ControlPlane) -> Self {
        Self::with_config(control_plane, ExecutorConfig::default())
    }

    pub fn with_config(control_plane: &'a dyn ControlPlane, config: ExecutorConfig) -> Self {
        Self {
            control_plane,
            config,
        }
    }

    /// Execute every create step of the plan, updating node statuses and
    /// attributes in `plan.graph`
    #[instrument(skip_all, fields(plan = %plan.name, control_plane = self.control_plane.name()))]
    pub async fn apply(&self, plan: &mut ProvisioningPlan) -> Result<ApplyReport> {
        let started = Instant::now();
        let max_parallel = self.config.max_parallel.max(1);
        let steps = &plan.steps;
        let graph = &mut plan.graph;

        let mut attempts: HashMap<NodeId, u32> = HashMap::new();
        let mut messages: HashMap<NodeId, String> = HashMap::new();
        let mut pending: Vec<&PlanStep> = steps
            .iter()
            .filter(|s| s.action == StepAction::Create)
            .filter(|s| graph.node(&s.node).is_some_and(|n| n.status == NodeStatus::Planned))
            .collect();
        let mut in_flight = FuturesUnordered::new();

        info!(steps = pending.len(), max_parallel, "Applying plan");

        loop {
            let mut i = 0;
            while i < pending.len() && in_flight.len() < max_parallel {
                let step = pending[i];
                if graph.node(&step.node).map(|n| n.status) != Some(NodeStatus::Planned) {
                    pending.remove(i);
                    continue;
                }
                let ready = step.depends_on.iter().all(|dep| {
                    graph
                        .node(dep)
                        .is_some_and(|n| n.status == NodeStatus::Provisioned)
                });
                if !ready {
                    i += 1;
                    continue;
                }
                pending.remove(i);

                match substitute(&step.node, &step.configuration, graph) {
                    Ok(configuration) => {
                        debug!(node = %step.node, kind = %step.kind, "Starting create");
                        in_flight.push(self.provision(CreateRequest {
                            node: step.node.clone(),
                            kind: step.kind,
                            idempotency_token: idempotency_token(
                                &step.node,
                                &plan.name,
                                &plan.account,
                                &plan.region,
                            ),
                            configuration,
                        }));
                    }
                    Err(e) => fail(graph, &mut messages, &step.node, e)?,
                }
            }

            let Some(done) = in_flight.next().await else {
                break;
            };
            attempts.insert(done.node.clone(), done.attempts);
            match done.result {
                Ok((provider_id, attributes)) => {
                    if let Some(node) = graph.node_mut(&done.node) {
                        node.provider_id = Some(provider_id.clone());
                        node.attributes = attributes;
                        node.attributes
                            .entry("id".to_string())
                            .or_insert_with(|| Value::String(provider_id.clone()));
                    }
                    graph.set_status(&done.node, NodeStatus::Provisioned)?;
                    info!(node = %done.node, provider_id = %provider_id, attempts = done.attempts, "Provisioned");
                }
                Err(e) => fail(graph, &mut messages, &done.node, e)?,
            }
        }

        // Nothing left can ever become ready
        for step in pending {
            if graph.node(&step.node).map(|n| n.status) == Some(NodeStatus::Planned) {
                graph.set_status(&step.node, NodeStatus::Blocked)?;
                messages.insert(step.node.clone(), "dependencies never became available".to_string());
            }
        }

        let mut report = ApplyReport {
            plan: plan.name.clone(),
            fingerprint: plan.fingerprint.clone(),
            ..Default::default()
        };
        for step in steps {
            let Some(node) = graph.node(&step.node) else {
                continue;
            };
            report.nodes.push(NodeReport {
                node: step.node.clone(),
                kind: step.kind,
                status: node.status,
                bound: step.action == StepAction::Bind,
                provider_id: node.provider_id.clone(),
                attempts: attempts.get(&step.node).copied().unwrap_or(0),
                message: messages.remove(&step.node),
            });
        }
        for decl in &plan.outputs {
            match project(graph, std::slice::from_ref(decl)) {
                Ok(outputs) => report.outputs.extend(outputs),
                Err(e) => report.unavailable_outputs.push((decl.name.clone(), e.to_string())),
            }
        }
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(summary = %report.summary(), duration_ms = report.duration_ms, "Apply finished");
        Ok(report)
    }

    /// Delete every provisioned, owned node in strict reverse plan order.
    /// Bound existing resources are never deleted.
    #[instrument(skip_all, fields(plan = %plan.name, control_plane = self.control_plane.name()))]
    pub async fn retire(&self, plan: &mut ProvisioningPlan) -> Result<TeardownReport> {
        let mut report = TeardownReport::default();
        let mut in_use: BTreeSet<NodeId> = BTreeSet::new();

        for id in plan.retirement_order() {
            let Some(node) = plan.graph.node(&id) else {
                continue;
            };
            if node.is_existing() || node.status != NodeStatus::Provisioned {
                continue;
            }
            if in_use.contains(&id) {
                report.kept.push(id);
                continue;
            }
            let Some(provider_id) = node.provider_id.clone() else {
                continue;
            };
            let kind = node.kind;

            let (_, result) = self
                .retrying(&id, "delete", || self.control_plane.delete(kind, &provider_id))
                .await;
            match result {
                Ok(()) => {
                    plan.graph.set_status(&id, NodeStatus::Retired)?;
                    info!(node = %id, provider_id = %provider_id, "Retired");
                    report.retired.push(id);
                }
                Err(e) => {
                    warn!(node = %id, error = %e, "Delete failed; keeping its dependencies");
                    in_use.extend(plan.graph.transitive_dependencies(&id));
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    async fn provision(&self, request: CreateRequest) -> Attempted {
        let node = request.node.clone();
        let (attempts, created) = self
            .retrying(&node, "create", || self.control_plane.create(&request))
            .await;

        let result = match created {
            Ok(created) => self
                .wait_available(request.kind, &created.provider_id)
                .await
                .map(|attributes| (created.provider_id, attributes)),
            Err(e) => Err(e),
        };

        Attempted {
            result: result.map_err(|e| match e {
                e @ CloudError::ProvisioningFailure { .. } => e,
                other => CloudError::ProvisioningFailure {
                    node: node.clone(),
                    attempts,
                    message: other.to_string(),
                },
            }),
            node,
            attempts,
        }
    }

    /// Run `call` until it succeeds, fails permanently or attempts run out
    async fn retrying<T, F, Fut>(&self, node: &NodeId, operation: &str, mut call: F) -> (u32, Result<T>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retry = &self.config.retry;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match call().await {
                Ok(value) => return (attempts, Ok(value)),
                Err(e) if e.is_retryable() && attempts < retry.max_attempts => {
                    let delay = retry.delay_for_attempt(attempts - 1);
                    warn!(
                        node = %node,
                        operation,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient control-plane error, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return (attempts, Err(e)),
            }
        }
    }

    /// Poll `describe` until the resource is available
    async fn wait_available(&self, kind: ResourceKind, provider_id: &str) -> Result<BTreeMap<String, Value>> {
        for poll in 0..self.config.max_polls {
            match self.control_plane.describe(kind, provider_id).await {
                Ok(description) => match description.availability {
                    Availability::Available => return Ok(description.attributes),
                    Availability::Failed(reason) => return Err(CloudError::api(reason)),
                    Availability::Pending => debug!(provider_id, poll, "Still pending"),
                },
                Err(e) if e.is_retryable() => debug!(provider_id, poll, error = %e, "Describe failed"),
                Err(e) => return Err(e),
            }
            if poll + 1 < self.config.max_polls {
                sleep(self.config.poll_interval).await;
            }
        }
        Err(CloudError::Timeout(format!(
            "{} not available after {} polls",
            provider_id, self.config.max_polls
        )))
    }
}

/// Mark `node` Failed and every planned transitive dependent Blocked
fn fail(
    graph: &mut ResourceGraph,
    messages: &mut HashMap<NodeId, String>,
    node: &NodeId,
    error: CloudError,
) -> Result<()> {
    warn!(node = %node, error = %error, "Node failed");
    graph.set_status(node, NodeStatus::Failed)?;
    messages.insert(node.clone(), error.to_string());

    for dependent in graph.transitive_dependents(node) {
        if graph.node(&dependent).map(|n| n.status) == Some(NodeStatus::Planned) {
            graph.set_status(&dependent, NodeStatus::Blocked)?;
            messages.insert(dependent.clone(), format!("blocked by failed dependency '{}'", node));
            debug!(node = %dependent, failed = %node, "Blocked");
        }
    }
    Ok(())
}
