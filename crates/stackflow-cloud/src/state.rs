//! Plan state persistence
//!
//! Manages the `.stackflow/state.json` file which records, per node, the
//! provider id and resolved attributes of everything a run provisioned.
//! Later runs answer existence queries for singletons from it.

use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackflow_plan::{
    ExistenceCheck, ExistingRef, LookupKey, NodeId, NodeStatus, ProvisioningPlan, ResourceKind,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const STATE_VERSION: u32 = 1;
pub const DEFAULT_STATE_DIR: &str = ".stackflow";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Seconds after which a lock file is considered abandoned
pub const STALE_LOCK_SECS: i64 = 3600;

/// Recorded state of one topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanState {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub project: String,

    /// Fingerprint of the last recorded plan
    pub fingerprint: Option<String>,

    pub resources: BTreeMap<NodeId, ResourceState>,
}

impl Default for PlanState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            project: String::new(),
            fingerprint: None,
            resources: BTreeMap::new(),
        }
    }
}

impl PlanState {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Default::default()
        }
    }

    /// Record every provisioned or retired node of `plan`. Bound existing
    /// resources are recorded too, so later runs keep binding them.
    pub fn record(&mut self, plan: &ProvisioningPlan) {
        let keys: BTreeMap<&NodeId, String> = plan
            .singletons
            .iter()
            .map(|s| (&s.node, s.lookup_key.to_string()))
            .collect();

        for node in plan.graph.nodes() {
            match node.status {
                NodeStatus::Provisioned => {
                    let Some(provider_id) = node.provider_id.clone() else {
                        continue;
                    };
                    let now = Utc::now();
                    let created_at = self
                        .resources
                        .get(&node.id)
                        .filter(|r| r.provider_id == provider_id)
                        .map(|r| r.created_at)
                        .unwrap_or(now);
                    self.resources.insert(
                        node.id.clone(),
                        ResourceState {
                            provider_id,
                            kind: node.kind,
                            lookup_key: keys.get(&node.id).cloned(),
                            attributes: node.attributes.clone(),
                            created_at,
                            updated_at: now,
                        },
                    );
                }
                NodeStatus::Retired => {
                    self.resources.remove(&node.id);
                }
                _ => {}
            }
        }

        self.project = plan.name.clone();
        self.fingerprint = Some(plan.fingerprint.clone());
        self.updated_at = Utc::now();
    }

    pub fn resource(&self, node: &NodeId) -> Option<&ResourceState> {
        self.resources.get(node)
    }
}

/// What the control plane reported for one provisioned node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub provider_id: String,
    pub kind: ResourceKind,

    /// Singleton lookup key the resource was resolved under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_key: Option<String>,

    /// Resolved attributes (endpoint, arn, issuer, ...)
    pub attributes: BTreeMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Existence check answered from recorded state
#[derive(Debug, Clone, Default)]
pub struct StateExistenceCheck {
    by_key: BTreeMap<String, ExistingRef>,
}

impl StateExistenceCheck {
    pub fn new(state: &PlanState) -> Self {
        let by_key = state
            .resources
            .values()
            .filter_map(|r| {
                let key = r.lookup_key.clone()?;
                let mut attributes = r.attributes.clone();
                attributes.insert("lookup_key".to_string(), serde_json::Value::String(key.clone()));
                Some((
                    key,
                    ExistingRef {
                        provider_id: r.provider_id.clone(),
                        kind: r.kind,
                        attributes,
                    },
                ))
            })
            .collect();
        Self { by_key }
    }
}

impl ExistenceCheck for StateExistenceCheck {
    fn exists(&self, key: &LookupKey) -> stackflow_plan::Result<Option<ExistingRef>> {
        Ok(self.by_key.get(&key.to_string()).cloned())
    }
}

/// Reads and writes the plan state of one project
///
/// Layout of the state directory:
///
/// ```text
/// .stackflow/
///   state.json          current state
///   state.json.backup   state before the last save
///   lock.json           present while a run holds the state
/// ```
pub struct StateManager {
    state_dir: PathBuf,
}

impl StateManager {
    /// Manager for `<project_root>/.stackflow`
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self::with_dir(project_root.as_ref().join(DEFAULT_STATE_DIR))
    }

    pub fn with_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn file(&self, name: &str) -> PathBuf {
        self.state_dir.join(name)
    }

    async fn prepare_dir(&self) -> Result<()> {
        if !fs::try_exists(&self.state_dir).await? {
            fs::create_dir_all(&self.state_dir).await?;
            tracing::debug!(dir = %self.state_dir.display(), "Created state directory");
        }
        Ok(())
    }

    /// Current state; an absent file is an empty state
    pub async fn load(&self) -> Result<PlanState> {
        let path = self.file(STATE_FILE);
        if !fs::try_exists(&path).await? {
            tracing::debug!(path = %path.display(), "No recorded state");
            return Ok(PlanState::default());
        }

        let state: PlanState = serde_json::from_str(&fs::read_to_string(&path).await?)?;
        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "{} was written by state format {} (this build reads up to {})",
                path.display(),
                state.version,
                STATE_VERSION
            )));
        }

        tracing::debug!(resources = state.resources.len(), "Loaded plan state");
        Ok(state)
    }

    /// Write `state`. The previous file moves to `state.json.backup` and
    /// the new content is renamed into place, so readers never see a
    /// partial file.
    pub async fn save(&self, state: &PlanState) -> Result<()> {
        self.prepare_dir().await?;

        let path = self.file(STATE_FILE);
        let staging = self.file(".state.json.tmp");
        fs::write(&staging, serde_json::to_string_pretty(state)?).await?;

        if fs::try_exists(&path).await? {
            fs::copy(&path, self.file(STATE_BACKUP)).await?;
        }
        fs::rename(&staging, &path).await?;

        tracing::debug!(resources = state.resources.len(), "Saved plan state");
        Ok(())
    }

    /// Take the state lock. A lock older than [`STALE_LOCK_SECS`] is
    /// assumed abandoned and replaced.
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.prepare_dir().await?;
        let lock_path = self.file(LOCK_FILE);

        if fs::try_exists(&lock_path).await? {
            let held: LockInfo = serde_json::from_str(&fs::read_to_string(&lock_path).await?)?;
            if Utc::now().signed_duration_since(held.acquired_at).num_seconds() < STALE_LOCK_SECS {
                return Err(CloudError::LockError(format!(
                    "state is held by {} (pid {}) since {}",
                    held.holder, held.pid, held.acquired_at
                )));
            }
            tracing::warn!(holder = %held.holder, pid = held.pid, "Replacing stale state lock");
        }

        let info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        fs::write(&lock_path, serde_json::to_string_pretty(&info)?).await?;

        tracing::debug!(path = %lock_path.display(), "Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held state lock; dropping it removes the lock file
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => {
                tracing::debug!("Released state lock");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
