//! Topology and settings loading shared by the commands

use anyhow::Context;
use stackflow_cloud::{ExecutorConfig, RetryConfig, StateExistenceCheck, StateManager};
use stackflow_config::Settings;
use stackflow_core::{Target, Topology, load_topology};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct Project {
    pub topology_path: PathBuf,
    pub topology: Topology,
    pub settings: Settings,
}

impl Project {
    /// Locate and parse the topology. Target values in the topology win
    /// over the user settings.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let settings = stackflow_config::load_settings().context("failed to load settings")?;
        let topology_path = match file {
            Some(path) => path.to_path_buf(),
            None => stackflow_config::find_topology_file()?,
        };
        tracing::debug!(path = %topology_path.display(), "Using topology file");

        let defaults = Target {
            account: settings.account.clone(),
            region: settings.region.clone(),
        };
        let topology = load_topology(&topology_path, &defaults)?;

        Ok(Self {
            topology_path,
            topology,
            settings,
        })
    }

    fn root(&self) -> &Path {
        self.topology_path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn state_manager(&self) -> StateManager {
        StateManager::with_dir(self.root().join(&self.settings.state_dir))
    }

    /// Existence answers from the recorded state, if any
    pub async fn existence(&self) -> anyhow::Result<StateExistenceCheck> {
        let state = self
            .state_manager()
            .load()
            .await
            .context("failed to read plan state")?;
        Ok(StateExistenceCheck::new(&state))
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let retry = &self.settings.retry;
        ExecutorConfig {
            max_parallel: self.settings.max_parallel,
            retry: RetryConfig {
                max_attempts: retry.max_attempts,
                initial_delay: Duration::from_millis(retry.initial_delay_ms),
                max_delay: Duration::from_millis(retry.max_delay_ms),
                backoff_multiplier: retry.multiplier,
            },
            ..Default::default()
        }
    }
}
