//! User settings (`~/.config/stackflow/config.yaml`)

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ACCOUNT_ENV: &str = "STACKFLOW_ACCOUNT";
pub const REGION_ENV: &str = "STACKFLOW_REGION";

/// Retry policy for control-plane calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default target account
    pub account: Option<String>,

    /// Default target region
    pub region: Option<String>,

    /// Maximum control-plane operations in flight
    pub max_parallel: usize,

    pub retry: RetrySettings,

    /// State directory, relative to the topology file
    pub state_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            account: None,
            region: None,
            max_parallel: 4,
            retry: RetrySettings::default(),
            state_dir: PathBuf::from(".stackflow"),
        }
    }
}

impl Settings {
    /// Read settings from `path`; a missing file yields the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|message| ConfigError::InvalidSettings {
            path: path.to_path_buf(),
            message,
        })
    }

    fn from_yaml(content: &str) -> std::result::Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        if settings.max_parallel == 0 {
            return Err("max_parallel must be at least 1".to_string());
        }
        if settings.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        Ok(settings)
    }

    /// Apply `STACKFLOW_ACCOUNT` / `STACKFLOW_REGION`
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(account) = non_empty_env(ACCOUNT_ENV) {
            self.account = Some(account);
        }
        if let Some(region) = non_empty_env(REGION_ENV) {
            self.region = Some(region);
        }
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
