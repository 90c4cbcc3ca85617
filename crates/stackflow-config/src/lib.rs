pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{RetrySettings, Settings};

use std::path::PathBuf;

pub const TOPOLOGY_PATH_ENV: &str = "STACKFLOW_TOPOLOGY_PATH";

const CANDIDATES: [&str; 4] = ["stack.local.kdl", ".stack.local.kdl", "stack.kdl", ".stack.kdl"];

/// StackFlow configuration directory (`~/.config/stackflow`), created on demand
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stackflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Load user settings from `~/.config/stackflow/config.yaml` with environment
/// overrides applied
pub fn load_settings() -> Result<Settings> {
    let path = match dirs::config_dir() {
        Some(dir) => dir.join("stackflow").join("config.yaml"),
        None => return Ok(Settings::default().with_env_overrides()),
    };
    Ok(Settings::from_file(&path)?.with_env_overrides())
}

/// Find the project's topology file
///
/// Search order:
/// 1. `STACKFLOW_TOPOLOGY_PATH`
/// 2. current directory: stack.local.kdl, .stack.local.kdl, stack.kdl, .stack.kdl
/// 3. `./.stackflow/`, same order
/// 4. `~/.config/stackflow/stack.kdl`
pub fn find_topology_file() -> Result<PathBuf> {
    if let Ok(topology_path) = std::env::var(TOPOLOGY_PATH_ENV) {
        let path = PathBuf::from(topology_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{} points at a missing file", TOPOLOGY_PATH_ENV);
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let stack_dir = current_dir.join(".stackflow");
    if stack_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = stack_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("stackflow").join("stack.kdl");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::TopologyFileNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use std::path::Path;

    /// Run discovery from `dir` with the env override unset
    fn discover_from(dir: &Path) -> Result<PathBuf> {
        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        let found = temp_env::with_var_unset(TOPOLOGY_PATH_ENV, find_topology_file);
        std::env::set_current_dir(previous).unwrap();
        found
    }

    #[test]
    fn test_get_config_dir() {
        let dir = get_config_dir().unwrap();
        assert!(dir.ends_with("stackflow"));
        assert!(dir.is_dir());
    }

    #[test]
    #[serial]
    fn test_find_topology_file_in_current_dir() {
        let project = tempfile::tempdir().unwrap();
        fs::write(project.path().join("stack.kdl"), "// test").unwrap();

        assert!(discover_from(project.path()).unwrap().ends_with("stack.kdl"));
    }

    #[test]
    #[serial]
    fn test_local_file_wins() {
        let project = tempfile::tempdir().unwrap();
        fs::write(project.path().join("stack.kdl"), "// shared").unwrap();
        fs::write(project.path().join(".stack.local.kdl"), "// local").unwrap();

        assert!(discover_from(project.path()).unwrap().ends_with(".stack.local.kdl"));
    }

    #[test]
    #[serial]
    fn test_find_topology_file_in_stack_dir() {
        let project = tempfile::tempdir().unwrap();
        let stack_dir = project.path().join(".stackflow");
        fs::create_dir(&stack_dir).unwrap();
        fs::write(stack_dir.join("stack.kdl"), "// in stack dir").unwrap();

        assert!(discover_from(project.path()).unwrap().ends_with(".stackflow/stack.kdl"));
    }

    #[test]
    #[serial]
    fn test_env_var_wins() {
        let project = tempfile::tempdir().unwrap();
        let topology_path = project.path().join("custom.kdl");
        fs::write(&topology_path, "// custom").unwrap();

        temp_env::with_var(TOPOLOGY_PATH_ENV, Some(&topology_path), || {
            assert_eq!(find_topology_file().unwrap(), topology_path);
        });
    }

    #[test]
    #[serial]
    fn test_not_found() {
        let empty = tempfile::tempdir().unwrap();
        let result = discover_from(empty.path());

        if !dirs::config_dir().is_some_and(|d| d.join("stackflow/stack.kdl").exists()) {
            assert!(matches!(result, Err(ConfigError::TopologyFileNotFound)));
        }
    }
}
