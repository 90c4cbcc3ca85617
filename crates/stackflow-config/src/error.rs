use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error(
        "Topology file not found. Looked in:\n\
        - current directory: stack.local.kdl, .stack.local.kdl, stack.kdl, .stack.kdl\n\
        - ./.stackflow/\n\
        - ~/.config/stackflow/stack.kdl\n\
        Set STACKFLOW_TOPOLOGY_PATH to point at a file directly"
    )]
    TopologyFileNotFound,

    #[error("Invalid settings in {path}: {message}")]
    InvalidSettings { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
