//! Topology error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("Failed to read topology file: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error: {path}\nreason: {message}")]
    IoError { path: PathBuf, message: String },

    /// Structural problem in the document itself (missing names, malformed
    /// generic fields, unknown top-level nodes)
    #[error("Invalid topology: {0}")]
    InvalidConfig(String),

    /// Kind-specific option rejected while validating one entry
    #[error("Invalid option in '{entry}': {message}")]
    InvalidOption { entry: String, message: String },
}

impl TopologyError {
    pub fn option(entry: impl Into<String>, message: impl Into<String>) -> Self {
        TopologyError::InvalidOption {
            entry: entry.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TopologyError>;
