//! Topology loader
//!
//! Reads a topology file, parses it and fills the target from defaults.

use crate::error::{Result, TopologyError};
use crate::model::{Target, Topology};
use crate::parser::parse_kdl_string;
use std::path::Path;
use tracing::{debug, info, instrument};

/// Load a topology file, falling back to `defaults` for unset target fields
#[instrument(skip(defaults), fields(path = %path.display()))]
pub fn load_topology(path: &Path, defaults: &Target) -> Result<Topology> {
    debug!("Reading topology file");
    let content = std::fs::read_to_string(path).map_err(|e| TopologyError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let name = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();

    let mut topology = parse_kdl_string(&content, name)?;
    topology.target = topology.target.clone().or(defaults);

    info!(
        declarations = topology.declarations.len(),
        outputs = topology.outputs.len(),
        "Topology loaded"
    );
    Ok(topology)
}
