//! KDL parser
//!
//! Parses a StackFlow topology document into a [`Topology`]. Generic entry
//! fields (`role=`, `access-to`, `after`, `trusted-by`) are interpreted here;
//! kind-specific children are kept as [`Settings`](crate::model::Settings)
//! and validated later by the planner.

mod declaration;
mod network;

use declaration::parse_declaration;
use network::{parse_network, parse_output, parse_target};

use crate::error::{Result, TopologyError};
use crate::model::{DeclaredKind, Topology};
use kdl::{KdlDocument, KdlNode, KdlValue};
use std::fs;
use std::path::Path;

/// Parse a topology file
pub fn parse_kdl_file<P: AsRef<Path>>(path: P) -> Result<Topology> {
    let content = fs::read_to_string(path.as_ref())?;
    let name = path
        .as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_kdl_string(&content, name)
}

/// Parse a topology from a string
pub fn parse_kdl_string(content: &str, default_name: String) -> Result<Topology> {
    let doc: KdlDocument = content.parse()?;

    let mut topology = Topology {
        name: default_name,
        ..Default::default()
    };
    let mut network_seen = false;
    let mut target_seen = false;

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                topology.name = first_string(node)
                    .ok_or_else(|| TopologyError::InvalidConfig("project requires a name".to_string()))?
                    .to_string();
            }
            "target" => {
                if target_seen {
                    return Err(TopologyError::InvalidConfig(
                        "target may only be declared once".to_string(),
                    ));
                }
                target_seen = true;
                topology.target = parse_target(node)?;
            }
            "network" => {
                if network_seen {
                    return Err(TopologyError::InvalidConfig(
                        "only one network may be declared".to_string(),
                    ));
                }
                network_seen = true;
                topology.network = parse_network(node)?;
            }
            "output" => {
                topology.outputs.push(parse_output(node)?);
            }
            other => {
                let kind: DeclaredKind = other
                    .parse()
                    .map_err(|_| TopologyError::InvalidConfig(format!("unknown node '{}'", other)))?;
                topology.declarations.push(parse_declaration(kind, node)?);
            }
        }
    }

    tracing::debug!(
        declarations = topology.declarations.len(),
        outputs = topology.outputs.len(),
        "Parsed topology '{}'",
        topology.name
    );

    Ok(topology)
}

/// First positional argument as a string
fn first_string(node: &KdlNode) -> Option<&str> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
}

/// Resource names become node ids and `${name.field}` placeholders, so they
/// are limited to lowercase letters, digits, `-` and `.`
fn check_name(kind: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(TopologyError::InvalidConfig(format!(
            "invalid {} name '{}': use lowercase letters, digits, '-' and '.'",
            kind, name
        )))
    }
}

/// Positional string arguments
fn string_args(node: &KdlNode) -> Result<Vec<String>> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| {
            e.value().as_string().map(str::to_string).ok_or_else(|| {
                TopologyError::InvalidConfig(format!(
                    "'{}' expects string arguments",
                    node.name().value()
                ))
            })
        })
        .collect()
}

/// Named property as a string
fn prop_string(node: &KdlNode, name: &str) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(name))
        .and_then(|e| e.value().as_string())
        .map(str::to_string)
}

/// Named property as an integer
fn prop_integer(node: &KdlNode, name: &str) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(name))
        .and_then(|e| e.value().as_integer())
}

/// Property names on a node outside `allowed`
fn reject_unknown_props(node: &KdlNode, allowed: &[&str]) -> Result<()> {
    for entry in node.entries() {
        if let Some(name) = entry.name()
            && !allowed.contains(&name.value())
        {
            return Err(TopologyError::InvalidConfig(format!(
                "unknown property '{}' on '{}'",
                name.value(),
                node.name().value()
            )));
        }
    }
    Ok(())
}

fn is_null(value: &KdlValue) -> bool {
    matches!(value, KdlValue::Null)
}

#[cfg(test)]
mod tests;
