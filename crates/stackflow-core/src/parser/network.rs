//! target / network / output nodes

use super::{check_name, first_string, prop_integer, prop_string, reject_unknown_props, string_args};
use crate::error::{Result, TopologyError};
use crate::model::{NetworkSpec, OutputDecl, Target};
use kdl::KdlNode;

/// `target account="…" region="…"`
pub fn parse_target(node: &KdlNode) -> Result<Target> {
    reject_unknown_props(node, &["account", "region"])?;
    Ok(Target {
        account: prop_string(node, "account"),
        region: prop_string(node, "region"),
    })
}

/// `network "<name>" cidr="…" max-zones=N { partitions …; gateway-endpoint "s3" }`
pub fn parse_network(node: &KdlNode) -> Result<NetworkSpec> {
    reject_unknown_props(node, &["cidr", "max-zones"])?;

    let mut network = NetworkSpec::default();
    if let Some(name) = first_string(node) {
        check_name("network", name)?;
        network.name = name.to_string();
    }
    if let Some(cidr) = prop_string(node, "cidr") {
        network.cidr = cidr;
    }
    if let Some(zones) = prop_integer(node, "max-zones") {
        network.max_zones = i64::try_from(zones)
            .map_err(|_| TopologyError::InvalidConfig(format!("max-zones out of range: {}", zones)))?;
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "partitions" => {
                    network.partitions = string_args(child)?;
                }
                "gateway-endpoint" | "gateway_endpoint" => {
                    network.gateway_endpoints.extend(string_args(child)?);
                }
                other => {
                    return Err(TopologyError::InvalidConfig(format!(
                        "unknown network option '{}'",
                        other
                    )));
                }
            }
        }
    }

    Ok(network)
}

/// `output "<name>" node="…" field="…" sensitive=#true`
pub fn parse_output(node: &KdlNode) -> Result<OutputDecl> {
    reject_unknown_props(node, &["node", "field", "sensitive"])?;

    let name = first_string(node)
        .ok_or_else(|| TopologyError::InvalidConfig("output requires a name".to_string()))?
        .to_string();
    let target = prop_string(node, "node")
        .ok_or_else(|| TopologyError::InvalidConfig(format!("output '{}' requires node", name)))?;
    let field = prop_string(node, "field")
        .ok_or_else(|| TopologyError::InvalidConfig(format!("output '{}' requires field", name)))?;
    let sensitive = node
        .entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some("sensitive"))
        .and_then(|e| e.value().as_bool());

    Ok(OutputDecl {
        name,
        node: target,
        field,
        sensitive,
    })
}
