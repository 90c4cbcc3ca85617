//! Resource declaration nodes

use super::{check_name, first_string, is_null, prop_string, reject_unknown_props, string_args};
use crate::error::{Result, TopologyError};
use crate::model::{Declaration, DeclaredKind, PrincipalSpec, Setting, SettingValue, Settings};
use kdl::{KdlDocument, KdlNode, KdlValue};

/// Parse `<kind> "<name>" role="…" { … }`
pub fn parse_declaration(kind: DeclaredKind, node: &KdlNode) -> Result<Declaration> {
    let name = first_string(node)
        .ok_or_else(|| TopologyError::InvalidConfig(format!("{} requires a name", kind)))?
        .to_string();
    check_name(kind.as_str(), &name)?;
    reject_unknown_props(node, &["role"])?;

    let mut declaration = Declaration::new(kind, name);
    declaration.role = prop_string(node, "role");

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "access-to" | "access_to" => {
                    declaration.access_to.extend(string_args(child)?);
                }
                "after" => {
                    declaration.after.extend(string_args(child)?);
                }
                "trusted-by" | "trusted_by" => {
                    declaration
                        .trusted_by
                        .push(parse_principal(&declaration.name, child)?);
                }
                // Everything else is kind-specific and validated by the planner
                _ => {
                    declaration.options.push(to_setting(child)?);
                }
            }
        }
    }

    Ok(declaration)
}

/// `trusted-by cluster="…" namespace="…" service-account="…"` or
/// `trusted-by service="ec2.amazonaws.com"`
fn parse_principal(entry: &str, node: &KdlNode) -> Result<PrincipalSpec> {
    reject_unknown_props(node, &["cluster", "namespace", "service-account", "service"])?;

    if let Some(service) = prop_string(node, "service") {
        if prop_string(node, "cluster").is_some() {
            return Err(TopologyError::InvalidConfig(format!(
                "trusted-by in '{}' names both a service and a cluster",
                entry
            )));
        }
        return Ok(PrincipalSpec::Service { service });
    }

    let cluster = prop_string(node, "cluster").ok_or_else(|| {
        TopologyError::InvalidConfig(format!(
            "trusted-by in '{}' requires cluster= or service=",
            entry
        ))
    })?;
    let namespace = prop_string(node, "namespace").unwrap_or_else(|| "default".to_string());
    let service_account = prop_string(node, "service-account").ok_or_else(|| {
        TopologyError::InvalidConfig(format!(
            "trusted-by in '{}' requires service-account=",
            entry
        ))
    })?;

    Ok(PrincipalSpec::Workload {
        cluster,
        namespace,
        service_account,
    })
}

fn to_setting(node: &KdlNode) -> Result<Setting> {
    let mut setting = Setting::new(node.name().value());

    for entry in node.entries() {
        if is_null(entry.value()) {
            continue;
        }
        let value = to_value(node, entry.value())?;
        match entry.name() {
            Some(name) => {
                setting.props.insert(name.value().to_string(), value);
            }
            None => setting.args.push(value),
        }
    }

    if let Some(children) = node.children() {
        setting.children = to_settings(children)?;
    }

    Ok(setting)
}

fn to_settings(doc: &KdlDocument) -> Result<Settings> {
    let mut settings = Settings::new();
    for node in doc.nodes() {
        settings.push(to_setting(node)?);
    }
    Ok(settings)
}

fn to_value(node: &KdlNode, value: &KdlValue) -> Result<SettingValue> {
    if let Some(s) = value.as_string() {
        return Ok(SettingValue::String(s.to_string()));
    }
    if let Some(b) = value.as_bool() {
        return Ok(SettingValue::Bool(b));
    }
    if let Some(i) = value.as_integer() {
        return i64::try_from(i).map(SettingValue::Integer).map_err(|_| {
            TopologyError::InvalidConfig(format!(
                "integer out of range in '{}': {}",
                node.name().value(),
                i
            ))
        });
    }
    Err(TopologyError::InvalidConfig(format!(
        "unsupported value in '{}': {}",
        node.name().value(),
        value
    )))
}
