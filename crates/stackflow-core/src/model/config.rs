//! Typed, closed configuration per resource kind
//!
//! Each `from_settings` builds the kind's configuration from a
//! declaration's [`Settings`] and rejects anything it does not recognize.

use super::settings::{Setting, Settings};
use super::topology::DeclaredKind;
use crate::error::{Result, TopologyError};
use serde::{Deserialize, Serialize};

/// Validated configuration of one declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum KindConfig {
    Cluster(ClusterConfig),
    Broker(BrokerConfig),
    Database(DatabaseConfig),
    Table(TableConfig),
    Registry(RegistryConfig),
    Role(RoleConfig),
    Instance(InstanceConfig),
}

impl KindConfig {
    pub fn from_settings(kind: DeclaredKind, entry: &str, settings: &Settings) -> Result<Self> {
        Ok(match kind {
            DeclaredKind::Cluster => KindConfig::Cluster(ClusterConfig::from_settings(entry, settings)?),
            DeclaredKind::Broker => KindConfig::Broker(BrokerConfig::from_settings(entry, settings)?),
            DeclaredKind::Database => {
                KindConfig::Database(DatabaseConfig::from_settings(entry, settings)?)
            }
            DeclaredKind::Table => KindConfig::Table(TableConfig::from_settings(entry, settings)?),
            DeclaredKind::Registry => {
                KindConfig::Registry(RegistryConfig::from_settings(entry, settings)?)
            }
            DeclaredKind::Role => KindConfig::Role(RoleConfig::from_settings(entry, settings)?),
            DeclaredKind::Instance => {
                KindConfig::Instance(InstanceConfig::from_settings(entry, settings)?)
            }
        })
    }
}

fn positive(entry: &str, key: &str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| TopologyError::option(entry, format!("'{}' must be positive, got {}", key, value)))
}

fn optional_string(settings: &Settings, entry: &str, key: &str) -> Result<Option<String>> {
    settings
        .single(entry, key)?
        .map(|s| {
            s.reject_extras(entry)?;
            s.string(entry)
        })
        .transpose()
}

fn required_string(settings: &Settings, entry: &str, key: &str) -> Result<String> {
    let setting = settings.required(entry, key)?;
    setting.reject_extras(entry)?;
    setting.string(entry)
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// Control-plane log stream of a managed cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterLogType {
    Api,
    Audit,
    Authenticator,
    ControllerManager,
    Scheduler,
}

impl std::str::FromStr for ClusterLogType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "api" => Ok(ClusterLogType::Api),
            "audit" => Ok(ClusterLogType::Audit),
            "authenticator" => Ok(ClusterLogType::Authenticator),
            "controller-manager" => Ok(ClusterLogType::ControllerManager),
            "scheduler" => Ok(ClusterLogType::Scheduler),
            other => Err(format!("unknown cluster log type '{}'", other)),
        }
    }
}

/// Managed worker capacity attached to a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub name: String,
    pub instance_type: String,
    pub desired: u32,
    pub min: u32,
    pub max: u32,
    pub disk_size: u32,
}

impl NodeGroup {
    fn from_setting(entry: &str, setting: &Setting) -> Result<Self> {
        setting.reject_unknown_props(
            entry,
            &["instance-type", "desired", "min", "max", "disk-size"],
        )?;
        let name = setting.string(entry)?;
        let instance_type = setting
            .prop_string(entry, "instance-type")?
            .ok_or_else(|| TopologyError::option(entry, "node-group requires instance-type"))?;
        let desired = positive(entry, "desired", setting.prop_integer(entry, "desired")?.unwrap_or(2))?;
        let min = positive(entry, "min", setting.prop_integer(entry, "min")?.unwrap_or(desired as i64))?;
        let max = positive(entry, "max", setting.prop_integer(entry, "max")?.unwrap_or(desired as i64))?;
        let disk_size = positive(entry, "disk-size", setting.prop_integer(entry, "disk-size")?.unwrap_or(20))?;

        if !(min <= desired && desired <= max) {
            return Err(TopologyError::option(
                entry,
                format!("node-group requires min <= desired <= max (got {} / {} / {})", min, desired, max),
            ));
        }

        Ok(Self {
            name,
            instance_type,
            desired,
            min,
            max,
            disk_size,
        })
    }
}

/// Managed container-orchestration cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub version: String,
    pub logging: Vec<ClusterLogType>,
    pub node_group: Option<NodeGroup>,
}

impl ClusterConfig {
    pub fn from_settings(entry: &str, settings: &Settings) -> Result<Self> {
        settings.reject_unknown(entry, &["version", "logging", "node-group"])?;

        let version = required_string(settings, entry, "version")?;

        let mut logging = match settings.single(entry, "logging")? {
            Some(setting) => {
                setting.reject_extras(entry)?;
                setting
                    .strings(entry)?
                    .iter()
                    .map(|s| s.parse().map_err(|e: String| TopologyError::option(entry, e)))
                    .collect::<Result<Vec<ClusterLogType>>>()?
            }
            None => Vec::new(),
        };
        logging.sort();
        logging.dedup();

        let node_group = settings
            .single(entry, "node-group")?
            .map(|s| NodeGroup::from_setting(entry, s))
            .transpose()?;

        Ok(Self {
            version,
            logging,
            node_group,
        })
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

pub const MAX_BROKER_VOLUME_GIB: u32 = 16_384;

/// Message-broker cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub version: String,
    pub brokers: u32,
    pub instance_type: String,
    pub volume_size: u32,
}

impl BrokerConfig {
    pub fn from_settings(entry: &str, settings: &Settings) -> Result<Self> {
        settings.reject_unknown(entry, &["version", "brokers", "instance-type", "volume-size"])?;

        let version = required_string(settings, entry, "version")?;
        let instance_type = required_string(settings, entry, "instance-type")?;
        let brokers = {
            let s = settings.required(entry, "brokers")?;
            s.reject_extras(entry)?;
            positive(entry, "brokers", s.integer(entry)?)?
        };
        let volume_size = match settings.single(entry, "volume-size")? {
            Some(s) => {
                s.reject_extras(entry)?;
                positive(entry, "volume-size", s.integer(entry)?)?
            }
            None => 100,
        };
        if volume_size > MAX_BROKER_VOLUME_GIB {
            return Err(TopologyError::option(
                entry,
                format!("volume-size must be at most {} GiB", MAX_BROKER_VOLUME_GIB),
            ));
        }

        Ok(Self {
            version,
            brokers,
            instance_type,
            volume_size,
        })
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatabaseEngine {
    AuroraPostgresql,
    AuroraMysql,
}

impl DatabaseEngine {
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseEngine::AuroraPostgresql => 5432,
            DatabaseEngine::AuroraMysql => 3306,
        }
    }

    pub fn default_username(&self) -> &'static str {
        match self {
            DatabaseEngine::AuroraPostgresql => "postgres",
            DatabaseEngine::AuroraMysql => "admin",
        }
    }
}

impl std::str::FromStr for DatabaseEngine {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "aurora-postgresql" | "postgres" => Ok(DatabaseEngine::AuroraPostgresql),
            "aurora-mysql" | "mysql" => Ok(DatabaseEngine::AuroraMysql),
            other => Err(format!("unknown database engine '{}'", other)),
        }
    }
}

/// Relational database cluster with one writer and N readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub engine: DatabaseEngine,
    pub engine_version: String,
    pub instance_class: String,
    pub replicas: u32,
    pub username: String,
}

impl DatabaseConfig {
    pub fn from_settings(entry: &str, settings: &Settings) -> Result<Self> {
        settings.reject_unknown(
            entry,
            &["engine", "engine-version", "instance-class", "replicas", "username"],
        )?;

        let engine = match optional_string(settings, entry, "engine")? {
            Some(s) => s.parse().map_err(|e: String| TopologyError::option(entry, e))?,
            None => DatabaseEngine::AuroraPostgresql,
        };
        let engine_version = required_string(settings, entry, "engine-version")?;
        let instance_class = required_string(settings, entry, "instance-class")?;
        let replicas = match settings.single(entry, "replicas")? {
            Some(s) => {
                s.reject_extras(entry)?;
                let n = s.integer(entry)?;
                u32::try_from(n).map_err(|_| {
                    TopologyError::option(entry, format!("replicas must be >= 0, got {}", n))
                })?
            }
            None => 0,
        };
        let username = optional_string(settings, entry, "username")?
            .unwrap_or_else(|| engine.default_username().to_string());

        Ok(Self {
            engine,
            engine_version,
            instance_class,
            replicas,
            username,
        })
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttributeType {
    String,
    Number,
    Binary,
}

impl std::str::FromStr for AttributeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "string" | "S" => Ok(AttributeType::String),
            "number" | "N" => Ok(AttributeType::Number),
            "binary" | "B" => Ok(AttributeType::Binary),
            other => Err(format!("unknown attribute type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAttribute {
    pub name: String,
    pub attribute_type: AttributeType,
}

impl KeyAttribute {
    fn from_setting(entry: &str, setting: &Setting) -> Result<Self> {
        setting.reject_unknown_props(entry, &["type"])?;
        let attribute_type = match setting.prop_string(entry, "type")? {
            Some(t) => t.parse().map_err(|e: String| TopologyError::option(entry, e))?,
            None => AttributeType::String,
        };
        Ok(Self {
            name: setting.string(entry)?,
            attribute_type,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BillingMode {
    OnDemand,
    Provisioned,
}

/// Key-value table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub partition_key: KeyAttribute,
    pub sort_key: Option<KeyAttribute>,
    pub billing: BillingMode,
}

impl TableConfig {
    pub fn from_settings(entry: &str, settings: &Settings) -> Result<Self> {
        settings.reject_unknown(entry, &["partition-key", "sort-key", "billing"])?;

        let partition_key = KeyAttribute::from_setting(entry, settings.required(entry, "partition-key")?)?;
        let sort_key = settings
            .single(entry, "sort-key")?
            .map(|s| KeyAttribute::from_setting(entry, s))
            .transpose()?;
        let billing = match optional_string(settings, entry, "billing")?.as_deref() {
            None | Some("on-demand") => BillingMode::OnDemand,
            Some("provisioned") => BillingMode::Provisioned,
            Some(other) => {
                return Err(TopologyError::option(
                    entry,
                    format!("unknown billing mode '{}'", other),
                ));
            }
        };

        Ok(Self {
            partition_key,
            sort_key,
            billing,
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagMutability {
    Mutable,
    Immutable,
}

/// Container image registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub scan_on_push: bool,
    pub tag_mutability: TagMutability,
}

impl RegistryConfig {
    pub fn from_settings(entry: &str, settings: &Settings) -> Result<Self> {
        settings.reject_unknown(entry, &["scan-on-push", "tag-mutability"])?;

        let scan_on_push = match settings.single(entry, "scan-on-push")? {
            Some(s) => {
                s.reject_extras(entry)?;
                s.boolean(entry)?
            }
            None => false,
        };
        let tag_mutability = match optional_string(settings, entry, "tag-mutability")?.as_deref() {
            None | Some("mutable") => TagMutability::Mutable,
            Some("immutable") => TagMutability::Immutable,
            Some(other) => {
                return Err(TopologyError::option(
                    entry,
                    format!("unknown tag-mutability '{}'", other),
                ));
            }
        };

        Ok(Self {
            scan_on_push,
            tag_mutability,
        })
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Which resources a permission request covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "names", rename_all = "kebab-case")]
pub enum PermissionScope {
    /// The listed resources
    Named(Vec<String>),
    /// Every declared resource of the kind
    AllDeclared,
    /// Every resource of the kind in the account/region
    Account,
}

/// `permission "<kind>" { actions …; resources … }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub kind: DeclaredKind,
    pub actions: Vec<String>,
    pub scope: PermissionScope,
}

impl PermissionRequest {
    fn from_setting(entry: &str, setting: &Setting) -> Result<Self> {
        setting.reject_unknown_props(entry, &[])?;
        let kind: DeclaredKind = setting
            .string(entry)?
            .parse()
            .map_err(|e: String| TopologyError::option(entry, e))?;
        if matches!(kind, DeclaredKind::Role | DeclaredKind::Instance) {
            return Err(TopologyError::option(
                entry,
                format!("permissions cannot target '{}' resources", kind),
            ));
        }

        let body = &setting.children;
        body.reject_unknown(entry, &["actions", "resources", "scope"])?;

        let mut actions = body.required(entry, "actions")?.strings(entry)?;
        actions.sort();
        actions.dedup();

        let resources = body.single(entry, "resources")?;
        let scope = body.single(entry, "scope")?;
        let scope = match (resources, scope) {
            (Some(_), Some(_)) => {
                return Err(TopologyError::option(
                    entry,
                    "permission takes either 'resources' or 'scope', not both",
                ));
            }
            (Some(r), None) => {
                let mut names = r.strings(entry)?;
                if names.iter().any(|n| n.contains('*')) {
                    return Err(TopologyError::option(
                        entry,
                        "wildcards are not allowed in 'resources'; use scope \"account\"",
                    ));
                }
                names.sort();
                names.dedup();
                PermissionScope::Named(names)
            }
            (None, Some(s)) => match s.string(entry)?.as_str() {
                "account" => PermissionScope::Account,
                other => {
                    return Err(TopologyError::option(
                        entry,
                        format!("unknown permission scope '{}'", other),
                    ));
                }
            },
            (None, None) => PermissionScope::AllDeclared,
        };

        Ok(Self {
            kind,
            actions,
            scope,
        })
    }
}

/// Identity role assumed by workloads or services
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub managed_policies: Vec<String>,
    pub permissions: Vec<PermissionRequest>,
}

impl RoleConfig {
    pub fn from_settings(entry: &str, settings: &Settings) -> Result<Self> {
        settings.reject_unknown(entry, &["managed-policy", "permission"])?;

        let mut managed_policies = Vec::new();
        for setting in settings.all("managed-policy") {
            setting.reject_extras(entry)?;
            managed_policies.extend(setting.strings(entry)?);
        }
        managed_policies.sort();
        managed_policies.dedup();

        let permissions = settings
            .all("permission")
            .map(|s| PermissionRequest::from_setting(entry, s))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            managed_policies,
            permissions,
        })
    }
}

// ---------------------------------------------------------------------------
// Instance
// ---------------------------------------------------------------------------

pub const ANY_IPV4: &str = "0.0.0.0/0";

/// Administrative ingress on an instance; absent means no admin access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminIngress {
    pub cidr: String,
    pub port: u16,
}

/// Standalone compute host (administration / bastion)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub instance_type: String,
    pub image: String,
    pub admin_ingress: Option<AdminIngress>,
}

impl InstanceConfig {
    pub fn from_settings(entry: &str, settings: &Settings) -> Result<Self> {
        settings.reject_unknown(entry, &["instance-type", "image", "admin-ingress"])?;

        let instance_type = required_string(settings, entry, "instance-type")?;
        let image = required_string(settings, entry, "image")?;

        let admin_ingress = match settings.single(entry, "admin-ingress")? {
            Some(s) => {
                s.reject_unknown_props(entry, &["cidr", "port", "exposure"])?;
                let cidr = s
                    .prop_string(entry, "cidr")?
                    .ok_or_else(|| TopologyError::option(entry, "admin-ingress requires cidr"))?;
                let port = s.prop_integer(entry, "port")?.unwrap_or(22);
                let port = u16::try_from(port)
                    .ok()
                    .filter(|p| *p > 0)
                    .ok_or_else(|| TopologyError::option(entry, format!("invalid port {}", port)))?;
                let exposure = s.prop_string(entry, "exposure")?;
                match exposure.as_deref() {
                    None | Some("restricted") if cidr == ANY_IPV4 => {
                        return Err(TopologyError::option(
                            entry,
                            "admin-ingress from 0.0.0.0/0 requires exposure=\"public\"",
                        ));
                    }
                    None | Some("restricted") | Some("public") => {}
                    Some(other) => {
                        return Err(TopologyError::option(
                            entry,
                            format!("unknown exposure '{}'", other),
                        ));
                    }
                }
                Some(AdminIngress { cidr, port })
            }
            None => None,
        };

        Ok(Self {
            instance_type,
            image,
            admin_ingress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::settings::SettingValue;

    fn s(v: &str) -> SettingValue {
        SettingValue::String(v.to_string())
    }

    fn i(v: i64) -> SettingValue {
        SettingValue::Integer(v)
    }

    fn database_settings() -> Settings {
        Settings::new()
            .with(Setting::new("engine-version").with_arg(s("14.13")))
            .with(Setting::new("instance-class").with_arg(s("r7g.large")))
            .with(Setting::new("replicas").with_arg(i(1)))
    }

    #[test]
    fn test_database_defaults() {
        let config = DatabaseConfig::from_settings("orders", &database_settings()).unwrap();
        assert_eq!(config.engine, DatabaseEngine::AuroraPostgresql);
        assert_eq!(config.username, "postgres");
        assert_eq!(config.replicas, 1);
        assert_eq!(config.engine.default_port(), 5432);
    }

    #[test]
    fn test_database_requires_engine_version() {
        let settings = Settings::new().with(Setting::new("instance-class").with_arg(s("r7g.large")));
        let err = DatabaseConfig::from_settings("orders", &settings).unwrap_err();
        assert!(err.to_string().contains("engine-version"));
    }

    #[test]
    fn test_database_negative_replicas() {
        let settings = Settings::new()
            .with(Setting::new("engine-version").with_arg(s("14.13")))
            .with(Setting::new("instance-class").with_arg(s("r7g.large")))
            .with(Setting::new("replicas").with_arg(i(-1)));
        assert!(DatabaseConfig::from_settings("orders", &settings).is_err());
    }

    #[test]
    fn test_database_rejects_password() {
        let settings = database_settings().with(Setting::new("password").with_arg(s("postgres1234!")));
        let err = DatabaseConfig::from_settings("orders", &settings).unwrap_err();
        assert!(err.to_string().contains("unknown option 'password'"));
    }

    #[test]
    fn test_cluster_node_group_bounds() {
        let settings = Settings::new()
            .with(Setting::new("version").with_arg(s("1.32")))
            .with(
                Setting::new("node-group")
                    .with_arg(s("custom"))
                    .with_prop("instance-type", s("t3.medium"))
                    .with_prop("desired", i(6))
                    .with_prop("min", i(2))
                    .with_prop("max", i(5)),
            );
        let err = ClusterConfig::from_settings("workloads", &settings).unwrap_err();
        assert!(err.to_string().contains("min <= desired <= max"));
    }

    #[test]
    fn test_cluster_logging_sorted() {
        let settings = Settings::new()
            .with(Setting::new("version").with_arg(s("1.32")))
            .with(Setting::new("logging").with_arg(s("scheduler")).with_arg(s("audit")));
        let config = ClusterConfig::from_settings("workloads", &settings).unwrap();
        assert_eq!(config.logging, vec![ClusterLogType::Audit, ClusterLogType::Scheduler]);
        assert!(config.node_group.is_none());
    }

    #[test]
    fn test_instance_broad_exposure_requires_opt_in() {
        let base = Settings::new()
            .with(Setting::new("instance-type").with_arg(s("t3.xlarge")))
            .with(Setting::new("image").with_arg(s("ami-0123")));

        let implicit = base
            .clone()
            .with(Setting::new("admin-ingress").with_prop("cidr", s(ANY_IPV4)));
        assert!(InstanceConfig::from_settings("bastion", &implicit).is_err());

        let explicit = base.clone().with(
            Setting::new("admin-ingress")
                .with_prop("cidr", s(ANY_IPV4))
                .with_prop("exposure", s("public")),
        );
        let config = InstanceConfig::from_settings("bastion", &explicit).unwrap();
        assert_eq!(config.admin_ingress.unwrap().port, 22);

        let none = InstanceConfig::from_settings("bastion", &base).unwrap();
        assert!(none.admin_ingress.is_none());
    }

    #[test]
    fn test_permission_scopes() {
        let named = Setting {
            key: "permission".into(),
            args: vec![s("table")],
            children: Settings::new()
                .with(Setting::new("actions").with_arg(s("dynamodb:PutItem")).with_arg(s("dynamodb:GetItem")))
                .with(Setting::new("resources").with_arg(s("product")).with_arg(s("customer"))),
            ..Default::default()
        };
        let config = RoleConfig::from_settings("api", &Settings::new().with(named)).unwrap();
        let request = &config.permissions[0];
        assert_eq!(request.actions, vec!["dynamodb:GetItem", "dynamodb:PutItem"]);
        assert_eq!(
            request.scope,
            PermissionScope::Named(vec!["customer".into(), "product".into()])
        );

        let wildcard = Setting {
            key: "permission".into(),
            args: vec![s("table")],
            children: Settings::new()
                .with(Setting::new("actions").with_arg(s("dynamodb:GetItem")))
                .with(Setting::new("resources").with_arg(s("*"))),
            ..Default::default()
        };
        assert!(RoleConfig::from_settings("api", &Settings::new().with(wildcard)).is_err());
    }
}
