use super::*;
use crate::model::{DatabaseConfig, KindConfig, PrincipalSpec, SettingValue};

#[test]
fn test_parse_database_declaration() {
    let kdl = r#"
        database "orders" role="private-isolated" {
            engine-version "14.13"
            instance-class "r7g.large"
            replicas 1
        }
    "#;

    let topology = parse_kdl_string(kdl, "test".to_string()).unwrap();
    assert_eq!(topology.declarations.len(), 1);

    let db = &topology.declarations[0];
    assert_eq!(db.name, "orders");
    assert_eq!(db.kind, DeclaredKind::Database);
    assert_eq!(db.role.as_deref(), Some("private-isolated"));

    let replicas = db.options.required("orders", "replicas").unwrap();
    assert_eq!(replicas.args, vec![SettingValue::Integer(1)]);

    let config = DatabaseConfig::from_settings("orders", &db.options).unwrap();
    assert_eq!(config.engine_version, "14.13");
    assert_eq!(config.replicas, 1);
}

#[test]
fn test_parse_generic_fields() {
    let kdl = r#"
        cluster "workloads" {
            version "1.32"
            access-to "orders" "events"
            after "network-addons"
        }
    "#;

    let topology = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let cluster = &topology.declarations[0];
    assert_eq!(cluster.access_to, vec!["orders", "events"]);
    assert_eq!(cluster.after, vec!["network-addons"]);

    // Generic fields never leak into the kind-specific options
    assert!(cluster.options.reject_unknown("workloads", &["version"]).is_ok());
}

#[test]
fn test_parse_trusted_by() {
    let kdl = r#"
        role "orders-api" {
            trusted-by cluster="workloads" namespace="orders" service-account="orders-api"
            trusted-by service="ec2.amazonaws.com"
        }
    "#;

    let topology = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let role = &topology.declarations[0];
    assert_eq!(
        role.trusted_by[0],
        PrincipalSpec::Workload {
            cluster: "workloads".into(),
            namespace: "orders".into(),
            service_account: "orders-api".into(),
        }
    );
    assert_eq!(
        role.trusted_by[1],
        PrincipalSpec::Service {
            service: "ec2.amazonaws.com".into()
        }
    );
}

#[test]
fn test_parse_trusted_by_requires_service_account() {
    let kdl = r#"
        role "orders-api" {
            trusted-by cluster="workloads"
        }
    "#;

    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_parse_network_and_target() {
    let kdl = r#"
        project "core-bank"
        target account="123456789012" region="ap-northeast-2"
        network "core" cidr="10.1.0.0/16" max-zones=2 {
            partitions "public" "private-isolated"
            gateway-endpoint "s3"
            gateway-endpoint "dynamodb"
        }
    "#;

    let topology = parse_kdl_string(kdl, "test".to_string()).unwrap();
    assert_eq!(topology.name, "core-bank");
    assert_eq!(topology.target.account.as_deref(), Some("123456789012"));
    assert_eq!(topology.target.region.as_deref(), Some("ap-northeast-2"));
    assert_eq!(topology.network.name, "core");
    assert_eq!(topology.network.cidr, "10.1.0.0/16");
    assert_eq!(topology.network.max_zones, 2);
    assert_eq!(topology.network.partitions, vec!["public", "private-isolated"]);
    assert_eq!(topology.network.gateway_endpoints, vec!["s3", "dynamodb"]);
}

#[test]
fn test_parse_default_network() {
    let topology = parse_kdl_string("", "test".to_string()).unwrap();
    assert_eq!(topology.network.cidr, "10.0.0.0/16");
    assert_eq!(topology.network.max_zones, 3);
    assert!(topology.network.partitions.is_empty());
}

#[test]
fn test_parse_outputs() {
    let kdl = r#"
        output "orders-endpoint" node="orders" field="endpoint"
        output "orders-secret" node="orders" field="credentials_secret" sensitive=#true
    "#;

    let topology = parse_kdl_string(kdl, "test".to_string()).unwrap();
    assert_eq!(topology.outputs.len(), 2);
    assert_eq!(topology.outputs[0].node, "orders");
    assert_eq!(topology.outputs[0].sensitive, None);
    assert_eq!(topology.outputs[1].sensitive, Some(true));
}

#[test]
fn test_parse_nested_settings() {
    let kdl = r#"
        role "reporting" {
            permission "table" {
                actions "dynamodb:Query"
                scope "account"
            }
        }
        registry "orders-api" {
            scan-on-push #true
        }
    "#;

    let topology = parse_kdl_string(kdl, "test".to_string()).unwrap();
    let role = &topology.declarations[0];
    let permission = role.options.required("reporting", "permission").unwrap();
    assert_eq!(permission.args, vec![SettingValue::String("table".into())]);
    assert!(permission.children.single("reporting", "scope").unwrap().is_some());

    let registry = &topology.declarations[1];
    let config = KindConfig::from_settings(DeclaredKind::Registry, "orders-api", &registry.options)
        .unwrap();
    match config {
        KindConfig::Registry(r) => assert!(r.scan_on_push),
        other => panic!("unexpected config: {:?}", other),
    }
}

#[test]
fn test_unknown_top_level_node_is_rejected() {
    let kdl = r#"
        lambda "handler" {}
    "#;

    let err = parse_kdl_string(kdl, "test".to_string()).unwrap_err();
    assert!(err.to_string().contains("lambda"));
}

#[test]
fn test_unknown_declaration_property_is_rejected() {
    let kdl = r#"
        table "customer" zone="a" {
            partition-key "customerId"
        }
    "#;

    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_declaration_names_are_restricted() {
    for name in ["", "orders}x", "Orders", "orders_api", "orders api"] {
        let kdl = format!("table \"{}\" {{ partition-key \"id\"; }}", name);
        let err = parse_kdl_string(&kdl, "test".to_string()).unwrap_err();
        assert!(err.to_string().contains("invalid table name"), "{}: {}", name, err);
    }

    let kdl = r#"table "orders-v2.archive" { partition-key "id"; }"#;
    let topology = parse_kdl_string(kdl, "test".to_string()).unwrap();
    assert_eq!(topology.declarations[0].name, "orders-v2.archive");

    assert!(parse_kdl_string(r#"network "Core""#, "test".to_string()).is_err());
}

#[test]
fn test_duplicate_network_is_rejected() {
    let kdl = r#"
        network "a"
        network "b"
    "#;

    assert!(parse_kdl_string(kdl, "test".to_string()).is_err());
}

#[test]
fn test_parse_kdl_file() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("core-bank");
    std::fs::create_dir(&project).unwrap();
    let path = project.join("stack.kdl");
    std::fs::write(&path, r#"table "customer" { partition-key "customerId"; }"#).unwrap();

    let topology = parse_kdl_file(&path).unwrap();
    assert_eq!(topology.name, "core-bank");
    assert_eq!(topology.declarations.len(), 1);
}
