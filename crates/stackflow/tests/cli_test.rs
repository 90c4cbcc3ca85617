#![allow(deprecated)] // Command::cargo_bin

mod common;

use assert_cmd::Command;
use common::{TOPOLOGY, TestProject};
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("stack").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Declare the topology"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("simulate"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("stack").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stackflow"));
}

#[test]
fn test_simulate_help() {
    let mut cmd = Command::cargo_bin("stack").unwrap();
    cmd.args(["simulate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--fail"))
        .stdout(predicate::str::contains("--teardown"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("stack").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

#[test]
fn test_validate_without_project() {
    let project = TestProject::new();
    project.stack().arg("validate").assert().failure();
}

#[test]
fn test_validate_valid_topology() {
    let project = TestProject::new();
    project.write_topology(TOPOLOGY);

    project
        .stack()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Topology is valid"))
        .stdout(predicate::str::contains("orders"));
}

#[test]
fn test_validate_reports_errors() {
    let project = TestProject::new();
    project.write_topology(
        r#"
project "broken"
target account="123456789012" region="us-east-1"

database "orders" {
    instance-class "r7g.large"
}
registry "images" {
    after "missing"
}
"#,
    );

    project
        .stack()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("✗"));
}

#[test]
fn test_file_flag_wins_over_discovery() {
    let project = TestProject::new();
    let other = project.path().join("other.kdl");
    std::fs::write(&other, TOPOLOGY).unwrap();

    project
        .stack()
        .args(["validate", "-f"])
        .arg(&other)
        .assert()
        .success()
        .stdout(predicate::str::contains("other.kdl"));
}

#[test]
fn test_plan_prints_steps_and_summary() {
    let project = TestProject::new();
    project.write_topology(TOPOLOGY);

    project
        .stack()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("writer-orders"))
        .stdout(predicate::str::contains("oidc-workloads"))
        .stdout(predicate::str::contains("to create"))
        .stdout(predicate::str::contains("Fingerprint:"));
}

#[test]
fn test_plan_json() {
    let project = TestProject::new();
    project.write_topology(TOPOLOGY);

    let output = project.stack().args(["plan", "--json"]).output().unwrap();
    assert!(output.status.success());

    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(plan["name"], "core-bank");
    assert_eq!(plan["account"], "123456789012");
    assert!(!plan["steps"].as_array().unwrap().is_empty());
}

#[test]
fn test_simulate_success() {
    let project = TestProject::new();
    project.write_topology(TOPOLOGY);

    project
        .stack()
        .arg("simulate")
        .assert()
        .success()
        .stdout(predicate::str::contains("provisioned"))
        .stdout(predicate::str::contains("orders-endpoint = orders.cluster.sim"))
        .stdout(predicate::str::contains("orders-credentials = (sensitive)"))
        .stdout(predicate::str::contains("0 failed, 0 blocked"));
}

#[test]
fn test_simulate_failure_blocks_dependents() {
    let project = TestProject::new();
    project.write_topology(TOPOLOGY);

    project
        .stack()
        .args(["simulate", "--fail", "orders"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("injected failure"))
        .stdout(predicate::str::contains("blocked"));
}

#[test]
fn test_simulate_rejects_unknown_fail_target() {
    let project = TestProject::new();
    project.write_topology(TOPOLOGY);

    project
        .stack()
        .args(["simulate", "--fail", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn test_simulate_teardown() {
    let project = TestProject::new();
    project.write_topology(TOPOLOGY);

    project
        .stack()
        .args(["simulate", "--teardown"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Teardown:"))
        .stdout(predicate::str::contains("0 failed, 0 kept"));
}

#[test]
fn test_recorded_simulation_binds_on_next_plan() {
    let project = TestProject::new();
    project.write_topology(TOPOLOGY);

    project
        .stack()
        .args(["simulate", "--record"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded"));
    assert!(project.path().join(".stackflow/state.json").exists());
    assert!(!project.path().join(".stackflow/lock.json").exists());

    project
        .stack()
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 existing"));
}
