use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const TOPOLOGY: &str = r#"
project "core-bank"
target account="123456789012" region="us-east-1"

database "orders" {
    engine-version "14.13"
    instance-class "r7g.large"
    replicas 1
}
cluster "workloads" {
    version "1.32"
    access-to "orders"
}
role "orders-api" {
    trusted-by cluster="workloads" namespace="orders" service-account="orders-api"
}
registry "images" {}

output "orders-endpoint" node="orders" field="endpoint"
output "orders-credentials" node="orders" field="credentials_secret"
"#;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_topology(&self, content: &str) {
        fs::write(self.root.path().join("stack.kdl"), content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    /// `stack` running inside the project, isolated from the user's config
    pub fn stack(&self) -> Command {
        let mut cmd = Command::cargo_bin("stack").unwrap();
        cmd.current_dir(self.path())
            .env("XDG_CONFIG_HOME", self.path().join(".config"))
            .env_remove("STACKFLOW_TOPOLOGY_PATH")
            .env_remove("STACKFLOW_ACCOUNT")
            .env_remove("STACKFLOW_REGION")
            .env_remove("RUST_LOG")
            .env("CLICOLOR", "0");
        cmd
    }
}
