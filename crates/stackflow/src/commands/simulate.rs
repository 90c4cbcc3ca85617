use crate::commands::plan::print_plan;
use crate::project::Project;
use colored::Colorize;
use stackflow_cloud::{ApplyReport, Executor, ExecutorConfig, SimulatedControlPlane};
use stackflow_plan::{NodeStatus, Planner};
use std::path::Path;
use std::time::Duration;

pub struct SimulateOptions {
    pub fail: Vec<String>,
    pub teardown: bool,
    pub record: bool,
    pub json: bool,
}

pub async fn handle(file: Option<&Path>, options: &SimulateOptions) -> anyhow::Result<()> {
    let json = options.json;
    let project = Project::load(file)?;
    let existence = project.existence().await?;

    let mut plan = match Planner::new(&existence).compile(&project.topology) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("{}", "✗ Planning failed".red().bold());
            for err in e.errors() {
                eprintln!("  - {}", err);
            }
            std::process::exit(1);
        }
    };
    for node in &options.fail {
        if plan.step(&node.as_str().into()).is_none() {
            anyhow::bail!("--fail names '{}', which is not in the plan", node);
        }
    }

    let control_plane = options
        .fail
        .iter()
        .fold(SimulatedControlPlane::new(), |cp, node| {
            cp.fail(node.as_str(), "injected failure")
        });
    let config = ExecutorConfig {
        poll_interval: Duration::ZERO,
        ..project.executor_config()
    };
    let executor = Executor::with_config(&control_plane, config);

    if !json {
        print_plan(&plan);
        println!();
        println!("{}", "Applying against the simulated control plane...".blue());
    }
    let report = executor.apply(&mut plan).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if options.teardown {
        let retired = executor.retire(&mut plan).await?;
        if !json {
            println!();
            println!(
                "{} {} retired, {} failed, {} kept",
                "Teardown:".bold(),
                retired.retired.len(),
                retired.failed.len(),
                retired.kept.len()
            );
            for (node, message) in &retired.failed {
                println!("  {} {}: {}", "✗".red(), node, message);
            }
        }
    }

    if options.record {
        let manager = project.state_manager();
        let lock = manager.acquire_lock().await?;
        let mut state = manager.load().await?;
        state.record(&plan);
        manager.save(&state).await?;
        lock.release().await?;
        if !json {
            println!(
                "{} {} resources in {}",
                "Recorded".green(),
                state.resources.len(),
                project.settings.state_dir.display()
            );
        }
    }

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &ApplyReport) {
    println!();
    for node in &report.nodes {
        let status = match node.status {
            NodeStatus::Provisioned if node.bound => "bound".yellow(),
            NodeStatus::Provisioned => "provisioned".green(),
            NodeStatus::Failed => "failed".red().bold(),
            NodeStatus::Blocked => "blocked".red(),
            other => other.to_string().normal(),
        };
        match &node.message {
            Some(message) => println!("  {:<24} {}  {}", node.node.as_str(), status, message.dimmed()),
            None => println!("  {:<24} {}", node.node.as_str(), status),
        }
    }

    if !report.outputs.is_empty() || !report.unavailable_outputs.is_empty() {
        println!();
        println!("{}", "Outputs:".bold());
        for output in &report.outputs {
            println!("  {}", output);
        }
        for (name, reason) in &report.unavailable_outputs {
            println!("  {} {}", name, format!("(unavailable: {})", reason).dimmed());
        }
    }

    println!();
    let summary = report.summary();
    if report.is_success() {
        println!("{} {}", "✓".green().bold(), summary);
    } else {
        println!("{} {}", "✗".red().bold(), summary);
    }
}
