use crate::project::Project;
use colored::Colorize;
use stackflow_plan::{Planner, ProvisioningPlan, RuleSource, StepAction};
use std::path::Path;

pub async fn handle(file: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let project = Project::load(file)?;
    let existence = project.existence().await?;

    let plan = match Planner::new(&existence).compile(&project.topology) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("{}", "✗ Planning failed".red().bold());
            for err in e.errors() {
                eprintln!("  - {}", err);
            }
            std::process::exit(1);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

pub fn print_plan(plan: &ProvisioningPlan) {
    println!(
        "{} {} ({} / {})",
        "Plan:".bold(),
        plan.name.cyan(),
        plan.account,
        plan.region
    );
    println!(
        "Network {} {} across {}",
        plan.network.name.cyan(),
        plan.network.cidr,
        plan.network.zones.join(", ")
    );

    println!();
    println!("{}", "Steps:".bold());
    for step in &plan.steps {
        let marker = match step.action {
            StepAction::Create => "+".green(),
            StepAction::Bind => "=".yellow(),
        };
        let note = if step.action == StepAction::Bind {
            " (existing)".dimmed().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:>3}. {} {:<18} {}{}",
            step.index + 1,
            marker,
            step.kind.to_string(),
            step.node.as_str().cyan(),
            note
        );
    }

    if !plan.artifacts.security_rules.is_empty() {
        println!();
        println!("{}", "Security rules:".bold());
        for rule in &plan.artifacts.security_rules {
            let source = match &rule.source {
                RuleSource::SecurityGroup { node, .. } => node.to_string(),
                RuleSource::Cidr { cidr } => cidr.clone(),
            };
            println!(
                "  {} -> {} tcp/{}  {}",
                source,
                rule.security_group,
                rule.ports.from,
                rule.description.dimmed()
            );
        }
    }

    if !plan.artifacts.bindings.is_empty() {
        println!();
        println!("{}", "Identity bindings:".bold());
        for binding in &plan.artifacts.bindings {
            println!(
                "  {} <- {} [{}]",
                binding.role.as_str().cyan(),
                binding.provider,
                binding.subjects.join(", ")
            );
        }
    }

    if !plan.singletons.is_empty() {
        println!();
        println!("{}", "Shared resources:".bold());
        for singleton in &plan.singletons {
            let state = match &singleton.existing {
                Some(existing) => format!("existing {}", existing.provider_id).yellow(),
                None => "new".green(),
            };
            println!("  {} -> {} ({})", singleton.lookup_key, singleton.node, state);
        }
    }

    if !plan.outputs.is_empty() {
        println!();
        println!("{}", "Outputs:".bold());
        for output in &plan.outputs {
            println!("  {} <- {}.{}", output.name.cyan(), output.node, output.field);
        }
    }

    println!();
    println!("{} {}", "Summary:".bold(), plan.summary());
    println!("{} {}", "Fingerprint:".bold(), plan.fingerprint.dimmed());
}
