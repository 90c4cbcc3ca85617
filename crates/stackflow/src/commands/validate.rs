use crate::project::Project;
use colored::Colorize;
use stackflow_plan::{NoExisting, Planner};
use std::path::Path;

pub fn handle(file: Option<&Path>) -> anyhow::Result<()> {
    println!("{}", "Validating topology...".blue());

    let project = match Project::load(file) {
        Ok(project) => project,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Could not load the topology".red().bold());
            eprintln!("  {:#}", e);
            std::process::exit(1);
        }
    };
    println!("Topology: {}", project.topology_path.display().to_string().cyan());

    let draft = match Planner::new(&NoExisting).provision(&project.topology) {
        Ok(draft) => draft,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Topology is invalid".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    };

    if !draft.is_valid() {
        eprintln!();
        eprintln!(
            "{}",
            format!("✗ {} error(s) in topology", draft.diagnostics.len()).red().bold()
        );
        for err in &draft.diagnostics {
            eprintln!("  - {}", err);
        }
        std::process::exit(1);
    }

    let topology = &project.topology;
    println!("{}", "✓ Topology is valid".green().bold());
    println!();
    println!("Summary:");
    println!(
        "  Target: {} / {}",
        draft.context.account.cyan(),
        draft.context.region.cyan()
    );
    println!(
        "  Network: {} ({}, {} zones)",
        draft.context.network.name.cyan(),
        draft.context.network.cidr,
        draft.context.network.zones.len()
    );
    println!("  Entries: {}", topology.declarations.len());
    for decl in &topology.declarations {
        println!("    - {} ({})", decl.name.cyan(), decl.kind);
    }
    println!("  Graph: {} nodes", draft.graph.len());
    if !topology.outputs.is_empty() {
        println!("  Outputs: {}", topology.outputs.len());
    }

    Ok(())
}
