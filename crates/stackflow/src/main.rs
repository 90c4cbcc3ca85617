mod commands;
mod project;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stack")]
#[command(about = "Declare the topology. Get the plan.", long_about = None)]
struct Cli {
    /// Topology file (default: discovered from the current directory)
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the topology without building a plan
    Validate,
    /// Compile the topology into a provisioning plan
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Execute the plan against a simulated control plane
    Simulate {
        /// Make creating this node fail (repeatable)
        #[arg(long = "fail", value_name = "NODE")]
        fail: Vec<String>,
        /// Retire everything again after the apply
        #[arg(long)]
        teardown: bool,
        /// Record the result in the plan state so later plans bind to it
        #[arg(long)]
        record: bool,
        /// Print the apply report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show version information
    Version,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Version => {
            println!("stackflow {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Validate => commands::validate::handle(cli.file.as_deref()),
        Commands::Plan { json } => commands::plan::handle(cli.file.as_deref(), json).await,
        Commands::Simulate {
            fail,
            teardown,
            record,
            json,
        } => {
            let options = commands::simulate::SimulateOptions {
                fail,
                teardown,
                record,
                json,
            };
            commands::simulate::handle(cli.file.as_deref(), &options).await
        }
    }
}
