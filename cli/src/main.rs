//! CLI for torchview
//!
//! Correlates GPU access traces with a calling-context tree:
//! - view: tensor-view traces, with stall attribution and a relation graph
//! - monitor: plain memory-event traces

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "torchview")]
#[command(about = "torchview - GPU access-context analysis", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze tensor-view traces
    View(commands::view::ViewArgs),

    /// Analyze memory-event traces
    Monitor(commands::monitor::MonitorArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::View(args) => {
            init_tracing(args.verbose);
            commands::view::run(args)
        }
        Commands::Monitor(args) => {
            init_tracing(args.verbose);
            commands::monitor::run(args)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
