//! meshsim command line.
//!
//! Simulates a microservice architecture as a set of cooperating actors.
//!
//! # Quick Start
//!
//! ```bash
//! # Run the built-in architecture for ten seconds
//! meshsim run
//!
//! # Three regions, one cassandra node removed half way through
//! meshsim run --regions 3 --victim cassTurtle --duration 30s
//!
//! # Show the effective configuration
//! meshsim config --format toml
//! ```

mod commands;
mod style;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::run::RunArgs;

/// meshsim - simulate microservice architectures with actors.
#[derive(Parser)]
#[command(name = "meshsim")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding meshsim.toml and meshsim.local.toml.
    #[arg(short = 'C', long, global = true, default_value = ".")]
    project: PathBuf,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Build an architecture, drive traffic through it, and shut it down.
    Run(RunArgs),

    /// Print the effective configuration.
    Config {
        /// Output format (text, toml, json).
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Explain the segments of a node name, or of a "from to" edge.
    Name {
        /// Full nine-segment name, or two names separated by a space.
        name: String,

        /// Use the reduced display form.
        #[arg(short, long)]
        reduce: bool,
    },
}

fn main() -> Result<()> {
    // Logs go to stderr so command output stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    style::set_no_color(cli.no_color);

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Run(args) => commands::run::run(&cli.project, args),
        Commands::Config { format } => commands::config::show(&cli.project, &format),
        Commands::Name { name, reduce } => commands::name::explain(&name, reduce),
    }
}
