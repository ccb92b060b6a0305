//! specrun cli definition and entrypoint.
mod init;
mod run;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::log::setup_logging;

/// specrun - run shell spec suites described in YAML.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Show verbose logs.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the default config file to spec/support/specrun.yml.
    Init,
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Spec files or glob patterns to run instead of the configured ones.
    pub files: Vec<String>,
    /// Config file, relative to the current directory.
    #[arg(short, long)]
    pub config: Option<String>,
    /// Only run specs whose full name contains this text.
    #[arg(long)]
    pub filter: Option<String>,
    /// Helper file or glob pattern, relative to the spec directory.
    #[arg(long = "helper", value_name = "PATTERN")]
    pub helpers: Vec<String>,
    /// Module loaded before helpers and specs.
    #[arg(long = "require", value_name = "PATH")]
    pub requires: Vec<String>,
    /// Run specs in random order.
    #[arg(long, value_name = "BOOL")]
    pub random: Option<bool>,
    /// Seed for random ordering.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Stop after the first failing spec.
    #[arg(long)]
    pub fail_fast: bool,
    /// Stop a spec at its first failed expectation.
    #[arg(long)]
    pub stop_on_expectation_failure: bool,
    /// Disable colored output.
    #[arg(long)]
    pub no_color: bool,
}

/// Runs the main CLI application.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        setup_logging().context("Failed to set up logging")?;
    }

    let project_dir = std::env::current_dir().context("Failed to get current directory")?;
    match cli.command {
        Some(Commands::Init) => init::execute(&project_dir),
        None => run::execute(cli.run, project_dir).await,
    }
}
