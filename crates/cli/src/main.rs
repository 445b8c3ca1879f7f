mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use distgraph_lib::config::Property;
use distgraph_lib::consts::DEFAULT_CONFIG_FILE;
use distgraph_lib::pipeline::Target;

use output::{OutputFormat, print_error};

/// distgraph - incremental builds and releases of versioned distributions
#[derive(Parser)]
#[command(name = "distgraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(flatten)]
  run: RunArgs,

  #[command(subcommand)]
  command: Commands,
}

/// Flags shared by every command that configures a pipeline.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
  /// Path to the configuration file
  #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
  pub config: PathBuf,

  /// Maximum number of nodes to run at once (default: number of CPUs)
  #[arg(short = 'j', long, global = true)]
  pub parallelism: Option<usize>,

  /// Stop scheduling new nodes after the first failure
  #[arg(long, global = true)]
  pub fail_fast: bool,

  /// Ignore recorded fingerprints and run every node
  #[arg(long, global = true)]
  pub rerun_tasks: bool,

  /// Set a property, e.g. -P overwriteExisting=true
  #[arg(short = 'P', value_name = "KEY=VALUE", global = true)]
  pub properties: Vec<Property>,

  /// Release token (overrides -P releaseToken and the token environment variable)
  #[arg(long, global = true)]
  pub token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
  /// Build every distribution archive and its checksum
  Assemble,

  /// Assemble and verify every archive against its checksum
  Check,

  /// Assemble, verify, tag and publish a release
  #[command(alias = "release")]
  Publish,

  /// Show which nodes would run for a target, without running anything
  Plan {
    /// Target to plan
    #[arg(value_enum, default_value_t = PlanTarget::Assemble)]
    target: PlanTarget,
  },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum PlanTarget {
  Assemble,
  Check,
  Publish,
}

impl From<PlanTarget> for Target {
  fn from(target: PlanTarget) -> Self {
    match target {
      PlanTarget::Assemble => Target::Assemble,
      PlanTarget::Check => Target::Check,
      PlanTarget::Publish => Target::Publish,
    }
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::Assemble => cmd::cmd_run(Target::Assemble, &cli.run, cli.output),
    Commands::Check => cmd::cmd_run(Target::Check, &cli.run, cli.output),
    Commands::Publish => cmd::cmd_run(Target::Publish, &cli.run, cli.output),
    Commands::Plan { target } => cmd::cmd_plan(target.into(), &cli.run, cli.output),
  };

  match result {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::FAILURE,
    Err(err) => {
      print_error(&format!("{err:#}"));
      ExitCode::FAILURE
    }
  }
}
