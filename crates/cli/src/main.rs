mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use warpgate_lib::config::GlobalConfig;

use cmd::BuildArgs;
use output::{OutputFormat, print_error};

/// warpgate - multi-architecture image builder
#[derive(Parser)]
#[command(name = "warpgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build an image from a template for one or more architectures
  Build(BuildArgs),

  /// Show a build manifest written by `warpgate build --manifest-out`
  Manifest {
    /// Path to the manifest file
    path: PathBuf,

    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// List saved per-architecture digest files for an image
  Digests {
    /// Image name the digests were saved under
    image: String,

    /// Directory holding the digest files (default: the data directory)
    #[arg(long)]
    dir: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Show host platform and build strategy information
  Info {
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let global = GlobalConfig::load();
  let level = global.as_ref().ok().map(|g| g.log.level.clone());
  init_logging(cli.verbose, level.as_deref());

  let result = global
    .context("Failed to load global configuration")
    .and_then(|global| run(cli.command, global));

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}

fn run(command: Commands, global: GlobalConfig) -> Result<()> {
  match command {
    Commands::Build(args) => cmd::cmd_build(args, global),
    Commands::Manifest { path, output } => cmd::cmd_manifest(&path, output),
    Commands::Digests { image, dir, output } => cmd::cmd_digests(&image, dir, output),
    Commands::Info { output } => cmd::cmd_info(&global, output),
  }
}

/// `RUST_LOG` wins; otherwise `--verbose` means debug, else the configured level.
fn init_logging(verbose: bool, configured: Option<&str>) {
  let level = if verbose { "debug" } else { configured.unwrap_or("info") };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}
