use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod generator;
pub mod logging;
pub mod server;
pub mod stop;

mod commands;

pub use buffer::{BufferStats, LockStrategy, OverflowPolicy, SyncBuffer};
pub use error::ServeError;
pub use server::{PullServer, ServeSummary, ServerHandle, StopReason};
pub use stop::StopSignal;

/// pullbuf - a bounded message buffer drained by a single pull client.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
  /// Run producers and the pull server until the experiment period elapses
  Serve(commands::serve::ServeArgs),
  /// Connect to a pull server and print every reply
  Pull(commands::pull::PullArgs),
  /// Print the effective configuration as TOML
  Config {
    /// Extra config file merged over the defaults and the global file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print the embedded defaults instead
    #[arg(long)]
    defaults: bool,
  },
}

pub fn parse() -> Cli {
  Cli::parse()
}

pub fn run() -> Result<()> {
  let cli = parse();
  logging::init();

  match cli.command {
    Commands::Serve(args) => commands::serve::run(&args),
    Commands::Pull(args) => commands::pull::run(&args),
    Commands::Config { config, defaults } => commands::config::run(config.as_deref(), defaults),
  }
}
