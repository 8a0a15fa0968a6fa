use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use log::info;

use crate::client::PullClient;
use crate::config::{PullbufConfig, load_config};

#[derive(Debug, Args)]
pub struct PullArgs {
  /// Extra config file merged over the defaults and the global file
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  #[arg(long)]
  pub host: Option<String>,
  #[arg(long)]
  pub port: Option<u16>,
  /// Delay between requests in milliseconds
  #[arg(long, value_name = "MS")]
  pub interval_ms: Option<u64>,
  /// Stop after this many replies (0 pulls until the server closes)
  #[arg(long)]
  pub requests: Option<usize>,
}

impl PullArgs {
  fn apply(&self, cfg: &mut PullbufConfig) {
    if let Some(host) = &self.host {
      cfg.server.host.clone_from(host);
    }
    if let Some(port) = self.port {
      cfg.server.port = port;
    }
    if let Some(interval_ms) = self.interval_ms {
      cfg.client.interval_ms = interval_ms;
    }
    if let Some(requests) = self.requests {
      cfg.client.requests = requests;
    }
  }
}

pub fn run(args: &PullArgs) -> Result<()> {
  let mut cfg = load_config(args.config.as_deref())?;
  args.apply(&mut cfg);
  cfg.validate()?;

  let address = cfg.server.address();
  let mut client = PullClient::connect(&address)?;
  info!("Connected to pull server at {address}");
  let replies = client.run(
    cfg.client.requests,
    Duration::from_millis(cfg.client.interval_ms),
    |reply| anstream::println!("{reply}"),
  )?;
  info!("Received {replies} replies");
  Ok(())
}
