use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use log::info;

use crate::buffer::{LockStrategy, OverflowPolicy};
use crate::config::{PullbufConfig, load_config};
use crate::generator::{EventGenerator, WriteMode};
use crate::logging;
use crate::server::PullServer;
use crate::stop::StopSignal;

#[derive(Debug, Args)]
pub struct ServeArgs {
  /// Extra config file merged over the defaults and the global file
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  #[arg(long)]
  pub host: Option<String>,
  #[arg(long)]
  pub port: Option<u16>,
  /// Experiment duration in seconds
  #[arg(long, value_name = "SECS")]
  pub period: Option<u64>,
  /// Buffer capacity in characters
  #[arg(long)]
  pub capacity: Option<usize>,
  #[arg(long, value_enum)]
  pub policy: Option<OverflowPolicy>,
  #[arg(long, value_enum)]
  pub strategy: Option<LockStrategy>,
  /// Number of producer threads (0 runs the server alone)
  #[arg(long)]
  pub producers: Option<usize>,
  #[arg(long, value_enum)]
  pub mode: Option<WriteMode>,
}

impl ServeArgs {
  fn apply(&self, cfg: &mut PullbufConfig) {
    if let Some(host) = &self.host {
      cfg.server.host.clone_from(host);
    }
    if let Some(port) = self.port {
      cfg.server.port = port;
    }
    if let Some(period) = self.period {
      cfg.server.period_secs = period;
    }
    if let Some(capacity) = self.capacity {
      cfg.buffer.capacity = capacity;
    }
    if let Some(policy) = self.policy {
      cfg.buffer.policy = policy;
    }
    if let Some(strategy) = self.strategy {
      cfg.buffer.strategy = strategy;
    }
    if let Some(producers) = self.producers {
      cfg.generator.producers = producers;
    }
    if let Some(mode) = self.mode {
      cfg.generator.mode = mode;
    }
  }
}

pub fn run(args: &ServeArgs) -> Result<()> {
  let mut cfg = load_config(args.config.as_deref())?;
  args.apply(&mut cfg);
  cfg.validate()?;
  logging::spawn_deadlock_watchdog();

  let buffer = Arc::new(cfg.buffer.build()?);
  info!(
    "Message buffer: {} characters, {} policy, {} lock",
    buffer.capacity(),
    buffer.policy(),
    buffer.strategy()
  );

  let server = PullServer::bind(
    cfg.server.address(),
    Arc::clone(&buffer),
    cfg.server.period(),
  )?
  .with_poll_interval(cfg.server.poll_interval());
  let generator = EventGenerator::start(Arc::clone(&buffer), &cfg.generator)?;
  let handle = server
    .spawn(StopSignal::new())
    .context("failed to spawn pull server thread")?;

  // Producers must stop whether the server finished cleanly or not.
  let outcome = handle.wait();
  let events = generator.stop_and_join();
  info!("Producers wrote {events} events; {}", buffer.stats());

  let summary = outcome?;
  info!(
    "Experiment finished ({}), {} requests served",
    summary.reason, summary.requests_served
  );
  Ok(())
}
