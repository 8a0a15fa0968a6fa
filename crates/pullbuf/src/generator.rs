//! Demo event producer.
//!
//! Each worker thread writes `"<unix-millis>~<payload>~"` into the shared
//! buffer on a fixed interval until the generator is stopped.

use crate::buffer::SyncBuffer;
use crate::config::GeneratorConfig;
use anyhow::Context;
use clap::ValueEnum;
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How a producer writes its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
  /// Append each event to the back of the buffer.
  #[default]
  Append,
  /// Replace the buffer with each event, keeping only the latest.
  Replace,
}

#[must_use]
pub fn make_event(now_ms: u64, payload_len: usize) -> String {
  format!("{now_ms}~{}~", "*".repeat(payload_len))
}

fn now_ms() -> u64 {
  let dur = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_else(|_| Duration::from_secs(0));
  dur.as_millis() as u64
}

pub struct EventGenerator {
  // Dropping the sender disconnects every worker's stop receiver.
  stop_tx: Option<Sender<()>>,
  workers: Vec<JoinHandle<u64>>,
}

impl EventGenerator {
  /// Spawn `cfg.producers` writer threads.
  pub fn start(buffer: Arc<SyncBuffer>, cfg: &GeneratorConfig) -> anyhow::Result<Self> {
    let (stop_tx, stop_rx) = bounded::<()>(0);
    let interval = Duration::from_millis(cfg.interval_ms);
    let mut workers = Vec::with_capacity(cfg.producers);
    for idx in 0..cfg.producers {
      let buffer = Arc::clone(&buffer);
      let stop_rx = stop_rx.clone();
      let payload_len = cfg.payload_len;
      let mode = cfg.mode;
      let worker = thread::Builder::new()
        .name(format!("producer-{idx}"))
        .spawn(move || {
          let mut written = 0u64;
          loop {
            let event = make_event(now_ms(), payload_len);
            match mode {
              WriteMode::Append => buffer.append_to_back(&event),
              WriteMode::Replace => buffer.set_text(&event),
            };
            written += 1;
            match stop_rx.recv_timeout(interval) {
              Err(RecvTimeoutError::Timeout) => {}
              Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
          }
          written
        })
        .with_context(|| format!("failed to spawn producer {idx}"))?;
      workers.push(worker);
    }
    info!(
      "Started {} producer(s), one event every {:?} ({:?} mode)",
      cfg.producers, interval, cfg.mode
    );
    Ok(Self {
      stop_tx: Some(stop_tx),
      workers,
    })
  }

  /// Stop all producers and return the total number of events written.
  pub fn stop_and_join(mut self) -> u64 {
    drop(self.stop_tx.take());
    let mut total = 0;
    for (idx, worker) in self.workers.drain(..).enumerate() {
      match worker.join() {
        Ok(written) => total += written,
        Err(_) => error!("Producer {idx} panicked"),
      }
    }
    total
  }
}

impl Drop for EventGenerator {
  fn drop(&mut self) {
    // Workers notice the disconnect on their next wake-up.
    self.stop_tx.take();
  }
}
