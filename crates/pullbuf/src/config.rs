use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use owo_colors::OwoColorize as _;
use serde::{Deserialize, Serialize};
use toml::Value as TomlValue;

use crate::buffer::{LockStrategy, OverflowPolicy, SyncBuffer};
use crate::generator::WriteMode;

/// Known top-level config keys.
const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["buffer", "server", "generator", "client"];

const KNOWN_BUFFER_KEYS: &[&str] = &["capacity", "policy", "strategy"];
const KNOWN_SERVER_KEYS: &[&str] = &["host", "port", "period_secs", "poll_interval_ms"];
const KNOWN_GENERATOR_KEYS: &[&str] = &["producers", "interval_ms", "payload_len", "mode"];
const KNOWN_CLIENT_KEYS: &[&str] = &["interval_ms", "requests"];

// Embed repository defaults
const DEFAULT_TOML: &str =
  include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/defaults/pullbuf.toml"));

/// Embedded defaults, as shipped.
#[must_use]
pub fn default_toml() -> &'static str {
  DEFAULT_TOML
}

/// Path of the global config file, if one exists.
#[must_use]
pub fn global_config_path() -> Option<PathBuf> {
  let xdg = xdg::BaseDirectories::with_prefix("pullbuf");
  xdg.find_config_file("pullbuf.toml")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
  pub capacity: usize,
  pub policy: OverflowPolicy,
  pub strategy: LockStrategy,
}

impl BufferConfig {
  pub fn build(&self) -> Result<SyncBuffer> {
    let capacity =
      NonZeroUsize::new(self.capacity).context("buffer.capacity must be a positive integer")?;
    Ok(SyncBuffer::new(capacity, self.policy, self.strategy))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
  /// Experiment duration in seconds.
  pub period_secs: u64,
  pub poll_interval_ms: u64,
}

impl ServerConfig {
  #[must_use]
  pub fn period(&self) -> Duration {
    Duration::from_secs(self.period_secs)
  }

  #[must_use]
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  /// `host:port`, resolved when binding or connecting.
  #[must_use]
  pub fn address(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
  pub producers: usize,
  pub interval_ms: u64,
  /// Number of `*` characters between the event delimiters.
  pub payload_len: usize,
  pub mode: WriteMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
  pub interval_ms: u64,
  /// `0` pulls until the server closes.
  pub requests: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullbufConfig {
  pub buffer: BufferConfig,
  pub server: ServerConfig,
  pub generator: GeneratorConfig,
  pub client: ClientConfig,
}

impl PullbufConfig {
  /// Reject values that parse but cannot run.
  pub fn validate(&self) -> Result<()> {
    if self.buffer.capacity == 0 {
      anyhow::bail!("buffer.capacity must be a positive integer");
    }
    if self.server.port == 0 {
      anyhow::bail!("server.port must be a positive integer");
    }
    if self.server.period_secs == 0 {
      anyhow::bail!("server.period_secs must be a positive integer");
    }
    if self.server.poll_interval_ms == 0 {
      anyhow::bail!("server.poll_interval_ms must be a positive integer");
    }
    if self.server.host.trim().is_empty() {
      anyhow::bail!("server.host must not be empty");
    }
    Ok(())
  }

  /// Render as TOML, e.g. for `pullbuf config`.
  pub fn to_toml(&self) -> Result<String> {
    toml::to_string_pretty(self).context("failed to serialize config")
  }
}

fn merge_values(base: &mut TomlValue, overlay: TomlValue) {
  match (base, overlay) {
    (TomlValue::Table(base_tbl), TomlValue::Table(overlay_tbl)) => {
      for (k, v) in overlay_tbl {
        match base_tbl.get_mut(&k) {
          Some(existing) => merge_values(existing, v),
          None => {
            base_tbl.insert(k, v);
          }
        }
      }
    }
    // Arrays and scalars: replace last-wins
    (base_slot, new_v) => *base_slot = new_v,
  }
}

/// Warn about unknown keys in a parsed TOML config file.
///
/// Unknown keys are not fatal; the warning helps users catch typos.
fn warn_unknown_keys(val: &TomlValue, file_path: &Path) {
  let TomlValue::Table(table) = val else {
    return;
  };

  for key in table.keys() {
    if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
      eprintln!(
        "{}: unknown config key '{}' in {} (did you mean one of: {}?)",
        "warning".yellow(),
        key,
        file_path.display(),
        KNOWN_TOP_LEVEL_KEYS.join(", ")
      );
    }
  }

  let sections: [(&str, &[&str]); 4] = [
    ("buffer", KNOWN_BUFFER_KEYS),
    ("server", KNOWN_SERVER_KEYS),
    ("generator", KNOWN_GENERATOR_KEYS),
    ("client", KNOWN_CLIENT_KEYS),
  ];
  for (section, known) in sections {
    let Some(TomlValue::Table(inner)) = table.get(section) else {
      continue;
    };
    for key in inner.keys() {
      if !known.contains(&key.as_str()) {
        eprintln!(
          "{}: unknown config key '{}.{}' in {} (known keys: {})",
          "warning".yellow(),
          section,
          key,
          file_path.display(),
          known.join(", ")
        );
      }
    }
  }
}

fn read_toml(path: &Path) -> Result<TomlValue> {
  let data =
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
  let val: TomlValue =
    toml::from_str(&data).with_context(|| format!("invalid TOML in {}", path.display()))?;
  warn_unknown_keys(&val, path);
  Ok(val)
}

/// Load and merge configuration from defaults, the global file, and an
/// optional explicit file (highest precedence).
///
/// # Errors
/// Returns an error if a config file cannot be read or parsed, or if the
/// merged result is not a valid configuration.
pub fn load_config(explicit: Option<&Path>) -> Result<PullbufConfig> {
  // Start with embedded defaults
  let mut merged: TomlValue =
    toml::from_str(DEFAULT_TOML).context("invalid embedded default config")?;

  if let Some(global_path) = global_config_path() {
    merge_values(&mut merged, read_toml(&global_path)?);
  }

  if let Some(path) = explicit {
    merge_values(&mut merged, read_toml(path)?);
  }

  // Deserialize into strongly typed config
  let merged_str = toml::to_string(&merged).context("failed to serialize merged config")?;
  let cfg: PullbufConfig = toml::from_str(&merged_str).context("failed to parse merged config")?;
  cfg.validate()?;
  Ok(cfg)
}
