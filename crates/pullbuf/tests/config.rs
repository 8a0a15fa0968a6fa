use std::fs;
use std::path::Path;

use anyhow::Result;
use serial_test::serial;
use tempfile::TempDir;

use pullbuf::config::load_config;
use pullbuf::{LockStrategy, OverflowPolicy};

fn write_global(xdg_root: &Path, body: &str) -> Result<()> {
  let dir = xdg_root.join("pullbuf");
  fs::create_dir_all(&dir)?;
  fs::write(dir.join("pullbuf.toml"), body)?;
  Ok(())
}

#[test]
#[serial]
fn defaults_apply_without_any_file() -> Result<()> {
  let xdg_root = TempDir::new()?;
  temp_env::with_var(
    "XDG_CONFIG_HOME",
    Some(xdg_root.path().as_os_str()),
    || -> Result<()> {
      let cfg = load_config(None)?;
      assert_eq!(cfg.buffer.capacity, 4096);
      assert_eq!(cfg.buffer.policy, OverflowPolicy::DropNew);
      assert_eq!(cfg.server.port, 7878);
      assert_eq!(cfg.server.period_secs, 60);
      Ok(())
    },
  )
}

#[test]
#[serial]
fn global_file_overrides_defaults() -> Result<()> {
  let xdg_root = TempDir::new()?;
  write_global(
    xdg_root.path(),
    r#"[buffer]
policy = "drop-old"
strategy = "spin"
"#,
  )?;
  temp_env::with_var(
    "XDG_CONFIG_HOME",
    Some(xdg_root.path().as_os_str()),
    || -> Result<()> {
      let cfg = load_config(None)?;
      assert_eq!(cfg.buffer.policy, OverflowPolicy::DropOld);
      assert_eq!(cfg.buffer.strategy, LockStrategy::Spin);
      // Untouched keys keep their defaults.
      assert_eq!(cfg.buffer.capacity, 4096);
      Ok(())
    },
  )
}

#[test]
#[serial]
fn explicit_file_wins_over_global() -> Result<()> {
  let xdg_root = TempDir::new()?;
  write_global(xdg_root.path(), "[server]\nport = 9000\nperiod_secs = 5\n")?;
  let project = TempDir::new()?;
  let explicit = project.path().join("run.toml");
  fs::write(&explicit, "[server]\nport = 9100\n")?;

  temp_env::with_var(
    "XDG_CONFIG_HOME",
    Some(xdg_root.path().as_os_str()),
    || -> Result<()> {
      let cfg = load_config(Some(&explicit))?;
      assert_eq!(cfg.server.port, 9100);
      assert_eq!(cfg.server.period_secs, 5);
      Ok(())
    },
  )
}

#[test]
#[serial]
fn invalid_values_are_rejected() -> Result<()> {
  let xdg_root = TempDir::new()?;
  let project = TempDir::new()?;
  let zero_capacity = project.path().join("zero.toml");
  fs::write(&zero_capacity, "[buffer]\ncapacity = 0\n")?;
  let bad_policy = project.path().join("policy.toml");
  fs::write(&bad_policy, "[buffer]\npolicy = \"drop-random\"\n")?;

  temp_env::with_var(
    "XDG_CONFIG_HOME",
    Some(xdg_root.path().as_os_str()),
    || -> Result<()> {
      let err = load_config(Some(&zero_capacity)).expect_err("capacity 0");
      assert!(format!("{err:#}").contains("buffer.capacity"));
      let err = load_config(Some(&bad_policy)).expect_err("unknown policy");
      assert!(format!("{err:#}").contains("failed to parse merged config"));
      Ok(())
    },
  )
}

#[test]
#[serial]
fn missing_explicit_file_is_an_error() -> Result<()> {
  let project = TempDir::new()?;
  let missing = project.path().join("nope.toml");
  let err = load_config(Some(&missing)).expect_err("missing file");
  assert!(format!("{err:#}").contains("failed to read"));
  Ok(())
}
