use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;

use crate::config::{default_toml, load_config};

pub fn run(config: Option<&Path>, defaults: bool) -> Result<()> {
  let mut stdout = io::stdout().lock();
  if defaults {
    write!(stdout, "{}", default_toml())?;
    return Ok(());
  }
  let cfg = load_config(config)?;
  write!(stdout, "{}", cfg.to_toml()?)?;
  Ok(())
}
