//! Init command - create the user config file

use crate::config::Config;
use anyhow::{Context, Result};

pub fn run() -> Result<()> {
    let path = Config::init_user_config().context("Failed to create user config")?;
    eprintln!("Config file: {}", path.display());
    Ok(())
}
