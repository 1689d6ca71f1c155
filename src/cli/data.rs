//! Dataset commands: list blocks, show code, generate mock data

use super::print_json;
use super::score::open_service;
use crate::config::Config;
use crate::models::BlockId;
use crate::store::write_mock;
use anyhow::{Context, Result};
use std::path::PathBuf;

pub fn run_blocks(config: &Config) -> Result<()> {
    let (service, _) = open_service(config)?;
    print_json(&service.blocks()?)
}

pub fn run_code(config: &Config, id: BlockId) -> Result<()> {
    let (service, _) = open_service(config)?;
    print_json(&service.block_source(id)?)
}

pub fn run_mock(config: &Config, blocks: usize, seed: u64, out: Option<PathBuf>) -> Result<()> {
    let dir = out.unwrap_or_else(|| config.data_dir());
    write_mock(&dir, blocks, seed)
        .with_context(|| format!("Failed to write mock data to {}", dir.display()))?;
    eprintln!("Wrote {} mock blocks to {}", blocks, dir.display());
    Ok(())
}
