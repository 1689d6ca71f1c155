//! CLI command definitions and handlers

mod data;
mod init;
mod score;

use crate::config::Config;
use crate::models::{BlockId, LabeledItem};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Parse a label given as `ID` or `ID:TIER` (tier: high/low, click/threshold)
fn parse_label(s: &str) -> Result<LabeledItem, String> {
    let (id, tier) = match s.split_once(':') {
        Some((id, tier)) => (id, tier.parse()?),
        None => (s, Default::default()),
    };
    let id: BlockId = id
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a valid block id", id))?;
    Ok(LabeledItem::new(id, tier))
}

/// stylelens - label code blocks by authorship style
#[derive(Parser, Debug)]
#[command(name = "stylelens")]
#[command(
    version,
    about = "Active-learning assistant for labeling code blocks by authorship style",
    after_help = "\
Examples:
  stylelens mock --blocks 200                  Generate a mock dataset in ./data
  stylelens bootstrap -n 10                    Suggest 10 diverse blocks to label first
  stylelens score -p 3 -p 17:low -n 8          Score all blocks against the labels
  stylelens code 17                            Print a block's source"
)]
pub struct Cli {
    /// Data directory with blocks.jsonl / metrics.jsonl
    #[arg(long, global = true, env = "STYLELENS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Config file (default: ~/.config/stylelens/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Score blocks against positive and negative style labels
    Score {
        /// Block matching the style, as ID or ID:TIER (repeatable)
        #[arg(long = "positive", short = 'p', value_parser = parse_label)]
        positives: Vec<LabeledItem>,

        /// Block not matching the style, as ID or ID:TIER (repeatable)
        #[arg(long = "negative", short = 'n', value_parser = parse_label)]
        negatives: Vec<LabeledItem>,

        /// Blocks to score, comma-separated (default: every block)
        #[arg(long, value_delimiter = ',')]
        candidates: Vec<BlockId>,
    },

    /// Suggest a diverse set of blocks to label before any labels exist
    Bootstrap {
        /// Number of blocks to suggest (default from config)
        #[arg(long = "count", short = 'n')]
        count: Option<usize>,

        /// Blocks to choose from, comma-separated (default: every block)
        #[arg(long, value_delimiter = ',')]
        candidates: Vec<BlockId>,
    },

    /// List block metadata
    Blocks,

    /// Print the source of one block
    Code {
        /// Block id
        id: BlockId,
    },

    /// Write a reproducible mock dataset
    Mock {
        /// Number of blocks
        #[arg(long, default_value = "200")]
        blocks: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output directory (default: the data directory)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Create ~/.config/stylelens/config.toml with example settings
    Init,
}

/// Config file, then environment, then command-line flags
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::from_path(path)?;
            config.validate()?;
            config
        }
        None => Config::load().context("Failed to load user config")?,
    };
    if let Some(dir) = &cli.data_dir {
        config.data.dir = Some(dir.clone());
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", out);
    Ok(())
}

fn data_dir_hint(dir: &Path) -> String {
    format!(
        "Failed to load data from {} (run `stylelens mock` to create a sample dataset)",
        dir.display()
    )
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Init = cli.command {
        return init::run();
    }

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Score {
            positives,
            negatives,
            candidates,
        } => score::run_score(&config, positives, negatives, candidates),
        Commands::Bootstrap { count, candidates } => {
            score::run_bootstrap(&config, count, candidates)
        }
        Commands::Blocks => data::run_blocks(&config),
        Commands::Code { id } => data::run_code(&config, id),
        Commands::Mock { blocks, seed, out } => data::run_mock(&config, blocks, seed, out),
        Commands::Init => init::run(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label("12").unwrap(), LabeledItem::high(12));
        assert_eq!(parse_label("12:low").unwrap(), LabeledItem::low(12));
        assert_eq!(parse_label("7:click").unwrap(), LabeledItem::new(7, Tier::High));
        assert!(parse_label("x:high").is_err());
        assert!(parse_label("3:medium").is_err());
    }

    #[test]
    fn test_cli_parses_score_command() {
        let cli = Cli::try_parse_from([
            "stylelens",
            "score",
            "-p",
            "1",
            "-p",
            "4:low",
            "-n",
            "2",
            "--candidates",
            "1,2,3,4",
        ])
        .unwrap();
        match cli.command {
            Commands::Score {
                positives,
                negatives,
                candidates,
            } => {
                assert_eq!(positives, vec![LabeledItem::high(1), LabeledItem::low(4)]);
                assert_eq!(negatives, vec![LabeledItem::high(2)]);
                assert_eq!(candidates, vec![1, 2, 3, 4]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "stylelens",
            "bootstrap",
            "-n",
            "5",
            "--data-dir",
            "/tmp/blocks",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/blocks")));
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Bootstrap { count: Some(5), .. }));
    }

    #[test]
    fn test_cli_rejects_unknown_log_level() {
        assert!(Cli::try_parse_from(["stylelens", "blocks", "--log-level", "loud"]).is_err());
    }
}
