//! Configuration for stylelens
//!
//! Supports loading config from:
//! - ~/.config/stylelens/config.toml
//! - Environment variables (`STYLELENS_DATA_DIR`)
//!
//! Every field has a default, so an empty or missing file is valid.

use crate::classifier::{NeuralConfig, DEFAULT_CACHE_CAPACITY};
use crate::models::Tier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DATA_DIR_ENV: &str = "STYLELENS_DATA_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Could not determine config directory")]
    NoConfigDir,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub neural: NeuralConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DataConfig {
    /// Directory holding blocks.jsonl and metrics.jsonl (default: ./data)
    pub dir: Option<PathBuf>,
}

/// Sample weight per label confidence tier
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Labels set directly by the user
    pub high_weight: f64,
    /// Labels swept in by a score threshold
    pub low_weight: f64,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            high_weight: 1.0,
            low_weight: 0.5,
        }
    }
}

impl LabelConfig {
    pub fn weight(&self, tier: Tier) -> f64 {
        match tier {
            Tier::High => self.high_weight,
            Tier::Low => self.low_weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub default_count: usize,
    pub fallback_seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            default_count: 10,
            fallback_seed: 42,
        }
    }
}

impl Config {
    /// Load config from all sources, with priority:
    /// 1. Environment variables (highest)
    /// 2. User config (~/.config/stylelens/config.toml)
    pub fn load() -> ConfigResult<Self> {
        let mut config = match Self::user_config_path().filter(|p| p.exists()) {
            Some(path) => Self::from_path(&path)?,
            None => Config::default(),
        };

        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                config.data.dir = Some(PathBuf::from(dir));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a specific config file
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Get the user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("stylelens").join("config.toml"))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data.dir.clone().unwrap_or_else(|| PathBuf::from("data"))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (name, w) in [
            ("labels.high_weight", self.labels.high_weight),
            ("labels.low_weight", self.labels.low_weight),
        ] {
            if !(w.is_finite() && w > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a positive number, got {}",
                    name, w
                )));
            }
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid("cache.capacity must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.neural.validation_fraction) {
            return Err(ConfigError::Invalid(format!(
                "neural.validation_fraction must be in [0, 1), got {}",
                self.neural.validation_fraction
            )));
        }
        Ok(())
    }

    /// Initialize the user config directory and create an example config
    pub fn init_user_config() -> ConfigResult<PathBuf> {
        let config_path = Self::user_config_path().ok_or(ConfigError::NoConfigDir)?;
        write_example(&config_path)?;
        Ok(config_path)
    }
}

const EXAMPLE_CONFIG: &str = r#"# stylelens configuration

[data]
# Directory with blocks.jsonl and metrics.jsonl
# dir = "/path/to/data"

[labels]
# Sample weight of labels set directly by the user
high_weight = 1.0
# Sample weight of labels added by a score threshold
low_weight = 0.5

[cache]
# Trained committees kept in memory (oldest evicted first)
capacity = 100

[sampling]
# Blocks suggested by `stylelens bootstrap` when -n is not given
default_count = 10
# Seed for the random fallback when no metrics are available
fallback_seed = 42

[neural]
# hidden_layers = [32, 16]   # default: [16] below 20 samples, else [32, 16]
learning_rate = 0.001
weight_decay = 0.01
batch_size = 32
max_epochs = 500
validation_fraction = 0.2
lr_patience = 10
stop_patience = 20
seed = 42
"#;

/// Write the example config to `path` unless a file is already there
pub fn write_example(path: &Path) -> ConfigResult<()> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    if !path.exists() {
        std::fs::write(path, EXAMPLE_CONFIG).map_err(io_err)?;
    }
    Ok(())
}
