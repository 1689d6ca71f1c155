//! JSONL-backed block store
//!
//! A data directory holds two files:
//!
//! - `blocks.jsonl`: one [`BlockRecord`] per line (metadata + code)
//! - `metrics.jsonl`: one object per line, `block_id` plus numeric metric
//!   fields. Columns are discovered as the union of all keys except
//!   `block_id`, sorted by name. Absent or `null` cells read as 0.0.
//!
//! The metrics file is optional: without it the store loads but serves no
//! feature data.

use super::{FeatureMatrix, FeatureStore, StoreError, StoreResult};
use crate::models::{BlockId, BlockInfo, BlockSource};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub const BLOCKS_FILE: &str = "blocks.jsonl";
pub const METRICS_FILE: &str = "metrics.jsonl";

/// One line of `blocks.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    #[serde(flatten)]
    pub info: BlockInfo,
    pub code: String,
}

/// In-memory block and metric store
#[derive(Debug, Default)]
pub struct BlockStore {
    ready: bool,
    blocks: Vec<BlockRecord>,
    index: HashMap<BlockId, usize>,
    columns: Vec<String>,
    /// `None` when no metric data was loaded
    metrics: Option<HashMap<BlockId, Vec<f64>>>,
}

impl BlockStore {
    /// A store that has not finished loading yet
    pub fn pending() -> Self {
        Self::default()
    }

    /// Build a ready store from already-parsed parts.
    pub fn from_parts(
        blocks: Vec<BlockRecord>,
        columns: Vec<String>,
        metrics: Option<Vec<(BlockId, Vec<f64>)>>,
    ) -> Self {
        let index = blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.info.block_id, i))
            .collect();
        let width = columns.len();
        let metrics = metrics.map(|rows| {
            rows.into_iter()
                .map(|(id, mut values)| {
                    values.resize(width, 0.0);
                    (id, values)
                })
                .collect()
        });
        Self {
            ready: true,
            blocks,
            index,
            columns,
            metrics,
        }
    }

    /// A ready store holding only metric rows (no block metadata)
    pub fn from_metrics(columns: Vec<String>, rows: Vec<(BlockId, Vec<f64>)>) -> Self {
        Self::from_parts(Vec::new(), columns, Some(rows))
    }

    /// Load `blocks.jsonl` and (optionally) `metrics.jsonl` from `dir`
    pub fn load(dir: &Path) -> StoreResult<Self> {
        let blocks_path = dir.join(BLOCKS_FILE);
        if !blocks_path.exists() {
            return Err(StoreError::MissingFile {
                file: BLOCKS_FILE,
                dir: dir.to_path_buf(),
            });
        }

        let blocks = read_blocks(&blocks_path)?;
        tracing::info!("Loaded {} blocks from {}", blocks.len(), blocks_path.display());

        let metrics_path = dir.join(METRICS_FILE);
        let (columns, metrics) = if metrics_path.exists() {
            let (columns, rows) = read_metrics(&metrics_path)?;
            tracing::info!(
                "Loaded {} metric rows with columns: {:?}",
                rows.len(),
                columns
            );
            (columns, Some(rows))
        } else {
            tracing::warn!(
                "{} not found in {}, metric features unavailable",
                METRICS_FILE,
                dir.display()
            );
            (Vec::new(), None)
        };

        Ok(Self::from_parts(blocks, columns, metrics))
    }

    /// Write this store back out as a data directory
    pub fn save(&self, dir: &Path) -> StoreResult<()> {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let blocks_path = dir.join(BLOCKS_FILE);
        write_lines(&blocks_path, self.blocks.iter().map(serde_json::to_value))?;

        if let Some(metrics) = &self.metrics {
            let metrics_path = dir.join(METRICS_FILE);
            let mut ids: Vec<_> = metrics.keys().copied().collect();
            ids.sort_unstable();
            let lines = ids.into_iter().map(|id| {
                let mut obj = serde_json::Map::new();
                obj.insert("block_id".into(), id.into());
                for (col, v) in self.columns.iter().zip(&metrics[&id]) {
                    obj.insert(col.clone(), (*v).into());
                }
                Ok(serde_json::Value::Object(obj))
            });
            write_lines(&metrics_path, lines)?;
        }
        Ok(())
    }

    pub fn has_metrics(&self) -> bool {
        self.metrics.is_some() && !self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// All block ids in load order
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.iter().map(|b| b.info.block_id).collect()
    }
}

impl FeatureStore for BlockStore {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn metric_columns(&self) -> &[String] {
        &self.columns
    }

    fn metrics_for(&self, ids: &[BlockId]) -> Option<FeatureMatrix> {
        let metrics = self.metrics.as_ref()?;
        if self.columns.is_empty() {
            return None;
        }

        let mut seen = HashSet::with_capacity(ids.len());
        let mut out_ids = Vec::new();
        let mut rows = Vec::new();
        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            if let Some(row) = metrics.get(&id) {
                out_ids.push(id);
                rows.push(row.clone());
            }
        }
        Some(FeatureMatrix::new(self.columns.clone(), out_ids, rows))
    }

    fn block_source(&self, id: BlockId) -> Option<BlockSource> {
        let record = &self.blocks[*self.index.get(&id)?];
        let language = if record.info.language.is_empty() {
            "text".to_string()
        } else {
            record.info.language.clone()
        };
        Some(BlockSource {
            block_id: id,
            code: record.code.clone(),
            language,
        })
    }

    fn blocks(&self) -> Vec<BlockInfo> {
        self.blocks.iter().map(|b| b.info.clone()).collect()
    }
}

fn open(path: &Path) -> StoreResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn read_blocks(path: &Path) -> StoreResult<Vec<BlockRecord>> {
    let mut blocks = Vec::new();
    for (i, line) in open(path)?.lines().enumerate() {
        let line = line.map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record: BlockRecord = serde_json::from_str(&line).map_err(|source| StoreError::Parse {
            file: BLOCKS_FILE,
            line: i + 1,
            source,
        })?;
        blocks.push(record);
    }
    Ok(blocks)
}

type MetricRows = Vec<(BlockId, Vec<f64>)>;

fn read_metrics(path: &Path) -> StoreResult<(Vec<String>, MetricRows)> {
    let mut raw: Vec<(usize, BlockId, serde_json::Map<String, serde_json::Value>)> = Vec::new();
    let mut columns = BTreeSet::new();

    for (i, line) in open(path)?.lines().enumerate() {
        let line = line.map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let mut obj: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&line)
            .map_err(|source| StoreError::Parse {
                file: METRICS_FILE,
                line: i + 1,
                source,
            })?;
        let block_id = obj
            .remove("block_id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| StoreError::InvalidRecord {
                file: METRICS_FILE,
                line: i + 1,
                message: "missing or non-integer block_id".to_string(),
            })?;
        columns.extend(obj.keys().cloned());
        raw.push((i + 1, block_id, obj));
    }

    let columns: Vec<String> = columns.into_iter().collect();
    let mut rows = Vec::with_capacity(raw.len());
    for (line, block_id, obj) in raw {
        let mut values = Vec::with_capacity(columns.len());
        for col in &columns {
            let v = match obj.get(col) {
                None | Some(serde_json::Value::Null) => 0.0,
                Some(v) => v.as_f64().ok_or_else(|| StoreError::InvalidRecord {
                    file: METRICS_FILE,
                    line,
                    message: format!("metric '{}' is not numeric", col),
                })?,
            };
            values.push(v);
        }
        rows.push((block_id, values));
    }
    Ok((columns, rows))
}

fn write_lines(
    path: &Path,
    values: impl Iterator<Item = serde_json::Result<serde_json::Value>>,
) -> StoreResult<()> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(io_err)?);
    for value in values {
        let value = value.map_err(|e| io_err(e.into()))?;
        writeln!(out, "{}", value).map_err(io_err)?;
    }
    out.flush().map_err(io_err)
}
