//! Feature store for code blocks
//!
//! Maps block identifiers to numeric metric vectors and to source text.
//! The classifier only sees the store through the [`FeatureStore`] trait:
//!
//! - `metrics_for` returns an order-preserving [`FeatureMatrix`] with
//!   missing cells zero-filled
//! - `block_source` returns the code text and language of one block
//!
//! [`BlockStore`] is the in-memory implementation, loaded from a data
//! directory of JSONL files (see [`jsonl`]).

pub mod jsonl;
pub mod mock;

pub use jsonl::{BlockRecord, BlockStore, BLOCKS_FILE, METRICS_FILE};
pub use mock::{generate_mock, write_mock, MOCK_METRIC_COLUMNS};

use crate::models::{BlockId, BlockInfo, BlockSource};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading a data directory
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{file} not found in {dir}")]
    MissingFile { file: &'static str, dir: PathBuf },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{file}:{line}: invalid record: {source}")]
    Parse {
        file: &'static str,
        line: usize,
        source: serde_json::Error,
    },

    #[error("{file}:{line}: {message}")]
    InvalidRecord {
        file: &'static str,
        line: usize,
        message: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read-only view of block metadata and metric vectors.
pub trait FeatureStore: Send + Sync {
    /// Whether the store finished loading
    fn is_ready(&self) -> bool;

    /// Ordered metric column names for the current dataset
    fn metric_columns(&self) -> &[String];

    /// Metric rows for the given blocks.
    ///
    /// Returns `None` when the store has no metric data at all. Blocks
    /// without a metric row are left out of the matrix.
    fn metrics_for(&self, ids: &[BlockId]) -> Option<FeatureMatrix>;

    /// Source text and language tag of a block
    fn block_source(&self, id: BlockId) -> Option<BlockSource>;

    /// Metadata for every known block, in load order
    fn blocks(&self) -> Vec<BlockInfo>;
}

/// Block identifiers aligned with rows of a numeric metric matrix.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    ids: Vec<BlockId>,
    rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Build a matrix; every row must have one value per column.
    pub fn new(columns: Vec<String>, ids: Vec<BlockId>, rows: Vec<Vec<f64>>) -> Self {
        debug_assert_eq!(ids.len(), rows.len());
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self { columns, ids, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn ids(&self) -> &[BlockId] {
        &self.ids
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.rows[index]
    }

    /// Number of metric columns
    pub fn dim(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &[f64])> {
        self.ids
            .iter()
            .copied()
            .zip(self.rows.iter().map(|r| r.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_accessors() {
        let m = FeatureMatrix::new(
            vec!["a".into(), "b".into()],
            vec![4, 9],
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
        );
        assert_eq!(m.len(), 2);
        assert_eq!(m.dim(), 2);
        assert_eq!(m.row(1), &[3.0, 4.0]);
        let ids: Vec<_> = m.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![4, 9]);
        assert!(FeatureMatrix::default().is_empty());
    }
}
