//! Mock dataset generation for development and testing
//!
//! Produces a reproducible set of blocks spread over a few languages, each
//! with six uniformly drawn metric values.

use super::{BlockRecord, BlockStore, StoreResult};
use crate::models::{BlockId, BlockInfo};
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::Path;

pub const MOCK_METRIC_COLUMNS: [&str; 6] = [
    "avg_line_length",
    "cyclomatic_complexity",
    "halstead_volume",
    "comment_ratio",
    "identifier_entropy",
    "nesting_depth",
];

const LANGUAGES: [&str; 5] = ["python", "javascript", "typescript", "rust", "go"];
const BLOCK_TYPES: [&str; 4] = ["function", "class", "method", "module"];

fn snippets(language: &str) -> &'static [&'static str] {
    match language {
        "javascript" => &[
            "function debounce(fn, ms) {\n  let timer;\n  return (...args) => {\n    clearTimeout(timer);\n    timer = setTimeout(() => fn(...args), ms);\n  };\n}\n",
            "class EventEmitter {\n  constructor() {\n    this.events = {};\n  }\n  on(event, cb) {\n    (this.events[event] ??= []).push(cb);\n  }\n}\n",
        ],
        "typescript" => &[
            "interface Config {\n  host: string;\n  port: number;\n  debug?: boolean;\n}\n\nfunction createServer(config: Config) {\n  return { ...config, running: false };\n}\n",
        ],
        "rust" => &[
            "fn binary_search(arr: &[i32], target: i32) -> Option<usize> {\n    let (mut lo, mut hi) = (0, arr.len());\n    while lo < hi {\n        let mid = lo + (hi - lo) / 2;\n        match arr[mid].cmp(&target) {\n            std::cmp::Ordering::Equal => return Some(mid),\n            std::cmp::Ordering::Less => lo = mid + 1,\n            std::cmp::Ordering::Greater => hi = mid,\n        }\n    }\n    None\n}\n",
        ],
        "go" => &[
            "func Map[T, U any](s []T, f func(T) U) []U {\n\tresult := make([]U, len(s))\n\tfor i, v := range s {\n\t\tresult[i] = f(v)\n\t}\n\treturn result\n}\n",
        ],
        _ => &[
            "def hello(name):\n    \"\"\"Greet someone.\"\"\"\n    return f\"Hello, {name}!\"\n",
            "class Counter:\n    def __init__(self):\n        self.count = 0\n\n    def increment(self):\n        self.count += 1\n        return self.count\n",
            "def fibonacci(n):\n    if n <= 1:\n        return n\n    a, b = 0, 1\n    for _ in range(2, n + 1):\n        a, b = b, a + b\n    return b\n",
        ],
    }
}

fn extension(language: &str) -> &'static str {
    match language {
        "python" => "py",
        "javascript" => "js",
        "typescript" => "ts",
        "rust" => "rs",
        _ => "go",
    }
}

/// Generate `n_blocks` mock blocks and their metric rows.
pub fn generate_mock(n_blocks: usize, seed: u64) -> BlockStore {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut blocks = Vec::with_capacity(n_blocks);
    let mut rows = Vec::with_capacity(n_blocks);

    for i in 0..n_blocks {
        let id = i as BlockId;
        let language = *LANGUAGES.choose(&mut rng).unwrap_or(&"python");
        let block_type = *BLOCK_TYPES.choose(&mut rng).unwrap_or(&"function");
        let code = *snippets(language).choose(&mut rng).unwrap_or(&"");
        let start_line: u32 = rng.random_range(1..500);
        let n_lines = code.matches('\n').count() as u32 + 1;
        let file_id = id / 5;

        blocks.push(BlockRecord {
            info: BlockInfo {
                block_id: id,
                file_id,
                file_path: format!("src/{}/module_{}.{}", language, file_id, extension(language)),
                block_type: block_type.to_string(),
                block_name: format!("{}_{}", block_type, i),
                language: language.to_string(),
                start_line,
                end_line: start_line + n_lines,
            },
            code: code.to_string(),
        });
    }

    // Metrics are drawn column by column so adding blocks does not
    // reshuffle earlier metadata.
    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(MOCK_METRIC_COLUMNS.len());
    for _ in MOCK_METRIC_COLUMNS {
        columns.push((0..n_blocks).map(|_| rng.random::<f64>()).collect());
    }
    for i in 0..n_blocks {
        rows.push((i as BlockId, columns.iter().map(|c| c[i]).collect()));
    }

    BlockStore::from_parts(
        blocks,
        MOCK_METRIC_COLUMNS.iter().map(|c| c.to_string()).collect(),
        Some(rows),
    )
}

/// Generate a mock dataset and write it to `dir`.
pub fn write_mock(dir: &Path, n_blocks: usize, seed: u64) -> StoreResult<BlockStore> {
    let store = generate_mock(n_blocks, seed);
    store.save(dir)?;
    tracing::info!("Wrote {} mock blocks to {}", n_blocks, dir.display());
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FeatureStore;

    #[test]
    fn test_mock_is_reproducible() {
        let a = generate_mock(20, 42);
        let b = generate_mock(20, 42);
        let ids: Vec<_> = (0..20).collect();
        assert_eq!(a.metrics_for(&ids), b.metrics_for(&ids));
        assert_eq!(a.blocks(), b.blocks());
    }

    #[test]
    fn test_mock_shape() {
        let store = generate_mock(12, 7);
        assert_eq!(store.len(), 12);
        assert_eq!(store.metric_columns().len(), 6);
        let m = store.metrics_for(&store.block_ids()).unwrap();
        assert_eq!(m.len(), 12);
        assert!(m.rows().iter().flatten().all(|v| (0.0..1.0).contains(v)));
        for b in store.blocks() {
            assert!(b.end_line > b.start_line);
            assert!(LANGUAGES.contains(&b.language.as_str()));
        }
    }

    #[test]
    fn test_write_mock_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_mock(dir.path(), 8, 1).unwrap();
        let loaded = BlockStore::load(dir.path()).unwrap();
        assert_eq!(written.blocks(), loaded.blocks());
        assert_eq!(
            loaded.block_source(3).unwrap().code,
            written.block_source(3).unwrap().code
        );
    }
}
