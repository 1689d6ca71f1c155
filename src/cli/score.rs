//! Score and bootstrap commands

use super::{data_dir_hint, print_json};
use crate::config::Config;
use crate::models::{BlockId, LabeledItem};
use crate::service::{ClassificationService, SampleRequest, ScoreRequest};
use crate::store::BlockStore;
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

/// Load the data directory and wrap it in a service.
/// Returns the service plus every block id in the store.
pub(super) fn open_service(config: &Config) -> Result<(ClassificationService, Vec<BlockId>)> {
    let dir = config.data_dir();
    let store = BlockStore::load(&dir).with_context(|| data_dir_hint(&dir))?;
    let all_ids = store.block_ids();
    Ok((ClassificationService::new(Arc::new(store), config), all_ids))
}

pub fn run_score(
    config: &Config,
    positives: Vec<LabeledItem>,
    negatives: Vec<LabeledItem>,
    candidates: Vec<BlockId>,
) -> Result<()> {
    let (service, all_ids) = open_service(config)?;
    let candidates = if candidates.is_empty() {
        all_ids
    } else {
        candidates
    };

    let request = ScoreRequest {
        positives,
        negatives,
        candidates,
    };
    let response = service.score(&request)?;
    tracing::info!(
        "Scored {} blocks ({} pos, {} neg labels)",
        response.total_items,
        request.positives.len(),
        request.negatives.len()
    );
    print_json(&response)
}

#[derive(Serialize)]
struct BootstrapOutput {
    suggestion_ids: Vec<BlockId>,
}

pub fn run_bootstrap(config: &Config, count: Option<usize>, candidates: Vec<BlockId>) -> Result<()> {
    let (service, all_ids) = open_service(config)?;
    let candidates = if candidates.is_empty() {
        all_ids
    } else {
        candidates
    };

    let request = SampleRequest::new(candidates, count.unwrap_or(config.sampling.default_count));
    let suggestion_ids = service.diversity_sample(&request)?;
    print_json(&BootstrapOutput { suggestion_ids })
}
