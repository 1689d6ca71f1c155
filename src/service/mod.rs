//! Classification service: the scoring and bootstrap-sampling operations
//!
//! Scoring trains (or reuses) a committee for the labeled set and scores
//! every candidate with the margin classifier. Degenerate inputs (no
//! candidate metrics, an empty label class) produce an empty response
//! rather than an error; only an unready store and malformed requests are
//! reported to the caller.

use crate::classifier::{
    train_committee, CacheKey, CommitteeVote, DiversitySampler, HistogramSummary, ModelCache,
    NeuralConfig,
};
use crate::config::{Config, LabelConfig};
use crate::models::{BlockId, BlockInfo, BlockSource, LabeledItem, Tier};
use crate::store::FeatureStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Feature store is not ready")]
    NotReady,

    #[error("Block {0} is labeled both positive and negative")]
    ConflictingLabel(BlockId),

    #[error("Block {0} not found")]
    BlockNotFound(BlockId),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    #[serde(default, alias = "selected_items")]
    pub positives: Vec<LabeledItem>,
    #[serde(default, alias = "rejected_items")]
    pub negatives: Vec<LabeledItem>,
    #[serde(default, alias = "block_ids")]
    pub candidates: Vec<BlockId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreResponse {
    /// Margin score per block id (as text)
    pub scores: BTreeMap<String, f64>,
    #[serde(flatten)]
    pub summary: HistogramSummary,
    pub total_items: usize,
    /// Present only when an auxiliary committee member trained
    pub committee_votes: Option<BTreeMap<String, CommitteeVote>>,
}

impl ScoreResponse {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRequest {
    #[serde(alias = "block_ids")]
    pub candidates: Vec<BlockId>,
    #[serde(default = "default_sample_count", alias = "num_suggestions")]
    pub count: usize,
}

fn default_sample_count() -> usize {
    10
}

impl SampleRequest {
    pub fn new(candidates: Vec<BlockId>, count: usize) -> Self {
        Self { candidates, count }
    }
}

pub struct ClassificationService {
    store: Arc<dyn FeatureStore>,
    cache: ModelCache,
    labels: LabelConfig,
    neural: NeuralConfig,
    sampler: DiversitySampler,
}

impl ClassificationService {
    pub fn new(store: Arc<dyn FeatureStore>, config: &Config) -> Self {
        Self {
            store,
            cache: ModelCache::new(config.cache.capacity),
            labels: config.labels.clone(),
            neural: config.neural.clone(),
            sampler: DiversitySampler::new(config.sampling.fallback_seed),
        }
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    fn ensure_ready(&self) -> ServiceResult<()> {
        if self.store.is_ready() {
            Ok(())
        } else {
            Err(ServiceError::NotReady)
        }
    }

    /// Score every candidate against the labeled set.
    pub fn score(&self, request: &ScoreRequest) -> ServiceResult<ScoreResponse> {
        self.ensure_ready()?;

        // Later duplicates of an id override earlier ones
        let positive_tiers: HashMap<BlockId, Tier> =
            request.positives.iter().map(|i| (i.id, i.tier)).collect();
        let negative_tiers: HashMap<BlockId, Tier> =
            request.negatives.iter().map(|i| (i.id, i.tier)).collect();
        if let Some(id) = request
            .positives
            .iter()
            .map(|i| i.id)
            .find(|id| negative_tiers.contains_key(id))
        {
            return Err(ServiceError::ConflictingLabel(id));
        }

        let Some(matrix) = self
            .store
            .metrics_for(&request.candidates)
            .filter(|m| !m.is_empty())
        else {
            tracing::warn!("No metrics for any of {} candidates", request.candidates.len());
            return Ok(ScoreResponse::empty());
        };

        let mut positives = LabeledRows::default();
        let mut negatives = LabeledRows::default();
        for (id, row) in matrix.iter() {
            if let Some(&tier) = positive_tiers.get(&id) {
                positives.push(id, tier, row, &self.labels);
            } else if let Some(&tier) = negative_tiers.get(&id) {
                negatives.push(id, tier, row, &self.labels);
            }
        }

        if positives.is_empty() || negatives.is_empty() {
            tracing::warn!(
                "Need both positive and negative labels among candidates, got {} and {}",
                positives.len(),
                negatives.len()
            );
            return Ok(ScoreResponse::empty());
        }

        // Training input follows the key, not the candidate order
        positives.sort_canonical();
        negatives.sort_canonical();
        let key = CacheKey::from_labels(&positives.items, &negatives.items);
        let committee = match self.cache.get_or_train(&key, || {
            train_committee(
                &positives.rows,
                &positives.weights,
                &negatives.rows,
                &negatives.weights,
                &self.neural,
            )
        }) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Committee training failed: {}", e);
                return Ok(ScoreResponse::empty());
            }
        };

        let results = committee.evaluate_all(matrix.rows());
        let score_values: Vec<f64> = results.iter().map(|(s, _)| *s).collect();

        let scores = matrix
            .ids()
            .iter()
            .zip(&score_values)
            .map(|(id, s)| (id.to_string(), *s))
            .collect();
        let committee_votes = committee.has_auxiliary().then(|| {
            matrix
                .ids()
                .iter()
                .zip(&results)
                .map(|(id, (_, vote))| (id.to_string(), *vote))
                .collect()
        });

        Ok(ScoreResponse {
            scores,
            summary: HistogramSummary::from_scores(&score_values),
            total_items: matrix.len(),
            committee_votes,
        })
    }

    /// Pick a diverse subset of candidates to label first.
    pub fn diversity_sample(&self, request: &SampleRequest) -> ServiceResult<Vec<BlockId>> {
        self.ensure_ready()?;
        let matrix = self.store.metrics_for(&request.candidates);
        Ok(self
            .sampler
            .select(matrix.as_ref(), &request.candidates, request.count))
    }

    pub fn block_source(&self, id: BlockId) -> ServiceResult<BlockSource> {
        self.ensure_ready()?;
        self.store
            .block_source(id)
            .ok_or(ServiceError::BlockNotFound(id))
    }

    pub fn blocks(&self) -> ServiceResult<Vec<BlockInfo>> {
        self.ensure_ready()?;
        Ok(self.store.blocks())
    }
}

/// One side of the training data, in candidate-matrix order
#[derive(Default)]
struct LabeledRows {
    items: Vec<LabeledItem>,
    rows: Vec<Vec<f64>>,
    weights: Vec<f64>,
}

impl LabeledRows {
    fn push(&mut self, id: BlockId, tier: Tier, row: &[f64], labels: &LabelConfig) {
        self.items.push(LabeledItem::new(id, tier));
        self.rows.push(row.to_vec());
        self.weights.push(labels.weight(tier));
    }

    /// Reorder by (id, tier), keeping rows and weights aligned
    fn sort_canonical(&mut self) {
        let mut order: Vec<usize> = (0..self.items.len()).collect();
        order.sort_by_key(|&i| (self.items[i].id, self.items[i].tier));
        self.items = order.iter().map(|&i| self.items[i]).collect();
        self.rows = order.iter().map(|&i| std::mem::take(&mut self.rows[i])).collect();
        self.weights = order.iter().map(|&i| self.weights[i]).collect();
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BlockStore;

    fn service_with(rows: Vec<(BlockId, Vec<f64>)>) -> ClassificationService {
        let store = BlockStore::from_metrics(vec!["a".into(), "b".into()], rows);
        ClassificationService::new(Arc::new(store), &Config::default())
    }

    fn four_points() -> ClassificationService {
        service_with(vec![
            (1, vec![0.0, 0.0]),
            (2, vec![10.0, 10.0]),
            (3, vec![5.0, 5.0]),
            (4, vec![1.0, 1.0]),
        ])
    }

    #[test]
    fn test_not_ready_store() {
        let service = ClassificationService::new(Arc::new(BlockStore::pending()), &Config::default());
        assert_eq!(
            service.score(&ScoreRequest::default()).unwrap_err(),
            ServiceError::NotReady
        );
        assert_eq!(
            service
                .diversity_sample(&SampleRequest::new(vec![1], 1))
                .unwrap_err(),
            ServiceError::NotReady
        );
    }

    #[test]
    fn test_conflicting_label_is_rejected() {
        let request = ScoreRequest {
            positives: vec![LabeledItem::high(1)],
            negatives: vec![LabeledItem::low(1)],
            candidates: vec![1, 2],
        };
        assert_eq!(
            four_points().score(&request).unwrap_err(),
            ServiceError::ConflictingLabel(1)
        );
    }

    #[test]
    fn test_score_two_labels() {
        let service = four_points();
        let request = ScoreRequest {
            positives: vec![LabeledItem::high(1)],
            negatives: vec![LabeledItem::high(2)],
            candidates: vec![1, 2, 3, 4],
        };
        let response = service.score(&request).unwrap();
        assert_eq!(response.total_items, 4);
        assert_eq!(response.scores.len(), 4);
        assert!(response.scores["4"] > 0.0);
        assert!(response.scores["2"] < 0.0);
        assert_eq!(response.summary.total_count(), 4);
        // too few labels for the auxiliary members
        assert!(response.committee_votes.is_none());
        assert_eq!(service.cache().len(), 1);
    }

    #[test]
    fn test_labels_without_metrics_are_ignored() {
        let service = four_points();
        let request = ScoreRequest {
            positives: vec![LabeledItem::high(1), LabeledItem::high(99)],
            negatives: vec![LabeledItem::high(2)],
            candidates: vec![1, 2, 3, 4, 99],
        };
        let with_missing = service.score(&request).unwrap();
        let plain = service
            .score(&ScoreRequest {
                positives: vec![LabeledItem::high(1)],
                ..request.clone()
            })
            .unwrap();
        assert_eq!(with_missing, plain);
        // both requests resolve to the same training set
        assert_eq!(service.cache().len(), 1);
    }

    #[test]
    fn test_empty_class_yields_empty_response() {
        let request = ScoreRequest {
            positives: vec![],
            negatives: vec![LabeledItem::high(2)],
            candidates: vec![1, 2, 3, 4],
        };
        let response = four_points().score(&request).unwrap();
        assert_eq!(response, ScoreResponse::empty());
        assert_eq!(response.total_items, 0);
    }

    #[test]
    fn test_no_candidate_metrics_yields_empty_response() {
        let request = ScoreRequest {
            positives: vec![LabeledItem::high(1)],
            negatives: vec![LabeledItem::high(2)],
            candidates: vec![50, 51],
        };
        assert_eq!(four_points().score(&request).unwrap(), ScoreResponse::empty());
    }

    #[test]
    fn test_response_uses_wire_field_names() {
        let response = four_points()
            .score(&ScoreRequest {
                positives: vec![LabeledItem::high(1)],
                negatives: vec![LabeledItem::high(2)],
                candidates: vec![1, 2, 3, 4],
            })
            .unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert!(json["scores"].is_object());
        assert_eq!(json["histogram"]["bins"].as_array().unwrap().len(), 60);
        assert_eq!(json["histogram"]["bin_edges"].as_array().unwrap().len(), 61);
        assert!(json["statistics"]["median"].is_number());
        assert_eq!(json["total_items"], 4);
        assert!(json["committee_votes"].is_null());
    }

    #[test]
    fn test_request_accepts_wire_field_names() {
        let json = r#"{
            "selected_items": [{"id": 1, "source": "click"}],
            "rejected_items": [{"id": 2, "source": "threshold"}],
            "block_ids": [1, 2, 3]
        }"#;
        let request: ScoreRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.positives, vec![LabeledItem::high(1)]);
        assert_eq!(request.negatives, vec![LabeledItem::low(2)]);
        assert_eq!(request.candidates, vec![1, 2, 3]);

        let sample: SampleRequest = serde_json::from_str(r#"{"block_ids": [1, 2]}"#).unwrap();
        assert_eq!(sample.count, 10);
    }

    #[test]
    fn test_block_lookup() {
        let service = four_points();
        assert_eq!(service.block_source(12).unwrap_err(), ServiceError::BlockNotFound(12));
        assert!(service.blocks().unwrap().is_empty());
    }
}
