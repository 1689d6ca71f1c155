//! Weighted active-learning classifiers for authorship style
//!
//! Three classifiers form a query-by-committee ensemble:
//!
//! - [`svm::WeightedMarginClassifier`]: RBF soft-margin classifier, the
//!   source of the similarity score
//! - [`forest::WeightedTreeEnsemble`]: bagged decision trees
//! - [`mlp::WeightedNeuralClassifier`]: small feed-forward network
//!
//! All three honor per-sample weights (label confidence tiers) combined
//! with class balancing. Their disagreement ([`committee`]) is the
//! uncertainty signal used to pick the next blocks to label.
//!
//! [`sampler`] covers the cold-start case, before any label exists.

pub mod cache;
pub mod committee;
pub mod forest;
pub mod histogram;
pub mod mlp;
pub mod sampler;
pub mod scaler;
pub mod svm;

pub use cache::{CacheKey, ModelCache, DEFAULT_CACHE_CAPACITY};
pub use committee::{
    train_committee, vote_entropy, CommitteeAggregator, CommitteeVote, Member, TrainedCommittee,
    MIN_SAMPLES_PER_CLASS,
};
pub use forest::WeightedTreeEnsemble;
pub use histogram::{HistogramBins, HistogramStatistics, HistogramSummary, HISTOGRAM_BINS};
pub use mlp::{NeuralConfig, WeightedNeuralClassifier};
pub use sampler::DiversitySampler;
pub use scaler::StandardScaler;
pub use svm::WeightedMarginClassifier;

use thiserror::Error;

/// Errors that can occur while training a classifier
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainError {
    #[error("Need at least one sample per class, got {positives} positive and {negatives} negative")]
    EmptyClass { positives: usize, negatives: usize },

    #[error("Feature dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("No feature columns available")]
    NoFeatures,

    #[error("Training diverged at epoch {epoch} (non-finite loss)")]
    Diverged { epoch: usize },
}

pub type TrainResult<T> = Result<T, TrainError>;

/// Label value for blocks matching the target style
pub const POSITIVE: u8 = 1;
/// Label value for blocks not matching the target style
pub const NEGATIVE: u8 = 0;

/// Combined, already-standardized training data.
///
/// Positives come first, then negatives; `labels[i]` is [`POSITIVE`] or
/// [`NEGATIVE`] and `weights[i]` is the caller's per-sample weight.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSet {
    pub x: Vec<Vec<f64>>,
    pub labels: Vec<u8>,
    pub weights: Vec<f64>,
}

impl TrainingSet {
    /// Stack positive and negative rows with their sample weights.
    pub fn from_classes(
        positives: &[Vec<f64>],
        positive_weights: &[f64],
        negatives: &[Vec<f64>],
        negative_weights: &[f64],
    ) -> TrainResult<Self> {
        if positives.is_empty() || negatives.is_empty() {
            return Err(TrainError::EmptyClass {
                positives: positives.len(),
                negatives: negatives.len(),
            });
        }
        let dim = positives[0].len();
        if dim == 0 {
            return Err(TrainError::NoFeatures);
        }
        if let Some(bad) = positives.iter().chain(negatives).find(|r| r.len() != dim) {
            return Err(TrainError::DimensionMismatch {
                expected: dim,
                found: bad.len(),
            });
        }

        let x: Vec<Vec<f64>> = positives.iter().chain(negatives).cloned().collect();
        let labels = std::iter::repeat(POSITIVE)
            .take(positives.len())
            .chain(std::iter::repeat(NEGATIVE).take(negatives.len()))
            .collect();
        let weights = pad_weights(positive_weights, positives.len())
            .chain(pad_weights(negative_weights, negatives.len()))
            .collect();

        Ok(Self { x, labels, weights })
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.x.first().map(|r| r.len()).unwrap_or(0)
    }

    pub fn count(&self, label: u8) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    /// Class weights inversely proportional to each class's weighted mass,
    /// indexed by label. Scaled so a balanced set gets 1.0 for both.
    pub fn class_weights(&self) -> [f64; 2] {
        let mut mass = [0.0f64; 2];
        for (&label, &w) in self.labels.iter().zip(&self.weights) {
            mass[label as usize] += w;
        }
        let total = mass[0] + mass[1];
        mass.map(|m| if m > 0.0 { total / (2.0 * m) } else { 0.0 })
    }

    /// Per-sample weight multiplied by its class weight
    pub fn balanced_weights(&self) -> Vec<f64> {
        let cw = self.class_weights();
        self.labels
            .iter()
            .zip(&self.weights)
            .map(|(&l, &w)| w * cw[l as usize])
            .collect()
    }
}

/// Missing weights default to 1.0
fn pad_weights(weights: &[f64], n: usize) -> impl Iterator<Item = f64> + '_ {
    (0..n).map(move |i| weights.get(i).copied().unwrap_or(1.0))
}
