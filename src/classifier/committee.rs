//! Query-by-committee training and vote aggregation
//!
//! The margin classifier is always trained. The tree ensemble and the
//! neural network join only once each class has [`MIN_SAMPLES_PER_CLASS`]
//! samples, and either one is dropped (not fatal) if its training fails.

use super::forest::WeightedTreeEnsemble;
use super::mlp::{NeuralConfig, WeightedNeuralClassifier};
use super::scaler::StandardScaler;
use super::svm::WeightedMarginClassifier;
use super::{TrainResult, TrainingSet, NEGATIVE, POSITIVE};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Minimum samples per class before auxiliary members are trained
pub const MIN_SAMPLES_PER_CLASS: usize = 3;

/// An optional committee member
#[derive(Debug, Clone, PartialEq)]
pub enum Member<M> {
    Present(M),
    Absent,
}

impl<M> Member<M> {
    /// Keep a successful training result, log and drop a failed one.
    fn from_training(result: TrainResult<M>, name: &str) -> Self {
        match result {
            Ok(model) => Member::Present(model),
            Err(e) => {
                tracing::warn!("Dropping {} from committee: {}", name, e);
                Member::Absent
            }
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Member::Present(_))
    }

    pub fn as_option(&self) -> Option<&M> {
        match self {
            Member::Present(m) => Some(m),
            Member::Absent => None,
        }
    }
}

/// Per-item committee record, serialized with the wire field names
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommitteeVote {
    pub svm_prediction: u8,
    pub rf_prediction: u8,
    pub mlp_prediction: u8,
    pub vote_entropy: f64,
}

/// Shannon entropy (bits) of binary votes. Outcomes with no votes
/// contribute nothing.
pub fn vote_entropy(votes: &[u8]) -> f64 {
    if votes.is_empty() {
        return 0.0;
    }
    let positives = votes.iter().filter(|&&v| v == POSITIVE).count();
    if positives == 0 || positives == votes.len() {
        return 0.0;
    }
    let n = votes.len() as f64;
    [positives, votes.len() - positives]
        .into_iter()
        .map(|c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum()
}

/// Combines the three members' votes for one item
pub struct CommitteeAggregator;

impl CommitteeAggregator {
    /// `forest`/`neural` are `None` when that member is absent; an absent
    /// member echoes the margin vote. With both absent the entropy is
    /// exactly 0.
    pub fn aggregate(margin_score: f64, forest: Option<u8>, neural: Option<u8>) -> CommitteeVote {
        let svm = if margin_score > 0.0 { POSITIVE } else { NEGATIVE };
        if forest.is_none() && neural.is_none() {
            return CommitteeVote {
                svm_prediction: svm,
                rf_prediction: svm,
                mlp_prediction: svm,
                vote_entropy: 0.0,
            };
        }

        let rf = forest.unwrap_or(svm);
        let mlp = neural.unwrap_or(svm);
        CommitteeVote {
            svm_prediction: svm,
            rf_prediction: rf,
            mlp_prediction: mlp,
            vote_entropy: vote_entropy(&[svm, rf, mlp]),
        }
    }
}

/// Scaler plus the trained members; immutable once built
#[derive(Debug, Clone)]
pub struct TrainedCommittee {
    scaler: StandardScaler,
    margin: WeightedMarginClassifier,
    forest: Member<WeightedTreeEnsemble>,
    neural: Member<WeightedNeuralClassifier>,
}

impl TrainedCommittee {
    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn margin(&self) -> &WeightedMarginClassifier {
        &self.margin
    }

    pub fn forest(&self) -> &Member<WeightedTreeEnsemble> {
        &self.forest
    }

    pub fn neural(&self) -> &Member<WeightedNeuralClassifier> {
        &self.neural
    }

    /// True when at least one auxiliary member trained
    pub fn has_auxiliary(&self) -> bool {
        self.forest.is_present() || self.neural.is_present()
    }

    /// Margin score of one raw (unscaled) row
    pub fn score(&self, row: &[f64]) -> f64 {
        self.margin.decision_function(&self.scaler.transform_row(row))
    }

    /// Score and committee vote of one raw row
    pub fn evaluate(&self, row: &[f64]) -> (f64, CommitteeVote) {
        let scaled = self.scaler.transform_row(row);
        let score = self.margin.decision_function(&scaled);
        let forest = self.forest.as_option().map(|f| f.predict(&scaled));
        let neural = self.neural.as_option().map(|n| n.predict(&scaled));
        (score, CommitteeAggregator::aggregate(score, forest, neural))
    }

    /// [`Self::evaluate`] over many rows in parallel, preserving order
    pub fn evaluate_all(&self, rows: &[Vec<f64>]) -> Vec<(f64, CommitteeVote)> {
        rows.par_iter().map(|row| self.evaluate(row)).collect()
    }
}

/// Train the committee on raw positive and negative rows.
///
/// Fails only when the margin classifier cannot be trained (an empty class
/// or inconsistent rows). Auxiliary members degrade to [`Member::Absent`].
pub fn train_committee(
    positives: &[Vec<f64>],
    positive_weights: &[f64],
    negatives: &[Vec<f64>],
    negative_weights: &[f64],
    neural_config: &NeuralConfig,
) -> TrainResult<TrainedCommittee> {
    let raw = TrainingSet::from_classes(positives, positive_weights, negatives, negative_weights)?;
    let scaler = StandardScaler::fit(&raw.x, raw.dim());
    let set = TrainingSet {
        x: scaler.transform(&raw.x),
        ..raw
    };

    let margin = WeightedMarginClassifier::train(&set)?;

    let (forest, neural) =
        if positives.len() >= MIN_SAMPLES_PER_CLASS && negatives.len() >= MIN_SAMPLES_PER_CLASS {
            let (forest, neural) = rayon::join(
                || WeightedTreeEnsemble::train(&set),
                || WeightedNeuralClassifier::train(&set, neural_config),
            );
            (
                Member::from_training(forest, "tree ensemble"),
                Member::from_training(neural, "neural classifier"),
            )
        } else {
            tracing::warn!(
                "Insufficient samples for committee: {} pos, {} neg (need {} each)",
                positives.len(),
                negatives.len(),
                MIN_SAMPLES_PER_CLASS
            );
            (Member::Absent, Member::Absent)
        };

    tracing::info!(
        "Committee trained: {} pos, {} neg, forest={}, neural={}",
        positives.len(),
        negatives.len(),
        forest.is_present(),
        neural.is_present()
    );

    Ok(TrainedCommittee {
        scaler,
        margin,
        forest,
        neural,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::TrainError;

    #[test]
    fn test_vote_entropy() {
        assert_eq!(vote_entropy(&[1, 1, 1]), 0.0);
        assert_eq!(vote_entropy(&[0, 0, 0]), 0.0);
        assert!(vote_entropy(&[1, 1, 1]).is_sign_positive());
        let split = vote_entropy(&[1, 0, 1]);
        let expected = -(2.0 / 3.0) * (2.0f64 / 3.0).log2() - (1.0 / 3.0) * (1.0f64 / 3.0).log2();
        assert!((split - expected).abs() < 1e-12);
        assert!(split <= 3.0f64.log2());
        assert_eq!(vote_entropy(&[]), 0.0);
    }

    #[test]
    fn test_unanimous_vote_serializes_as_zero() {
        let vote = CommitteeAggregator::aggregate(0.7, Some(1), Some(1));
        let json = serde_json::to_string(&vote).unwrap();
        assert!(json.contains(r#""vote_entropy":0.0"#), "{}", json);
    }

    #[test]
    fn test_aggregate_without_auxiliary_members() {
        let vote = CommitteeAggregator::aggregate(0.7, None, None);
        assert_eq!(vote.svm_prediction, 1);
        assert_eq!(vote.rf_prediction, 1);
        assert_eq!(vote.mlp_prediction, 1);
        assert_eq!(vote.vote_entropy, 0.0);

        let vote = CommitteeAggregator::aggregate(0.0, None, None);
        assert_eq!(vote.svm_prediction, 0);
        assert_eq!(vote.mlp_prediction, 0);
    }

    #[test]
    fn test_absent_member_echoes_margin_vote() {
        let vote = CommitteeAggregator::aggregate(-1.0, Some(1), None);
        assert_eq!(vote.svm_prediction, 0);
        assert_eq!(vote.rf_prediction, 1);
        assert_eq!(vote.mlp_prediction, 0);
        assert!(vote.vote_entropy > 0.9);

        let agree = CommitteeAggregator::aggregate(2.0, Some(1), Some(1));
        assert_eq!(agree.vote_entropy, 0.0);
    }

    #[test]
    fn test_small_label_sets_skip_auxiliary_members() {
        let committee = train_committee(
            &[vec![0.0, 0.0], vec![0.5, 0.2]],
            &[1.0, 1.0],
            &[vec![10.0, 10.0]],
            &[1.0],
            &NeuralConfig::default(),
        )
        .unwrap();
        assert!(!committee.has_auxiliary());
        assert!(committee.score(&[0.2, 0.1]) > 0.0);
        assert!(committee.score(&[10.0, 10.0]) < 0.0);

        let (score, vote) = committee.evaluate(&[9.0, 9.5]);
        assert_eq!(vote.svm_prediction, u8::from(score > 0.0));
        assert_eq!(vote.vote_entropy, 0.0);
    }

    #[test]
    fn test_full_committee_trains_all_members() {
        let pos: Vec<Vec<f64>> = (0..4).map(|i| vec![i as f64 * 0.1, 0.0]).collect();
        let neg: Vec<Vec<f64>> = (0..4).map(|i| vec![5.0 + i as f64 * 0.1, 5.0]).collect();
        let committee =
            train_committee(&pos, &[], &neg, &[], &NeuralConfig::default()).unwrap();
        assert!(committee.forest().is_present());
        assert!(committee.neural().is_present());
        assert!(committee.has_auxiliary());

        let rows = vec![vec![0.1, 0.0], vec![5.1, 5.0]];
        let results = committee.evaluate_all(&rows);
        assert_eq!(results.len(), 2);
        for (score, vote) in results {
            assert_eq!(vote.svm_prediction, u8::from(score > 0.0));
            assert!(vote.vote_entropy >= 0.0 && vote.vote_entropy <= 3.0f64.log2());
        }
    }

    #[test]
    fn test_empty_class_fails() {
        let err = train_committee(&[], &[], &[vec![1.0]], &[1.0], &NeuralConfig::default())
            .unwrap_err();
        assert!(matches!(err, TrainError::EmptyClass { .. }));
    }
}
