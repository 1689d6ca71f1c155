//! Bagged decision-tree committee member
//!
//! Random-forest style ensemble grown from weighted bootstrap resamples:
//! each tree draws `n` samples with replacement, and a sample's effective
//! weight is `draw count × sample weight × class weight`. Splits minimize
//! weighted Gini impurity over a random `sqrt(d)` subset of features.
//! Trees are grown in parallel, each with its own seeded RNG, so the result
//! does not depend on thread scheduling.

use super::{TrainError, TrainResult, TrainingSet, POSITIVE};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SEED: u64 = 42;

/// Forest size and shape derived from the training set size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub max_features: usize,
    pub seed: u64,
}

impl ForestParams {
    /// `clamp(n/2, 10, 100)` trees, depth `clamp(⌊log2(n+1)⌋, 2, 5)`,
    /// `⌈sqrt(d)⌉` candidate features per split.
    pub fn for_samples(n: usize, dim: usize) -> Self {
        let depth = ((n + 1) as f64).log2().floor() as usize;
        Self {
            n_trees: (n / 2).clamp(10, 100),
            max_depth: depth.clamp(2, 5),
            max_features: ((dim as f64).sqrt().ceil() as usize).clamp(1, dim.max(1)),
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        /// Weighted fraction of positive samples reaching this leaf
        p_positive: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn predict_proba(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { p_positive } => return *p_positive,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Trained tree ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedTreeEnsemble {
    trees: Vec<DecisionTree>,
}

impl WeightedTreeEnsemble {
    pub fn train(set: &TrainingSet) -> TrainResult<Self> {
        Self::train_with(set, ForestParams::for_samples(set.len(), set.dim()))
    }

    pub fn train_with(set: &TrainingSet, params: ForestParams) -> TrainResult<Self> {
        let positives = set.count(POSITIVE);
        let negatives = set.len() - positives;
        if positives == 0 || negatives == 0 {
            return Err(TrainError::EmptyClass {
                positives,
                negatives,
            });
        }
        if set.dim() == 0 {
            return Err(TrainError::NoFeatures);
        }

        let balanced = set.balanced_weights();
        let trees: Vec<DecisionTree> = (0..params.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = ChaCha8Rng::seed_from_u64(params.seed.wrapping_add(t as u64));
                let n = set.len();
                let mut draws = vec![0u32; n];
                for _ in 0..n {
                    draws[rng.random_range(0..n)] += 1;
                }
                let weights: Vec<f64> = draws
                    .iter()
                    .zip(&balanced)
                    .map(|(&d, &w)| d as f64 * w)
                    .collect();
                TreeBuilder {
                    set,
                    weights: &weights,
                    params: &params,
                    rng,
                    nodes: Vec::new(),
                }
                .build()
            })
            .collect();

        tracing::debug!(
            "Tree ensemble trained: {} trees, max depth {}",
            trees.len(),
            params.max_depth
        );
        Ok(Self { trees })
    }

    /// Mean positive-class probability over all trees
    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_proba(x)).sum::<f64>() / self.trees.len() as f64
    }

    /// Binary vote; an exact tie goes to the negative class.
    pub fn predict(&self, x: &[f64]) -> u8 {
        u8::from(self.predict_proba(x) > 0.5)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

struct TreeBuilder<'a> {
    set: &'a TrainingSet,
    weights: &'a [f64],
    params: &'a ForestParams,
    rng: ChaCha8Rng,
    nodes: Vec<Node>,
}

struct Candidate {
    impurity: f64,
    feature: usize,
    threshold: f64,
}

impl TreeBuilder<'_> {
    fn build(mut self) -> DecisionTree {
        let indices: Vec<usize> = (0..self.set.len()).filter(|&i| self.weights[i] > 0.0).collect();
        self.grow(indices, 0);
        DecisionTree { nodes: self.nodes }
    }

    fn class_mass(&self, indices: &[usize]) -> [f64; 2] {
        let mut mass = [0.0; 2];
        for &i in indices {
            mass[self.set.labels[i] as usize] += self.weights[i];
        }
        mass
    }

    fn grow(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let mass = self.class_mass(&indices);
        let total = mass[0] + mass[1];
        let p_positive = if total > 0.0 {
            mass[POSITIVE as usize] / total
        } else {
            0.0
        };

        let node_idx = self.nodes.len();
        self.nodes.push(Node::Leaf { p_positive });

        let pure = mass[0] == 0.0 || mass[1] == 0.0;
        if depth >= self.params.max_depth || pure || indices.len() < 2 {
            return node_idx;
        }

        let Some(best) = self.best_split(&indices, gini(mass)) else {
            return node_idx;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.set.x[i][best.feature] <= best.threshold);
        let left = self.grow(left, depth + 1);
        let right = self.grow(right, depth + 1);
        self.nodes[node_idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        node_idx
    }

    fn best_split(&mut self, indices: &[usize], parent_impurity: f64) -> Option<Candidate> {
        let dim = self.set.dim();
        let features =
            rand::seq::index::sample(&mut self.rng, dim, self.params.max_features.min(dim));

        let mut best: Option<Candidate> = None;
        for feature in features.iter() {
            let mut sorted = indices.to_vec();
            sorted.sort_by(|&a, &b| self.set.x[a][feature].total_cmp(&self.set.x[b][feature]));

            let total = self.class_mass(&sorted);
            let mut left = [0.0f64; 2];
            for k in 0..sorted.len() - 1 {
                let i = sorted[k];
                left[self.set.labels[i] as usize] += self.weights[i];
                let here = self.set.x[i][feature];
                let next = self.set.x[sorted[k + 1]][feature];
                if next <= here {
                    continue;
                }
                let right = [total[0] - left[0], total[1] - left[1]];
                let (wl, wr) = (left[0] + left[1], right[0] + right[1]);
                let impurity = (wl * gini(left) + wr * gini(right)) / (wl + wr);
                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    best = Some(Candidate {
                        impurity,
                        feature,
                        threshold: (here + next) / 2.0,
                    });
                }
            }
        }

        best.filter(|b| b.impurity < parent_impurity - 1e-12)
    }
}

fn gini(mass: [f64; 2]) -> f64 {
    let total = mass[0] + mass[1];
    if total <= 0.0 {
        return 0.0;
    }
    let p0 = mass[0] / total;
    let p1 = mass[1] / total;
    1.0 - p0 * p0 - p1 * p1
}
