//! Weighted RBF soft-margin classifier
//!
//! Solves the C-SVC dual with sequential minimal optimization:
//!
//! ```text
//! min  ½ αᵀQα − eᵀα     Q_ij = y_i y_j K(x_i, x_j)
//! s.t. yᵀα = 0,  0 ≤ α_i ≤ C · class_weight(y_i) · sample_weight_i
//! ```
//!
//! Each step picks the maximal violating pair and solves the two-variable
//! subproblem analytically. The decision value is
//! `Σ α_i y_i K(x_i, x) − ρ`; positive means "matches the target style".
//!
//! Kernel: `K(a, b) = exp(−γ‖a − b‖²)` with `γ = 1 / (d · var(X))`.

use super::{TrainError, TrainResult, TrainingSet, POSITIVE};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Soft-margin regularization constant
pub const DEFAULT_C: f64 = 1.0;

/// Stopping tolerance on the KKT violation gap
const TOLERANCE: f64 = 1e-3;

/// Floor for non-positive curvature in the pair subproblem
const TAU: f64 = 1e-12;

const MAX_ITERATIONS: usize = 100_000;

/// Trained RBF margin classifier (support vectors only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedMarginClassifier {
    support_vectors: Vec<Vec<f64>>,
    /// `α_i · y_i` for each support vector
    dual_coef: Vec<f64>,
    rho: f64,
    gamma: f64,
}

impl WeightedMarginClassifier {
    /// Train on a standardized, combined training set with `C = 1.0`.
    pub fn train(set: &TrainingSet) -> TrainResult<Self> {
        Self::train_with_c(set, DEFAULT_C)
    }

    pub fn train_with_c(set: &TrainingSet, c: f64) -> TrainResult<Self> {
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

        let n = set.len();
        let gamma = scale_gamma(&set.x);
        let kernel = DMatrix::from_fn(n, n, |i, j| rbf(&set.x[i], &set.x[j], gamma));
        let y: Vec<f64> = set
            .labels
            .iter()
            .map(|&l| if l == POSITIVE { 1.0 } else { -1.0 })
            .collect();
        let bounds: Vec<f64> = set.balanced_weights().into_iter().map(|w| c * w).collect();

        let solution = Smo::new(&kernel, &y, &bounds).solve();

        let mut support_vectors = Vec::new();
        let mut dual_coef = Vec::new();
        for i in 0..n {
            if solution.alpha[i] > 0.0 {
                support_vectors.push(set.x[i].clone());
                dual_coef.push(solution.alpha[i] * y[i]);
            }
        }

        tracing::info!(
            "Margin classifier trained: {} pos, {} neg, {} SVs, {} iterations",
            positives,
            negatives,
            support_vectors.len(),
            solution.iterations
        );

        Ok(Self {
            support_vectors,
            dual_coef,
            rho: solution.rho,
            gamma,
        })
    }

    /// Signed decision value for a standardized feature vector.
    pub fn decision_function(&self, x: &[f64]) -> f64 {
        let sum: f64 = self
            .support_vectors
            .iter()
            .zip(&self.dual_coef)
            .map(|(sv, coef)| coef * rbf(sv, x, self.gamma))
            .sum();
        sum - self.rho
    }

    /// Binary vote: 1 when the decision value is strictly positive
    pub fn predict(&self, x: &[f64]) -> u8 {
        u8::from(self.decision_function(x) > 0.0)
    }

    pub fn support_vector_count(&self) -> usize {
        self.support_vectors.len()
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }
}

/// `1 / (n_features · var(X))` over all matrix entries, or 1.0 for a
/// constant matrix.
fn scale_gamma(x: &[Vec<f64>]) -> f64 {
    let d = x.first().map(|r| r.len()).unwrap_or(0);
    let count = (x.len() * d) as f64;
    if count == 0.0 {
        return 1.0;
    }
    let mean = x.iter().flatten().sum::<f64>() / count;
    let var = x.iter().flatten().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
    if var > 0.0 {
        1.0 / (d as f64 * var)
    } else {
        1.0
    }
}

#[inline]
fn rbf(a: &[f64], b: &[f64], gamma: f64) -> f64 {
    let sq: f64 = a.iter().zip(b).map(|(p, q)| (p - q) * (p - q)).sum();
    (-gamma * sq).exp()
}

struct SmoSolution {
    alpha: Vec<f64>,
    rho: f64,
    iterations: usize,
}

struct Smo<'a> {
    kernel: &'a DMatrix<f64>,
    y: &'a [f64],
    bounds: &'a [f64],
    alpha: Vec<f64>,
    /// Gradient of the dual objective
    grad: Vec<f64>,
}

impl<'a> Smo<'a> {
    fn new(kernel: &'a DMatrix<f64>, y: &'a [f64], bounds: &'a [f64]) -> Self {
        let n = y.len();
        Self {
            kernel,
            y,
            bounds,
            alpha: vec![0.0; n],
            grad: vec![-1.0; n],
        }
    }

    #[inline]
    fn q(&self, i: usize, j: usize) -> f64 {
        self.y[i] * self.y[j] * self.kernel[(i, j)]
    }

    fn at_upper(&self, t: usize) -> bool {
        self.alpha[t] >= self.bounds[t]
    }

    fn at_lower(&self, t: usize) -> bool {
        self.alpha[t] <= 0.0
    }

    /// Maximal violating pair, or `None` once the KKT gap is below tolerance.
    fn select_pair(&self) -> Option<(usize, usize)> {
        let mut g_max = f64::NEG_INFINITY;
        let mut g_min = f64::INFINITY;
        let mut i = None;
        let mut j = None;

        for t in 0..self.y.len() {
            let v = -self.y[t] * self.grad[t];
            let positive = self.y[t] > 0.0;
            let in_up = if positive { !self.at_upper(t) } else { !self.at_lower(t) };
            let in_low = if positive { !self.at_lower(t) } else { !self.at_upper(t) };
            if in_up && v > g_max {
                g_max = v;
                i = Some(t);
            }
            if in_low && v < g_min {
                g_min = v;
                j = Some(t);
            }
        }

        match (i, j) {
            (Some(i), Some(j)) if g_max - g_min >= TOLERANCE => Some((i, j)),
            _ => None,
        }
    }

    fn solve(mut self) -> SmoSolution {
        let mut iterations = 0;
        while iterations < MAX_ITERATIONS {
            let Some((i, j)) = self.select_pair() else {
                break;
            };
            self.update_pair(i, j);
            iterations += 1;
        }
        if iterations == MAX_ITERATIONS {
            tracing::warn!("SMO reached {} iterations without converging", MAX_ITERATIONS);
        }

        let rho = self.rho();
        SmoSolution {
            alpha: self.alpha,
            rho,
            iterations,
        }
    }

    fn update_pair(&mut self, i: usize, j: usize) {
        let (c_i, c_j) = (self.bounds[i], self.bounds[j]);
        let (old_i, old_j) = (self.alpha[i], self.alpha[j]);
        let q_ii = self.kernel[(i, i)];
        let q_jj = self.kernel[(j, j)];
        let q_ij = self.q(i, j);

        if self.y[i] != self.y[j] {
            let quad = (q_ii + q_jj + 2.0 * q_ij).max(TAU);
            let delta = (-self.grad[i] - self.grad[j]) / quad;
            let diff = old_i - old_j;
            let (mut a_i, mut a_j) = (old_i + delta, old_j + delta);
            if diff > 0.0 {
                if a_j < 0.0 {
                    a_j = 0.0;
                    a_i = diff;
                }
            } else if a_i < 0.0 {
                a_i = 0.0;
                a_j = -diff;
            }
            if diff > c_i - c_j {
                if a_i > c_i {
                    a_i = c_i;
                    a_j = c_i - diff;
                }
            } else if a_j > c_j {
                a_j = c_j;
                a_i = c_j + diff;
            }
            self.alpha[i] = a_i;
            self.alpha[j] = a_j;
        } else {
            let quad = (q_ii + q_jj - 2.0 * q_ij).max(TAU);
            let delta = (self.grad[i] - self.grad[j]) / quad;
            let sum = old_i + old_j;
            let (mut a_i, mut a_j) = (old_i - delta, old_j + delta);
            if sum > c_i {
                if a_i > c_i {
                    a_i = c_i;
                    a_j = sum - c_i;
                }
            } else if a_j < 0.0 {
                a_j = 0.0;
                a_i = sum;
            }
            if sum > c_j {
                if a_j > c_j {
                    a_j = c_j;
                    a_i = sum - c_j;
                }
            } else if a_i < 0.0 {
                a_i = 0.0;
                a_j = sum;
            }
            self.alpha[i] = a_i;
            self.alpha[j] = a_j;
        }

        let d_i = self.alpha[i] - old_i;
        let d_j = self.alpha[j] - old_j;
        for k in 0..self.y.len() {
            self.grad[k] += self.q(i, k) * d_i + self.q(j, k) * d_j;
        }
    }

    /// Bias: mean of `y_i G_i` over free vectors, else the midpoint of the
    /// feasible interval.
    fn rho(&self) -> f64 {
        let mut upper = f64::INFINITY;
        let mut lower = f64::NEG_INFINITY;
        let mut free_sum = 0.0;
        let mut free_count = 0usize;

        for t in 0..self.y.len() {
            let yg = self.y[t] * self.grad[t];
            let positive = self.y[t] > 0.0;
            if self.at_upper(t) {
                if positive {
                    lower = lower.max(yg);
                } else {
                    upper = upper.min(yg);
                }
            } else if self.at_lower(t) {
                if positive {
                    upper = upper.min(yg);
                } else {
                    lower = lower.max(yg);
                }
            } else {
                free_sum += yg;
                free_count += 1;
            }
        }

        if free_count > 0 {
            free_sum / free_count as f64
        } else {
            (upper + lower) / 2.0
        }
    }
}
