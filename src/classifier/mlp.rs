//! Feed-forward neural committee member
//!
//! Dense ReLU layers followed by a 2-logit softmax output, trained with
//! per-sample weighted cross-entropy:
//!
//! ```text
//! loss = (1/B) · Σ w_i · CE(logits_i, y_i)
//! ```
//!
//! so a low-confidence label contributes a proportionally smaller gradient.
//! Optimization is Adam with L2 decay added to the gradient, a plateau
//! scheduler that halves the learning rate, and early stopping on a held
//! out validation split. Everything random (init, split, batch order) is
//! driven by one seeded RNG, so training the same set twice gives
//! bit-identical weights.

use super::{TrainError, TrainResult, TrainingSet, POSITIVE};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;
/// Relative improvement the plateau scheduler requires
const PLATEAU_THRESHOLD: f64 = 1e-4;
const N_CLASSES: usize = 2;

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralConfig {
    /// Hidden layer widths. Empty picks `[16]` below
    /// `small_sample_threshold` samples and `[32, 16]` otherwise.
    pub hidden_layers: Vec<usize>,
    pub small_sample_threshold: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    /// Upper bound; the effective batch is `min(batch_size, train size)`
    pub batch_size: usize,
    pub max_epochs: usize,
    /// Share of samples held out for validation (at least one when > 0)
    pub validation_fraction: f64,
    /// Epochs without improvement before the learning rate is halved
    pub lr_patience: usize,
    pub lr_factor: f64,
    pub min_lr: f64,
    /// Epochs without improvement before training stops
    pub stop_patience: usize,
    pub seed: u64,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            hidden_layers: Vec::new(),
            small_sample_threshold: 20,
            learning_rate: 0.001,
            weight_decay: 0.01,
            batch_size: 32,
            max_epochs: 500,
            validation_fraction: 0.2,
            lr_patience: 10,
            lr_factor: 0.5,
            min_lr: 1e-6,
            stop_patience: 20,
            seed: 42,
        }
    }
}

impl NeuralConfig {
    pub fn hidden_for(&self, n_samples: usize) -> Vec<usize> {
        if !self.hidden_layers.is_empty() {
            self.hidden_layers.clone()
        } else if n_samples < self.small_sample_threshold {
            vec![16]
        } else {
            vec![32, 16]
        }
    }

    /// Number of validation samples for `n` samples; always leaves one
    /// sample for training.
    pub fn validation_size(&self, n: usize) -> usize {
        if self.validation_fraction <= 0.0 || n < 2 {
            return 0;
        }
        let n_val = ((n as f64 * self.validation_fraction).floor() as usize).max(1);
        n_val.min(n - 1)
    }
}

/// Fully connected layer, `weights[out][in]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Dense {
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

impl Dense {
    /// Uniform init in `±1/sqrt(fan_in)` for weights and bias
    fn new(fan_in: usize, fan_out: usize, rng: &mut ChaCha8Rng) -> Self {
        let bound = 1.0 / (fan_in.max(1) as f64).sqrt();
        let weights = (0..fan_out)
            .map(|_| {
                (0..fan_in)
                    .map(|_| rng.random_range(-bound..bound))
                    .collect()
            })
            .collect();
        let bias = (0..fan_out).map(|_| rng.random_range(-bound..bound)).collect();
        Self { weights, bias }
    }

    fn zeros_like(&self) -> Self {
        Self {
            weights: self.weights.iter().map(|r| vec![0.0; r.len()]).collect(),
            bias: vec![0.0; self.bias.len()],
        }
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| b + row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>())
            .collect()
    }

    fn params_mut(&mut self) -> impl Iterator<Item = &mut f64> {
        self.weights.iter_mut().flatten().chain(self.bias.iter_mut())
    }

    fn params(&self) -> impl Iterator<Item = &f64> {
        self.weights.iter().flatten().chain(self.bias.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Network {
    layers: Vec<Dense>,
}

impl Network {
    fn new(input_dim: usize, hidden: &[usize], rng: &mut ChaCha8Rng) -> Self {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut fan_in = input_dim;
        for &width in hidden {
            layers.push(Dense::new(fan_in, width, rng));
            fan_in = width;
        }
        layers.push(Dense::new(fan_in, N_CLASSES, rng));
        Self { layers }
    }

    /// Activations of every layer, input first and logits last.
    /// ReLU is applied to all but the output layer.
    fn forward_trace(&self, x: &[f64]) -> Vec<Vec<f64>> {
        let mut trace = Vec::with_capacity(self.layers.len() + 1);
        trace.push(x.to_vec());
        let last = self.layers.len() - 1;
        for (l, layer) in self.layers.iter().enumerate() {
            let mut z = layer.forward(&trace[l]);
            if l < last {
                z.iter_mut().for_each(|v| *v = v.max(0.0));
            }
            trace.push(z);
        }
        trace
    }

    fn logits(&self, x: &[f64]) -> Vec<f64> {
        self.forward_trace(x).pop().unwrap_or_default()
    }

    /// Weighted mean cross-entropy over `indices`
    fn weighted_loss(&self, set: &TrainingSet, indices: &[usize]) -> f64 {
        if indices.is_empty() {
            return 0.0;
        }
        let total: f64 = indices
            .iter()
            .map(|&i| set.weights[i] * cross_entropy(&self.logits(&set.x[i]), set.labels[i]))
            .sum();
        total / indices.len() as f64
    }

    /// Gradients of the weighted mean loss over one batch
    fn backward(&self, set: &TrainingSet, batch: &[usize]) -> (f64, Vec<Dense>) {
        let mut grads: Vec<Dense> = self.layers.iter().map(Dense::zeros_like).collect();
        let scale = 1.0 / batch.len() as f64;
        let mut loss = 0.0;

        for &i in batch {
            let trace = self.forward_trace(&set.x[i]);
            let logits = &trace[trace.len() - 1];
            let target = set.labels[i] as usize;
            let w = set.weights[i] * scale;
            loss += w * cross_entropy(logits, set.labels[i]);

            let probs = softmax(logits);
            let mut delta: Vec<f64> = probs
                .iter()
                .enumerate()
                .map(|(k, p)| w * (p - if k == target { 1.0 } else { 0.0 }))
                .collect();

            for l in (0..self.layers.len()).rev() {
                let input = &trace[l];
                for (o, d) in delta.iter().enumerate() {
                    grads[l].bias[o] += d;
                    for (g, x) in grads[l].weights[o].iter_mut().zip(input) {
                        *g += d * x;
                    }
                }
                if l == 0 {
                    break;
                }
                // Propagate through the weights, then through the ReLU of
                // the previous layer (its output is `input`).
                let mut prev = vec![0.0; input.len()];
                for (o, d) in delta.iter().enumerate() {
                    for (p, w) in prev.iter_mut().zip(&self.layers[l].weights[o]) {
                        *p += d * w;
                    }
                }
                for (p, a) in prev.iter_mut().zip(input) {
                    if *a <= 0.0 {
                        *p = 0.0;
                    }
                }
                delta = prev;
            }
        }

        (loss, grads)
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn cross_entropy(logits: &[f64], label: u8) -> f64 {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let lse = max + logits.iter().map(|z| (z - max).exp()).sum::<f64>().ln();
    lse - logits[label as usize]
}

/// Adam with coupled L2 decay (`g + λ·θ`)
struct Adam {
    first: Vec<Dense>,
    second: Vec<Dense>,
    weight_decay: f64,
    t: i32,
}

impl Adam {
    fn new(network: &Network, weight_decay: f64) -> Self {
        let zeros: Vec<Dense> = network.layers.iter().map(Dense::zeros_like).collect();
        Self {
            first: zeros.clone(),
            second: zeros,
            weight_decay,
            t: 0,
        }
    }

    fn step(&mut self, network: &mut Network, grads: &[Dense], lr: f64) {
        self.t += 1;
        let bc1 = 1.0 - BETA1.powi(self.t);
        let bc2 = 1.0 - BETA2.powi(self.t);
        let decay = self.weight_decay;

        for (l, layer) in network.layers.iter_mut().enumerate() {
            let params = layer.params_mut();
            let g = grads[l].params();
            let m = self.first[l].params_mut();
            let v = self.second[l].params_mut();
            for (((p, g), m), v) in params.zip(g).zip(m).zip(v) {
                let g = g + decay * *p;
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                let m_hat = *m / bc1;
                let v_hat = *v / bc2;
                *p -= lr * m_hat / (v_hat.sqrt() + EPSILON);
            }
        }
    }
}

/// Halves the learning rate when validation loss stalls
#[derive(Debug, Clone)]
struct PlateauScheduler {
    lr: f64,
    best: f64,
    bad_epochs: usize,
    patience: usize,
    factor: f64,
    min_lr: f64,
}

impl PlateauScheduler {
    fn new(config: &NeuralConfig) -> Self {
        Self {
            lr: config.learning_rate,
            best: f64::INFINITY,
            bad_epochs: 0,
            patience: config.lr_patience,
            factor: config.lr_factor,
            min_lr: config.min_lr,
        }
    }

    fn step(&mut self, val_loss: f64) -> f64 {
        if val_loss < self.best * (1.0 - PLATEAU_THRESHOLD) {
            self.best = val_loss;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
        }
        if self.bad_epochs > self.patience {
            let reduced = (self.lr * self.factor).max(self.min_lr);
            if reduced < self.lr {
                tracing::debug!("Reducing learning rate to {:.2e}", reduced);
            }
            self.lr = reduced;
            self.bad_epochs = 0;
        }
        self.lr
    }
}

/// Trained network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedNeuralClassifier {
    network: Network,
    epochs_run: usize,
}

impl WeightedNeuralClassifier {
    pub fn train(set: &TrainingSet, config: &NeuralConfig) -> TrainResult<Self> {
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
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut rng);
        let n_val = config.validation_size(n);
        let (val_idx, train_idx) = order.split_at(n_val);
        let mut train_idx = train_idx.to_vec();
        let val_idx = val_idx.to_vec();

        let hidden = config.hidden_for(n);
        let mut network = Network::new(set.dim(), &hidden, &mut rng);
        let mut optimizer = Adam::new(&network, config.weight_decay);
        let mut scheduler = PlateauScheduler::new(config);
        let batch_size = config.batch_size.min(train_idx.len()).max(1);

        let mut lr = config.learning_rate;
        let mut best_val = f64::INFINITY;
        let mut stale = 0;
        let mut epochs_run = 0;

        for epoch in 0..config.max_epochs {
            epochs_run = epoch + 1;
            train_idx.shuffle(&mut rng);

            let mut epoch_loss = 0.0;
            for batch in train_idx.chunks(batch_size) {
                let (loss, grads) = network.backward(set, batch);
                epoch_loss += loss;
                optimizer.step(&mut network, &grads, lr);
            }
            if !epoch_loss.is_finite() {
                tracing::warn!("Neural training diverged at epoch {}", epochs_run);
                return Err(TrainError::Diverged { epoch: epochs_run });
            }

            if val_idx.is_empty() {
                continue;
            }
            let val_loss = network.weighted_loss(set, &val_idx);
            if !val_loss.is_finite() {
                tracing::warn!("Neural validation loss diverged at epoch {}", epochs_run);
                return Err(TrainError::Diverged { epoch: epochs_run });
            }
            lr = scheduler.step(val_loss);

            if val_loss < best_val {
                best_val = val_loss;
                stale = 0;
            } else {
                stale += 1;
                if stale >= config.stop_patience {
                    break;
                }
            }
        }

        tracing::debug!(
            "Neural member trained: layers {:?}, {} epochs, {} train / {} val",
            hidden,
            epochs_run,
            train_idx.len(),
            val_idx.len()
        );
        Ok(Self {
            network,
            epochs_run,
        })
    }

    /// Softmax probability of the positive class
    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        softmax(&self.network.logits(x))[POSITIVE as usize]
    }

    /// Argmax of the two logits; an exact tie goes to the negative class.
    pub fn predict(&self, x: &[f64]) -> u8 {
        let logits = self.network.logits(x);
        u8::from(logits[POSITIVE as usize] > logits[0])
    }

    pub fn epochs_run(&self) -> usize {
        self.epochs_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> NeuralConfig {
        NeuralConfig {
            learning_rate: 0.01,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_architecture_depends_on_sample_count() {
        let config = NeuralConfig::default();
        assert_eq!(config.hidden_for(6), vec![16]);
        assert_eq!(config.hidden_for(19), vec![16]);
        assert_eq!(config.hidden_for(20), vec![32, 16]);

        let fixed = NeuralConfig {
            hidden_layers: vec![8],
            ..Default::default()
        };
        assert_eq!(fixed.hidden_for(100), vec![8]);
    }

    #[test]
    fn test_validation_size() {
        let config = NeuralConfig::default();
        assert_eq!(config.validation_size(6), 1);
        assert_eq!(config.validation_size(10), 2);
        assert_eq!(config.validation_size(2), 1);
        assert_eq!(config.validation_size(1), 0);

        let none = NeuralConfig {
            validation_fraction: 0.0,
            ..Default::default()
        };
        assert_eq!(none.validation_size(10), 0);
    }

    #[test]
    fn test_learns_separable_clusters() {
        let pos: Vec<Vec<f64>> = (0..6).map(|i| vec![-1.5 + 0.1 * i as f64, -1.0]).collect();
        let neg: Vec<Vec<f64>> = (0..6).map(|i| vec![1.5 - 0.1 * i as f64, 1.0]).collect();
        let set = TrainingSet::from_classes(&pos, &[], &neg, &[]).unwrap();

        let model = WeightedNeuralClassifier::train(&set, &fast_config()).unwrap();
        assert_eq!(model.predict(&[-1.5, -1.0]), 1);
        assert_eq!(model.predict(&[1.5, 1.0]), 0);
        assert!(model.epochs_run() >= 1 && model.epochs_run() <= 500);
    }

    #[test]
    fn test_sample_weights_decide_conflicting_labels() {
        // Identical inputs with opposite labels: the heavier class wins.
        let rows = vec![vec![1.0, 0.0]; 3];
        let config = NeuralConfig {
            validation_fraction: 0.0,
            max_epochs: 300,
            ..fast_config()
        };

        let set = TrainingSet::from_classes(&rows, &[1.0; 3], &rows, &[0.1; 3]).unwrap();
        let model = WeightedNeuralClassifier::train(&set, &config).unwrap();
        assert_eq!(model.predict(&[1.0, 0.0]), 1);
        assert!(model.predict_proba(&[1.0, 0.0]) > 0.5);

        let set = TrainingSet::from_classes(&rows, &[0.1; 3], &rows, &[1.0; 3]).unwrap();
        let model = WeightedNeuralClassifier::train(&set, &config).unwrap();
        assert_eq!(model.predict(&[1.0, 0.0]), 0);
    }

    #[test]
    fn test_training_is_deterministic() {
        let pos = vec![vec![0.0, 1.0], vec![0.2, 0.8], vec![0.1, 1.2]];
        let neg = vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![1.1, -0.2]];
        let set = TrainingSet::from_classes(&pos, &[], &neg, &[]).unwrap();
        let config = NeuralConfig {
            max_epochs: 50,
            ..Default::default()
        };
        let a = WeightedNeuralClassifier::train(&set, &config).unwrap();
        let b = WeightedNeuralClassifier::train(&set, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_epoch_cap_is_honored() {
        let set = TrainingSet::from_classes(
            &[vec![0.0], vec![0.1], vec![0.2]],
            &[],
            &[vec![1.0], vec![1.1], vec![1.2]],
            &[],
        )
        .unwrap();
        let config = NeuralConfig {
            max_epochs: 7,
            ..Default::default()
        };
        let model = WeightedNeuralClassifier::train(&set, &config).unwrap();
        assert!(model.epochs_run() <= 7);
    }

    #[test]
    fn test_stops_early_when_validation_loss_plateaus() {
        let set = TrainingSet::from_classes(
            &[vec![0.0], vec![0.1], vec![0.2]],
            &[],
            &[vec![1.0], vec![1.1], vec![1.2]],
            &[],
        )
        .unwrap();
        // frozen weights: validation loss is flat after the first epoch
        let config = NeuralConfig {
            learning_rate: 0.0,
            min_lr: 0.0,
            stop_patience: 3,
            max_epochs: 100,
            ..Default::default()
        };
        let model = WeightedNeuralClassifier::train(&set, &config).unwrap();
        assert_eq!(model.epochs_run(), 4);
        assert!(model.epochs_run() < config.max_epochs);
    }

    #[test]
    fn test_divergence_is_reported() {
        let set = TrainingSet::from_classes(
            &[vec![0.0], vec![0.1], vec![0.2]],
            &[],
            &[vec![1.0], vec![1.1], vec![1.2]],
            &[],
        )
        .unwrap();
        let config = NeuralConfig {
            learning_rate: f64::INFINITY,
            validation_fraction: 0.0,
            max_epochs: 5,
            ..Default::default()
        };
        let err = WeightedNeuralClassifier::train(&set, &config).unwrap_err();
        assert!(matches!(err, TrainError::Diverged { .. }));
    }

    #[test]
    fn test_plateau_scheduler_halves_after_patience() {
        let config = NeuralConfig {
            learning_rate: 0.1,
            lr_patience: 2,
            min_lr: 0.03,
            ..Default::default()
        };
        let mut sched = PlateauScheduler::new(&config);
        assert_eq!(sched.step(1.0), 0.1);
        assert_eq!(sched.step(1.0), 0.1);
        assert_eq!(sched.step(1.0), 0.1);
        assert!((sched.step(1.0) - 0.05).abs() < 1e-12);
        sched.step(1.0);
        sched.step(1.0);
        // floored
        assert!((sched.step(1.0) - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_cross_entropy_matches_softmax() {
        let logits = [0.3, -1.2];
        let p = softmax(&logits);
        assert!((cross_entropy(&logits, 0) + p[0].ln()).abs() < 1e-12);
        assert!((p[0] + p[1] - 1.0).abs() < 1e-12);
    }
}
