//! Cold-start diversity sampling (Kennard-Stone)
//!
//! Picks blocks that spread across the standardized feature space: start
//! with the two farthest-apart points, then repeatedly add the point whose
//! nearest selected neighbour is farthest away. Without feature data the
//! sampler falls back to a seeded random draw, so the same request always
//! gets the same answer.

use super::scaler::StandardScaler;
use crate::models::BlockId;
use crate::store::FeatureMatrix;
use nalgebra::DMatrix;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;

pub const DEFAULT_FALLBACK_SEED: u64 = 42;

#[derive(Debug, Clone, Copy)]
pub struct DiversitySampler {
    fallback_seed: u64,
}

impl Default for DiversitySampler {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_SEED)
    }
}

impl DiversitySampler {
    pub fn new(fallback_seed: u64) -> Self {
        Self { fallback_seed }
    }

    /// Choose up to `count` block ids.
    ///
    /// With a non-empty `matrix` the choice is made among the matrix rows
    /// (blocks without metrics are not eligible). Otherwise `candidates`
    /// are sampled at random.
    pub fn select(
        &self,
        matrix: Option<&FeatureMatrix>,
        candidates: &[BlockId],
        count: usize,
    ) -> Vec<BlockId> {
        match matrix {
            Some(m) if !m.is_empty() && m.dim() > 0 => {
                let (_, scaled) = StandardScaler::fit_transform(m.rows(), m.dim());
                let picked = kennard_stone(&scaled, count);
                tracing::info!("Kennard-Stone selected {} diverse blocks", picked.len());
                picked.into_iter().map(|i| m.ids()[i]).collect()
            }
            _ => {
                tracing::warn!("No feature data for sampling, using seeded random fallback");
                self.random_fallback(candidates, count)
            }
        }
    }

    /// Seeded sample without replacement; duplicate candidates count once.
    pub fn random_fallback(&self, candidates: &[BlockId], count: usize) -> Vec<BlockId> {
        let mut seen = HashSet::new();
        let unique: Vec<BlockId> = candidates.iter().copied().filter(|id| seen.insert(*id)).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.fallback_seed);
        rand::seq::index::sample(&mut rng, unique.len(), count.min(unique.len()))
            .into_iter()
            .map(|i| unique[i])
            .collect()
    }
}

/// Pairwise Euclidean distances between rows
fn distance_matrix(rows: &[Vec<f64>]) -> DMatrix<f64> {
    let n = rows.len();
    let dim = rows.first().map_or(0, Vec::len);
    let data = DMatrix::from_fn(n, dim, |i, j| rows[i][j]);
    let mut dist = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let d = (data.row(i) - data.row(j)).norm();
            dist[(i, j)] = d;
            dist[(j, i)] = d;
        }
    }
    dist
}

/// Kennard-Stone selection of `k` row indices, in selection order.
///
/// Returns every index in order when `k >= rows.len()`. Ties go to the
/// first candidate in scan order.
pub fn kennard_stone(rows: &[Vec<f64>], k: usize) -> Vec<usize> {
    let n = rows.len();
    if k >= n {
        return (0..n).collect();
    }
    if k == 0 {
        return Vec::new();
    }

    let dist = distance_matrix(rows);

    // n >= 2 here, so the pair is always two distinct rows
    let (mut first, mut second, mut best) = (0, 1, f64::NEG_INFINITY);
    for i in 0..n {
        for j in (i + 1)..n {
            if dist[(i, j)] > best {
                (first, second, best) = (i, j, dist[(i, j)]);
            }
        }
    }

    let mut selected = vec![first];
    if k > 1 {
        selected.push(second);
    }

    let mut is_selected = vec![false; n];
    let mut nearest = vec![f64::INFINITY; n];
    for &s in &selected {
        is_selected[s] = true;
        for c in 0..n {
            nearest[c] = nearest[c].min(dist[(s, c)]);
        }
    }

    while selected.len() < k {
        let mut pick = None;
        let mut farthest = f64::NEG_INFINITY;
        for c in (0..n).filter(|&c| !is_selected[c]) {
            if nearest[c] > farthest {
                farthest = nearest[c];
                pick = Some(c);
            }
        }
        let Some(p) = pick else { break };
        selected.push(p);
        is_selected[p] = true;
        for c in 0..n {
            nearest[c] = nearest[c].min(dist[(p, c)]);
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_matrix() -> FeatureMatrix {
        FeatureMatrix::new(
            vec!["x".into()],
            vec![10, 11, 12, 13],
            vec![vec![0.0], vec![1.0], vec![5.0], vec![10.0]],
        )
    }

    #[test]
    fn test_seeds_with_farthest_pair() {
        let picked = DiversitySampler::default().select(Some(&line_matrix()), &[], 3);
        assert_eq!(picked, vec![10, 13, 12]);
    }

    #[test]
    fn test_count_at_least_n_returns_all_in_order() {
        let m = line_matrix();
        let sampler = DiversitySampler::default();
        assert_eq!(sampler.select(Some(&m), &[], 4), vec![10, 11, 12, 13]);
        assert_eq!(sampler.select(Some(&m), &[], 50), vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_small_counts() {
        let m = line_matrix();
        let sampler = DiversitySampler::default();
        assert_eq!(sampler.select(Some(&m), &[], 1), vec![10]);
        assert!(sampler.select(Some(&m), &[], 0).is_empty());
    }

    #[test]
    fn test_selection_is_unique_subset() {
        let rows: Vec<Vec<f64>> = (0..30)
            .map(|i| vec![(i * 7 % 11) as f64, (i * 3 % 5) as f64, i as f64 * 0.1])
            .collect();
        let picked = kennard_stone(&rows, 12);
        assert_eq!(picked.len(), 12);
        let unique: HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), 12);
        assert!(picked.iter().all(|&i| i < 30));

        // first two are the farthest pair
        let dist = distance_matrix(&rows);
        let max = dist.iter().copied().fold(0.0, f64::max);
        assert_eq!(dist[(picked[0], picked[1])], max);
    }

    #[test]
    fn test_identical_rows_yield_distinct_indices() {
        let picked = kennard_stone(&vec![vec![1.0, 2.0]; 5], 3);
        assert_eq!(picked, vec![0, 1, 2]);

        let m = FeatureMatrix::new(
            vec!["x".into(), "y".into()],
            vec![7, 8, 9, 10],
            vec![vec![0.0, 0.0]; 4],
        );
        let ids = DiversitySampler::default().select(Some(&m), &[], 2);
        assert_eq!(ids, vec![7, 8]);
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let candidates: Vec<BlockId> = (100..140).collect();
        let sampler = DiversitySampler::default();
        let a = sampler.select(None, &candidates, 10);
        let b = sampler.select(None, &candidates, 10);
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
        assert!(a.iter().all(|id| candidates.contains(id)));
        let unique: HashSet<_> = a.iter().collect();
        assert_eq!(unique.len(), 10);
    }

    #[test]
    fn test_fallback_caps_at_candidate_count() {
        let sampler = DiversitySampler::new(7);
        let picked = sampler.random_fallback(&[1, 2, 2, 3], 10);
        assert_eq!(picked.len(), 3);
        assert!(sampler.random_fallback(&[], 5).is_empty());
    }
}
