//! Score histogram and summary statistics
//!
//! Binning follows numpy's `histogram`: equal-width bins over
//! `[min, max]`, every bin half-open except the last, which also takes
//! `max`. When all scores are equal the range is widened to
//! `[v - 0.5, v + 0.5]`.

use serde::{Deserialize, Serialize};

pub const HISTOGRAM_BINS: usize = 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramBins {
    /// Bin centers
    pub bins: Vec<f64>,
    pub counts: Vec<u64>,
    /// `bins.len() + 1` edges
    pub bin_edges: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub histogram: HistogramBins,
    pub statistics: HistogramStatistics,
}

impl HistogramSummary {
    /// Empty sequences, zeroed statistics
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_scores(scores: &[f64]) -> Self {
        Self::with_bins(scores, HISTOGRAM_BINS)
    }

    pub fn with_bins(scores: &[f64], n_bins: usize) -> Self {
        if scores.is_empty() || n_bins == 0 {
            return Self::empty();
        }

        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let (lo, hi) = if min == max { (min - 0.5, max + 0.5) } else { (min, max) };

        let edges = linspace(lo, hi, n_bins + 1);
        let mut counts = vec![0u64; n_bins];
        for &s in scores {
            counts[bin_index(s, &edges)] += 1;
        }
        let bins = edges.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();

        Self {
            histogram: HistogramBins {
                bins,
                counts,
                bin_edges: edges,
            },
            statistics: HistogramStatistics {
                min,
                max,
                mean: scores.iter().sum::<f64>() / scores.len() as f64,
                median: median(scores),
            },
        }
    }

    pub fn total_count(&self) -> u64 {
        self.histogram.counts.iter().sum()
    }
}

fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    let step = (stop - start) / (num - 1) as f64;
    let mut out: Vec<f64> = (0..num).map(|i| start + i as f64 * step).collect();
    if let Some(last) = out.last_mut() {
        *last = stop;
    }
    out
}

/// Index of the bin holding `value`; `value` must lie within the edges.
fn bin_index(value: f64, edges: &[f64]) -> usize {
    let n_bins = edges.len() - 1;
    let first = edges[0];
    let last = edges[n_bins];
    let raw = ((value - first) / (last - first) * n_bins as f64) as usize;
    let mut idx = raw.min(n_bins - 1);
    // Float rounding can land one bin off; settle against the real edges.
    if idx > 0 && value < edges[idx] {
        idx -= 1;
    } else if idx + 1 < n_bins && value >= edges[idx + 1] {
        idx += 1;
    }
    idx
}

/// Median with the two middle values averaged for even counts
fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
