//! Per-column standardization (zero mean, unit variance)

use serde::{Deserialize, Serialize};

/// Fitted standardization transform.
///
/// Uses the population standard deviation. Columns with zero variance keep
/// a scale of 1.0 so they map to 0 rather than NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit on `rows`; every row must have `dim` values.
    pub fn fit(rows: &[Vec<f64>], dim: usize) -> Self {
        let n = rows.len().max(1) as f64;
        let mut mean = vec![0.0; dim];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut var = vec![0.0; dim];
        for row in rows {
            for j in 0..dim {
                let diff = row[j] - mean[j];
                var[j] += diff * diff;
            }
        }
        let scale = var
            .into_iter()
            .map(|v| {
                let sd = (v / n).sqrt();
                if sd > f64::EPSILON * 10.0 {
                    sd
                } else {
                    1.0
                }
            })
            .collect();

        Self { mean, scale }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    /// Standardize `rows` into a new matrix; the input is left untouched.
    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }

    pub fn fit_transform(rows: &[Vec<f64>], dim: usize) -> (Self, Vec<Vec<f64>>) {
        let scaler = Self::fit(rows, dim);
        let scaled = scaler.transform(rows);
        (scaler, scaled)
    }
}
