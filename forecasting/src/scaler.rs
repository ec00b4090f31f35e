//! Column scalers persisted next to the models they feed.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::ForecastError;

/// Per-column `(x - mean) / std` with population std. Constant columns get a
/// unit scale so they map to zero instead of NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Array2<f64>) -> Result<Self, ForecastError> {
        if x.nrows() == 0 {
            return Err(ForecastError::InsufficientData { needed: 1, got: 0 });
        }
        let mean = x
            .mean_axis(Axis(0))
            .ok_or(ForecastError::InsufficientData { needed: 1, got: 0 })?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });
        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>, ForecastError> {
        if x.ncols() != self.n_features() {
            return Err(ForecastError::ShapeMismatch {
                expected: self.n_features(),
                got: x.ncols(),
            });
        }
        Ok((x - &self.mean) / &self.scale)
    }
}

/// Maps a single series onto `[0, 1]` using the fitted min and max.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    min: f64,
    range: f64,
}

impl MinMaxScaler {
    pub fn fit(values: &[f64]) -> Result<Self, ForecastError> {
        if values.is_empty() {
            return Err(ForecastError::InsufficientData { needed: 1, got: 0 });
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        Ok(Self {
            min,
            range: if range > 0.0 { range } else { 1.0 },
        })
    }

    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| (v - self.min) / self.range).collect()
    }

    pub fn inverse(&self, value: f64) -> f64 {
        value * self.range + self.min
    }
}
