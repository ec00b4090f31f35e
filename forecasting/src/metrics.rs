use serde::Serialize;

use crate::error::ForecastError;

/// Error summary over aligned (actual, predicted) pairs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyReport {
    pub samples: usize,
    pub rmse: f64,
    pub mae: f64,
    /// Mean absolute percentage error as a fraction, over pairs where it is
    /// defined. `None` when no pair has a non-zero actual.
    pub mape: Option<f64>,
    /// Percentage of pairs whose percentage error is undefined (actual == 0).
    pub undefined_pct: f64,
}

/// Absolute percentage error, undefined when the actual value is zero.
pub fn pct_error(actual: f64, predicted: f64) -> Option<f64> {
    (actual != 0.0).then(|| ((actual - predicted) / actual).abs())
}

pub fn accuracy(actual: &[f64], predicted: &[f64]) -> Result<AccuracyReport, ForecastError> {
    if actual.len() != predicted.len() {
        return Err(ForecastError::LengthMismatch {
            actual: actual.len(),
            predicted: predicted.len(),
        });
    }
    let n = actual.len();
    if n == 0 {
        return Ok(AccuracyReport {
            samples: 0,
            rmse: f64::NAN,
            mae: f64::NAN,
            mape: None,
            undefined_pct: 0.0,
        });
    }

    let mut sq = 0.0;
    let mut abs = 0.0;
    let mut pct_sum = 0.0;
    let mut pct_n = 0usize;
    for (&a, &p) in actual.iter().zip(predicted) {
        let err = a - p;
        sq += err * err;
        abs += err.abs();
        if let Some(pe) = pct_error(a, p) {
            pct_sum += pe;
            pct_n += 1;
        }
    }

    Ok(AccuracyReport {
        samples: n,
        rmse: (sq / n as f64).sqrt(),
        mae: abs / n as f64,
        mape: (pct_n > 0).then(|| pct_sum / pct_n as f64),
        undefined_pct: 100.0 * (n - pct_n) as f64 / n as f64,
    })
}
