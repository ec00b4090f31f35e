//! Sliding windows over one price column into a single-layer LSTM.

use data_ingestion::{PriceBar, PriceField};
use feature_processing::processor::validate_series;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactStore;
use crate::config::{ScalerFit, SequenceConfig};
use crate::error::ForecastError;
use crate::forecaster::{
    Forecast, ForecastRow, Forecaster, ModelKind, NextDayForecast, TrainOutcome, TrainSummary,
};
use crate::lstm::{LstmParams, LstmRegressor, validation_split};
use crate::metrics::accuracy;
use crate::scaler::MinMaxScaler;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceModel {
    pub network: LstmRegressor,
    pub window: usize,
    pub field: PriceField,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainedSequenceModel {
    pub scaler: MinMaxScaler,
    pub model: SequenceModel,
}

/// Window `i` is `values[i..i + window]` and its label is `values[i + window]`,
/// giving `values.len() - window` pairs.
pub fn make_windows(values: &[f64], window: usize) -> Result<(Vec<Vec<f64>>, Vec<f64>), ForecastError> {
    if window == 0 || values.len() <= window {
        return Err(ForecastError::InsufficientData {
            needed: window + 1,
            got: values.len(),
        });
    }
    let n = values.len() - window;
    let windows = (0..n).map(|i| values[i..i + window].to_vec()).collect();
    let labels = values[window..].to_vec();
    Ok((windows, labels))
}

/// Bars with a usable price for `field`, in date order.
fn priced(bars: &[PriceBar], field: PriceField) -> Result<Vec<&PriceBar>, ForecastError> {
    validate_series(bars)?;
    let kept: Vec<&PriceBar> = bars.iter().filter(|b| b.price(field).is_finite()).collect();
    if kept.len() < bars.len() {
        warn!("Skipping {} bars without a {field} price", bars.len() - kept.len());
    }
    Ok(kept)
}

impl TrainedSequenceModel {
    /// Inverse-scaled predictions; entry `i` is for series index `i + window`.
    pub fn predict_series(&self, prices: &[f64]) -> Result<Vec<f64>, ForecastError> {
        let scaled = self.scaler.transform(prices);
        let (windows, _) = make_windows(&scaled, self.model.window)?;
        Ok(self
            .model
            .network
            .predict(&windows)
            .into_iter()
            .map(|p| self.scaler.inverse(p))
            .collect())
    }

    /// Prediction for the value after the last `window` prices.
    pub fn predict_next(&self, prices: &[f64]) -> Result<f64, ForecastError> {
        let w = self.model.window;
        if prices.len() < w {
            return Err(ForecastError::InsufficientData {
                needed: w,
                got: prices.len(),
            });
        }
        let scaled = self.scaler.transform(&prices[prices.len() - w..]);
        Ok(self.scaler.inverse(self.model.network.predict_one(&scaled)))
    }
}

pub struct SequenceForecaster {
    field: PriceField,
    cfg: SequenceConfig,
}

impl SequenceForecaster {
    pub fn new(field: PriceField, cfg: SequenceConfig) -> Self {
        Self { field, cfg }
    }
}

impl Forecaster for SequenceForecaster {
    type Artifact = TrainedSequenceModel;

    fn kind(&self) -> ModelKind {
        ModelKind::Sequence
    }

    fn train(&self, bars: &[PriceBar]) -> Result<TrainOutcome<Self::Artifact>, ForecastError> {
        self.cfg.validate()?;
        let w = self.cfg.window;
        let prices: Vec<f64> = priced(bars, self.field)?
            .iter()
            .map(|b| b.price(self.field))
            .collect();
        if prices.len() <= w {
            return Err(ForecastError::InsufficientData {
                needed: w + 1,
                got: prices.len(),
            });
        }

        let n_windows = prices.len() - w;
        let n_train = validation_split(n_windows, self.cfg.validation_fraction);
        let scaler = match self.cfg.scaler_fit {
            // Every value a training window or label touches.
            ScalerFit::TrainOnly => MinMaxScaler::fit(&prices[..n_train + w])?,
            ScalerFit::FullSeries => MinMaxScaler::fit(&prices)?,
        };
        let (windows, labels) = make_windows(&scaler.transform(&prices), w)?;

        let (network, history) = LstmRegressor::fit(&windows, &labels, &LstmParams::from(&self.cfg))?;

        let eval_from = if n_train < n_windows { n_train } else { 0 };
        let predicted: Vec<f64> = network
            .predict(&windows[eval_from..])
            .into_iter()
            .map(|p| scaler.inverse(p))
            .collect();
        let report = accuracy(&prices[eval_from + w..], &predicted)?;
        info!(
            "Sequence model best epoch {} of {}; held-out rmse {:.4}",
            history.epochs_kept(),
            history.epochs_run(),
            report.rmse
        );

        let summary = TrainSummary {
            kind: ModelKind::Sequence,
            train_samples: n_train,
            test_samples: n_windows - n_train,
            iterations: history.epochs_kept(),
            report,
        };
        let artifact = TrainedSequenceModel {
            scaler,
            model: SequenceModel {
                network,
                window: w,
                field: self.field,
            },
        };
        Ok(TrainOutcome { artifact, summary })
    }

    fn forecast(&self, artifact: &Self::Artifact, bars: &[PriceBar]) -> Result<Forecast, ForecastError> {
        let field = artifact.model.field;
        let w = artifact.model.window;
        let bars = priced(bars, field)?;
        let prices: Vec<f64> = bars.iter().map(|b| b.price(field)).collect();

        let predicted = artifact.predict_series(&prices)?;
        let rows = predicted
            .iter()
            .enumerate()
            .map(|(i, &p)| ForecastRow {
                date: bars[i + w].date,
                actual: prices[i + w],
                predicted: p,
            })
            .collect();

        let next = match bars.last() {
            Some(last) => Some(NextDayForecast {
                after: last.date,
                predicted: artifact.predict_next(&prices)?,
            }),
            None => None,
        };

        Ok(Forecast {
            kind: ModelKind::Sequence,
            rows,
            next,
        })
    }

    fn save(&self, store: &ArtifactStore, artifact: &Self::Artifact) -> Result<(), ForecastError> {
        store.save(self.kind(), &artifact.scaler, &artifact.model)?;
        Ok(())
    }

    fn load(&self, store: &ArtifactStore) -> Result<Self::Artifact, ForecastError> {
        let (scaler, model) = store.load(self.kind())?;
        Ok(TrainedSequenceModel { scaler, model })
    }
}
