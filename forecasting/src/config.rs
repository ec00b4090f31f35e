use std::path::{Path, PathBuf};

use data_ingestion::config::{DataConfig, load_settings};
use data_ingestion::PriceField;
use serde::{Deserialize, Serialize};

use crate::error::ForecastError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataConfig,
    pub field: PriceField,
    pub tabular: TabularConfig,
    pub sequence: SequenceConfig,
    pub artifacts: ArtifactConfig,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            field: PriceField::Close,
            tabular: TabularConfig::default(),
            sequence: SequenceConfig::default(),
            artifacts: ArtifactConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads `spp.toml` (or `path`) layered under `SPP_*` variables and
    /// checks the hyperparameters.
    pub fn load(path: Option<&Path>) -> Result<Self, ForecastError> {
        let cfg: AppConfig = load_settings(path)
            .map_err(|e| ForecastError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ForecastError> {
        self.tabular.validate()?;
        self.sequence.validate()
    }
}

/// Gradient boosted trees and the chronological train/test split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabularConfig {
    pub train_fraction: f64,
    pub max_rounds: usize,
    pub early_stopping_rounds: usize,
    pub eta: f64,
    pub max_depth: usize,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub lambda: f64,
    pub gamma: f64,
    pub min_child_weight: f64,
    pub seed: u64,
    /// Boost on top of each row's own price instead of a constant base
    /// score, so the trees model the next-day move.
    pub price_margin: bool,
}

impl Default for TabularConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.8,
            max_rounds: 1000,
            early_stopping_rounds: 25,
            eta: 0.05,
            max_depth: 6,
            subsample: 0.8,
            colsample_bytree: 0.8,
            lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
            seed: 42,
            price_margin: true,
        }
    }
}

impl TabularConfig {
    pub fn validate(&self) -> Result<(), ForecastError> {
        check_fraction("tabular.train_fraction", self.train_fraction, false)?;
        check_fraction("tabular.subsample", self.subsample, true)?;
        check_fraction("tabular.colsample_bytree", self.colsample_bytree, true)?;
        if self.max_rounds == 0 {
            return Err(invalid("tabular.max_rounds must be positive"));
        }
        if !(self.eta > 0.0) {
            return Err(invalid("tabular.eta must be positive"));
        }
        if self.lambda < 0.0 || self.gamma < 0.0 || self.min_child_weight < 0.0 {
            return Err(invalid(
                "tabular.lambda, gamma and min_child_weight must be non-negative",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerFit {
    /// Fit on the training windows only, so held-out prices never leak in.
    #[default]
    TrainOnly,
    FullSeries,
}

/// Single-layer LSTM regressor over a sliding window of prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub window: usize,
    pub units: usize,
    pub dropout: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_fraction: f64,
    pub patience: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub scaler_fit: ScalerFit,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            window: 30,
            units: 64,
            dropout: 0.2,
            epochs: 50,
            batch_size: 32,
            validation_fraction: 0.1,
            patience: 8,
            learning_rate: 0.001,
            seed: 42,
            scaler_fit: ScalerFit::TrainOnly,
        }
    }
}

impl SequenceConfig {
    pub fn validate(&self) -> Result<(), ForecastError> {
        if self.window == 0 || self.units == 0 || self.batch_size == 0 || self.epochs == 0 {
            return Err(invalid(
                "sequence.window, units, batch_size and epochs must be positive",
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(invalid("sequence.dropout must be in [0, 1)"));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(invalid("sequence.validation_fraction must be in [0, 1)"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(invalid("sequence.learning_rate must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub dir: PathBuf,
    pub tabular_scaler: String,
    pub tabular_model: String,
    pub sequence_scaler: String,
    pub sequence_model: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
            tabular_scaler: "xgb_scaler.bin".to_string(),
            tabular_model: "xgb_model.bin".to_string(),
            sequence_scaler: "lstm_scaler.bin".to_string(),
            sequence_model: "lstm_model.bin".to_string(),
        }
    }
}

fn invalid(msg: &str) -> ForecastError {
    ForecastError::InvalidConfig(msg.to_string())
}

/// `(0, 1)` for split fractions, `(0, 1]` for sampling ratios.
fn check_fraction(name: &str, value: f64, allow_one: bool) -> Result<(), ForecastError> {
    let ok = value > 0.0 && (value < 1.0 || (allow_one && value == 1.0));
    if ok {
        Ok(())
    } else {
        Err(ForecastError::InvalidConfig(format!(
            "{name} = {value} is out of range"
        )))
    }
}
