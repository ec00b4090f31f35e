use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use data_ingestion::PriceBar;
use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactStore;
use crate::config::AppConfig;
use crate::error::ForecastError;
use crate::metrics::{AccuracyReport, accuracy, pct_error};
use crate::sequence::SequenceForecaster;
use crate::tabular::TabularForecaster;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Tabular,
    Sequence,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Tabular, ModelKind::Sequence];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Tabular => "tabular",
            ModelKind::Sequence => "sequence",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tabular" | "xgb" | "xgboost" => Ok(ModelKind::Tabular),
            "sequence" | "lstm" => Ok(ModelKind::Sequence),
            other => Err(format!("unknown model kind '{other}'")),
        }
    }
}

/// One prediction lined up with the price it tries to hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastRow {
    /// Trading day the prediction is for.
    pub date: NaiveDate,
    pub actual: f64,
    pub predicted: f64,
}

impl ForecastRow {
    pub fn error(&self) -> f64 {
        (self.actual - self.predicted).abs()
    }

    /// Percent, `None` when the actual price is zero.
    pub fn error_pct(&self) -> Option<f64> {
        pct_error(self.actual, self.predicted).map(|e| e * 100.0)
    }
}

/// Prediction for the trading day after `after`, made from the newest data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NextDayForecast {
    pub after: NaiveDate,
    pub predicted: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub kind: ModelKind,
    pub rows: Vec<ForecastRow>,
    pub next: Option<NextDayForecast>,
}

impl Forecast {
    pub fn tail(&self, n: usize) -> &[ForecastRow] {
        &self.rows[self.rows.len().saturating_sub(n)..]
    }

    pub fn accuracy(&self) -> Result<AccuracyReport, ForecastError> {
        let actual: Vec<f64> = self.rows.iter().map(|r| r.actual).collect();
        let predicted: Vec<f64> = self.rows.iter().map(|r| r.predicted).collect();
        accuracy(&actual, &predicted)
    }
}

/// Held-out evaluation of a freshly trained model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainSummary {
    pub kind: ModelKind,
    pub train_samples: usize,
    pub test_samples: usize,
    /// Boosting rounds or epochs kept after early stopping.
    pub iterations: usize,
    pub report: AccuracyReport,
}

#[derive(Debug)]
pub struct TrainOutcome<A> {
    pub artifact: A,
    pub summary: TrainSummary,
}

/// A model family that can be trained on a bar series, persisted, and used
/// to forecast on a fresh series.
pub trait Forecaster {
    type Artifact;

    fn kind(&self) -> ModelKind;

    fn train(&self, bars: &[PriceBar]) -> Result<TrainOutcome<Self::Artifact>, ForecastError>;

    fn forecast(&self, artifact: &Self::Artifact, bars: &[PriceBar]) -> Result<Forecast, ForecastError>;

    fn save(&self, store: &ArtifactStore, artifact: &Self::Artifact) -> Result<(), ForecastError>;

    fn load(&self, store: &ArtifactStore) -> Result<Self::Artifact, ForecastError>;
}

fn train_with<F: Forecaster>(
    forecaster: &F,
    store: &ArtifactStore,
    bars: &[PriceBar],
) -> Result<TrainSummary, ForecastError> {
    let outcome = forecaster.train(bars)?;
    forecaster.save(store, &outcome.artifact)?;
    Ok(outcome.summary)
}

fn forecast_with<F: Forecaster>(
    forecaster: &F,
    store: &ArtifactStore,
    bars: &[PriceBar],
) -> Result<Forecast, ForecastError> {
    let artifact = forecaster.load(store)?;
    forecaster.forecast(&artifact, bars)
}

/// Trains `kind` on `bars` and overwrites its artifact pair.
pub fn train_and_save(
    kind: ModelKind,
    cfg: &AppConfig,
    store: &ArtifactStore,
    bars: &[PriceBar],
) -> Result<TrainSummary, ForecastError> {
    match kind {
        ModelKind::Tabular => train_with(&TabularForecaster::new(cfg.field, cfg.tabular.clone()), store, bars),
        ModelKind::Sequence => train_with(&SequenceForecaster::new(cfg.field, cfg.sequence.clone()), store, bars),
    }
}

/// Loads the stored `kind` pair and forecasts over `bars`.
pub fn load_and_forecast(
    kind: ModelKind,
    cfg: &AppConfig,
    store: &ArtifactStore,
    bars: &[PriceBar],
) -> Result<Forecast, ForecastError> {
    match kind {
        ModelKind::Tabular => forecast_with(&TabularForecaster::new(cfg.field, cfg.tabular.clone()), store, bars),
        ModelKind::Sequence => forecast_with(&SequenceForecaster::new(cfg.field, cfg.sequence.clone()), store, bars),
    }
}
