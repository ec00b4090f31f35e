//! Engineered features into gradient boosted trees, split chronologically.

use data_ingestion::{PriceBar, PriceField};
use feature_processing::table::{FeatureRow, FeatureTable, NUM_FEATURES};
use feature_processing::build_features;
use log::info;
use ndarray::{Array2, s};
use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactStore;
use crate::config::TabularConfig;
use crate::error::ForecastError;
use crate::forecaster::{
    Forecast, ForecastRow, Forecaster, ModelKind, NextDayForecast, TrainOutcome, TrainSummary,
};
use crate::gbm::{BoosterParams, GradientBoostedTrees};
use crate::metrics::accuracy;
use crate::scaler::StandardScaler;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularModel {
    pub ensemble: GradientBoostedTrees,
    pub feature_names: Vec<String>,
    pub field: PriceField,
    pub price_margin: bool,
}

impl TabularModel {
    fn margin(&self, row: &FeatureRow) -> f64 {
        if self.price_margin { row.price } else { 0.0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainedTabularModel {
    pub scaler: StandardScaler,
    pub model: TabularModel,
}

impl TrainedTabularModel {
    /// One predicted next-day price per feature row, using the stored scaler.
    pub fn predict(&self, table: &FeatureTable) -> Result<Vec<f64>, ForecastError> {
        if table.is_empty() {
            return Err(ForecastError::EmptyFeatureTable);
        }
        if self.model.feature_names.len() != NUM_FEATURES {
            return Err(ForecastError::ShapeMismatch {
                expected: self.model.feature_names.len(),
                got: NUM_FEATURES,
            });
        }
        let rows: Vec<&FeatureRow> = table.rows.iter().collect();
        let x = self.scaler.transform(&feature_matrix(&rows))?;
        let raw = self.model.ensemble.predict(&x)?;
        Ok(rows
            .iter()
            .zip(raw)
            .map(|(row, p)| p + self.model.margin(row))
            .collect())
    }
}

/// Number of leading rows used for training: the rest, `ceil(n * (1 - f))`
/// rows, is the test suffix. Both sides are kept non-empty.
pub fn chronological_split(n: usize, train_fraction: f64) -> Result<usize, ForecastError> {
    if n < 2 {
        return Err(ForecastError::InsufficientData { needed: 2, got: n });
    }
    let n_test = ((n as f64) * (1.0 - train_fraction) - 1e-9).ceil().max(1.0) as usize;
    Ok(n - n_test.min(n - 1))
}

fn feature_matrix(rows: &[&FeatureRow]) -> Array2<f64> {
    let flat: Vec<Vec<f64>> = rows.iter().map(|r| r.features.to_vec()).collect();
    Array2::from_shape_fn((rows.len(), NUM_FEATURES), |(i, j)| flat[i][j])
}

pub struct TabularForecaster {
    field: PriceField,
    cfg: TabularConfig,
}

impl TabularForecaster {
    pub fn new(field: PriceField, cfg: TabularConfig) -> Self {
        Self { field, cfg }
    }

    /// Trains on an already engineered table.
    pub fn train_table(
        &self,
        table: &FeatureTable,
    ) -> Result<TrainOutcome<TrainedTabularModel>, ForecastError> {
        if table.is_empty() {
            return Err(ForecastError::EmptyFeatureTable);
        }
        self.cfg.validate()?;

        let (rows, labels): (Vec<&FeatureRow>, Vec<f64>) =
            table.labeled().map(|(row, label)| (row, label.price)).unzip();
        let n = rows.len();
        let n_train = chronological_split(n, self.cfg.train_fraction)?;

        let margin: Vec<f64> = rows
            .iter()
            .map(|r| if self.cfg.price_margin { r.price } else { 0.0 })
            .collect();
        let target: Vec<f64> = labels.iter().zip(&margin).map(|(y, m)| y - m).collect();

        let x = feature_matrix(&rows);
        let x_train = x.slice(s![..n_train, ..]).to_owned();
        let x_test = x.slice(s![n_train.., ..]).to_owned();

        let scaler = StandardScaler::fit(&x_train)?;
        let xs_train = scaler.transform(&x_train)?;
        let xs_test = scaler.transform(&x_test)?;

        info!(
            "Training tabular model on {} rows, testing on {}",
            n_train,
            n - n_train
        );
        let ensemble = GradientBoostedTrees::fit(
            &xs_train,
            &target[..n_train],
            Some((&xs_test, &target[n_train..])),
            &BoosterParams::from(&self.cfg),
        )?;

        let predicted: Vec<f64> = ensemble
            .predict(&xs_test)?
            .into_iter()
            .zip(&margin[n_train..])
            .map(|(p, m)| p + m)
            .collect();
        let report = accuracy(&labels[n_train..], &predicted)?;
        info!(
            "Tabular model kept {} trees; held-out rmse {:.4}",
            ensemble.n_trees(),
            report.rmse
        );

        let summary = TrainSummary {
            kind: ModelKind::Tabular,
            train_samples: n_train,
            test_samples: n - n_train,
            iterations: ensemble.n_trees(),
            report,
        };
        let artifact = TrainedTabularModel {
            scaler,
            model: TabularModel {
                ensemble,
                feature_names: FeatureTable::feature_names(),
                field: table.field,
                price_margin: self.cfg.price_margin,
            },
        };
        Ok(TrainOutcome { artifact, summary })
    }
}

impl Forecaster for TabularForecaster {
    type Artifact = TrainedTabularModel;

    fn kind(&self) -> ModelKind {
        ModelKind::Tabular
    }

    fn train(&self, bars: &[PriceBar]) -> Result<TrainOutcome<Self::Artifact>, ForecastError> {
        let table = build_features(bars, self.field)?;
        self.train_table(&table)
    }

    fn forecast(&self, artifact: &Self::Artifact, bars: &[PriceBar]) -> Result<Forecast, ForecastError> {
        let table = build_features(bars, artifact.model.field)?;
        let predicted = artifact.predict(&table)?;

        let rows = table
            .rows
            .iter()
            .zip(&predicted)
            .filter_map(|(row, &p)| {
                row.label.map(|label| ForecastRow {
                    date: label.date,
                    actual: label.price,
                    predicted: p,
                })
            })
            .collect();
        let next = table
            .rows
            .last()
            .zip(predicted.last())
            .map(|(row, &p)| NextDayForecast {
                after: row.date,
                predicted: p,
            });

        Ok(Forecast {
            kind: ModelKind::Tabular,
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
        Ok(TrainedTabularModel { scaler, model })
    }
}
