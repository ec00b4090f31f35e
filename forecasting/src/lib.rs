pub mod artifacts;
pub mod config;
pub mod error;
pub mod forecaster;
pub mod gbm;
pub mod lstm;
pub mod metrics;
pub mod scaler;
pub mod sequence;
pub mod tabular;

pub use artifacts::ArtifactStore;
pub use config::AppConfig;
pub use error::ForecastError;
pub use forecaster::{
    Forecast, ForecastRow, Forecaster, ModelKind, NextDayForecast, TrainSummary, load_and_forecast,
    train_and_save,
};
pub use metrics::{AccuracyReport, accuracy};
pub use sequence::SequenceForecaster;
pub use tabular::TabularForecaster;
