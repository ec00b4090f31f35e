use std::path::PathBuf;

use data_ingestion::DataIngestionError;
use feature_processing::FeatureError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error(
        "Model artifacts missing: {}. Run `spp train` first.",
        .paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
    )]
    ArtifactMissing { paths: Vec<PathBuf> },

    #[error("Feature table is empty; the price history is too short for the warmup window")]
    EmptyFeatureTable,

    #[error("Insufficient data: need at least {needed} points, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("Shape mismatch: expected {expected} columns, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("Length mismatch: {actual} actual values vs {predicted} predictions")]
    LengthMismatch { actual: usize, predicted: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact serialization error: {0}")]
    Serialize(#[from] bincode::Error),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Ingestion(#[from] DataIngestionError),
}

impl ForecastError {
    /// Errors caused by the caller's input rather than by the environment.
    pub fn is_validation(&self) -> bool {
        match self {
            ForecastError::EmptyFeatureTable
            | ForecastError::InsufficientData { .. }
            | ForecastError::ShapeMismatch { .. }
            | ForecastError::LengthMismatch { .. }
            | ForecastError::InvalidConfig(_) => true,
            ForecastError::Feature(e) => !matches!(
                e,
                FeatureError::CsvError(_) | FeatureError::IoError(_)
            ),
            ForecastError::Ingestion(e) => e.is_validation(),
            _ => false,
        }
    }
}
