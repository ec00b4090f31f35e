use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataIngestionError {
    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON deserialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config not found: {0}")]
    ConfigValueNotFoundError(#[from] config::ConfigError),

    #[error("Market data provider returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Market data provider error ({code}): {description}")]
    Provider { code: String, description: String },

    #[error("Ticker symbol must not be empty")]
    EmptySymbol,

    #[error("Invalid date range: start {start} is not before end {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
}

impl DataIngestionError {
    /// Malformed request, detected before any I/O.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DataIngestionError::EmptySymbol | DataIngestionError::InvalidDateRange { .. }
        )
    }
}
