use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("Price series is empty")]
    EmptySeries,

    #[error("Price series is not in ascending date order at row {index} ({date})")]
    Unordered { index: usize, date: NaiveDate },

    #[error("Duplicate trading date {0} in price series")]
    DuplicateDate(NaiveDate),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
