use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::bar::{PriceBar, normalize_bars};
use crate::error::DataIngestionError;
use crate::fetcher::{FetchRequest, MarketDataProvider};

pub fn write_bars_csv(path: &Path, bars: &[PriceBar]) -> Result<(), DataIngestionError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for bar in bars {
        writer.serialize(bar)?;
    }
    writer.flush()?;
    info!("Wrote {} bars to {}", bars.len(), path.display());
    Ok(())
}

/// Reads bars written by [`write_bars_csv`], dropping invalid rows and
/// restoring date order.
pub fn read_bars_csv(path: &Path) -> Result<Vec<PriceBar>, DataIngestionError> {
    let file = File::open(path)?;
    let mut reader = csv::Reader::from_reader(file);
    let bars = reader
        .deserialize::<PriceBar>()
        .collect::<Result<Vec<_>, _>>()?;
    debug!("Read {} bars from {}", bars.len(), path.display());
    Ok(normalize_bars(bars))
}

/// Offline provider backed by `<dir>/<SYMBOL>.csv` files.
pub struct CsvProvider {
    dir: PathBuf,
}

impl CsvProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.csv"))
    }
}

impl MarketDataProvider for CsvProvider {
    fn name(&self) -> &'static str {
        "csv"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<PriceBar>, DataIngestionError> {
        let path = self.path_for(&request.symbol);
        let bars = match read_bars_csv(&path) {
            Ok(bars) => bars,
            Err(DataIngestionError::IoError(e)) if e.kind() == io::ErrorKind::NotFound => {
                info!("No local history for {} at {}", request.symbol, path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        Ok(bars.into_iter().filter(|b| request.contains(b.date)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn bars() -> Vec<PriceBar> {
        (1..=5)
            .map(|d| PriceBar::new(date(d), 10.0, 11.0, 9.0, 10.0 + d as f64, 100 * d as u64))
            .collect()
    }

    #[test]
    fn test_csv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("AAPL.csv");
        write_bars_csv(&path, &bars()).unwrap();
        assert_eq!(read_bars_csv(&path).unwrap(), bars());
    }

    #[tokio::test]
    async fn test_provider_filters_range() {
        let dir = tempfile::tempdir().unwrap();
        let provider = CsvProvider::new(dir.path());
        write_bars_csv(&provider.path_for("AAPL"), &bars()).unwrap();

        let req = FetchRequest::new("aapl", date(2), date(4)).unwrap();
        let got = provider.fetch(&req).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].date, date(2));
        assert_eq!(got[1].date, date(3));
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let provider = CsvProvider::new(dir.path());
        let req = FetchRequest::new("NOPE", date(1), date(5)).unwrap();
        assert!(provider.fetch(&req).await.unwrap().is_empty());
    }
}
