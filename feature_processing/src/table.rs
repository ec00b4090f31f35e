use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use data_ingestion::PriceField;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::FeatureError;

pub const LAGS: [usize; 6] = [1, 2, 3, 5, 7, 14];
pub const ROLLING_WINDOWS: [usize; 5] = [3, 5, 7, 14, 21];
pub const MA_SHORT: usize = 7;
pub const MA_LONG: usize = 21;
pub const RSI_PERIOD: usize = 14;

/// Rows dropped at the head of a clean series before every statistic is defined.
pub const WARMUP: usize = 20;

pub const NUM_FEATURES: usize = 33;

pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "return",
    "lag_1",
    "lag_2",
    "lag_3",
    "lag_5",
    "lag_7",
    "lag_14",
    "roll_mean_3",
    "roll_std_3",
    "roll_min_3",
    "roll_max_3",
    "roll_mean_5",
    "roll_std_5",
    "roll_min_5",
    "roll_max_5",
    "roll_mean_7",
    "roll_std_7",
    "roll_min_7",
    "roll_max_7",
    "roll_mean_14",
    "roll_std_14",
    "roll_min_14",
    "roll_max_14",
    "roll_mean_21",
    "roll_std_21",
    "roll_min_21",
    "roll_max_21",
    "ma_short",
    "ma_long",
    "ma_diff",
    "rsi_14",
    "macd",
    "macd_signal",
];

/// Engineered features for one trading day. Array fields follow
/// [`LAGS`] and [`ROLLING_WINDOWS`] order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub ret: f64,
    pub lags: [f64; 6],
    pub roll_mean: [f64; 5],
    pub roll_std: [f64; 5],
    pub roll_min: [f64; 5],
    pub roll_max: [f64; 5],
    pub ma_short: f64,
    pub ma_long: f64,
    pub ma_diff: f64,
    pub rsi_14: f64,
    pub macd: f64,
    pub macd_signal: f64,
}

impl Features {
    /// Flattened in [`FEATURE_NAMES`] order.
    pub fn to_vec(&self) -> Vec<f64> {
        let mut v = Vec::with_capacity(NUM_FEATURES);
        v.push(self.ret);
        v.extend_from_slice(&self.lags);
        for i in 0..ROLLING_WINDOWS.len() {
            v.extend_from_slice(&[
                self.roll_mean[i],
                self.roll_std[i],
                self.roll_min[i],
                self.roll_max[i],
            ]);
        }
        v.extend_from_slice(&[
            self.ma_short,
            self.ma_long,
            self.ma_diff,
            self.rsi_14,
            self.macd,
            self.macd_signal,
        ]);
        v
    }

    pub fn is_finite(&self) -> bool {
        self.to_vec().iter().all(|v| v.is_finite())
    }
}

/// Next trading day's price attached to the current day's row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub date: NaiveDate,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    /// Selected price of this day.
    pub price: f64,
    pub features: Features,
    pub label: Option<Label>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub field: PriceField,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn feature_names() -> Vec<String> {
        FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
    }

    /// Rows usable for supervised training, in date order.
    pub fn labeled(&self) -> impl Iterator<Item = (&FeatureRow, Label)> {
        self.rows.iter().filter_map(|r| r.label.map(|l| (r, l)))
    }

    pub fn labeled_len(&self) -> usize {
        self.labeled().count()
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), FeatureError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["date".to_string(), self.field.to_string()];
        header.extend(Self::feature_names());
        header.push("label".to_string());
        writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![row.date.to_string(), row.price.to_string()];
            record.extend(row.features.to_vec().iter().map(|v| v.to_string()));
            record.push(row.label.map(|l| l.price.to_string()).unwrap_or_default());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        info!("Wrote {} feature rows to {}", self.rows.len(), path.display());
        Ok(())
    }
}
