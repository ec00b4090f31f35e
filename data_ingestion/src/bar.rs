use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One trading day of OHLCV data for a ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl PriceBar {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn price(&self, field: PriceField) -> f64 {
        match field {
            PriceField::Open => self.open,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Close => self.close,
        }
    }
}

/// Which price column feeds features and labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceField {
    Open,
    High,
    Low,
    #[default]
    Close,
}

impl PriceField {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceField::Open => "open",
            PriceField::High => "high",
            PriceField::Low => "low",
            PriceField::Close => "close",
        }
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(PriceField::Open),
            "high" => Ok(PriceField::High),
            "low" => Ok(PriceField::Low),
            "close" => Ok(PriceField::Close),
            other => Err(format!("unknown price field '{other}'")),
        }
    }
}

pub fn validate_bar(bar: &PriceBar) -> bool {
    let mut is_valid = true;

    for (name, value) in [
        ("Open", bar.open),
        ("High", bar.high),
        ("Low", bar.low),
        ("Close", bar.close),
    ] {
        if !value.is_finite() {
            warn!("{}: {} is not a number", bar.date, name);
            is_valid = false;
        } else if value < 0.0 {
            warn!("{}: {} cannot be negative", bar.date, name);
            is_valid = false;
        }
    }

    is_valid
}

/// Drops invalid bars, sorts by date and keeps the first bar of any duplicated date.
pub fn normalize_bars(mut bars: Vec<PriceBar>) -> Vec<PriceBar> {
    bars.retain(validate_bar);
    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_validate_rejects_negative_and_nan() {
        assert!(validate_bar(&PriceBar::new(day(2), 1.0, 2.0, 0.5, 1.5, 10)));
        assert!(!validate_bar(&PriceBar::new(day(2), -1.0, 2.0, 0.5, 1.5, 10)));
        assert!(!validate_bar(&PriceBar::new(day(2), 1.0, 2.0, 0.5, f64::NAN, 10)));
    }

    #[test]
    fn test_normalize_sorts_and_dedups() {
        let bars = vec![
            PriceBar::new(day(3), 1.0, 1.0, 1.0, 3.0, 0),
            PriceBar::new(day(2), 1.0, 1.0, 1.0, 2.0, 0),
            PriceBar::new(day(3), 1.0, 1.0, 1.0, 9.0, 0),
            PriceBar::new(day(4), 1.0, 1.0, 1.0, -4.0, 0),
        ];
        let out = normalize_bars(bars);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].date, day(2));
        assert_eq!(out[1].close, 3.0);
    }

    #[test]
    fn test_price_field_parse() {
        assert_eq!("Close".parse::<PriceField>().unwrap(), PriceField::Close);
        assert_eq!("high".parse::<PriceField>().unwrap(), PriceField::High);
        assert!("adj".parse::<PriceField>().is_err());
    }
}
