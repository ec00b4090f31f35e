use data_ingestion::{PriceBar, PriceField};
use log::debug;

use crate::error::FeatureError;
use crate::indicators::{Macd, Rsi};
use crate::table::{
    FeatureRow, FeatureTable, Features, LAGS, Label, MA_LONG, MA_SHORT, ROLLING_WINDOWS,
    RSI_PERIOD,
};
use crate::window::RollingWindow;

/// Streams a price series through one ring buffer per statistic.
pub struct WindowedFeatureStream {
    lags: RollingWindow,
    windows: Vec<RollingWindow>,
    ma_short: RollingWindow,
    ma_long: RollingWindow,
    rsi: Rsi,
    macd: Macd,
}

impl Default for WindowedFeatureStream {
    fn default() -> Self {
        Self::init()
    }
}

impl WindowedFeatureStream {
    pub fn init() -> Self {
        let max_lag = LAGS.iter().copied().max().unwrap_or(0);
        Self {
            lags: RollingWindow::new(max_lag + 1),
            windows: ROLLING_WINDOWS.iter().map(|&w| RollingWindow::new(w)).collect(),
            ma_short: RollingWindow::new(MA_SHORT),
            ma_long: RollingWindow::new(MA_LONG),
            rsi: Rsi::new(RSI_PERIOD),
            macd: Macd::standard(),
        }
    }

    /// Feeds one price and returns the features for that day, or `None`
    /// while any statistic is still undefined.
    pub fn push(&mut self, price: f64) -> Option<Features> {
        self.lags.insert(price);
        for w in &mut self.windows {
            w.insert(price);
        }
        self.ma_short.insert(price);
        self.ma_long.insert(price);
        // Indicators must see every price, so update them before bailing out.
        let rsi = self.rsi.update(price);
        let macd = self.macd.update(price);

        let current = self.lags.lagged(0)?;
        let prev = self.lags.lagged(1)?;
        let ret = current / prev - 1.0;

        let mut lags = [0.0; 6];
        for (slot, &lag) in lags.iter_mut().zip(LAGS.iter()) {
            *slot = self.lags.lagged(lag)?;
        }

        let mut roll_mean = [0.0; 5];
        let mut roll_std = [0.0; 5];
        let mut roll_min = [0.0; 5];
        let mut roll_max = [0.0; 5];
        for (i, w) in self.windows.iter().enumerate() {
            let s = w.stats()?;
            roll_mean[i] = s.mean;
            roll_std[i] = s.std;
            roll_min[i] = s.min;
            roll_max[i] = s.max;
        }

        let ma_short = self.ma_short.mean()?;
        let ma_long = self.ma_long.mean()?;
        let macd = macd?;

        let features = Features {
            ret,
            lags,
            roll_mean,
            roll_std,
            roll_min,
            roll_max,
            ma_short,
            ma_long,
            ma_diff: ma_short - ma_long,
            rsi_14: rsi?,
            macd: macd.macd,
            macd_signal: macd.signal,
        };

        features.is_finite().then_some(features)
    }
}

/// Builds the feature table for an ascending, duplicate-free bar series.
///
/// Only rows where every statistic has a full window survive; a series too
/// short for the warmup produces an empty table rather than an error.
pub fn build_features(bars: &[PriceBar], field: PriceField) -> Result<FeatureTable, FeatureError> {
    validate_series(bars)?;

    let mut stream = WindowedFeatureStream::init();
    let mut rows = Vec::with_capacity(bars.len());

    for (i, bar) in bars.iter().enumerate() {
        let price = bar.price(field);
        let Some(features) = stream.push(price) else {
            continue;
        };
        let label = bars
            .get(i + 1)
            .map(|next| Label {
                date: next.date,
                price: next.price(field),
            })
            .filter(|l| l.price.is_finite());

        rows.push(FeatureRow {
            date: bar.date,
            price,
            features,
            label,
        });
    }

    debug!(
        "Built {} feature rows from {} bars ({} dropped)",
        rows.len(),
        bars.len(),
        bars.len() - rows.len()
    );

    Ok(FeatureTable { field, rows })
}

pub fn validate_series(bars: &[PriceBar]) -> Result<(), FeatureError> {
    if bars.is_empty() {
        return Err(FeatureError::EmptySeries);
    }
    for (i, pair) in bars.windows(2).enumerate() {
        if pair[1].date == pair[0].date {
            return Err(FeatureError::DuplicateDate(pair[1].date));
        }
        if pair[1].date < pair[0].date {
            return Err(FeatureError::Unordered {
                index: i + 1,
                date: pair[1].date,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::ema_series;
    use crate::table::{NUM_FEATURES, WARMUP};
    use chrono::{Duration, NaiveDate};

    fn series(closes: &[f64]) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar::new(start + Duration::days(i as i64), 100.0, 100.0, 100.0, c, 0))
            .collect()
    }

    fn linear(n: usize) -> Vec<PriceBar> {
        series(&(0..n).map(|i| 100.0 + i as f64).collect::<Vec<_>>())
    }

    #[test]
    fn test_linear_sixty_days() {
        let bars = linear(60);
        let table = build_features(&bars, PriceField::Close).unwrap();

        assert_eq!(table.len(), 40);
        assert_eq!(table.labeled_len(), 39);
        assert_eq!(table.rows[0].date, bars[WARMUP].date);
        assert!(table.rows.last().unwrap().label.is_none());

        for row in &table.rows {
            let v = row.features.to_vec();
            assert_eq!(v.len(), NUM_FEATURES);
            assert!(v.iter().all(|x| x.is_finite()));
            assert!(row.features.rsi_14 > 99.999);
            assert_eq!(row.features.roll_std[0], 1.0);
            assert_eq!(row.features.ma_diff, 7.0);
        }

        let first = &table.rows[0];
        assert_eq!(first.price, 120.0);
        assert_eq!(first.features.lags, [119.0, 118.0, 117.0, 115.0, 113.0, 106.0]);
        assert_eq!(first.features.roll_min[4], 100.0);
        assert_eq!(first.features.roll_max[4], 120.0);
        assert_eq!(first.label.unwrap().price, 121.0);
        assert!((first.features.ret - (120.0 / 119.0 - 1.0)).abs() < 1e-15);
    }

    #[test]
    fn test_row_count_bound_and_no_undefined() {
        for n in [1usize, 5, 20, 21, 22, 35, 100] {
            let closes: Vec<f64> = (0..n).map(|i| 50.0 + (i as f64 * 0.4).sin()).collect();
            let table = build_features(&series(&closes), PriceField::Close).unwrap();
            assert_eq!(table.len(), n.saturating_sub(WARMUP));
            assert!(table.rows.iter().all(|r| r.features.is_finite()));
        }
    }

    #[test]
    fn test_macd_column_matches_emas() {
        let closes: Vec<f64> = (0..70).map(|i| 30.0 + (i as f64 * 0.25).cos() * 4.0).collect();
        let table = build_features(&series(&closes), PriceField::Close).unwrap();
        let e12 = ema_series(&closes, 12);
        let e26 = ema_series(&closes, 26);
        for (k, row) in table.rows.iter().enumerate() {
            let t = WARMUP + k;
            assert_eq!(row.features.macd, e12[t].unwrap() - e26[t].unwrap());
        }
    }

    #[test]
    fn test_gap_in_prices_drops_whole_rows() {
        let mut closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        closes[40] = f64::NAN;
        let table = build_features(&series(&closes), PriceField::Close).unwrap();
        // Row 39 loses its label; rows 40..=60 have the gap inside a window.
        assert!(table.rows.iter().all(|r| r.features.is_finite()));
        assert!(table.rows.iter().all(|r| r.date != series(&closes)[40].date));
        let row39 = table.rows.iter().find(|r| r.date == series(&closes)[39].date).unwrap();
        assert!(row39.label.is_none());
        assert!(table.len() < 60);
    }

    #[test]
    fn test_price_field_selector() {
        let mut bars = linear(30);
        for b in &mut bars {
            b.open = b.close * 2.0;
        }
        let table = build_features(&bars, PriceField::Open).unwrap();
        assert_eq!(table.rows[0].price, bars[WARMUP].open);
        assert_eq!(table.rows[0].label.unwrap().price, bars[WARMUP + 1].open);
    }

    #[test]
    fn test_invalid_series() {
        assert!(matches!(
            build_features(&[], PriceField::Close),
            Err(FeatureError::EmptySeries)
        ));

        let mut bars = linear(5);
        bars.swap(1, 2);
        assert!(matches!(
            build_features(&bars, PriceField::Close),
            Err(FeatureError::Unordered { index: 2, .. })
        ));

        let mut bars = linear(5);
        bars[3].date = bars[2].date;
        assert!(matches!(
            build_features(&bars, PriceField::Close),
            Err(FeatureError::DuplicateDate(_))
        ));
    }

    #[test]
    fn test_write_csv() {
        let table = build_features(&linear(25), PriceField::Close).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");
        table.write_csv(&path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), NUM_FEATURES + 3);
        assert_eq!(&headers[1], "close");
        assert_eq!(&headers[NUM_FEATURES + 1], "macd_signal");
        assert_eq!(reader.records().count(), 5);
    }
}
