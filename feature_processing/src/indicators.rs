//! Streaming technical indicators. Each indicator consumes one price per
//! trading day and reports `None` until it has enough history.

use crate::window::RollingWindow;

/// Added to the average loss so an all-gain window does not divide by zero.
/// RSI therefore saturates just below 100 instead of being undefined.
pub const RSI_EPSILON: f64 = 1e-8;

/// Exponential moving average with `alpha = 2 / (span + 1)`, seeded with the
/// first observation and no bias adjustment.
///
/// A non-finite input repeats the last value, but the old average keeps
/// decaying across the gap: after `k` missing steps the next observation is
/// weighted `alpha` against `(1 - alpha)^(k + 1)`.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
    gap: i32,
}

impl Ema {
    pub fn new(span: usize) -> Self {
        Self {
            alpha: 2.0 / (span as f64 + 1.0),
            value: None,
            gap: 0,
        }
    }

    pub fn update(&mut self, x: f64) -> Option<f64> {
        if !x.is_finite() {
            if self.value.is_some() {
                self.gap += 1;
            }
            return self.value;
        }
        self.value = Some(match self.value {
            None => x,
            Some(prev) => {
                let old = (1.0 - self.alpha).powi(self.gap + 1);
                (old * prev + self.alpha * x) / (old + self.alpha)
            }
        });
        self.gap = 0;
        self.value
    }
}

/// Relative Strength Index over simple rolling means of gains and losses.
#[derive(Debug, Clone)]
pub struct Rsi {
    prev: Option<f64>,
    gains: RollingWindow,
    losses: RollingWindow,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            prev: None,
            gains: RollingWindow::new(period),
            losses: RollingWindow::new(period),
        }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        let delta = match self.prev {
            Some(prev) => price - prev,
            None => f64::NAN,
        };
        self.prev = Some(price);

        self.gains.insert(if delta.is_nan() { f64::NAN } else { delta.max(0.0) });
        self.losses.insert(if delta.is_nan() { f64::NAN } else { (-delta).max(0.0) });

        let up = self.gains.mean()?;
        let down = self.losses.mean()?;
        let rs = up / (down + RSI_EPSILON);
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
}

/// MACD line (fast EMA minus slow EMA) and its EMA-smoothed signal line.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
        }
    }

    pub fn standard() -> Self {
        Self::new(12, 26, 9)
    }

    pub fn update(&mut self, price: f64) -> Option<MacdValue> {
        let fast = self.fast.update(price)?;
        let slow = self.slow.update(price)?;
        let macd = fast - slow;
        let signal = self.signal.update(macd)?;
        Some(MacdValue { macd, signal })
    }
}

/// Batch helpers over a whole series, aligned index-for-index with the input.
pub fn ema_series(values: &[f64], span: usize) -> Vec<Option<f64>> {
    let mut ema = Ema::new(span);
    values.iter().map(|&v| ema.update(v)).collect()
}

pub fn rsi_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut rsi = Rsi::new(period);
    values.iter().map(|&v| rsi.update(v)).collect()
}

pub fn macd_series(values: &[f64]) -> Vec<Option<MacdValue>> {
    let mut macd = Macd::standard();
    values.iter().map(|&v| macd.update(v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_matches_closed_form_on_step() {
        // Seeded at 0 then a constant 1: ema_t = 1 - (1 - a)^t.
        let mut values = vec![0.0];
        values.extend(std::iter::repeat(1.0).take(30));
        let span = 12;
        let a = 2.0 / (span as f64 + 1.0);
        let ema = ema_series(&values, span);
        for (t, v) in ema.iter().enumerate() {
            let expected = 1.0 - (1.0 - a).powi(t as i32);
            assert!((v.unwrap() - expected).abs() < 1e-12, "t={t}");
        }
    }

    #[test]
    fn test_ema_decays_across_missing_values() {
        let span = 9;
        let a = 2.0 / (span as f64 + 1.0);
        let ema = ema_series(&[f64::NAN, 4.0, f64::NAN, f64::NAN, 10.0, 12.0], span);

        assert_eq!(ema[0], None);
        assert_eq!(ema[1], Some(4.0));
        assert_eq!(ema[2], Some(4.0));
        assert_eq!(ema[3], Some(4.0));

        let old = (1.0 - a).powi(3);
        let after_gap = (old * 4.0 + a * 10.0) / (old + a);
        assert!((ema[4].unwrap() - after_gap).abs() < 1e-12);
        let next = (1.0 - a) * after_gap + a * 12.0;
        assert!((ema[5].unwrap() - next).abs() < 1e-12);
    }

    #[test]
    fn test_macd_is_difference_of_emas() {
        let values: Vec<f64> = (0..80).map(|i| 50.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let e12 = ema_series(&values, 12);
        let e26 = ema_series(&values, 26);
        let macd = macd_series(&values);
        let mut signal = Ema::new(9);
        for t in 0..values.len() {
            let m = macd[t].unwrap();
            assert_eq!(m.macd, e12[t].unwrap() - e26[t].unwrap());
            assert_eq!(Some(m.signal), signal.update(m.macd));
        }
        assert_eq!(macd[0].unwrap().macd, 0.0);
    }

    #[test]
    fn test_rsi_needs_period_deltas() {
        let values: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let rsi = rsi_series(&values, 14);
        assert!(rsi[..14].iter().all(Option::is_none));
        assert!(rsi[14..].iter().all(Option::is_some));
    }

    #[test]
    fn test_rsi_saturates_for_pure_gains() {
        let values: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        for v in rsi_series(&values, 14).into_iter().flatten() {
            assert!(v > 99.999 && v < 100.0, "rsi={v}");
        }
    }

    #[test]
    fn test_rsi_zero_for_pure_losses_and_flat() {
        let falling: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        for v in rsi_series(&falling, 14).into_iter().flatten() {
            assert_eq!(v, 0.0);
        }
        let flat = vec![42.0; 30];
        for v in rsi_series(&flat, 14).into_iter().flatten() {
            assert_eq!(v, 0.0);
        }
    }

    #[test]
    fn test_rsi_bounded_on_noisy_series() {
        let values: Vec<f64> = (0..200)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 3.0 + (i as f64 * 0.13).cos())
            .collect();
        for v in rsi_series(&values, 14).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
    }
}
