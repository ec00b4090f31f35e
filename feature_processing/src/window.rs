use std::collections::VecDeque;

/// Fixed-capacity sliding window over a price series.
///
/// Statistics are only reported once the window is full, and a window that
/// holds a non-finite value reports nothing until that value slides out.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    data: VecDeque<f64>,
    size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    /// Sample standard deviation (n - 1 denominator).
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl RollingWindow {
    pub fn new(size: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(size),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn insert(&mut self, value: f64) {
        if self.data.len() == self.size {
            self.data.pop_front();
        }
        self.data.push_back(value);
    }

    pub fn is_full(&self) -> bool {
        self.size > 0 && self.data.len() == self.size
    }

    fn defined(&self) -> bool {
        self.is_full() && self.data.iter().all(|v| v.is_finite())
    }

    pub fn mean(&self) -> Option<f64> {
        self.defined()
            .then(|| self.data.iter().sum::<f64>() / self.size as f64)
    }

    pub fn stats(&self) -> Option<WindowStats> {
        let mean = self.mean()?;
        let std = if self.size > 1 {
            let ss: f64 = self.data.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (self.size - 1) as f64).sqrt()
        } else {
            f64::NAN
        };
        let min = self.data.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(WindowStats { mean, std, min, max })
    }

    /// Value `lag` steps before the newest one.
    pub fn lagged(&self, lag: usize) -> Option<f64> {
        let len = self.data.len();
        if lag >= len {
            return None;
        }
        self.data.get(len - 1 - lag).copied().filter(|v| v.is_finite())
    }
}
