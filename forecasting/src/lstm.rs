//! Single-layer LSTM regressor over univariate windows.
//!
//! Gates are packed in `i, f, g, o` order into one `4H` pre-activation:
//! `z = w_in * x_t + U h_{t-1} + b`. The final hidden state goes through
//! inverted dropout (training only) and one linear unit. Gradients come from
//! full backpropagation through time over the window.

use log::{debug, info};
use ndarray::{Array, Array1, Array2, Dimension, Zip, s};
use rand::Rng;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::SequenceConfig;
use crate::error::ForecastError;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmParams {
    pub units: usize,
    pub dropout: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_fraction: f64,
    pub patience: usize,
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for LstmParams {
    fn default() -> Self {
        Self::from(&SequenceConfig::default())
    }
}

impl From<&SequenceConfig> for LstmParams {
    fn from(cfg: &SequenceConfig) -> Self {
        Self {
            units: cfg.units,
            dropout: cfg.dropout,
            epochs: cfg.epochs,
            batch_size: cfg.batch_size,
            validation_fraction: cfg.validation_fraction,
            patience: cfg.patience,
            learning_rate: cfg.learning_rate,
            seed: cfg.seed,
        }
    }
}

/// Network parameters. Gradients and Adam moments share this layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmWeights {
    w_in: Array1<f64>,
    u: Array2<f64>,
    b: Array1<f64>,
    w_out: Array1<f64>,
    b_out: Array1<f64>,
}

impl LstmWeights {
    fn zeros(units: usize) -> Self {
        Self {
            w_in: Array1::zeros(4 * units),
            u: Array2::zeros((4 * units, units)),
            b: Array1::zeros(4 * units),
            w_out: Array1::zeros(units),
            b_out: Array1::zeros(1),
        }
    }

    /// Glorot-uniform kernels, zero biases except a forget-gate bias of one.
    fn glorot(units: usize, rng: &mut ChaCha8Rng) -> Self {
        let in_limit = glorot_limit(1, 4 * units);
        let rec_limit = glorot_limit(units, 4 * units);
        let out_limit = glorot_limit(units, 1);

        let mut b = Array1::<f64>::zeros(4 * units);
        b.slice_mut(s![units..2 * units]).fill(1.0);

        Self {
            w_in: Array1::from_shape_fn(4 * units, |_| rng.gen_range(-in_limit..in_limit)),
            u: Array2::from_shape_fn((4 * units, units), |_| rng.gen_range(-rec_limit..rec_limit)),
            b,
            w_out: Array1::from_shape_fn(units, |_| rng.gen_range(-out_limit..out_limit)),
            b_out: Array1::zeros(1),
        }
    }

    fn units(&self) -> usize {
        self.w_out.len()
    }
}

struct Step {
    x: f64,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    c: Array1<f64>,
}

fn glorot_limit(fan_in: usize, fan_out: usize) -> f64 {
    (6.0 / (fan_in + fan_out) as f64).sqrt()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

struct Adam {
    lr: f64,
    t: i32,
    m: LstmWeights,
    v: LstmWeights,
}

impl Adam {
    fn new(lr: f64, units: usize) -> Self {
        Self {
            lr,
            t: 0,
            m: LstmWeights::zeros(units),
            v: LstmWeights::zeros(units),
        }
    }

    fn step(&mut self, w: &mut LstmWeights, g: &LstmWeights) {
        self.t += 1;
        let lr_t = self.lr * (1.0 - ADAM_BETA2.powi(self.t)).sqrt() / (1.0 - ADAM_BETA1.powi(self.t));
        adam_step(&mut w.w_in, &g.w_in, &mut self.m.w_in, &mut self.v.w_in, lr_t);
        adam_step(&mut w.u, &g.u, &mut self.m.u, &mut self.v.u, lr_t);
        adam_step(&mut w.b, &g.b, &mut self.m.b, &mut self.v.b, lr_t);
        adam_step(&mut w.w_out, &g.w_out, &mut self.m.w_out, &mut self.v.w_out, lr_t);
        adam_step(&mut w.b_out, &g.b_out, &mut self.m.b_out, &mut self.v.b_out, lr_t);
    }
}

fn adam_step<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    lr_t: f64,
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
            *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
            *p -= lr_t * *m / (v.sqrt() + ADAM_EPSILON);
        });
}

/// Number of leading windows trained on; the rest is held out. Falls back to
/// training on everything when the fraction would leave nothing to train.
pub fn validation_split(n: usize, validation_fraction: f64) -> usize {
    match ((n as f64) * (1.0 - validation_fraction)) as usize {
        0 => n,
        k => k.min(n),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingHistory {
    pub train_loss: Vec<f64>,
    /// Empty when no windows were held out.
    pub val_loss: Vec<f64>,
    pub best_epoch: usize,
    pub best_loss: f64,
}

impl TrainingHistory {
    pub fn epochs_run(&self) -> usize {
        self.train_loss.len()
    }

    /// Epochs behind the restored weights; zero when nothing ran.
    pub fn epochs_kept(&self) -> usize {
        if self.train_loss.is_empty() {
            0
        } else {
            self.best_epoch + 1
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmRegressor {
    weights: LstmWeights,
}

impl LstmRegressor {
    pub fn new(units: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self {
            weights: LstmWeights::glorot(units, &mut rng),
        }
    }

    pub fn units(&self) -> usize {
        self.weights.units()
    }

    fn forward(&self, window: &[f64], mut trace: Option<&mut Vec<Step>>) -> Array1<f64> {
        let hsz = self.units();
        let w = &self.weights;
        let mut h = Array1::<f64>::zeros(hsz);
        let mut c = Array1::<f64>::zeros(hsz);

        for &x in window {
            let z = &w.w_in * x + w.u.dot(&h) + &w.b;
            let i = z.slice(s![..hsz]).mapv(sigmoid);
            let f = z.slice(s![hsz..2 * hsz]).mapv(sigmoid);
            let g = z.slice(s![2 * hsz..3 * hsz]).mapv(f64::tanh);
            let o = z.slice(s![3 * hsz..]).mapv(sigmoid);

            let c_next = &f * &c + &i * &g;
            let h_next = &o * &c_next.mapv(f64::tanh);

            if let Some(steps) = trace.as_deref_mut() {
                steps.push(Step {
                    x,
                    h_prev: h,
                    c_prev: c,
                    i,
                    f,
                    g,
                    o,
                    c: c_next.clone(),
                });
            }
            h = h_next;
            c = c_next;
        }
        h
    }

    fn output(&self, h: &Array1<f64>) -> f64 {
        self.weights.w_out.dot(h) + self.weights.b_out[0]
    }

    /// Accumulates `scale * d(err²)/dθ` for one window into `grads` and
    /// returns the squared error.
    fn backprop(
        &self,
        window: &[f64],
        target: f64,
        mask: Option<&Array1<f64>>,
        scale: f64,
        grads: &mut LstmWeights,
    ) -> f64 {
        let hsz = self.units();
        let w = &self.weights;
        let mut steps = Vec::with_capacity(window.len());
        let h_last = self.forward(window, Some(&mut steps));
        let h_out = match mask {
            Some(m) => &h_last * m,
            None => h_last,
        };

        let err = self.output(&h_out) - target;
        let dy = 2.0 * err * scale;
        grads.w_out.scaled_add(dy, &h_out);
        grads.b_out[0] += dy;

        let mut dh = &w.w_out * dy;
        if let Some(m) = mask {
            dh *= m;
        }
        let mut dc_next = Array1::<f64>::zeros(hsz);
        let mut dz = Array1::<f64>::zeros(4 * hsz);

        for step in steps.iter().rev() {
            let tanh_c = step.c.mapv(f64::tanh);
            let d_o = &dh * &tanh_c;
            let dc = &dc_next + &(&dh * &step.o * &tanh_c.mapv(|t| 1.0 - t * t));

            Zip::from(dz.slice_mut(s![..hsz]))
                .and(&dc)
                .and(&step.g)
                .and(&step.i)
                .for_each(|d, &dc, &g, &i| *d = dc * g * i * (1.0 - i));
            Zip::from(dz.slice_mut(s![hsz..2 * hsz]))
                .and(&dc)
                .and(&step.c_prev)
                .and(&step.f)
                .for_each(|d, &dc, &cp, &f| *d = dc * cp * f * (1.0 - f));
            Zip::from(dz.slice_mut(s![2 * hsz..3 * hsz]))
                .and(&dc)
                .and(&step.i)
                .and(&step.g)
                .for_each(|d, &dc, &i, &g| *d = dc * i * (1.0 - g * g));
            Zip::from(dz.slice_mut(s![3 * hsz..]))
                .and(&d_o)
                .and(&step.o)
                .for_each(|d, &d_o, &o| *d = d_o * o * (1.0 - o));

            grads.w_in.scaled_add(step.x, &dz);
            grads.b += &dz;
            Zip::from(grads.u.rows_mut())
                .and(&dz)
                .for_each(|mut row, &d| row.scaled_add(d, &step.h_prev));

            dh = w.u.t().dot(&dz);
            dc_next = &dc * &step.f;
        }
        err * err
    }

    pub fn predict_one(&self, window: &[f64]) -> f64 {
        self.output(&self.forward(window, None))
    }

    pub fn predict(&self, windows: &[Vec<f64>]) -> Vec<f64> {
        windows.iter().map(|w| self.predict_one(w)).collect()
    }

    pub fn mse(&self, windows: &[Vec<f64>], targets: &[f64]) -> f64 {
        let n = windows.len().max(1) as f64;
        windows
            .iter()
            .zip(targets)
            .map(|(w, t)| (self.predict_one(w) - t).powi(2))
            .sum::<f64>()
            / n
    }

    /// Trains with MSE loss and Adam. The last `validation_fraction` of the
    /// windows is held out and monitored; training stops after `patience`
    /// epochs without a lower loss and the best weights are restored.
    pub fn fit(
        windows: &[Vec<f64>],
        targets: &[f64],
        params: &LstmParams,
    ) -> Result<(Self, TrainingHistory), ForecastError> {
        let n = windows.len();
        if n == 0 {
            return Err(ForecastError::InsufficientData { needed: 1, got: 0 });
        }
        if targets.len() != n {
            return Err(ForecastError::LengthMismatch {
                actual: targets.len(),
                predicted: n,
            });
        }

        if params.epochs == 0 {
            return Err(ForecastError::InvalidConfig(
                "sequence.epochs must be positive".to_string(),
            ));
        }

        let n_train = validation_split(n, params.validation_fraction);
        let (train_x, val_x) = windows.split_at(n_train);
        let (train_y, val_y) = targets.split_at(n_train);

        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let mut model = Self {
            weights: LstmWeights::glorot(params.units, &mut rng),
        };
        let mut adam = Adam::new(params.learning_rate, params.units);
        let mut history = TrainingHistory {
            best_loss: f64::INFINITY,
            ..Default::default()
        };
        let mut best_weights = model.weights.clone();
        let mut order: Vec<usize> = (0..n_train).collect();
        let batch_size = params.batch_size.max(1);
        let keep = 1.0 - params.dropout;
        let mut wait = 0;

        info!(
            "Training LSTM({}) on {} windows, validating on {}",
            params.units,
            n_train,
            val_x.len()
        );

        for epoch in 0..params.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in order.chunks(batch_size) {
                let scale = 1.0 / batch.len() as f64;
                let mut grads = LstmWeights::zeros(params.units);
                for &idx in batch {
                    let mask = (params.dropout > 0.0).then(|| {
                        Array1::from_shape_fn(params.units, |_| {
                            if rng.r#gen::<f64>() < params.dropout { 0.0 } else { 1.0 / keep }
                        })
                    });
                    epoch_loss += model.backprop(&train_x[idx], train_y[idx], mask.as_ref(), scale, &mut grads);
                }
                adam.step(&mut model.weights, &grads);
            }

            let train_loss = epoch_loss / n_train as f64;
            history.train_loss.push(train_loss);
            let monitored = if val_x.is_empty() {
                train_loss
            } else {
                let val_loss = model.mse(val_x, val_y);
                history.val_loss.push(val_loss);
                val_loss
            };
            debug!("epoch {epoch}: loss {train_loss:.6}, monitored {monitored:.6}");

            if monitored < history.best_loss {
                history.best_loss = monitored;
                history.best_epoch = epoch;
                best_weights = model.weights.clone();
                wait = 0;
            } else {
                wait += 1;
                if wait >= params.patience {
                    info!(
                        "Early stopping at epoch {epoch}; restoring epoch {} (loss {:.6})",
                        history.best_epoch, history.best_loss
                    );
                    break;
                }
            }
        }

        model.weights = best_weights;
        Ok((model, history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_windows(n: usize, w: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let series: Vec<f64> = (0..n + w).map(|i| 0.5 + 0.4 * (i as f64 * 0.3).sin()).collect();
        let windows = (0..n).map(|i| series[i..i + w].to_vec()).collect();
        let targets = (0..n).map(|i| series[i + w]).collect();
        (windows, targets)
    }

    fn perturb(weights: &mut LstmWeights, which: usize, idx: usize, delta: f64) {
        match which {
            0 => weights.w_in[idx] += delta,
            1 => {
                let cols = weights.u.ncols();
                weights.u[[idx / cols, idx % cols]] += delta;
            }
            2 => weights.b[idx] += delta,
            3 => weights.w_out[idx] += delta,
            _ => weights.b_out[0] += delta,
        }
    }

    fn analytic(grads: &LstmWeights, which: usize, idx: usize) -> f64 {
        match which {
            0 => grads.w_in[idx],
            1 => {
                let cols = grads.u.ncols();
                grads.u[[idx / cols, idx % cols]]
            }
            2 => grads.b[idx],
            3 => grads.w_out[idx],
            _ => grads.b_out[0],
        }
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let units = 3;
        let model = LstmRegressor::new(units, 7);
        let (windows, targets) = sine_windows(2, 4);
        let mask = Array1::from(vec![2.0, 0.0, 1.25]);
        let scale = 0.5;

        let loss = |m: &LstmRegressor| {
            let mut scratch = LstmWeights::zeros(units);
            windows
                .iter()
                .zip(&targets)
                .map(|(w, &t)| m.backprop(w, t, Some(&mask), scale, &mut scratch))
                .sum::<f64>()
                * scale
        };

        let mut grads = LstmWeights::zeros(units);
        for (w, &t) in windows.iter().zip(&targets) {
            model.backprop(w, t, Some(&mask), scale, &mut grads);
        }

        let eps = 1e-6;
        let probes = [(0, 1), (0, 7), (1, 0), (1, 17), (1, 35), (2, 4), (2, 10), (3, 0), (3, 2), (4, 0)];
        for (which, idx) in probes {
            let mut plus = model.clone();
            perturb(&mut plus.weights, which, idx, eps);
            let mut minus = model.clone();
            perturb(&mut minus.weights, which, idx, -eps);
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            let exact = analytic(&grads, which, idx);
            assert!(
                (numeric - exact).abs() <= 1e-6 + 1e-4 * exact.abs(),
                "param {which}[{idx}]: numeric {numeric} vs analytic {exact}"
            );
        }
    }

    #[test]
    fn test_training_reduces_loss_and_restores_best() {
        let (windows, targets) = sine_windows(80, 6);
        let params = LstmParams {
            units: 8,
            dropout: 0.0,
            epochs: 120,
            batch_size: 16,
            learning_rate: 0.01,
            patience: 15,
            ..Default::default()
        };
        let untrained = LstmRegressor::new(8, params.seed);
        let before = untrained.mse(&windows, &targets);

        let (model, history) = LstmRegressor::fit(&windows, &targets, &params).unwrap();
        assert!(history.best_loss < before * 0.5, "{} vs {before}", history.best_loss);

        let n_train = validation_split(80, 0.1);
        assert_eq!(n_train, 72);
        let val_loss = model.mse(&windows[n_train..], &targets[n_train..]);
        assert!((val_loss - history.best_loss).abs() < 1e-12);
        assert_eq!(history.val_loss[history.best_epoch], history.best_loss);
    }

    #[test]
    fn test_seeded_training_is_deterministic() {
        let (windows, targets) = sine_windows(20, 4);
        let params = LstmParams {
            units: 4,
            epochs: 3,
            ..Default::default()
        };
        let (a, _) = LstmRegressor::fit(&windows, &targets, &params).unwrap();
        let (b, _) = LstmRegressor::fit(&windows, &targets, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_empty_input() {
        assert!(matches!(
            LstmRegressor::fit(&[], &[], &LstmParams::default()),
            Err(ForecastError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_zero_epochs_is_rejected() {
        let (windows, targets) = sine_windows(10, 3);
        let params = LstmParams {
            epochs: 0,
            ..Default::default()
        };
        assert!(matches!(
            LstmRegressor::fit(&windows, &targets, &params),
            Err(ForecastError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_history_counts_epochs() {
        let (windows, targets) = sine_windows(20, 4);
        let params = LstmParams {
            units: 4,
            epochs: 2,
            ..Default::default()
        };
        let (_, history) = LstmRegressor::fit(&windows, &targets, &params).unwrap();
        assert_eq!(history.epochs_run(), 2);
        assert!(history.epochs_kept() >= 1 && history.epochs_kept() <= 2);
        assert_eq!(TrainingHistory::default().epochs_kept(), 0);
    }
}
