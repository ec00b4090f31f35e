//! Second-order gradient boosted regression trees for squared error.
//!
//! Each round fits one tree to the gradients `pred - y` (hessian 1) with exact
//! greedy split search. A split is kept when
//! `0.5 * (GL²/(HL+λ) + GR²/(HR+λ) - G²/(H+λ)) - γ` is positive and both
//! children carry at least `min_child_weight` hessian. Leaves predict
//! `-eta * G / (H + λ)`.

use log::{debug, info};
use ndarray::{Array2, ArrayView1};
use rand::SeedableRng;
use rand::Rng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::TabularConfig;
use crate::error::ForecastError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterParams {
    pub eta: f64,
    pub max_depth: usize,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub lambda: f64,
    pub gamma: f64,
    pub min_child_weight: f64,
    pub seed: u64,
    pub max_rounds: usize,
    pub early_stopping_rounds: usize,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self::from(&TabularConfig::default())
    }
}

impl From<&TabularConfig> for BoosterParams {
    fn from(cfg: &TabularConfig) -> Self {
        Self {
            eta: cfg.eta,
            max_depth: cfg.max_depth,
            subsample: cfg.subsample,
            colsample_bytree: cfg.colsample_bytree,
            lambda: cfg.lambda,
            gamma: cfg.gamma,
            min_child_weight: cfg.min_child_weight,
            seed: cfg.seed,
            max_rounds: cfg.max_rounds,
            early_stopping_rounds: cfg.early_stopping_rounds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Nodes live in one arena; index 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if row[*feature] < *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(Node::Split { left, right, .. }) => 1 + walk(nodes, *left).max(walk(nodes, *right)),
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    params: &'a BoosterParams,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda)
    }

    fn leaf(&mut self, g: f64, h: f64) -> usize {
        let value = -self.params.eta * g / (h + self.params.lambda);
        self.nodes.push(Node::Leaf { value });
        self.nodes.len() - 1
    }

    fn build(&mut self, rows: &[usize], depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();

        if depth >= self.params.max_depth || rows.len() < 2 {
            return self.leaf(g, h);
        }
        let Some(best) = self.best_split(rows, g, h) else {
            return self.leaf(g, h);
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| self.x[[r, best.feature]] < best.threshold);

        // Reserve the slot so children land after their parent.
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value: 0.0 });
        let left = self.build(&left_rows, depth + 1);
        let right = self.build(&right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let parent = self.score(g, h);
        let mut best: Option<SplitCandidate> = None;
        let mut sorted = rows.to_vec();

        for &feature in self.features {
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut gl = 0.0;
            let mut hl = 0.0;
            for pair in sorted.windows(2) {
                let (cur, next) = (pair[0], pair[1]);
                gl += self.grad[cur];
                hl += self.hess[cur];

                let v = self.x[[cur, feature]];
                let v_next = self.x[[next, feature]];
                if v == v_next {
                    continue;
                }
                let (gr, hr) = (g - gl, h - hl);
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }

                let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent) - self.params.gamma;
                if gain > 0.0 && best.as_ref().is_none_or(|b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: 0.5 * (v + v_next),
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Additive tree ensemble on top of a constant base score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    base_score: f64,
    trees: Vec<RegressionTree>,
    n_features: usize,
    best_iteration: usize,
    best_score: Option<f64>,
}

impl GradientBoostedTrees {
    /// Boosts up to `max_rounds` trees. With a validation set, training stops
    /// once `early_stopping_rounds` rounds pass without a strictly lower
    /// validation RMSE and the ensemble is cut back to the best round.
    pub fn fit(
        x: &Array2<f64>,
        y: &[f64],
        valid: Option<(&Array2<f64>, &[f64])>,
        params: &BoosterParams,
    ) -> Result<Self, ForecastError> {
        let n = x.nrows();
        if n == 0 {
            return Err(ForecastError::InsufficientData { needed: 1, got: 0 });
        }
        if y.len() != n {
            return Err(ForecastError::LengthMismatch {
                actual: y.len(),
                predicted: n,
            });
        }
        if let Some((vx, vy)) = valid {
            if vx.ncols() != x.ncols() {
                return Err(ForecastError::ShapeMismatch {
                    expected: x.ncols(),
                    got: vx.ncols(),
                });
            }
            if vx.nrows() != vy.len() {
                return Err(ForecastError::LengthMismatch {
                    actual: vy.len(),
                    predicted: vx.nrows(),
                });
            }
        }

        let n_features = x.ncols();
        let base_score = y.iter().sum::<f64>() / n as f64;
        let mut model = Self {
            base_score,
            trees: Vec::new(),
            n_features,
            best_iteration: 0,
            best_score: None,
        };

        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let mut train_pred = vec![base_score; n];
        let mut valid_pred = valid.map(|(vx, _)| vec![base_score; vx.nrows()]);
        let hess = vec![1.0; n];
        let n_cols = if n_features == 0 {
            0
        } else {
            ((params.colsample_bytree * n_features as f64).floor() as usize).clamp(1, n_features)
        };
        let mut all_features: Vec<usize> = (0..n_features).collect();

        for round in 0..params.max_rounds {
            let grad: Vec<f64> = train_pred.iter().zip(y).map(|(p, t)| p - t).collect();

            let mut rows: Vec<usize> = if params.subsample < 1.0 {
                (0..n).filter(|_| rng.r#gen::<f64>() < params.subsample).collect()
            } else {
                (0..n).collect()
            };
            if rows.is_empty() {
                rows = (0..n).collect();
            }

            all_features.shuffle(&mut rng);
            let mut features = all_features[..n_cols].to_vec();
            features.sort_unstable();

            let mut builder = TreeBuilder {
                x,
                grad: &grad,
                hess: &hess,
                features: &features,
                params,
                nodes: Vec::new(),
            };
            builder.build(&rows, 0);
            let tree = RegressionTree {
                nodes: builder.nodes,
            };

            for (i, p) in train_pred.iter_mut().enumerate() {
                *p += tree.predict_row(x.row(i));
            }
            model.trees.push(tree);

            let (Some((vx, vy)), Some(vp)) = (valid, valid_pred.as_mut()) else {
                continue;
            };
            let last = &model.trees[round];
            for (i, p) in vp.iter_mut().enumerate() {
                *p += last.predict_row(vx.row(i));
            }
            let score = rmse(vy, vp);
            debug!("round {round}: validation rmse {score:.6}");

            if model.best_score.is_none_or(|best| score < best) {
                model.best_score = Some(score);
                model.best_iteration = round;
            } else if round - model.best_iteration >= params.early_stopping_rounds {
                info!(
                    "Early stopping at round {round}; best round {} (rmse {:.6})",
                    model.best_iteration,
                    model.best_score.unwrap_or(f64::NAN)
                );
                break;
            }
        }

        if valid.is_some() {
            model.trees.truncate(model.best_iteration + 1);
        } else {
            model.best_iteration = model.trees.len().saturating_sub(1);
        }
        Ok(model)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn best_iteration(&self) -> usize {
        self.best_iteration
    }

    /// Validation RMSE at the best round, when a validation set was given.
    pub fn best_score(&self) -> Option<f64> {
        self.best_score
    }

    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>, ForecastError> {
        if x.ncols() != self.n_features {
            return Err(ForecastError::ShapeMismatch {
                expected: self.n_features,
                got: x.ncols(),
            });
        }
        Ok(x.rows()
            .into_iter()
            .map(|row| self.base_score + self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>())
            .collect())
    }
}

fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().max(1) as f64;
    let ss: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    (ss / n).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn exact_params() -> BoosterParams {
        BoosterParams {
            eta: 0.3,
            subsample: 1.0,
            colsample_bytree: 1.0,
            max_rounds: 200,
            ..Default::default()
        }
    }

    #[test]
    fn test_fits_step_function() {
        let x = Array2::from_shape_fn((40, 1), |(i, _)| i as f64);
        let y: Vec<f64> = (0..40).map(|i| if i < 20 { 1.0 } else { 5.0 }).collect();
        let model = GradientBoostedTrees::fit(&x, &y, None, &exact_params()).unwrap();

        let pred = model.predict(&x).unwrap();
        for (p, t) in pred.iter().zip(&y) {
            assert!((p - t).abs() < 1e-3, "pred {p} target {t}");
        }
        assert_eq!(model.n_trees(), 200);
        assert_eq!(model.base_score(), 3.0);
    }

    #[test]
    fn test_constant_target_predicts_base_score() {
        let x = Array2::from_shape_fn((10, 2), |(i, j)| (i * (j + 1)) as f64);
        let y = vec![7.5; 10];
        let model = GradientBoostedTrees::fit(&x, &y, None, &exact_params()).unwrap();
        assert!(model.trees().iter().all(|t| t.n_leaves() == 1));
        assert!(model.predict(&x).unwrap().iter().all(|&p| p == 7.5));
    }

    #[test]
    fn test_depth_limit() {
        let x = Array2::from_shape_fn((64, 1), |(i, _)| i as f64);
        let y: Vec<f64> = (0..64).map(|i| ((i * 37) % 11) as f64).collect();
        let params = BoosterParams {
            max_depth: 2,
            max_rounds: 5,
            ..exact_params()
        };
        let model = GradientBoostedTrees::fit(&x, &y, None, &params).unwrap();
        assert!(model.trees().iter().all(|t| t.depth() <= 2 && t.n_leaves() <= 4));
    }

    #[test]
    fn test_early_stopping_truncates_to_best_round() {
        let x = Array2::from_shape_fn((60, 1), |(i, _)| i as f64);
        let y: Vec<f64> = (0..60).map(|i| i as f64).collect();
        // The validation target sits at the base score, so every round after
        // the first moves the low end further from it.
        let vx = Array2::from_elem((1, 1), 0.0);
        let vy = vec![29.5];

        let params = BoosterParams {
            early_stopping_rounds: 5,
            ..exact_params()
        };
        let model = GradientBoostedTrees::fit(&x, &y, Some((&vx, &vy)), &params).unwrap();
        assert_eq!(model.best_iteration(), 0);
        assert_eq!(model.n_trees(), 1);

        let pred = model.predict(&vx).unwrap();
        assert!((rmse(&vy, &pred) - model.best_score().unwrap()).abs() < 1e-9);
    }

    #[test]
    fn test_seeded_sampling_is_deterministic() {
        let x = Array2::from_shape_fn((50, 4), |(i, j)| ((i + 3 * j) % 13) as f64);
        let y: Vec<f64> = (0..50).map(|i| (i % 13) as f64 * 0.5).collect();
        let params = BoosterParams {
            max_rounds: 30,
            ..Default::default()
        };
        let a = GradientBoostedTrees::fit(&x, &y, None, &params).unwrap();
        let b = GradientBoostedTrees::fit(&x, &y, None, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_predict_shape_mismatch() {
        let x = Array2::from_shape_fn((5, 3), |(i, j)| (i + j) as f64);
        let model = GradientBoostedTrees::fit(&x, &[1.0, 2.0, 3.0, 4.0, 5.0], None, &exact_params()).unwrap();
        let err = model.predict(&Array2::zeros((1, 2))).unwrap_err();
        assert!(matches!(err, ForecastError::ShapeMismatch { expected: 3, got: 2 }));
    }
}
