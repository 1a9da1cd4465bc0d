//! Second-order gradient boosting trainer
//!
//! XGBoost-style boosting: gradient and hessian of the loss, regularized
//! leaf weights w* = -G / (H + lambda) with L1 shrinkage, and gain-scored
//! splits. Regression uses squared error (hessian 1); classification uses
//! binary logistic loss.
//!
//! The `device` hyperparameter is a platform policy surface: the
//! constructor's `use_gpu` flag is set by the orchestration layer only, and
//! when it is false any user-supplied CUDA device is silently normalized
//! back to CPU. This is enforcement, not user feedback.

use crate::error::{FlowError, Result};
use crate::training::params::{HyperParams, HyperValue};
use crate::training::persist::TrainerDocument;
use crate::training::{
    check_predict_features, check_supervised_inputs, distinct_classes, unsupported_task,
    ModelFamily, ModelOutput, TaskKind, Trainer, TrainerMeta,
};
use crate::validation;
use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum XgbNode {
    Leaf {
        weight: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<XgbNode>,
        right: Box<XgbNode>,
    },
}

impl XgbNode {
    fn predict(&self, row: &[f64]) -> f64 {
        match self {
            XgbNode::Leaf { weight } => *weight,
            XgbNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] <= *threshold {
                    left.predict(row)
                } else {
                    right.predict(row)
                }
            }
        }
    }
}

struct GrowContext<'a> {
    x: &'a Array2<f64>,
    grad: &'a Array1<f64>,
    hess: &'a Array1<f64>,
    max_depth: usize,
    min_child_weight: f64,
    reg_lambda: f64,
    reg_alpha: f64,
    gamma: f64,
    importances: &'a mut Vec<f64>,
}

/// L1-shrunk, L2-regularized optimal leaf weight
fn leaf_weight(g_sum: f64, h_sum: f64, lambda: f64, alpha: f64) -> f64 {
    let shrunk = if g_sum > alpha {
        g_sum - alpha
    } else if g_sum < -alpha {
        g_sum + alpha
    } else {
        0.0
    };
    -shrunk / (h_sum + lambda)
}

fn gain_term(g: f64, h: f64, lambda: f64) -> f64 {
    g * g / (h + lambda)
}

fn grow(ctx: &mut GrowContext<'_>, indices: &[usize], features: &[usize], depth: usize) -> XgbNode {
    let g_sum: f64 = indices.iter().map(|&i| ctx.grad[i]).sum();
    let h_sum: f64 = indices.iter().map(|&i| ctx.hess[i]).sum();
    let weight = leaf_weight(g_sum, h_sum, ctx.reg_lambda, ctx.reg_alpha);

    if depth >= ctx.max_depth || indices.len() < 2 || h_sum < ctx.min_child_weight {
        return XgbNode::Leaf { weight };
    }

    // Best split by regularized gain
    let mut best: Option<(usize, f64, f64)> = None;
    for &feature in features {
        let mut sorted: Vec<usize> = indices.to_vec();
        sorted.sort_by(|&a, &b| {
            ctx.x[[a, feature]]
                .partial_cmp(&ctx.x[[b, feature]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut gl = 0.0;
        let mut hl = 0.0;
        for pos in 0..sorted.len() - 1 {
            let i = sorted[pos];
            gl += ctx.grad[i];
            hl += ctx.hess[i];

            let v = ctx.x[[i, feature]];
            let v_next = ctx.x[[sorted[pos + 1], feature]];
            if (v_next - v).abs() < 1e-12 {
                continue;
            }

            let gr = g_sum - gl;
            let hr = h_sum - hl;
            if hl < ctx.min_child_weight || hr < ctx.min_child_weight {
                continue;
            }

            let gain = 0.5
                * (gain_term(gl, hl, ctx.reg_lambda) + gain_term(gr, hr, ctx.reg_lambda)
                    - gain_term(g_sum, h_sum, ctx.reg_lambda))
                - ctx.gamma;
            if gain > 0.0 && best.as_ref().map_or(true, |b| gain > b.2) {
                best = Some((feature, (v + v_next) / 2.0, gain));
            }
        }
    }

    match best {
        Some((feature, threshold, gain)) => {
            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .partition(|&&i| ctx.x[[i, feature]] <= threshold);
            if left_idx.is_empty() || right_idx.is_empty() {
                return XgbNode::Leaf { weight };
            }
            ctx.importances[feature] += gain;
            let left = grow(ctx, &left_idx, features, depth + 1);
            let right = grow(ctx, &right_idx, features, depth + 1);
            XgbNode::Split {
                feature,
                threshold,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        None => XgbNode::Leaf { weight },
    }
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct XgbCore {
    base_score: f64,
    trees: Vec<XgbNode>,
    /// Sorted class labels (binary), empty for regression
    classes: Vec<f64>,
    learning_rate: f64,
    n_features: usize,
    importances: Vec<f64>,
}

impl XgbCore {
    fn raw_scores(&self, x: &Array2<f64>) -> Array1<f64> {
        Array1::from_iter((0..x.nrows()).map(|i| {
            let row: Vec<f64> = x.row(i).iter().copied().collect();
            self.base_score
                + self
                    .trees
                    .iter()
                    .map(|t| self.learning_rate * t.predict(&row))
                    .sum::<f64>()
        }))
    }
}

/// Second-order boosting trainer with platform-gated device selection.
#[derive(Debug, Serialize, Deserialize)]
pub struct XgboostTrainer {
    task: TaskKind,
    params: HyperParams,
    meta: TrainerMeta,
    core: Option<XgbCore>,
    /// Platform GPU entitlement; never derived from hyperparameters.
    /// Not persisted — reloaded models default to the safe value.
    #[serde(skip)]
    use_gpu: bool,
}

impl XgboostTrainer {
    pub const NAME: &'static str = "xgboost";

    pub fn defaults() -> HyperParams {
        let mut p = HyperParams::new();
        p.set("n_estimators", 100i64);
        p.set("learning_rate", 0.3f64);
        p.set("max_depth", 6i64);
        p.set("min_child_weight", 1.0f64);
        p.set("reg_lambda", 1.0f64);
        p.set("reg_alpha", 0.0f64);
        p.set("gamma", 0.0f64);
        p.set("subsample", 1.0f64);
        p.set("colsample_bytree", 1.0f64);
        p.set("device", "cpu");
        p.set("random_state", 42i64);
        p
    }

    /// `use_gpu` is platform policy, set by the orchestration layer.
    pub fn new(task: TaskKind, overrides: HyperParams, use_gpu: bool) -> Result<Self> {
        let mut params = Self::defaults().merged(&overrides);
        Self::apply_device_gate(&mut params, use_gpu);
        Self::validate(&params)?;
        Ok(Self {
            task,
            params,
            meta: TrainerMeta::new(),
            core: None,
            use_gpu,
        })
    }

    /// Normalize the device hyperparameter to lowercase and force CPU when
    /// the platform has not granted GPU access.
    fn apply_device_gate(params: &mut HyperParams, use_gpu: bool) {
        let device = params
            .get("device")
            .and_then(|v| v.as_str())
            .unwrap_or("cpu")
            .to_lowercase();
        let device = if !use_gpu && device.contains("cuda") {
            "cpu".to_string()
        } else {
            device
        };
        params.set("device", HyperValue::Str(device));
    }

    fn validate(params: &HyperParams) -> Result<()> {
        if let Some(v) = params.get("n_estimators") {
            validation::require_positive_int("n_estimators", v)?;
        }
        if let Some(v) = params.get("learning_rate") {
            validation::require_positive_float("learning_rate", v)?;
        }
        if let Some(v) = params.get("max_depth") {
            validation::require_positive_int("max_depth", v)?;
        }
        if let Some(v) = params.get("min_child_weight") {
            validation::require_non_negative_float("min_child_weight", v)?;
        }
        if let Some(v) = params.get("reg_lambda") {
            validation::require_non_negative_float("reg_lambda", v)?;
        }
        if let Some(v) = params.get("reg_alpha") {
            validation::require_non_negative_float("reg_alpha", v)?;
        }
        if let Some(v) = params.get("gamma") {
            validation::require_non_negative_float("gamma", v)?;
        }
        if let Some(v) = params.get("subsample") {
            validation::require_positive_float("subsample", v)?;
            validation::require_unit_interval("subsample", v)?;
        }
        if let Some(v) = params.get("colsample_bytree") {
            validation::require_positive_float("colsample_bytree", v)?;
            validation::require_unit_interval("colsample_bytree", v)?;
        }
        if let Some(v) = params.get("device") {
            validation::require_one_of("device", v, &["cpu", "cuda"])?;
        }
        if let Some(v) = params.get("random_state") {
            validation::require_positive_int_or_null("random_state", v)?;
        }
        Ok(())
    }

    fn param_f64(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    fn param_usize(&self, key: &str, default: usize) -> usize {
        self.params
            .get(key)
            .and_then(|v| v.as_usize())
            .unwrap_or(default)
    }

    pub(crate) fn from_artifacts(
        document: TrainerDocument,
        model_state: serde_json::Value,
    ) -> Result<Self> {
        Self::validate(&document.hyperparameters)?;
        Ok(Self {
            task: document.task,
            params: document.hyperparameters,
            meta: document.metadata,
            core: Some(serde_json::from_value(model_state)?),
            use_gpu: false,
        })
    }

    fn fitted_core(&self) -> Result<&XgbCore> {
        self.core.as_ref().ok_or(FlowError::NotFitted)
    }
}

impl Trainer for XgboostTrainer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn task(&self) -> TaskKind {
        self.task
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::Tree
    }

    fn hyperparameters(&self) -> &HyperParams {
        &self.params
    }

    fn update_hyperparameters(&mut self, updates: HyperParams) -> Result<()> {
        let mut merged = self.params.merged(&updates);
        // Re-apply the gate so updates cannot smuggle a device past policy
        Self::apply_device_gate(&mut merged, self.use_gpu);
        Self::validate(&merged)?;
        self.params = merged;
        Ok(())
    }

    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()> {
        let classes = match self.task {
            TaskKind::Classification => {
                let y = check_supervised_inputs(self.task, x, y)?;
                let classes = distinct_classes(y);
                if classes.len() != 2 {
                    return Err(FlowError::TrainingError(format!(
                        "xgboost classification supports exactly 2 classes, got {}",
                        classes.len()
                    )));
                }
                classes
            }
            TaskKind::Regression => {
                check_supervised_inputs(self.task, x, y)?;
                Vec::new()
            }
            other => return Err(unsupported_task(Self::NAME, other)),
        };
        let y = y.expect("supervised guard validated y");

        let n = x.nrows();
        let d = x.ncols();
        let n_estimators = self.param_usize("n_estimators", 100);
        let learning_rate = self.param_f64("learning_rate", 0.3);
        let max_depth = self.param_usize("max_depth", 6);
        let min_child_weight = self.param_f64("min_child_weight", 1.0);
        let reg_lambda = self.param_f64("reg_lambda", 1.0);
        let reg_alpha = self.param_f64("reg_alpha", 0.0);
        let gamma = self.param_f64("gamma", 0.0);
        let subsample = self.param_f64("subsample", 1.0);
        let colsample = self.param_f64("colsample_bytree", 1.0);
        let seed = self.param_usize("random_state", 42) as u64;

        let is_classification = self.task == TaskKind::Classification;
        // Binary targets in {0, 1} following sorted class order
        let y01: Array1<f64> = if is_classification {
            y.mapv(|v| if (v - classes[1]).abs() < 1e-12 { 1.0 } else { 0.0 })
        } else {
            y.clone()
        };

        let base_score = if is_classification {
            0.0
        } else {
            y.sum() / n as f64
        };

        let mut scores = Array1::from_elem(n, base_score);
        let mut trees: Vec<XgbNode> = Vec::with_capacity(n_estimators);
        let mut importances = vec![0.0; d];

        for t in 0..n_estimators {
            let (grad, hess): (Array1<f64>, Array1<f64>) = if is_classification {
                let p = scores.mapv(sigmoid);
                (&p - &y01, p.mapv(|pi| (pi * (1.0 - pi)).max(1e-16)))
            } else {
                (&scores - &y01, Array1::ones(n))
            };

            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(t as u64));
            let indices: Vec<usize> = if subsample < 1.0 {
                let mut all: Vec<usize> = (0..n).collect();
                all.shuffle(&mut rng);
                let take = ((n as f64) * subsample).ceil().max(1.0) as usize;
                all.truncate(take);
                all
            } else {
                (0..n).collect()
            };
            let features: Vec<usize> = if colsample < 1.0 {
                let mut all: Vec<usize> = (0..d).collect();
                all.shuffle(&mut rng);
                let take = ((d as f64) * colsample).ceil().max(1.0) as usize;
                all.truncate(take);
                all.sort_unstable();
                all
            } else {
                (0..d).collect()
            };

            let mut ctx = GrowContext {
                x,
                grad: &grad,
                hess: &hess,
                max_depth,
                min_child_weight,
                reg_lambda,
                reg_alpha,
                gamma,
                importances: &mut importances,
            };
            let tree = grow(&mut ctx, &indices, &features, 0);

            for i in 0..n {
                let row: Vec<f64> = x.row(i).iter().copied().collect();
                scores[i] += learning_rate * tree.predict(&row);
            }
            trees.push(tree);
        }

        self.core = Some(XgbCore {
            base_score,
            trees,
            classes,
            learning_rate,
            n_features: d,
            importances,
        });
        self.meta.stamp_fit(n, d);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<ModelOutput> {
        let core = self.fitted_core()?;
        check_predict_features(core.n_features, x.ncols())?;

        let scores = core.raw_scores(x);
        let preds = if self.task == TaskKind::Classification {
            scores.mapv(|s| {
                if sigmoid(s) >= 0.5 {
                    core.classes[1]
                } else {
                    core.classes[0]
                }
            })
        } else {
            scores
        };
        Ok(ModelOutput::Labels(preds))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.task != TaskKind::Classification {
            return Err(FlowError::NotSupported(
                "predict_proba is only available for classification tasks".to_string(),
            ));
        }
        let core = self.fitted_core()?;
        check_predict_features(core.n_features, x.ncols())?;

        let scores = core.raw_scores(x);
        let mut out = Array2::zeros((x.nrows(), 2));
        for (i, &s) in scores.iter().enumerate() {
            let p = sigmoid(s);
            out[[i, 0]] = 1.0 - p;
            out[[i, 1]] = p;
        }
        Ok(out)
    }

    fn feature_importance(&self) -> Result<Array1<f64>> {
        let core = self.fitted_core()?;
        Ok(Array1::from_vec(core.importances.clone()))
    }

    fn metadata(&self) -> &TrainerMeta {
        &self.meta
    }

    fn document(&self) -> TrainerDocument {
        TrainerDocument {
            name: Self::NAME.to_string(),
            task: self.task,
            hyperparameters: self.params.clone(),
            metadata: self.meta.clone(),
        }
    }

    fn model_state(&self) -> Result<serde_json::Value> {
        let core = self.fitted_core()?;
        Ok(serde_json::to_value(core)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn fast_params() -> HyperParams {
        let mut p = HyperParams::new();
        p.set("n_estimators", 20i64);
        p.set("max_depth", 3i64);
        p
    }

    #[test]
    fn test_device_gate_forces_cpu() {
        let mut overrides = HyperParams::new();
        overrides.set("device", "CUDA");
        let trainer = XgboostTrainer::new(TaskKind::Classification, overrides, false).unwrap();
        assert_eq!(
            trainer.hyperparameters().get("device").and_then(|v| v.as_str()),
            Some("cpu")
        );
    }

    #[test]
    fn test_device_gate_mixed_case() {
        for spelling in ["cuda", "Cuda", "CUDA", "cuda:0"] {
            let mut overrides = HyperParams::new();
            overrides.set("device", spelling);
            let trainer = XgboostTrainer::new(TaskKind::Regression, overrides, false).unwrap();
            assert_eq!(
                trainer.hyperparameters().get("device").and_then(|v| v.as_str()),
                Some("cpu"),
                "device {} should be gated to cpu",
                spelling
            );
        }
    }

    #[test]
    fn test_device_allowed_with_entitlement() {
        let mut overrides = HyperParams::new();
        overrides.set("device", "cuda");
        let trainer = XgboostTrainer::new(TaskKind::Regression, overrides, true).unwrap();
        assert_eq!(
            trainer.hyperparameters().get("device").and_then(|v| v.as_str()),
            Some("cuda")
        );
    }

    #[test]
    fn test_update_cannot_bypass_gate() {
        let mut trainer =
            XgboostTrainer::new(TaskKind::Regression, HyperParams::new(), false).unwrap();
        let mut updates = HyperParams::new();
        updates.set("device", "cuda");
        trainer.update_hyperparameters(updates).unwrap();
        assert_eq!(
            trainer.hyperparameters().get("device").and_then(|v| v.as_str()),
            Some("cpu")
        );
    }

    #[test]
    fn test_binary_classification() {
        let x = array![
            [0.0, 0.0],
            [0.2, 0.1],
            [0.1, 0.2],
            [0.3, 0.1],
            [5.0, 5.0],
            [5.2, 5.1],
            [5.1, 5.2],
            [5.3, 5.1]
        ];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let mut trainer = XgboostTrainer::new(TaskKind::Classification, fast_params(), false).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let preds = trainer.predict(&x).unwrap().into_labels().unwrap();
        assert_eq!(preds, y);

        let proba = trainer.predict_proba(&x).unwrap();
        for row in proba.rows() {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    #[test]
    fn test_regression() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0], [8.0]];
        let y = array![3.0, 5.0, 7.0, 9.0, 11.0, 13.0, 15.0, 17.0];
        let mut trainer = XgboostTrainer::new(TaskKind::Regression, fast_params(), false).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let preds = trainer.predict(&x).unwrap().into_labels().unwrap();
        for (p, t) in preds.iter().zip(y.iter()) {
            assert!((p - t).abs() < 2.0, "prediction {} far from {}", p, t);
        }
    }

    #[test]
    fn test_multiclass_rejected_at_fit() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = array![0.0, 1.0, 2.0];
        let mut trainer = XgboostTrainer::new(TaskKind::Classification, fast_params(), false).unwrap();
        let err = trainer.fit(&x, Some(&y)).unwrap_err();
        assert!(err.to_string().contains("2 classes"));
    }
}
