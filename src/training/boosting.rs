//! Gradient boosting trainer
//!
//! Stagewise additive boosting over shallow regression trees: squared-error
//! residuals for regression, softmax gradients (one tree chain per class)
//! for classification.

use crate::error::{FlowError, Result};
use crate::training::params::HyperParams;
use crate::training::persist::TrainerDocument;
use crate::training::tree::{SplitCriterion, TreeCore, TreeSettings};
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
struct BoostCore {
    /// Initial score per chain (one chain for regression, one per class
    /// for classification)
    init_scores: Vec<f64>,
    /// stages[s][chain] — the tree added to `chain` at stage `s`
    stages: Vec<Vec<TreeCore>>,
    classes: Vec<f64>,
    learning_rate: f64,
    n_features: usize,
    /// Raw accumulated gains, unnormalized
    importances: Vec<f64>,
}

impl BoostCore {
    /// Raw additive scores, one column per chain
    fn raw_scores(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let chains = self.init_scores.len();
        let mut scores = Array2::from_shape_fn((n, chains), |(_, c)| self.init_scores[c]);
        for stage in &self.stages {
            for (c, tree) in stage.iter().enumerate() {
                for i in 0..n {
                    let row: Vec<f64> = x.row(i).iter().copied().collect();
                    scores[[i, c]] += self.learning_rate * tree.predict_row(&row);
                }
            }
        }
        scores
    }

    fn softmax_rows(scores: &Array2<f64>) -> Array2<f64> {
        let mut out = scores.clone();
        for mut row in out.rows_mut() {
            let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            row.mapv_inplace(|v| (v - max).exp());
            let sum: f64 = row.iter().sum();
            row.mapv_inplace(|v| v / sum);
        }
        out
    }
}

/// Gradient boosting trainer, classification or regression at fit time.
#[derive(Debug, Serialize, Deserialize)]
pub struct GradientBoostingTrainer {
    task: TaskKind,
    params: HyperParams,
    meta: TrainerMeta,
    core: Option<BoostCore>,
}

impl GradientBoostingTrainer {
    pub const NAME: &'static str = "gradient_boosting";

    pub fn defaults() -> HyperParams {
        let mut p = HyperParams::new();
        p.set("n_estimators", 100i64);
        p.set("learning_rate", 0.1f64);
        p.set("max_depth", 3i64);
        p.set("min_samples_leaf", 1i64);
        p.set("subsample", 1.0f64);
        p.set("random_state", 42i64);
        p
    }

    pub fn new(task: TaskKind, overrides: HyperParams) -> Result<Self> {
        let params = Self::defaults().merged(&overrides);
        Self::validate(&params)?;
        Ok(Self {
            task,
            params,
            meta: TrainerMeta::new(),
            core: None,
        })
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
        if let Some(v) = params.get("min_samples_leaf") {
            validation::require_positive_int("min_samples_leaf", v)?;
        }
        if let Some(v) = params.get("subsample") {
            validation::require_positive_float("subsample", v)?;
            validation::require_unit_interval("subsample", v)?;
        }
        if let Some(v) = params.get("random_state") {
            validation::require_positive_int_or_null("random_state", v)?;
        }
        Ok(())
    }

    fn settings(&self) -> TreeSettings {
        TreeSettings {
            criterion: SplitCriterion::SquaredError,
            max_depth: self.params.get("max_depth").and_then(|v| v.as_usize()),
            min_samples_split: 2,
            min_samples_leaf: self
                .params
                .get("min_samples_leaf")
                .and_then(|v| v.as_usize())
                .unwrap_or(1),
        }
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
        })
    }

    fn fitted_core(&self) -> Result<&BoostCore> {
        self.core.as_ref().ok_or(FlowError::NotFitted)
    }
}

impl Trainer for GradientBoostingTrainer {
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
        let merged = self.params.merged(&updates);
        Self::validate(&merged)?;
        self.params = merged;
        Ok(())
    }

    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()> {
        let classes = match self.task {
            TaskKind::Classification => {
                let y = check_supervised_inputs(self.task, x, y)?;
                distinct_classes(y)
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
        let n_estimators = self
            .params
            .get("n_estimators")
            .and_then(|v| v.as_usize())
            .unwrap_or(100);
        let learning_rate = self
            .params
            .get("learning_rate")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.1);
        let subsample = self
            .params
            .get("subsample")
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0);
        let seed = self
            .params
            .get("random_state")
            .and_then(|v| v.as_usize())
            .unwrap_or(42) as u64;
        let settings = self.settings();
        let feature_pool: Vec<usize> = (0..d).collect();
        let mut importances = vec![0.0; d];

        let (chains, init_scores, onehot) = if self.task == TaskKind::Classification {
            let k = classes.len();
            let mut onehot = Array2::zeros((n, k));
            for (i, &label) in y.iter().enumerate() {
                if let Ok(c) = classes.binary_search_by(|c| {
                    c.partial_cmp(&label).unwrap_or(std::cmp::Ordering::Equal)
                }) {
                    onehot[[i, c]] = 1.0;
                }
            }
            (k, vec![0.0; k], onehot)
        } else {
            let mean = y.sum() / n as f64;
            (1, vec![mean], Array2::zeros((0, 0)))
        };

        let mut scores = Array2::from_shape_fn((n, chains), |(_, c)| init_scores[c]);
        let mut stages: Vec<Vec<TreeCore>> = Vec::with_capacity(n_estimators);

        for stage_idx in 0..n_estimators {
            // Row subsampling without replacement
            let indices: Vec<usize> = if subsample < 1.0 {
                let mut all: Vec<usize> = (0..n).collect();
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(stage_idx as u64));
                all.shuffle(&mut rng);
                let take = ((n as f64) * subsample).ceil().max(1.0) as usize;
                all.truncate(take);
                all
            } else {
                (0..n).collect()
            };

            let mut stage = Vec::with_capacity(chains);
            if self.task == TaskKind::Classification {
                let proba = BoostCore::softmax_rows(&scores);
                for c in 0..chains {
                    let residuals =
                        Array1::from_iter((0..n).map(|i| onehot[[i, c]] - proba[[i, c]]));
                    let tree =
                        TreeCore::grow(x, &residuals, &indices, &feature_pool, &[], &settings);
                    for (acc, g) in importances.iter_mut().zip(tree.importances.iter()) {
                        *acc += g;
                    }
                    for i in 0..n {
                        let row: Vec<f64> = x.row(i).iter().copied().collect();
                        scores[[i, c]] += learning_rate * tree.predict_row(&row);
                    }
                    stage.push(tree);
                }
            } else {
                let residuals = Array1::from_iter((0..n).map(|i| y[i] - scores[[i, 0]]));
                let tree = TreeCore::grow(x, &residuals, &indices, &feature_pool, &[], &settings);
                for (acc, g) in importances.iter_mut().zip(tree.importances.iter()) {
                    *acc += g;
                }
                for i in 0..n {
                    let row: Vec<f64> = x.row(i).iter().copied().collect();
                    scores[[i, 0]] += learning_rate * tree.predict_row(&row);
                }
                stage.push(tree);
            }
            stages.push(stage);
        }

        self.core = Some(BoostCore {
            init_scores,
            stages,
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
            Array1::from_iter(scores.rows().into_iter().map(|row| {
                let best = row
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                core.classes[best]
            }))
        } else {
            scores.column(0).to_owned()
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
        Ok(BoostCore::softmax_rows(&core.raw_scores(x)))
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
        p.set("n_estimators", 25i64);
        p.set("learning_rate", 0.3f64);
        p
    }

    #[test]
    fn test_regression_fits_residuals() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0], [8.0]];
        let y = array![2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0, 16.0];
        let mut trainer = GradientBoostingTrainer::new(TaskKind::Regression, fast_params()).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let preds = trainer.predict(&x).unwrap().into_labels().unwrap();
        for (p, t) in preds.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1.5, "prediction {} far from {}", p, t);
        }
    }

    #[test]
    fn test_classification_multiclass() {
        let x = array![
            [0.0, 0.0],
            [0.2, 0.1],
            [0.1, 0.2],
            [5.0, 5.0],
            [5.2, 5.1],
            [5.1, 5.2],
            [0.0, 5.0],
            [0.1, 5.2],
            [0.2, 5.1]
        ];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0];
        let mut trainer =
            GradientBoostingTrainer::new(TaskKind::Classification, fast_params()).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let preds = trainer.predict(&x).unwrap().into_labels().unwrap();
        let correct = preds
            .iter()
            .zip(y.iter())
            .filter(|(p, t)| (**p - **t).abs() < 0.5)
            .count();
        assert!(correct >= 8, "boosting should fit separable data: {}/9", correct);

        let proba = trainer.predict_proba(&x).unwrap();
        assert_eq!(proba.ncols(), 3);
        for row in proba.rows() {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_importances_non_negative_unnormalized() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0], [5.0, 0.0], [6.0, 0.0]];
        let y = array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut trainer = GradientBoostingTrainer::new(TaskKind::Regression, fast_params()).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let imp = trainer.feature_importance().unwrap();
        assert_eq!(imp.len(), 2);
        assert!(imp.iter().all(|&v| v >= 0.0));
        // Constant second feature never splits
        assert_eq!(imp[1], 0.0);
    }

    #[test]
    fn test_zero_learning_rate_rejected() {
        let mut p = HyperParams::new();
        p.set("learning_rate", 0.0f64);
        let err = GradientBoostingTrainer::new(TaskKind::Regression, p).unwrap_err();
        assert!(err.to_string().contains("positive"));
    }
}
