//! Random forest trainer

use crate::error::{FlowError, Result};
use crate::training::params::{HyperParams, HyperValue};
use crate::training::persist::TrainerDocument;
use crate::training::tree::{TreeCore, TreeSettings};
use crate::training::{
    check_predict_features, check_supervised_inputs, distinct_classes, unsupported_task,
    DecisionTreeTrainer, ModelFamily, ModelOutput, TaskKind, Trainer, TrainerMeta,
};
use crate::validation;
use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fitted forest state
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ForestCore {
    trees: Vec<TreeCore>,
    n_features: usize,
    classes: Vec<f64>,
}

/// Bagged ensemble of decision trees, classification or regression selected
/// at fit time.
#[derive(Debug, Serialize, Deserialize)]
pub struct RandomForestTrainer {
    task: TaskKind,
    params: HyperParams,
    meta: TrainerMeta,
    core: Option<ForestCore>,
}

impl RandomForestTrainer {
    pub const NAME: &'static str = "random_forest";

    pub fn defaults() -> HyperParams {
        let mut p = HyperParams::new();
        p.set("n_estimators", 100i64);
        p.set("max_depth", HyperValue::Null);
        p.set("min_samples_split", 2i64);
        p.set("min_samples_leaf", 1i64);
        p.set("max_features", "sqrt");
        p.set("bootstrap", true);
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
        if let Some(v) = params.get("max_depth") {
            validation::require_positive_int_or_null("max_depth", v)?;
        }
        if let Some(v) = params.get("min_samples_split") {
            validation::require_positive_int("min_samples_split", v)?;
        }
        if let Some(v) = params.get("min_samples_leaf") {
            validation::require_positive_int("min_samples_leaf", v)?;
        }
        if let Some(v) = params.get("max_features") {
            validation::require_one_of("max_features", v, &["sqrt", "log2", "all"])?;
        }
        if let Some(v) = params.get("bootstrap") {
            validation::require_bool("bootstrap", v)?;
        }
        if let Some(v) = params.get("random_state") {
            validation::require_positive_int_or_null("random_state", v)?;
        }
        Ok(())
    }

    fn pool_size(&self, n_features: usize) -> usize {
        match self.params.get("max_features").and_then(|v| v.as_str()) {
            Some("log2") => ((n_features as f64).log2().ceil() as usize).max(1),
            Some("all") => n_features,
            _ => ((n_features as f64).sqrt().ceil() as usize).max(1),
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

    fn fitted_core(&self) -> Result<&ForestCore> {
        self.core.as_ref().ok_or(FlowError::NotFitted)
    }
}

impl Trainer for RandomForestTrainer {
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

        let n_estimators = self
            .params
            .get("n_estimators")
            .and_then(|v| v.as_usize())
            .unwrap_or(100);
        let bootstrap = self
            .params
            .get("bootstrap")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let seed = self
            .params
            .get("random_state")
            .and_then(|v| v.as_usize())
            .unwrap_or(42) as u64;
        let settings: TreeSettings = DecisionTreeTrainer::settings(&self.params, self.task);

        let n = x.nrows();
        let d = x.ncols();
        let pool_size = self.pool_size(d);

        let trees: Vec<TreeCore> = (0..n_estimators)
            .into_par_iter()
            .map(|t| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(t as u64));

                let indices: Vec<usize> = if bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };

                let mut features: Vec<usize> = (0..d).collect();
                features.shuffle(&mut rng);
                features.truncate(pool_size);
                features.sort_unstable();

                TreeCore::grow(x, y, &indices, &features, &classes, &settings)
            })
            .collect();

        self.core = Some(ForestCore {
            trees,
            n_features: d,
            classes,
        });
        self.meta.stamp_fit(n, d);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<ModelOutput> {
        let core = self.fitted_core()?;
        check_predict_features(core.n_features, x.ncols())?;

        let preds = Array1::from_iter((0..x.nrows()).map(|i| {
            let row: Vec<f64> = x.row(i).iter().copied().collect();
            if self.task == TaskKind::Classification {
                // Majority vote across trees
                let mut votes: HashMap<i64, usize> = HashMap::new();
                for tree in &core.trees {
                    let v = tree.predict_row(&row).round() as i64;
                    *votes.entry(v).or_insert(0) += 1;
                }
                votes
                    .into_iter()
                    .max_by_key(|&(_, count)| count)
                    .map(|(v, _)| v as f64)
                    .unwrap_or(0.0)
            } else {
                let sum: f64 = core.trees.iter().map(|t| t.predict_row(&row)).sum();
                sum / core.trees.len() as f64
            }
        }));
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

        let k = core.classes.len();
        let n_trees = core.trees.len() as f64;
        let mut out = Array2::zeros((x.nrows(), k));
        for i in 0..x.nrows() {
            let row: Vec<f64> = x.row(i).iter().copied().collect();
            for tree in &core.trees {
                let dist = tree.class_distribution(&row);
                for (j, p) in dist.iter().enumerate() {
                    out[[i, j]] += p / n_trees;
                }
            }
        }
        Ok(out)
    }

    fn feature_importance(&self) -> Result<Array1<f64>> {
        let core = self.fitted_core()?;
        let mut acc = vec![0.0; core.n_features];
        for tree in &core.trees {
            let total: f64 = tree.importances.iter().sum();
            if total > 0.0 {
                for (a, imp) in acc.iter_mut().zip(tree.importances.iter()) {
                    *a += imp / total;
                }
            }
        }
        let grand: f64 = acc.iter().sum();
        if grand > 0.0 {
            for a in &mut acc {
                *a /= grand;
            }
        }
        Ok(Array1::from_vec(acc))
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

    fn small_forest() -> HyperParams {
        let mut p = HyperParams::new();
        p.set("n_estimators", 15i64);
        p
    }

    fn classification_data() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [1.0, 10.0],
            [1.5, 9.5],
            [2.0, 9.0],
            [2.5, 8.5],
            [3.0, 8.0],
            [7.0, 4.0],
            [7.5, 3.5],
            [8.0, 3.0],
            [8.5, 2.5],
            [9.0, 2.0]
        ];
        let y = array![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn test_fit_predict() {
        let (x, y) = classification_data();
        let mut trainer = RandomForestTrainer::new(TaskKind::Classification, small_forest()).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let preds = trainer.predict(&x).unwrap().into_labels().unwrap();
        let correct = preds
            .iter()
            .zip(y.iter())
            .filter(|(p, t)| (**p - **t).abs() < 0.5)
            .count();
        assert!(correct >= 9, "forest should fit separable data: {}/10", correct);
    }

    #[test]
    fn test_negative_estimators_rejected() {
        let mut p = HyperParams::new();
        p.set("n_estimators", -10i64);
        let err = RandomForestTrainer::new(TaskKind::Classification, p).unwrap_err();
        assert!(err.to_string().contains("positive integer"));
    }

    #[test]
    fn test_importance_sums_to_one() {
        let (x, y) = classification_data();
        let mut trainer = RandomForestTrainer::new(TaskKind::Classification, small_forest()).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let imp = trainer.feature_importance().unwrap();
        assert_eq!(imp.len(), 2);
        assert!((imp.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_proba_invariants() {
        let (x, y) = classification_data();
        let mut trainer = RandomForestTrainer::new(TaskKind::Classification, small_forest()).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let proba = trainer.predict_proba(&x).unwrap();
        assert_eq!(proba.ncols(), 2);
        for row in proba.rows() {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_update_requires_refit_to_take_effect() {
        let (x, y) = classification_data();
        let mut trainer = RandomForestTrainer::new(TaskKind::Classification, small_forest()).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();
        let before = trainer.predict(&x).unwrap().into_labels().unwrap();

        let mut updates = HyperParams::new();
        updates.set("max_depth", 1i64);
        trainer.update_hyperparameters(updates).unwrap();

        let after_update = trainer.predict(&x).unwrap().into_labels().unwrap();
        assert_eq!(before, after_update);
    }

    #[test]
    fn test_regression_mode() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0], [8.0]];
        let y = array![2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0, 16.0];
        let mut trainer = RandomForestTrainer::new(TaskKind::Regression, small_forest()).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();
        let preds = trainer.predict(&x).unwrap().into_labels().unwrap();
        assert_eq!(preds.len(), 8);
        assert!(trainer.predict_proba(&x).is_err());
    }
}
