//! K-nearest neighbors trainer
//!
//! Distance-based dual-task trainer: stores the training set at fit time
//! and resolves neighbors at predict time, parallelized over query rows.

use crate::error::{FlowError, Result};
use crate::training::params::HyperParams;
use crate::training::persist::TrainerDocument;
use crate::training::{
    check_predict_features, check_supervised_inputs, distinct_classes, unsupported_task,
    ModelFamily, ModelOutput, TaskKind, Trainer, TrainerMeta,
};
use crate::validation;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Metric {
    Euclidean,
    Manhattan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KnnCore {
    x_train: Array2<f64>,
    y_train: Array1<f64>,
    classes: Vec<f64>,
    n_features: usize,
}

impl KnnCore {
    fn distance(&self, metric: Metric, a: &[f64], b: usize) -> f64 {
        let row = self.x_train.row(b);
        match metric {
            Metric::Euclidean => a
                .iter()
                .zip(row.iter())
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f64>()
                .sqrt(),
            Metric::Manhattan => a
                .iter()
                .zip(row.iter())
                .map(|(x, y)| (x - y).abs())
                .sum(),
        }
    }

    /// The k nearest training rows as (distance, target) pairs
    fn neighbors(&self, metric: Metric, row: &[f64], k: usize) -> Vec<(f64, f64)> {
        let mut dists: Vec<(f64, f64)> = (0..self.x_train.nrows())
            .map(|i| (self.distance(metric, row, i), self.y_train[i]))
            .collect();
        dists.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        dists.truncate(k.min(dists.len()));
        dists
    }

    fn vote_weights(neighbors: &[(f64, f64)], weighted: bool) -> Vec<f64> {
        if weighted {
            neighbors.iter().map(|(d, _)| 1.0 / (d + 1e-10)).collect()
        } else {
            vec![1.0; neighbors.len()]
        }
    }
}

/// K-nearest neighbors trainer, classification or regression at fit time.
#[derive(Debug, Serialize, Deserialize)]
pub struct KnnTrainer {
    task: TaskKind,
    params: HyperParams,
    meta: TrainerMeta,
    core: Option<KnnCore>,
}

impl KnnTrainer {
    pub const NAME: &'static str = "knn";

    pub fn defaults() -> HyperParams {
        let mut p = HyperParams::new();
        p.set("n_neighbors", 5i64);
        p.set("weights", "uniform");
        p.set("metric", "euclidean");
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
        if let Some(v) = params.get("n_neighbors") {
            validation::require_positive_int("n_neighbors", v)?;
        }
        if let Some(v) = params.get("weights") {
            validation::require_one_of("weights", v, &["uniform", "distance"])?;
        }
        if let Some(v) = params.get("metric") {
            validation::require_one_of("metric", v, &["euclidean", "manhattan"])?;
        }
        Ok(())
    }

    fn metric(&self) -> Metric {
        match self.params.get("metric").and_then(|v| v.as_str()) {
            Some("manhattan") => Metric::Manhattan,
            _ => Metric::Euclidean,
        }
    }

    fn k(&self) -> usize {
        self.params
            .get("n_neighbors")
            .and_then(|v| v.as_usize())
            .unwrap_or(5)
    }

    fn weighted(&self) -> bool {
        matches!(
            self.params.get("weights").and_then(|v| v.as_str()),
            Some("distance")
        )
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

    fn fitted_core(&self) -> Result<&KnnCore> {
        self.core.as_ref().ok_or(FlowError::NotFitted)
    }
}

impl Trainer for KnnTrainer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn task(&self) -> TaskKind {
        self.task
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::Distance
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

        self.core = Some(KnnCore {
            x_train: x.clone(),
            y_train: y.clone(),
            classes,
            n_features: x.ncols(),
        });
        self.meta.stamp_fit(x.nrows(), x.ncols());
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<ModelOutput> {
        let core = self.fitted_core()?;
        check_predict_features(core.n_features, x.ncols())?;

        let metric = self.metric();
        let k = self.k();
        let weighted = self.weighted();
        let is_classification = self.task == TaskKind::Classification;

        let preds: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row: Vec<f64> = x.row(i).iter().copied().collect();
                let neighbors = core.neighbors(metric, &row, k);
                let weights = KnnCore::vote_weights(&neighbors, weighted);
                if is_classification {
                    // Weighted plurality over observed classes
                    let mut scores = vec![0.0; core.classes.len()];
                    for ((_, label), w) in neighbors.iter().zip(weights.iter()) {
                        if let Ok(c) = core.classes.binary_search_by(|c| {
                            c.partial_cmp(label).unwrap_or(std::cmp::Ordering::Equal)
                        }) {
                            scores[c] += w;
                        }
                    }
                    let best = scores
                        .iter()
                        .enumerate()
                        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                        .map(|(c, _)| c)
                        .unwrap_or(0);
                    core.classes[best]
                } else {
                    let total: f64 = weights.iter().sum();
                    neighbors
                        .iter()
                        .zip(weights.iter())
                        .map(|((_, label), w)| label * w)
                        .sum::<f64>()
                        / total.max(1e-10)
                }
            })
            .collect();

        Ok(ModelOutput::Labels(Array1::from_vec(preds)))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.task != TaskKind::Classification {
            return Err(FlowError::NotSupported(
                "predict_proba is only available for classification tasks".to_string(),
            ));
        }
        let core = self.fitted_core()?;
        check_predict_features(core.n_features, x.ncols())?;

        let metric = self.metric();
        let k = self.k();
        let weighted = self.weighted();
        let n_classes = core.classes.len();

        let rows: Vec<Vec<f64>> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row: Vec<f64> = x.row(i).iter().copied().collect();
                let neighbors = core.neighbors(metric, &row, k);
                let weights = KnnCore::vote_weights(&neighbors, weighted);
                let mut scores = vec![0.0; n_classes];
                for ((_, label), w) in neighbors.iter().zip(weights.iter()) {
                    if let Ok(c) = core.classes.binary_search_by(|c| {
                        c.partial_cmp(label).unwrap_or(std::cmp::Ordering::Equal)
                    }) {
                        scores[c] += w;
                    }
                }
                let total: f64 = scores.iter().sum();
                scores.iter().map(|s| s / total.max(1e-10)).collect()
            })
            .collect();

        let mut out = Array2::zeros((x.nrows(), n_classes));
        for (i, row) in rows.iter().enumerate() {
            for (j, p) in row.iter().enumerate() {
                out[[i, j]] = *p;
            }
        }
        Ok(out)
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

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [0.0, 0.0],
            [0.1, 0.1],
            [0.2, 0.0],
            [0.0, 0.2],
            [5.0, 5.0],
            [5.1, 5.1],
            [5.2, 5.0],
            [5.0, 5.2]
        ];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn test_classification() {
        let (x, y) = data();
        let mut p = HyperParams::new();
        p.set("n_neighbors", 3i64);
        let mut trainer = KnnTrainer::new(TaskKind::Classification, p).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let preds = trainer
            .predict(&array![[0.05, 0.05], [5.05, 5.05]])
            .unwrap()
            .into_labels()
            .unwrap();
        assert_eq!(preds[0], 0.0);
        assert_eq!(preds[1], 1.0);
    }

    #[test]
    fn test_regression_mean() {
        let x = array![[0.0], [1.0], [2.0], [10.0], [11.0], [12.0]];
        let y = array![0.0, 1.0, 2.0, 10.0, 11.0, 12.0];
        let mut p = HyperParams::new();
        p.set("n_neighbors", 3i64);
        let mut trainer = KnnTrainer::new(TaskKind::Regression, p).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let preds = trainer.predict(&array![[1.0]]).unwrap().into_labels().unwrap();
        assert!((preds[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_neighbors_rejected() {
        let mut p = HyperParams::new();
        p.set("n_neighbors", -1i64);
        let err = KnnTrainer::new(TaskKind::Classification, p).unwrap_err();
        assert!(err.to_string().contains("positive integer"));
    }

    #[test]
    fn test_proba_rows() {
        let (x, y) = data();
        let mut trainer = KnnTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let proba = trainer.predict_proba(&x).unwrap();
        assert_eq!(proba.ncols(), 2);
        for row in proba.rows() {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_feature_importance_not_supported() {
        let (x, y) = data();
        let mut trainer = KnnTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();
        assert!(matches!(
            trainer.feature_importance(),
            Err(FlowError::NotSupported(_))
        ));
    }
}
