//! Neural network trainer
//!
//! Single-hidden-layer MLP with ReLU activation, trained by batch gradient
//! descent: softmax cross-entropy head for classification, linear
//! squared-error head for regression. Weight init is seeded so fits are
//! reproducible.

use crate::error::{FlowError, Result};
use crate::training::params::HyperParams;
use crate::training::persist::TrainerDocument;
use crate::training::{
    check_predict_features, check_supervised_inputs, distinct_classes, unsupported_task,
    ModelFamily, ModelOutput, TaskKind, Trainer, TrainerMeta,
};
use crate::validation;
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MlpCore {
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array2<f64>,
    b2: Array1<f64>,
    classes: Vec<f64>,
    n_features: usize,
}

impl MlpCore {
    fn hidden(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut h = x.dot(&self.w1) + &self.b1;
        h.mapv_inplace(|v| v.max(0.0));
        h
    }

    fn output(&self, x: &Array2<f64>) -> Array2<f64> {
        self.hidden(x).dot(&self.w2) + &self.b2
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

/// MLP trainer, classification or regression at fit time.
#[derive(Debug, Serialize, Deserialize)]
pub struct NeuralNetworkTrainer {
    task: TaskKind,
    params: HyperParams,
    meta: TrainerMeta,
    core: Option<MlpCore>,
}

impl NeuralNetworkTrainer {
    pub const NAME: &'static str = "neural_network";

    pub fn defaults() -> HyperParams {
        let mut p = HyperParams::new();
        p.set("hidden_units", 64i64);
        p.set("learning_rate", 0.01f64);
        p.set("max_iter", 200i64);
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
        if let Some(v) = params.get("hidden_units") {
            validation::require_positive_int("hidden_units", v)?;
        }
        if let Some(v) = params.get("learning_rate") {
            validation::require_positive_float("learning_rate", v)?;
        }
        if let Some(v) = params.get("max_iter") {
            validation::require_positive_int("max_iter", v)?;
        }
        if let Some(v) = params.get("random_state") {
            validation::require_positive_int_or_null("random_state", v)?;
        }
        Ok(())
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

    fn fitted_core(&self) -> Result<&MlpCore> {
        self.core.as_ref().ok_or(FlowError::NotFitted)
    }
}

impl Trainer for NeuralNetworkTrainer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn task(&self) -> TaskKind {
        self.task
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::Neural
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
        let hidden = self
            .params
            .get("hidden_units")
            .and_then(|v| v.as_usize())
            .unwrap_or(64);
        let lr = self
            .params
            .get("learning_rate")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.01);
        let max_iter = self
            .params
            .get("max_iter")
            .and_then(|v| v.as_usize())
            .unwrap_or(200);
        let seed = self
            .params
            .get("random_state")
            .and_then(|v| v.as_usize())
            .unwrap_or(42) as u64;

        let is_classification = self.task == TaskKind::Classification;
        let out_dim = if is_classification { classes.len() } else { 1 };

        // Targets: one-hot for classification, column vector for regression
        let mut targets = Array2::zeros((n, out_dim));
        if is_classification {
            for (i, &label) in y.iter().enumerate() {
                if let Ok(c) = classes.binary_search_by(|c| {
                    c.partial_cmp(&label).unwrap_or(std::cmp::Ordering::Equal)
                }) {
                    targets[[i, c]] = 1.0;
                }
            }
        } else {
            for (i, &v) in y.iter().enumerate() {
                targets[[i, 0]] = v;
            }
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let scale1 = (1.0 / d as f64).sqrt();
        let scale2 = (1.0 / hidden as f64).sqrt();
        let mut w1 = Array2::from_shape_fn((d, hidden), |_| rng.gen_range(-scale1..scale1));
        let mut b1: Array1<f64> = Array1::zeros(hidden);
        let mut w2 = Array2::from_shape_fn((hidden, out_dim), |_| rng.gen_range(-scale2..scale2));
        let mut b2: Array1<f64> = Array1::zeros(out_dim);

        for _ in 0..max_iter {
            // Forward
            let z1 = x.dot(&w1) + &b1;
            let h = z1.mapv(|v| v.max(0.0));
            let out = h.dot(&w2) + &b2;

            // Output gradient
            let d_out = if is_classification {
                (MlpCore::softmax_rows(&out) - &targets) / n as f64
            } else {
                (out - &targets) * (2.0 / n as f64)
            };

            // Backprop
            let d_w2 = h.t().dot(&d_out);
            let d_b2 = d_out.sum_axis(Axis(0));
            let mut d_h = d_out.dot(&w2.t());
            ndarray::Zip::from(&mut d_h).and(&z1).for_each(|g, &z| {
                if z <= 0.0 {
                    *g = 0.0;
                }
            });
            let d_w1 = x.t().dot(&d_h);
            let d_b1 = d_h.sum_axis(Axis(0));

            w2 = w2 - d_w2 * lr;
            b2 = b2 - d_b2 * lr;
            w1 = w1 - d_w1 * lr;
            b1 = b1 - d_b1 * lr;
        }

        self.core = Some(MlpCore {
            w1,
            b1,
            w2,
            b2,
            classes,
            n_features: d,
        });
        self.meta.stamp_fit(n, d);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<ModelOutput> {
        let core = self.fitted_core()?;
        check_predict_features(core.n_features, x.ncols())?;

        let out = core.output(x);
        let preds = if self.task == TaskKind::Classification {
            Array1::from_iter(out.rows().into_iter().map(|row| {
                let best = row
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                core.classes[best]
            }))
        } else {
            out.column(0).to_owned()
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
        Ok(MlpCore::softmax_rows(&core.output(x)))
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
        p.set("hidden_units", 16i64);
        p.set("max_iter", 400i64);
        p.set("learning_rate", 0.05f64);
        p
    }

    #[test]
    fn test_classification_separable() {
        let x = array![
            [0.0, 0.0],
            [0.2, 0.1],
            [0.1, 0.2],
            [0.3, 0.3],
            [3.0, 3.0],
            [3.2, 3.1],
            [3.1, 3.2],
            [3.3, 3.3]
        ];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let mut trainer = NeuralNetworkTrainer::new(TaskKind::Classification, fast_params()).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let preds = trainer.predict(&x).unwrap().into_labels().unwrap();
        let correct = preds
            .iter()
            .zip(y.iter())
            .filter(|(p, t)| (**p - **t).abs() < 0.5)
            .count();
        assert!(correct >= 7, "mlp should separate the clusters: {}/8", correct);

        let proba = trainer.predict_proba(&x).unwrap();
        for row in proba.rows() {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 2.0], [3.0, 1.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];

        let mut a = NeuralNetworkTrainer::new(TaskKind::Classification, fast_params()).unwrap();
        let mut b = NeuralNetworkTrainer::new(TaskKind::Classification, fast_params()).unwrap();
        a.fit(&x, Some(&y)).unwrap();
        b.fit(&x, Some(&y)).unwrap();

        let pa = a.predict_proba(&x).unwrap();
        let pb = b.predict_proba(&x).unwrap();
        for (u, v) in pa.iter().zip(pb.iter()) {
            assert_eq!(u, v);
        }
    }

    #[test]
    fn test_regression_head() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let mut p = fast_params();
        p.set("max_iter", 2000i64);
        p.set("learning_rate", 0.01f64);
        let mut trainer = NeuralNetworkTrainer::new(TaskKind::Regression, p).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let preds = trainer.predict(&x).unwrap().into_labels().unwrap();
        for (p, t) in preds.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1.0, "prediction {} far from {}", p, t);
        }
        assert!(trainer.predict_proba(&x).is_err());
    }

    #[test]
    fn test_importance_not_supported() {
        let trainer = NeuralNetworkTrainer::new(TaskKind::Classification, fast_params()).unwrap();
        assert!(matches!(
            trainer.feature_importance(),
            Err(FlowError::NotSupported(_))
        ));
    }
}
