//! Linear model trainers
//!
//! Ordinary least squares via the normal equations (Cholesky with a
//! Gauss-Jordan fallback) and multinomial logistic regression via batch
//! gradient descent.

use crate::error::{FlowError, Result};
use crate::training::params::{HyperParams, HyperValue};
use crate::training::persist::TrainerDocument;
use crate::training::{
    check_predict_features, check_supervised_inputs, distinct_classes, unsupported_task,
    ModelFamily, ModelOutput, TaskKind, Trainer, TrainerMeta,
};
use crate::validation;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Solve the symmetric positive-definite system A x = b via Cholesky.
/// Adds a small ridge and retries once if A is not positive definite.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    match cholesky_solve_strict(a, b) {
        Some(x) => Some(x),
        None => {
            let n = a.nrows();
            let ridge = 1e-8 * a.diag().iter().map(|v| v.abs()).sum::<f64>() / n as f64;
            let mut a_reg = a.clone();
            for k in 0..n {
                a_reg[[k, k]] += ridge.max(1e-12);
            }
            cholesky_solve_strict(&a_reg, b)
        }
    }
}

fn cholesky_solve_strict(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    // A = L * L^T
    let mut l = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // Forward: L y = b
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * y[j]).sum();
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Backward: L^T x = y
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

/// Append an intercept column of ones.
fn with_intercept(x: &Array2<f64>) -> Array2<f64> {
    let n = x.nrows();
    let d = x.ncols();
    Array2::from_shape_fn((n, d + 1), |(i, j)| if j < d { x[[i, j]] } else { 1.0 })
}

// ───────────────────────────────────────────────────────────────────────────
//  Linear regression
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinearCore {
    coefficients: Array1<f64>,
    intercept: f64,
    n_features: usize,
}

/// Ordinary least squares regression trainer
#[derive(Debug, Serialize, Deserialize)]
pub struct LinearRegressionTrainer {
    task: TaskKind,
    params: HyperParams,
    meta: TrainerMeta,
    core: Option<LinearCore>,
}

impl LinearRegressionTrainer {
    pub const NAME: &'static str = "linear_regression";

    pub fn defaults() -> HyperParams {
        let mut p = HyperParams::new();
        p.set("fit_intercept", true);
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
        if let Some(v) = params.get("fit_intercept") {
            validation::require_bool("fit_intercept", v)?;
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

    fn fitted_core(&self) -> Result<&LinearCore> {
        self.core.as_ref().ok_or(FlowError::NotFitted)
    }
}

impl Trainer for LinearRegressionTrainer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn task(&self) -> TaskKind {
        self.task
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::Linear
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
        if self.task != TaskKind::Regression {
            return Err(unsupported_task(Self::NAME, self.task));
        }
        let y = check_supervised_inputs(self.task, x, y)?;

        let fit_intercept = self
            .params
            .get("fit_intercept")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let design = if fit_intercept {
            with_intercept(x)
        } else {
            x.clone()
        };
        let xtx = design.t().dot(&design);
        let xty = design.t().dot(y);
        let solution = cholesky_solve(&xtx, &xty).ok_or_else(|| {
            FlowError::TrainingError("normal equations are singular".to_string())
        })?;

        let (coefficients, intercept) = if fit_intercept {
            let d = x.ncols();
            (
                solution.slice(ndarray::s![..d]).to_owned(),
                solution[d],
            )
        } else {
            (solution, 0.0)
        };

        self.core = Some(LinearCore {
            coefficients,
            intercept,
            n_features: x.ncols(),
        });
        self.meta.stamp_fit(x.nrows(), x.ncols());
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<ModelOutput> {
        let core = self.fitted_core()?;
        check_predict_features(core.n_features, x.ncols())?;
        let preds = x.dot(&core.coefficients) + core.intercept;
        Ok(ModelOutput::Labels(preds))
    }

    fn feature_importance(&self) -> Result<Array1<f64>> {
        let core = self.fitted_core()?;
        Ok(core.coefficients.mapv(f64::abs))
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

// ───────────────────────────────────────────────────────────────────────────
//  Logistic regression
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogisticCore {
    /// (n_features + 1) × n_classes, last row is the intercept
    weights: Array2<f64>,
    classes: Vec<f64>,
    n_features: usize,
}

impl LogisticCore {
    fn scores(&self, x: &Array2<f64>) -> Array2<f64> {
        let design = with_intercept(x);
        design.dot(&self.weights)
    }

    fn softmax(scores: &Array2<f64>) -> Array2<f64> {
        let mut out = scores.clone();
        for mut row in out.rows_mut() {
            let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            row.mapv_inplace(|v| (v - max).exp());
            let sum: f64 = row.iter().sum();
            row.mapv_inplace(|v| v / sum);
        }
        out
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Array2<f64> {
        Self::softmax(&self.scores(x))
    }
}

/// Multinomial logistic regression trainer (softmax, batch gradient descent)
#[derive(Debug, Serialize, Deserialize)]
pub struct LogisticRegressionTrainer {
    task: TaskKind,
    params: HyperParams,
    meta: TrainerMeta,
    core: Option<LogisticCore>,
}

impl LogisticRegressionTrainer {
    pub const NAME: &'static str = "logistic_regression";

    const L2_STRENGTH: f64 = 1e-4;

    pub fn defaults() -> HyperParams {
        let mut p = HyperParams::new();
        p.set("learning_rate", 0.1f64);
        p.set("max_iter", 300i64);
        p.set("penalty", "l2");
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
        if let Some(v) = params.get("learning_rate") {
            validation::require_positive_float("learning_rate", v)?;
        }
        if let Some(v) = params.get("max_iter") {
            validation::require_positive_int("max_iter", v)?;
        }
        if let Some(v) = params.get("penalty") {
            // "none" arrives as null after sentinel normalization
            validation::require_one_of_or_null("penalty", v, &["l2"])?;
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

    fn fitted_core(&self) -> Result<&LogisticCore> {
        self.core.as_ref().ok_or(FlowError::NotFitted)
    }
}

impl Trainer for LogisticRegressionTrainer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn task(&self) -> TaskKind {
        self.task
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::Linear
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
        if self.task != TaskKind::Classification {
            return Err(unsupported_task(Self::NAME, self.task));
        }
        let y = check_supervised_inputs(self.task, x, y)?;

        let classes = distinct_classes(y);
        if classes.len() < 2 {
            return Err(FlowError::TrainingError(
                "logistic regression needs at least 2 classes".to_string(),
            ));
        }

        let lr = self
            .params
            .get("learning_rate")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.1);
        let max_iter = self
            .params
            .get("max_iter")
            .and_then(|v| v.as_usize())
            .unwrap_or(300);
        let l2 = match self.params.get("penalty") {
            Some(HyperValue::Null) => 0.0,
            _ => Self::L2_STRENGTH,
        };

        let n = x.nrows();
        let d = x.ncols();
        let k = classes.len();
        let design = with_intercept(x);

        // One-hot targets in sorted class order
        let mut onehot = Array2::zeros((n, k));
        for (i, &label) in y.iter().enumerate() {
            if let Ok(c) = classes.binary_search_by(|c| {
                c.partial_cmp(&label).unwrap_or(std::cmp::Ordering::Equal)
            }) {
                onehot[[i, c]] = 1.0;
            }
        }

        let mut weights: Array2<f64> = Array2::zeros((d + 1, k));
        for _ in 0..max_iter {
            let proba = LogisticCore::softmax(&design.dot(&weights));
            let error = &proba - &onehot;
            let mut grad = design.t().dot(&error) / n as f64;
            if l2 > 0.0 {
                grad = grad + &weights * l2;
            }
            weights = weights - grad * lr;
        }

        self.core = Some(LogisticCore {
            weights,
            classes,
            n_features: d,
        });
        self.meta.stamp_fit(n, d);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<ModelOutput> {
        let core = self.fitted_core()?;
        check_predict_features(core.n_features, x.ncols())?;

        let proba = core.predict_proba(x);
        let preds = Array1::from_iter(proba.rows().into_iter().map(|row| {
            let best = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i)
                .unwrap_or(0);
            core.classes[best]
        }));
        Ok(ModelOutput::Labels(preds))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let core = self.fitted_core()?;
        check_predict_features(core.n_features, x.ncols())?;
        Ok(core.predict_proba(x))
    }

    fn feature_importance(&self) -> Result<Array1<f64>> {
        let core = self.fitted_core()?;
        // Mean absolute coefficient per feature, intercept row excluded
        let d = core.n_features;
        let k = core.classes.len() as f64;
        let imp = Array1::from_iter((0..d).map(|j| {
            (0..core.classes.len())
                .map(|c| core.weights[[j, c]].abs())
                .sum::<f64>()
                / k
        }));
        Ok(imp)
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

    #[test]
    fn test_linear_recovers_coefficients() {
        // y = 2*x1 + 3*x2 + 1
        let x = array![
            [1.0, 1.0],
            [2.0, 1.0],
            [3.0, 2.0],
            [4.0, 3.0],
            [5.0, 5.0],
            [6.0, 8.0]
        ];
        let y = x.map_axis(ndarray::Axis(1), |r| 2.0 * r[0] + 3.0 * r[1] + 1.0);

        let mut trainer =
            LinearRegressionTrainer::new(TaskKind::Regression, HyperParams::new()).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let preds = trainer.predict(&x).unwrap().into_labels().unwrap();
        for (p, t) in preds.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-6, "prediction {} vs target {}", p, t);
        }

        let imp = trainer.feature_importance().unwrap();
        assert!((imp[0] - 2.0).abs() < 1e-6);
        assert!((imp[1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_linear_wrong_task() {
        let mut trainer =
            LinearRegressionTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap();
        let x = array![[1.0], [2.0]];
        let y = array![0.0, 1.0];
        let err = trainer.fit(&x, Some(&y)).unwrap_err();
        assert!(err.to_string().contains("Unsupported task"));
    }

    #[test]
    fn test_logistic_separable() {
        let x = array![
            [0.0, 0.5],
            [0.5, 0.0],
            [1.0, 0.5],
            [0.5, 1.0],
            [5.0, 5.5],
            [5.5, 5.0],
            [6.0, 5.5],
            [5.5, 6.0]
        ];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];

        let mut trainer =
            LogisticRegressionTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();

        let preds = trainer.predict(&x).unwrap().into_labels().unwrap();
        assert_eq!(preds, y);

        let proba = trainer.predict_proba(&x).unwrap();
        for row in proba.rows() {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_logistic_requires_target() {
        let mut trainer =
            LogisticRegressionTrainer::new(TaskKind::Classification, HyperParams::new()).unwrap();
        let x = array![[1.0], [2.0]];
        let err = trainer.fit(&x, None).unwrap_err();
        assert!(err.to_string().contains("classification"));
    }

    #[test]
    fn test_penalty_none_sentinel() {
        let overrides: HyperParams = serde_json::from_str(r#"{"penalty": "none"}"#).unwrap();
        let trainer = LogisticRegressionTrainer::new(TaskKind::Classification, overrides).unwrap();
        assert!(trainer.hyperparameters().get("penalty").unwrap().is_null());
    }
}
