//! Model training module
//!
//! One polymorphic [`Trainer`] contract over ten algorithm families:
//! linear models, distance-based, trees, ensembles, boosting, neural nets,
//! clustering and dimensionality reduction. Each trainer wraps one fittable
//! algorithm core, validates its own hyperparameters, and persists to a
//! model artifact plus a metadata document.

pub mod params;
pub mod persist;

pub mod boosting;
pub mod clustering;
pub mod dimred;
pub mod forest;
pub mod knn;
pub mod linear;
pub mod neural;
pub mod tree;
pub mod xgboost;

pub use boosting::GradientBoostingTrainer;
pub use clustering::KMeansTrainer;
pub use dimred::PcaTrainer;
pub use forest::RandomForestTrainer;
pub use knn::KnnTrainer;
pub use linear::{LinearRegressionTrainer, LogisticRegressionTrainer};
pub use neural::NeuralNetworkTrainer;
pub use params::{HyperParams, HyperValue};
pub use persist::{load_trainer, TrainerDocument};
pub use tree::DecisionTreeTrainer;
pub use xgboost::XgboostTrainer;

use crate::error::{FlowError, Result};
use chrono::Utc;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Problem family a trainer is configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Classification,
    Regression,
    Clustering,
    DimensionalityReduction,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::Classification => "classification",
            TaskKind::Regression => "regression",
            TaskKind::Clustering => "clustering",
            TaskKind::DimensionalityReduction => "dimensionality_reduction",
        };
        f.write_str(s)
    }
}

impl TaskKind {
    /// Tasks that require a target column at fit time
    pub fn is_supervised(&self) -> bool {
        matches!(self, TaskKind::Classification | TaskKind::Regression)
    }
}

/// Stable family tag, independent of task kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Linear,
    Tree,
    Neural,
    Distance,
    Clustering,
    Dimensionality,
}

/// What `predict` produces. Supervised and clustering trainers yield one
/// value per row; dimensionality reduction yields the transformed matrix
/// under the same `predict` name so executor code stays polymorphic.
#[derive(Debug, Clone)]
pub enum ModelOutput {
    Labels(Array1<f64>),
    Embedding(Array2<f64>),
}

impl ModelOutput {
    pub fn into_labels(self) -> Result<Array1<f64>> {
        match self {
            ModelOutput::Labels(v) => Ok(v),
            ModelOutput::Embedding(_) => Err(FlowError::NotSupported(
                "this model produces an embedding, not labels".to_string(),
            )),
        }
    }

    pub fn into_embedding(self) -> Result<Array2<f64>> {
        match self {
            ModelOutput::Embedding(m) => Ok(m),
            ModelOutput::Labels(_) => Err(FlowError::NotSupported(
                "this model produces labels, not an embedding".to_string(),
            )),
        }
    }

    pub fn as_labels(&self) -> Option<&Array1<f64>> {
        match self {
            ModelOutput::Labels(v) => Some(v),
            ModelOutput::Embedding(_) => None,
        }
    }
}

/// Provenance metadata stamped at construction and fit time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerMeta {
    pub created_at: String,
    pub trained_at: Option<String>,
    pub n_samples: usize,
    pub n_features: usize,
    pub model_version: String,
}

impl TrainerMeta {
    pub fn new() -> Self {
        Self {
            created_at: Utc::now().to_rfc3339(),
            trained_at: None,
            n_samples: 0,
            n_features: 0,
            model_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn stamp_fit(&mut self, n_samples: usize, n_features: usize) {
        self.trained_at = Some(Utc::now().to_rfc3339());
        self.n_samples = n_samples;
        self.n_features = n_features;
    }
}

impl Default for TrainerMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// A trainable model instance.
pub trait Trainer: Send {
    /// Stable trainer name, also used for artifact dispatch at load time
    fn name(&self) -> &str;

    fn task(&self) -> TaskKind;

    fn family(&self) -> ModelFamily;

    fn hyperparameters(&self) -> &HyperParams;

    /// Merge and re-validate; the merged set is only committed when valid.
    /// Does not retrain — call `fit` again for changes to take effect.
    fn update_hyperparameters(&mut self, updates: HyperParams) -> Result<()>;

    /// Train the wrapped model. `y` is required for supervised tasks and
    /// ignored for unsupervised ones. Stamps metadata on success.
    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()>;

    fn predict(&self, x: &Array2<f64>) -> Result<ModelOutput>;

    /// Row-stochastic class probability matrix. Classification-capable
    /// trainers override this.
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let _ = x;
        Err(FlowError::NotSupported(format!(
            "predict_proba is not available for {}",
            self.name()
        )))
    }

    /// Per-feature importance scores. Tree, boosting, and linear families
    /// override this.
    fn feature_importance(&self) -> Result<Array1<f64>> {
        Err(FlowError::NotSupported(format!(
            "feature importance is not available for {}",
            self.name()
        )))
    }

    fn metadata(&self) -> &TrainerMeta;

    /// Metadata document persisted next to the model artifact
    fn document(&self) -> TrainerDocument;

    /// Serialized fitted model state; `NotFitted` before fit
    fn model_state(&self) -> Result<serde_json::Value>;

    /// Persist the model artifact and metadata document into `dir`
    /// (created if absent).
    fn save(&self, dir: &Path) -> Result<()> {
        persist::write_artifacts(dir, &self.document(), &self.model_state()?)
    }
}

/// Shared fit-input guard for supervised tasks. Returns the validated target.
pub(crate) fn check_supervised_inputs<'a>(
    task: TaskKind,
    x: &Array2<f64>,
    y: Option<&'a Array1<f64>>,
) -> Result<&'a Array1<f64>> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(FlowError::InvalidInput(
            "training data is empty".to_string(),
        ));
    }
    let y = y.ok_or_else(|| {
        FlowError::InvalidInput(format!("target values are required for {} tasks", task))
    })?;
    if y.is_empty() {
        return Err(FlowError::InvalidInput(format!(
            "target values are required for {} tasks",
            task
        )));
    }
    if y.len() != x.nrows() {
        return Err(FlowError::InvalidInput(format!(
            "X has {} rows but y has length {}",
            x.nrows(),
            y.len()
        )));
    }
    Ok(y)
}

/// Shared fit-input guard for unsupervised tasks (`y` is ignored).
pub(crate) fn check_unsupervised_inputs(x: &Array2<f64>) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(FlowError::InvalidInput(
            "training data is empty".to_string(),
        ));
    }
    Ok(())
}

/// Predict-time guard: the feature count must match what the model saw at fit.
pub(crate) fn check_predict_features(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(FlowError::InvalidInput(format!(
            "X has {} features but the model was fitted with {} features",
            actual, expected
        )));
    }
    Ok(())
}

/// Error for a task the family does not implement, raised at fit time.
pub(crate) fn unsupported_task(trainer: &str, task: TaskKind) -> FlowError {
    FlowError::InvalidInput(format!("Unsupported task '{}' for {}", task, trainer))
}

/// Sorted distinct class labels of a target vector.
pub(crate) fn distinct_classes(y: &Array1<f64>) -> Vec<f64> {
    let mut classes: Vec<f64> = y.iter().copied().collect();
    classes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    classes.dedup();
    classes
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_supervised_guard_requires_target() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let err = check_supervised_inputs(TaskKind::Classification, &x, None).unwrap_err();
        assert!(err.to_string().contains("classification"));
    }

    #[test]
    fn test_supervised_guard_length_mismatch() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let y = array![1.0, 0.0, 1.0];
        let err = check_supervised_inputs(TaskKind::Regression, &x, Some(&y)).unwrap_err();
        assert!(err.to_string().contains("length"));
    }

    #[test]
    fn test_predict_feature_guard_message() {
        let err = check_predict_features(4, 3).unwrap_err();
        assert!(err.to_string().contains("features"));
    }

    #[test]
    fn test_model_output_conversions() {
        let labels = ModelOutput::Labels(array![1.0, 2.0]);
        assert!(labels.clone().into_labels().is_ok());
        assert!(labels.into_embedding().is_err());

        let emb = ModelOutput::Embedding(array![[1.0], [2.0]]);
        assert!(emb.into_labels().is_err());
    }

    #[test]
    fn test_task_display() {
        assert_eq!(TaskKind::DimensionalityReduction.to_string(), "dimensionality_reduction");
        assert!(TaskKind::Classification.is_supervised());
        assert!(!TaskKind::Clustering.is_supervised());
    }
}
