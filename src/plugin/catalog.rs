//! Builtin plugin catalog
//!
//! One plugin per trainer family. Each `train` merges the schema's
//! documented defaults with caller-supplied hyperparameters (caller wins),
//! resolves deprecated/incompatible option combinations, strips fields that
//! do not apply to the selected task variant, then constructs and fits the
//! matching trainer.

use super::schema::{HyperparamSchema, SchemaField};
use super::{sanitized, Capabilities, Plugin, TrainContext};
use crate::error::Result;
use crate::training::params::HyperParams;
use crate::training::{
    DecisionTreeTrainer, GradientBoostingTrainer, KMeansTrainer, KnnTrainer,
    LinearRegressionTrainer, LogisticRegressionTrainer, NeuralNetworkTrainer, PcaTrainer,
    RandomForestTrainer, TaskKind, Trainer, XgboostTrainer,
};
use ndarray::{Array1, Array2};
use std::sync::Arc;

pub(crate) const CLASSIFICATION_METRICS: &[&str] = &[
    "accuracy",
    "precision",
    "recall",
    "f1_score",
    "confusion_matrix",
    "roc_auc",
];
pub(crate) const CLASSIFICATION_DEFAULT_METRICS: &[&str] =
    &["accuracy", "precision", "recall", "f1_score"];
pub(crate) const REGRESSION_METRICS: &[&str] = &["mse", "rmse", "mae", "r2_score"];
pub(crate) const CLUSTERING_METRICS: &[&str] = &[
    "silhouette_score",
    "davies_bouldin",
    "calinski_harabasz",
    "inertia",
];
pub(crate) const CLUSTERING_DEFAULT_METRICS: &[&str] = &["silhouette_score", "inertia"];

/// Every builtin plugin, in registration order.
pub fn builtin_plugins() -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(LinearRegressionPlugin),
        Arc::new(LogisticRegressionPlugin),
        Arc::new(KnnPlugin),
        Arc::new(DecisionTreePlugin),
        Arc::new(RandomForestPlugin),
        Arc::new(GradientBoostingPlugin),
        Arc::new(XgboostPlugin),
        Arc::new(NeuralNetworkPlugin),
        Arc::new(KMeansPlugin),
        Arc::new(PcaPlugin),
    ]
}

fn supervised_capabilities(task: TaskKind, has_importance: bool) -> Capabilities {
    match task {
        TaskKind::Classification => {
            let mut plots = vec!["confusion_matrix", "roc_curve"];
            if has_importance {
                plots.push("feature_importance");
            }
            Capabilities {
                supported_metrics: CLASSIFICATION_METRICS.to_vec(),
                default_metrics: CLASSIFICATION_DEFAULT_METRICS.to_vec(),
                supported_plots: plots,
                default_plots: vec!["confusion_matrix"],
            }
        }
        TaskKind::Regression => {
            let mut plots = vec!["predicted_vs_actual", "residuals"];
            if has_importance {
                plots.push("feature_importance");
            }
            Capabilities {
                supported_metrics: REGRESSION_METRICS.to_vec(),
                default_metrics: REGRESSION_METRICS.to_vec(),
                supported_plots: plots,
                default_plots: vec!["predicted_vs_actual"],
            }
        }
        _ => empty_capabilities(),
    }
}

fn clustering_capabilities() -> Capabilities {
    Capabilities {
        supported_metrics: CLUSTERING_METRICS.to_vec(),
        default_metrics: CLUSTERING_DEFAULT_METRICS.to_vec(),
        supported_plots: vec!["cluster_scatter", "elbow"],
        default_plots: vec!["cluster_scatter"],
    }
}

fn dimensionality_capabilities() -> Capabilities {
    Capabilities {
        supported_metrics: Vec::new(),
        default_metrics: Vec::new(),
        supported_plots: vec!["scatter_2d", "explained_variance"],
        default_plots: vec!["scatter_2d"],
    }
}

fn empty_capabilities() -> Capabilities {
    Capabilities {
        supported_metrics: Vec::new(),
        default_metrics: Vec::new(),
        supported_plots: Vec::new(),
        default_plots: Vec::new(),
    }
}

/// Map a classification-only split criterion to its regression equivalent
/// (and back), so a UI config carried across a task switch stays valid.
fn resolve_criterion(params: &mut HyperParams, task: TaskKind) {
    let criterion = params.get("criterion").and_then(|v| v.as_str());
    match (task, criterion) {
        (TaskKind::Regression, Some("gini")) | (TaskKind::Regression, Some("entropy")) => {
            params.set("criterion", "squared_error");
        }
        (TaskKind::Classification, Some("squared_error")) => {
            params.set("criterion", "gini");
        }
        _ => {}
    }
}

// ───────────────────────────────────────────────────────────────────────────

pub struct LinearRegressionPlugin;

impl Plugin for LinearRegressionPlugin {
    fn slug(&self) -> &'static str {
        "linear_regression"
    }

    fn name(&self) -> &'static str {
        "Linear Regression"
    }

    fn description(&self) -> &'static str {
        "Ordinary least squares fit of a linear relationship"
    }

    fn icon(&self) -> &'static str {
        "trending-up"
    }

    fn category(&self) -> &'static str {
        "linear_models"
    }

    fn supported_tasks(&self) -> &'static [TaskKind] {
        &[TaskKind::Regression]
    }

    fn schema(&self) -> HyperparamSchema {
        HyperparamSchema::new(
            vec![SchemaField::bool("fit_intercept", "Fit intercept", true)
                .describe("Estimate a bias term in addition to feature weights")],
            vec![],
        )
    }

    fn capabilities(&self, task: TaskKind) -> Capabilities {
        supervised_capabilities(task, true)
    }

    fn train(
        &self,
        x: &Array2<f64>,
        y: Option<&Array1<f64>>,
        params: &HyperParams,
        task: TaskKind,
        _ctx: &TrainContext,
    ) -> Result<Box<dyn Trainer>> {
        let params = sanitized(&self.schema().defaults(), params);
        let mut trainer = LinearRegressionTrainer::new(task, params)?;
        trainer.fit(x, y)?;
        Ok(Box::new(trainer))
    }
}

// ───────────────────────────────────────────────────────────────────────────

pub struct LogisticRegressionPlugin;

impl Plugin for LogisticRegressionPlugin {
    fn slug(&self) -> &'static str {
        "logistic_regression"
    }

    fn name(&self) -> &'static str {
        "Logistic Regression"
    }

    fn description(&self) -> &'static str {
        "Multinomial logistic regression with gradient descent"
    }

    fn icon(&self) -> &'static str {
        "git-commit"
    }

    fn category(&self) -> &'static str {
        "linear_models"
    }

    fn supported_tasks(&self) -> &'static [TaskKind] {
        &[TaskKind::Classification]
    }

    fn schema(&self) -> HyperparamSchema {
        HyperparamSchema::new(
            vec![
                SchemaField::float("learning_rate", "Learning rate", 0.1)
                    .range(1e-4, 10.0)
                    .describe("Gradient descent step size"),
                SchemaField::int("max_iter", "Max iterations", 300).range(10.0, 10_000.0),
            ],
            vec![SchemaField::select("penalty", "Penalty", "l2", &["l2", "none"])
                .describe("Coefficient regularization")],
        )
    }

    fn capabilities(&self, task: TaskKind) -> Capabilities {
        supervised_capabilities(task, true)
    }

    fn train(
        &self,
        x: &Array2<f64>,
        y: Option<&Array1<f64>>,
        params: &HyperParams,
        task: TaskKind,
        _ctx: &TrainContext,
    ) -> Result<Box<dyn Trainer>> {
        let mut params = sanitized(&self.schema().defaults(), params);
        // The gradient-descent solver has no L1 path; the deprecated "l1"
        // choice falls back to the compatible penalty.
        if params.get("penalty").and_then(|v| v.as_str()) == Some("l1") {
            params.set("penalty", "l2");
        }
        let mut trainer = LogisticRegressionTrainer::new(task, params)?;
        trainer.fit(x, y)?;
        Ok(Box::new(trainer))
    }
}

// ───────────────────────────────────────────────────────────────────────────

pub struct KnnPlugin;

impl Plugin for KnnPlugin {
    fn slug(&self) -> &'static str {
        "knn"
    }

    fn name(&self) -> &'static str {
        "K-Nearest Neighbors"
    }

    fn description(&self) -> &'static str {
        "Distance-based prediction from the k closest training samples"
    }

    fn icon(&self) -> &'static str {
        "users"
    }

    fn category(&self) -> &'static str {
        "distance_based"
    }

    fn supported_tasks(&self) -> &'static [TaskKind] {
        &[TaskKind::Classification, TaskKind::Regression]
    }

    fn schema(&self) -> HyperparamSchema {
        HyperparamSchema::new(
            vec![
                SchemaField::int("n_neighbors", "Neighbors", 5).range(1.0, 100.0),
                SchemaField::select("weights", "Vote weighting", "uniform", &["uniform", "distance"]),
            ],
            vec![SchemaField::select(
                "metric",
                "Distance metric",
                "euclidean",
                &["euclidean", "manhattan"],
            )],
        )
    }

    fn capabilities(&self, task: TaskKind) -> Capabilities {
        supervised_capabilities(task, false)
    }

    fn train(
        &self,
        x: &Array2<f64>,
        y: Option<&Array1<f64>>,
        params: &HyperParams,
        task: TaskKind,
        _ctx: &TrainContext,
    ) -> Result<Box<dyn Trainer>> {
        let params = sanitized(&self.schema().defaults(), params);
        let mut trainer = KnnTrainer::new(task, params)?;
        trainer.fit(x, y)?;
        Ok(Box::new(trainer))
    }
}

// ───────────────────────────────────────────────────────────────────────────

pub struct DecisionTreePlugin;

impl Plugin for DecisionTreePlugin {
    fn slug(&self) -> &'static str {
        "decision_tree"
    }

    fn name(&self) -> &'static str {
        "Decision Tree"
    }

    fn description(&self) -> &'static str {
        "Single interpretable decision tree"
    }

    fn icon(&self) -> &'static str {
        "git-branch"
    }

    fn category(&self) -> &'static str {
        "tree_based"
    }

    fn supported_tasks(&self) -> &'static [TaskKind] {
        &[TaskKind::Classification, TaskKind::Regression]
    }

    fn schema(&self) -> HyperparamSchema {
        HyperparamSchema::new(
            vec![
                SchemaField::int("max_depth", "Max depth", 8)
                    .range(1.0, 64.0)
                    .nullable("No limit"),
                SchemaField::select(
                    "criterion",
                    "Split criterion",
                    "gini",
                    &["gini", "entropy", "squared_error"],
                ),
            ],
            vec![
                SchemaField::int("min_samples_split", "Min samples to split", 2).range(2.0, 100.0),
                SchemaField::int("min_samples_leaf", "Min samples per leaf", 1).range(1.0, 100.0),
            ],
        )
    }

    fn capabilities(&self, task: TaskKind) -> Capabilities {
        supervised_capabilities(task, true)
    }

    fn train(
        &self,
        x: &Array2<f64>,
        y: Option<&Array1<f64>>,
        params: &HyperParams,
        task: TaskKind,
        _ctx: &TrainContext,
    ) -> Result<Box<dyn Trainer>> {
        let mut params = sanitized(&self.schema().defaults(), params);
        resolve_criterion(&mut params, task);
        let mut trainer = DecisionTreeTrainer::new(task, params)?;
        trainer.fit(x, y)?;
        Ok(Box::new(trainer))
    }
}

// ───────────────────────────────────────────────────────────────────────────

pub struct RandomForestPlugin;

impl Plugin for RandomForestPlugin {
    fn slug(&self) -> &'static str {
        "random_forest"
    }

    fn name(&self) -> &'static str {
        "Random Forest"
    }

    fn description(&self) -> &'static str {
        "Bagged ensemble of decision trees"
    }

    fn icon(&self) -> &'static str {
        "trees"
    }

    fn category(&self) -> &'static str {
        "ensemble"
    }

    fn supported_tasks(&self) -> &'static [TaskKind] {
        &[TaskKind::Classification, TaskKind::Regression]
    }

    fn schema(&self) -> HyperparamSchema {
        HyperparamSchema::new(
            vec![
                SchemaField::int("n_estimators", "Number of trees", 100).range(1.0, 1000.0),
                SchemaField::int("max_depth", "Max depth", 16)
                    .range(1.0, 64.0)
                    .nullable("No limit"),
            ],
            vec![
                SchemaField::int("min_samples_split", "Min samples to split", 2).range(2.0, 100.0),
                SchemaField::int("min_samples_leaf", "Min samples per leaf", 1).range(1.0, 100.0),
                SchemaField::select(
                    "max_features",
                    "Features per tree",
                    "sqrt",
                    &["sqrt", "log2", "all"],
                ),
                SchemaField::bool("bootstrap", "Bootstrap sampling", true),
                SchemaField::select(
                    "class_weight",
                    "Class weighting",
                    "none",
                    &["none", "balanced"],
                )
                .optional(),
                SchemaField::int("random_state", "Random seed", 42).optional(),
            ],
        )
    }

    fn capabilities(&self, task: TaskKind) -> Capabilities {
        supervised_capabilities(task, true)
    }

    fn train(
        &self,
        x: &Array2<f64>,
        y: Option<&Array1<f64>>,
        params: &HyperParams,
        task: TaskKind,
        _ctx: &TrainContext,
    ) -> Result<Box<dyn Trainer>> {
        let mut params = sanitized(&self.schema().defaults(), params);
        resolve_criterion(&mut params, task);
        // Class weighting has no meaning for the regressor variant
        if task == TaskKind::Regression {
            params.remove("class_weight");
        }
        let mut trainer = RandomForestTrainer::new(task, params)?;
        trainer.fit(x, y)?;
        Ok(Box::new(trainer))
    }
}

// ───────────────────────────────────────────────────────────────────────────

pub struct GradientBoostingPlugin;

impl Plugin for GradientBoostingPlugin {
    fn slug(&self) -> &'static str {
        "gradient_boosting"
    }

    fn name(&self) -> &'static str {
        "Gradient Boosting"
    }

    fn description(&self) -> &'static str {
        "Stagewise additive boosting over shallow trees"
    }

    fn icon(&self) -> &'static str {
        "layers"
    }

    fn category(&self) -> &'static str {
        "ensemble"
    }

    fn supported_tasks(&self) -> &'static [TaskKind] {
        &[TaskKind::Classification, TaskKind::Regression]
    }

    fn schema(&self) -> HyperparamSchema {
        HyperparamSchema::new(
            vec![
                SchemaField::int("n_estimators", "Boosting stages", 100).range(1.0, 1000.0),
                SchemaField::float("learning_rate", "Learning rate", 0.1)
                    .range(1e-3, 1.0)
                    .step(0.01),
                SchemaField::int("max_depth", "Max tree depth", 3).range(1.0, 16.0),
            ],
            vec![
                SchemaField::float("subsample", "Row subsample fraction", 1.0)
                    .range(0.1, 1.0)
                    .step(0.05),
                SchemaField::int("min_samples_leaf", "Min samples per leaf", 1).range(1.0, 100.0),
                SchemaField::int("random_state", "Random seed", 42).optional(),
            ],
        )
    }

    fn capabilities(&self, task: TaskKind) -> Capabilities {
        supervised_capabilities(task, true)
    }

    fn train(
        &self,
        x: &Array2<f64>,
        y: Option<&Array1<f64>>,
        params: &HyperParams,
        task: TaskKind,
        _ctx: &TrainContext,
    ) -> Result<Box<dyn Trainer>> {
        let params = sanitized(&self.schema().defaults(), params);
        let mut trainer = GradientBoostingTrainer::new(task, params)?;
        trainer.fit(x, y)?;
        Ok(Box::new(trainer))
    }
}

// ───────────────────────────────────────────────────────────────────────────

pub struct XgboostPlugin;

impl Plugin for XgboostPlugin {
    fn slug(&self) -> &'static str {
        "xgboost"
    }

    fn name(&self) -> &'static str {
        "XGBoost"
    }

    fn description(&self) -> &'static str {
        "Second-order gradient boosting with regularized leaf weights"
    }

    fn icon(&self) -> &'static str {
        "zap"
    }

    fn category(&self) -> &'static str {
        "ensemble"
    }

    fn supported_tasks(&self) -> &'static [TaskKind] {
        &[TaskKind::Classification, TaskKind::Regression]
    }

    fn schema(&self) -> HyperparamSchema {
        HyperparamSchema::new(
            vec![
                SchemaField::int("n_estimators", "Boosting rounds", 100).range(1.0, 1000.0),
                SchemaField::float("learning_rate", "Learning rate", 0.3)
                    .range(1e-3, 1.0)
                    .step(0.01),
                SchemaField::int("max_depth", "Max tree depth", 6).range(1.0, 16.0),
            ],
            vec![
                SchemaField::float("min_child_weight", "Min child weight", 1.0).range(0.0, 100.0),
                SchemaField::float("reg_lambda", "L2 regularization", 1.0).range(0.0, 100.0),
                SchemaField::float("reg_alpha", "L1 regularization", 0.0).range(0.0, 100.0),
                SchemaField::float("gamma", "Min split loss", 0.0).range(0.0, 100.0),
                SchemaField::float("subsample", "Row subsample fraction", 1.0).range(0.1, 1.0),
                SchemaField::float("colsample_bytree", "Column subsample fraction", 1.0)
                    .range(0.1, 1.0),
                SchemaField::select("device", "Device", "cpu", &["cpu", "cuda"]),
                SchemaField::int("random_state", "Random seed", 42).optional(),
            ],
        )
    }

    fn capabilities(&self, task: TaskKind) -> Capabilities {
        supervised_capabilities(task, true)
    }

    fn train(
        &self,
        x: &Array2<f64>,
        y: Option<&Array1<f64>>,
        params: &HyperParams,
        task: TaskKind,
        ctx: &TrainContext,
    ) -> Result<Box<dyn Trainer>> {
        let params = sanitized(&self.schema().defaults(), params);
        // GPU entitlement comes from the platform context, never from the
        // hyperparameter surface.
        let mut trainer = XgboostTrainer::new(task, params, ctx.allow_gpu)?;
        trainer.fit(x, y)?;
        Ok(Box::new(trainer))
    }
}

// ───────────────────────────────────────────────────────────────────────────

pub struct NeuralNetworkPlugin;

impl Plugin for NeuralNetworkPlugin {
    fn slug(&self) -> &'static str {
        "neural_network"
    }

    fn name(&self) -> &'static str {
        "Neural Network"
    }

    fn description(&self) -> &'static str {
        "Multilayer perceptron with one hidden ReLU layer"
    }

    fn icon(&self) -> &'static str {
        "brain"
    }

    fn category(&self) -> &'static str {
        "neural"
    }

    fn supported_tasks(&self) -> &'static [TaskKind] {
        &[TaskKind::Classification, TaskKind::Regression]
    }

    fn schema(&self) -> HyperparamSchema {
        HyperparamSchema::new(
            vec![
                SchemaField::int("hidden_units", "Hidden units", 64).range(1.0, 1024.0),
                SchemaField::float("learning_rate", "Learning rate", 0.01)
                    .range(1e-5, 1.0)
                    .step(0.001),
                SchemaField::int("max_iter", "Training epochs", 200).range(10.0, 10_000.0),
            ],
            vec![SchemaField::int("random_state", "Random seed", 42).optional()],
        )
    }

    fn capabilities(&self, task: TaskKind) -> Capabilities {
        supervised_capabilities(task, false)
    }

    fn train(
        &self,
        x: &Array2<f64>,
        y: Option<&Array1<f64>>,
        params: &HyperParams,
        task: TaskKind,
        _ctx: &TrainContext,
    ) -> Result<Box<dyn Trainer>> {
        let params = sanitized(&self.schema().defaults(), params);
        let mut trainer = NeuralNetworkTrainer::new(task, params)?;
        trainer.fit(x, y)?;
        Ok(Box::new(trainer))
    }
}

// ───────────────────────────────────────────────────────────────────────────

pub struct KMeansPlugin;

impl Plugin for KMeansPlugin {
    fn slug(&self) -> &'static str {
        "kmeans"
    }

    fn name(&self) -> &'static str {
        "K-Means"
    }

    fn description(&self) -> &'static str {
        "Centroid clustering with k-means++ initialization"
    }

    fn icon(&self) -> &'static str {
        "target"
    }

    fn category(&self) -> &'static str {
        "clustering"
    }

    fn supported_tasks(&self) -> &'static [TaskKind] {
        &[TaskKind::Clustering]
    }

    fn schema(&self) -> HyperparamSchema {
        HyperparamSchema::new(
            vec![SchemaField::int("n_clusters", "Clusters", 8).range(2.0, 100.0)],
            vec![
                SchemaField::int("max_iter", "Max iterations", 300).range(10.0, 10_000.0),
                SchemaField::float("tol", "Convergence tolerance", 1e-4).range(1e-8, 1.0),
                SchemaField::int("random_state", "Random seed", 42).optional(),
            ],
        )
    }

    fn capabilities(&self, task: TaskKind) -> Capabilities {
        match task {
            TaskKind::Clustering => clustering_capabilities(),
            _ => empty_capabilities(),
        }
    }

    fn train(
        &self,
        x: &Array2<f64>,
        y: Option<&Array1<f64>>,
        params: &HyperParams,
        task: TaskKind,
        _ctx: &TrainContext,
    ) -> Result<Box<dyn Trainer>> {
        let params = sanitized(&self.schema().defaults(), params);
        let mut trainer = KMeansTrainer::new(task, params)?;
        trainer.fit(x, y)?;
        Ok(Box::new(trainer))
    }
}

// ───────────────────────────────────────────────────────────────────────────

pub struct PcaPlugin;

impl Plugin for PcaPlugin {
    fn slug(&self) -> &'static str {
        "pca"
    }

    fn name(&self) -> &'static str {
        "PCA"
    }

    fn description(&self) -> &'static str {
        "Principal component analysis projection"
    }

    fn icon(&self) -> &'static str {
        "minimize-2"
    }

    fn category(&self) -> &'static str {
        "dimensionality_reduction"
    }

    fn supported_tasks(&self) -> &'static [TaskKind] {
        &[TaskKind::DimensionalityReduction]
    }

    fn schema(&self) -> HyperparamSchema {
        HyperparamSchema::new(
            vec![SchemaField::int("n_components", "Components", 2).range(1.0, 100.0)],
            vec![SchemaField::int("random_state", "Random seed", 42).optional()],
        )
    }

    fn capabilities(&self, task: TaskKind) -> Capabilities {
        match task {
            TaskKind::DimensionalityReduction => dimensionality_capabilities(),
            _ => empty_capabilities(),
        }
    }

    fn train(
        &self,
        x: &Array2<f64>,
        y: Option<&Array1<f64>>,
        params: &HyperParams,
        task: TaskKind,
        _ctx: &TrainContext,
    ) -> Result<Box<dyn Trainer>> {
        let params = sanitized(&self.schema().defaults(), params);
        let mut trainer = PcaTrainer::new(task, params)?;
        trainer.fit(x, y)?;
        Ok(Box::new(trainer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_criterion_resolution_for_regression() {
        let mut params = HyperParams::new();
        params.set("criterion", "gini");
        resolve_criterion(&mut params, TaskKind::Regression);
        assert_eq!(
            params.get("criterion").and_then(|v| v.as_str()),
            Some("squared_error")
        );
    }

    #[test]
    fn test_criterion_resolution_for_classification() {
        let mut params = HyperParams::new();
        params.set("criterion", "squared_error");
        resolve_criterion(&mut params, TaskKind::Classification);
        assert_eq!(params.get("criterion").and_then(|v| v.as_str()), Some("gini"));
    }

    #[test]
    fn test_forest_strips_class_weight_for_regression() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let y = array![2.0, 4.0, 6.0, 8.0, 10.0, 12.0];
        let mut params = HyperParams::new();
        params.set("class_weight", "balanced");
        params.set("n_estimators", 5i64);

        let trainer = RandomForestPlugin
            .train(&x, Some(&y), &params, TaskKind::Regression, &TrainContext::default())
            .unwrap();
        assert!(trainer.hyperparameters().get("class_weight").is_none());
    }

    #[test]
    fn test_logistic_l1_falls_back_to_l2() {
        let x = array![[0.0, 0.0], [0.1, 0.1], [5.0, 5.0], [5.1, 5.1]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let mut params = HyperParams::new();
        params.set("penalty", "l1");
        params.set("max_iter", 50i64);

        let trainer = LogisticRegressionPlugin
            .train(&x, Some(&y), &params, TaskKind::Classification, &TrainContext::default())
            .unwrap();
        assert_eq!(
            trainer.hyperparameters().get("penalty").and_then(|v| v.as_str()),
            Some("l2")
        );
    }

    #[test]
    fn test_xgboost_gpu_gate_through_context() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![0.0, 1.0, 2.0, 3.0];
        let mut params = HyperParams::new();
        params.set("device", "CUDA");
        params.set("n_estimators", 3i64);

        let ctx = TrainContext { allow_gpu: false };
        let trainer = XgboostPlugin
            .train(&x, Some(&y), &params, TaskKind::Regression, &ctx)
            .unwrap();
        assert_eq!(
            trainer.hyperparameters().get("device").and_then(|v| v.as_str()),
            Some("cpu")
        );
    }

    #[test]
    fn test_capabilities_by_task() {
        let caps = RandomForestPlugin.capabilities(TaskKind::Classification);
        assert!(caps.supports_metric("roc_auc"));
        assert!(caps.supported_plots.contains(&"feature_importance"));

        let caps = KnnPlugin.capabilities(TaskKind::Classification);
        assert!(!caps.supported_plots.contains(&"feature_importance"));

        let caps = PcaPlugin.capabilities(TaskKind::DimensionalityReduction);
        assert!(caps.supported_metrics.is_empty());
        assert!(caps.supported_plots.contains(&"explained_variance"));
    }
}
