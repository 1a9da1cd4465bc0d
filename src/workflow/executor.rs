//! Workflow executor
//!
//! Walks a validated workflow graph in dependency order, one node at a
//! time: dataset → preprocess chain → model → evaluate → visualize. Tracks
//! per-node status, fires the status callback at every transition, and
//! propagates a failure to every transitive downstream node without running
//! it. Artifacts are persisted only after their node fully completes, so an
//! external cancellation between nodes never leaves a partial write.

use super::{NodeKind, NodeStatus, WorkflowDefinition, WorkflowNode};
use crate::data::DataContainer;
use crate::dataset::{DatasetRef, DatasetSource};
use crate::error::{FlowError, Result};
use crate::evaluation::{
    ClassificationEvaluator, ClusteringEvaluator, MetricValue, Metrics, RegressionEvaluator,
};
use crate::plugin::{Plugin, PluginRegistry, TrainContext};
use crate::preprocessing::build_operator;
use crate::training::params::HyperParams;
use crate::training::{ModelOutput, TaskKind, Trainer};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Workflow-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One metric in the results document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEntry {
    pub key: String,
    pub value: MetricValue,
}

/// Results document handed to the persistence/reporting collaborator
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub algorithm: String,
    pub algorithm_name: String,
    pub model_path: String,
    pub metrics: Vec<MetricEntry>,
    pub hyperparameters: HyperParams,
    pub plots: Vec<String>,
}

/// Typed run aggregate owned by the executor
#[derive(Debug)]
pub struct WorkflowRun {
    pub run_id: String,
    pub status: WorkflowStatus,
    pub node_statuses: BTreeMap<String, NodeStatus>,
    pub node_errors: BTreeMap<String, String>,
    /// First encountered error, truncated for user display
    pub error: Option<String>,
    pub report: Option<RunReport>,
}

/// Fired synchronously at every node transition; fire-and-forget.
pub type StatusCallback = Box<dyn Fn(&str, NodeStatus, Option<&str>) + Send>;

const MAX_ERROR_LEN: usize = 500;

fn truncated(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        message.to_string()
    } else {
        message.chars().take(MAX_ERROR_LEN).collect()
    }
}

#[derive(Debug, Deserialize)]
struct DatasetConfig {
    source: String,
    #[serde(default)]
    target: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PreprocessConfig {
    operator: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ModelConfig {
    algorithm: String,
    task: TaskKind,
    #[serde(default)]
    hyperparameters: HyperParams,
    /// Holdout fraction; ignored when `use_full_dataset` is set
    #[serde(default)]
    test_fraction: Option<f64>,
    #[serde(default)]
    use_full_dataset: bool,
    #[serde(default)]
    random_state: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EvaluateConfig {
    #[serde(default)]
    metrics: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct VisualizeConfig {
    #[serde(default)]
    plots: Option<Vec<String>>,
}

/// Everything downstream nodes need from a completed model node
struct ModelNodeOutput {
    plugin: Arc<dyn Plugin>,
    trainer: Box<dyn Trainer>,
    task: TaskKind,
    holdout: DataContainer,
    predictions: ModelOutput,
    proba: Option<Array2<f64>>,
    model_path: PathBuf,
}

/// Sequential, single-threaded workflow executor.
pub struct WorkflowExecutor<'a> {
    registry: &'a PluginRegistry,
    datasets: &'a dyn DatasetSource,
    artifact_dir: PathBuf,
    train_context: TrainContext,
    on_status: Option<StatusCallback>,
}

impl<'a> WorkflowExecutor<'a> {
    pub fn new(
        registry: &'a PluginRegistry,
        datasets: &'a dyn DatasetSource,
        artifact_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            datasets,
            artifact_dir: artifact_dir.into(),
            train_context: TrainContext::default(),
            on_status: None,
        }
    }

    /// Platform-level training entitlements (GPU access).
    pub fn with_train_context(mut self, ctx: TrainContext) -> Self {
        self.train_context = ctx;
        self
    }

    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.on_status = Some(callback);
        self
    }

    /// Execute a workflow. Static configuration errors are returned as
    /// `Err` before any node enters `running`; runtime node failures are
    /// captured in the returned run with status `failed`.
    pub fn execute(&self, definition: &WorkflowDefinition) -> Result<WorkflowRun> {
        definition.validate()?;
        let order = definition.topo_order()?;

        let run_id = Uuid::new_v4().to_string();
        let mut run = WorkflowRun {
            run_id: run_id.clone(),
            status: WorkflowStatus::Running,
            node_statuses: definition
                .nodes
                .iter()
                .map(|n| (n.id.clone(), NodeStatus::Pending))
                .collect(),
            node_errors: BTreeMap::new(),
            error: None,
            report: None,
        };
        info!(run_id = %run_id, nodes = definition.nodes.len(), "workflow execution started");

        let mut containers: HashMap<String, DataContainer> = HashMap::new();
        let mut model_outputs: HashMap<String, ModelNodeOutput> = HashMap::new();
        let mut metric_entries: Vec<MetricEntry> = Vec::new();
        let mut plots: Vec<String> = Vec::new();

        for &idx in &order {
            let node = &definition.nodes[idx];

            // Nodes already failed by upstream propagation are never entered
            if run.node_statuses[&node.id] == NodeStatus::Failed {
                continue;
            }
            // A node runs only when every upstream dependency completed
            let ready = definition
                .upstream(&node.id)
                .iter()
                .all(|up| run.node_statuses[*up] == NodeStatus::Completed);
            if !ready {
                continue;
            }

            self.set_status(&mut run, &node.id, NodeStatus::Running, None);

            let outcome = self.run_node(
                definition,
                node,
                &run_id,
                &mut containers,
                &mut model_outputs,
                &mut metric_entries,
                &mut plots,
            );

            match outcome {
                Ok(()) => {
                    self.set_status(&mut run, &node.id, NodeStatus::Completed, None);
                }
                Err(err) => {
                    let message = err.to_string();
                    warn!(node = %node.id, error = %message, "workflow node failed");
                    run.node_errors.insert(node.id.clone(), message.clone());
                    if run.error.is_none() {
                        run.error = Some(truncated(&message));
                    }
                    self.set_status(&mut run, &node.id, NodeStatus::Failed, Some(&message));

                    // Transitive downstream nodes fail without running
                    let propagated = format!("upstream node '{}' failed", node.id);
                    for downstream in definition.downstream_closure(&node.id) {
                        if run.node_statuses[&downstream] == NodeStatus::Pending {
                            run.node_errors.insert(downstream.clone(), propagated.clone());
                            self.set_status(
                                &mut run,
                                &downstream,
                                NodeStatus::Failed,
                                Some(&propagated),
                            );
                        }
                    }
                }
            }
        }

        let all_completed = run
            .node_statuses
            .values()
            .all(|s| *s == NodeStatus::Completed);
        if all_completed {
            run.status = WorkflowStatus::Completed;
            // Aggregate the results document from the (single) model chain
            if let Some(output) = model_outputs.into_values().next() {
                run.report = Some(RunReport {
                    algorithm: output.plugin.slug().to_string(),
                    algorithm_name: output.plugin.name().to_string(),
                    model_path: output.model_path.display().to_string(),
                    metrics: metric_entries,
                    hyperparameters: output.trainer.hyperparameters().clone(),
                    plots,
                });
            }
            info!(run_id = %run_id, "workflow completed");
        } else {
            run.status = WorkflowStatus::Failed;
            warn!(run_id = %run_id, error = ?run.error, "workflow failed");
        }

        Ok(run)
    }

    fn set_status(
        &self,
        run: &mut WorkflowRun,
        node_id: &str,
        status: NodeStatus,
        error: Option<&str>,
    ) {
        run.node_statuses.insert(node_id.to_string(), status);
        if let Some(callback) = &self.on_status {
            callback(node_id, status, error);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_node(
        &self,
        definition: &WorkflowDefinition,
        node: &WorkflowNode,
        run_id: &str,
        containers: &mut HashMap<String, DataContainer>,
        model_outputs: &mut HashMap<String, ModelNodeOutput>,
        metric_entries: &mut Vec<MetricEntry>,
        plots: &mut Vec<String>,
    ) -> Result<()> {
        match node.kind {
            NodeKind::Dataset => {
                let container = self.run_dataset(node)?;
                containers.insert(node.id.clone(), container);
            }
            NodeKind::Preprocess => {
                let input = self.input_container(definition, node, containers)?;
                let output = self.run_preprocess(node, input)?;
                containers.insert(node.id.clone(), output);
            }
            NodeKind::Model => {
                let input = self.input_container(definition, node, containers)?.clone();
                let output = self.run_model(node, run_id, input)?;
                model_outputs.insert(node.id.clone(), output);
            }
            NodeKind::Evaluate => {
                let model = self.upstream_model(definition, node, model_outputs)?;
                let entries = self.run_evaluate(node, model)?;
                metric_entries.extend(entries);
            }
            NodeKind::Visualize => {
                let model = self.upstream_model(definition, node, model_outputs)?;
                let requested = self.run_visualize(node, model)?;
                plots.extend(requested);
            }
        }
        Ok(())
    }

    fn input_container<'c>(
        &self,
        definition: &WorkflowDefinition,
        node: &WorkflowNode,
        containers: &'c HashMap<String, DataContainer>,
    ) -> Result<&'c DataContainer> {
        definition
            .upstream(&node.id)
            .iter()
            .find_map(|up| containers.get(*up))
            .ok_or_else(|| {
                FlowError::ConfigError(format!("node {} has no upstream data", node.id))
            })
    }

    fn upstream_model<'m>(
        &self,
        definition: &WorkflowDefinition,
        node: &WorkflowNode,
        model_outputs: &'m HashMap<String, ModelNodeOutput>,
    ) -> Result<&'m ModelNodeOutput> {
        definition
            .upstream(&node.id)
            .iter()
            .find_map(|up| model_outputs.get(*up))
            .ok_or_else(|| {
                FlowError::ConfigError(format!("node {} has no upstream model", node.id))
            })
    }

    fn run_dataset(&self, node: &WorkflowNode) -> Result<DataContainer> {
        let config: DatasetConfig = serde_json::from_value(node.config.clone())
            .map_err(|e| FlowError::ConfigError(format!("dataset node {}: {}", node.id, e)))?;
        let reference = DatasetRef::parse(&config.source);
        self.datasets.load(&reference, config.target.as_deref())
    }

    fn run_preprocess(&self, node: &WorkflowNode, input: &DataContainer) -> Result<DataContainer> {
        let config: PreprocessConfig = serde_json::from_value(node.config.clone())
            .map_err(|e| FlowError::ConfigError(format!("preprocess node {}: {}", node.id, e)))?;
        let mut operator = build_operator(&config.operator, &config.params)?;
        operator.fit_transform(input)
    }

    fn run_model(
        &self,
        node: &WorkflowNode,
        run_id: &str,
        input: DataContainer,
    ) -> Result<ModelNodeOutput> {
        let config: ModelConfig = serde_json::from_value(node.config.clone())
            .map_err(|e| FlowError::ConfigError(format!("model node {}: {}", node.id, e)))?;

        let plugin = self.registry.get(&config.algorithm).ok_or_else(|| {
            FlowError::ConfigError(format!("unknown algorithm: {}", config.algorithm))
        })?;
        if !plugin.supported_tasks().contains(&config.task) {
            return Err(FlowError::ConfigError(format!(
                "algorithm {} does not support {} tasks",
                config.algorithm, config.task
            )));
        }

        // Holdout split for supervised tasks, full data otherwise
        let (train, holdout) = if config.use_full_dataset || !config.task.is_supervised() {
            (input.clone(), input)
        } else {
            let fraction = config.test_fraction.unwrap_or(0.2);
            let seed = config.random_state.unwrap_or(42);
            input.train_test_split(fraction, seed)?
        };

        let x_train = train.feature_matrix()?;
        let y_train = if config.task.is_supervised() {
            Some(train.target_vector()?)
        } else {
            None
        };

        info!(node = %node.id, algorithm = %config.algorithm, task = %config.task, "training model");
        let trainer = plugin.train(
            &x_train,
            y_train.as_ref(),
            &config.hyperparameters,
            config.task,
            &self.train_context,
        )?;

        let x_holdout = holdout.feature_matrix()?;
        let predictions = trainer.predict(&x_holdout)?;
        let proba = if config.task == TaskKind::Classification {
            trainer.predict_proba(&x_holdout).ok()
        } else {
            None
        };

        // Persist only after the fit fully succeeded
        let model_path = self.artifact_dir.join(run_id).join(&node.id);
        trainer.save(&model_path)?;

        Ok(ModelNodeOutput {
            plugin,
            trainer,
            task: config.task,
            holdout,
            predictions,
            proba,
            model_path,
        })
    }

    fn run_evaluate(&self, node: &WorkflowNode, model: &ModelNodeOutput) -> Result<Vec<MetricEntry>> {
        let config: EvaluateConfig = serde_json::from_value(node.config.clone())
            .map_err(|e| FlowError::ConfigError(format!("evaluate node {}: {}", node.id, e)))?;

        let capabilities = model.plugin.capabilities(model.task);
        let requested: Vec<String> = match config.metrics {
            Some(metrics) => metrics,
            None => capabilities
                .default_metrics
                .iter()
                .map(|m| m.to_string())
                .collect(),
        };

        // Requesting a metric the plugin does not declare is a
        // configuration error, never silently ignored
        for metric in &requested {
            if !capabilities.supports_metric(metric) {
                return Err(FlowError::ConfigError(format!(
                    "metric '{}' is not supported by {} for {} tasks",
                    metric,
                    model.plugin.slug(),
                    model.task
                )));
            }
        }

        let computed: Metrics = match model.task {
            TaskKind::Classification => {
                let y_true = model.holdout.target_vector()?;
                let y_pred = model
                    .predictions
                    .as_labels()
                    .ok_or_else(|| {
                        FlowError::EvaluationError("model produced no labels".to_string())
                    })?
                    .clone();
                ClassificationEvaluator::new().evaluate(&y_true, &y_pred, model.proba.as_ref())?
            }
            TaskKind::Regression => {
                let y_true = model.holdout.target_vector()?;
                let y_pred = model
                    .predictions
                    .as_labels()
                    .ok_or_else(|| {
                        FlowError::EvaluationError("model produced no labels".to_string())
                    })?
                    .clone();
                RegressionEvaluator::new().evaluate(&y_true, &y_pred)?
            }
            TaskKind::Clustering => {
                let x = model.holdout.feature_matrix()?;
                let labels = model
                    .predictions
                    .as_labels()
                    .ok_or_else(|| {
                        FlowError::EvaluationError("model produced no labels".to_string())
                    })?
                    .clone();
                ClusteringEvaluator::new().evaluate(&x, &labels, None)?
            }
            TaskKind::DimensionalityReduction => Metrics::new(),
        };

        Ok(requested
            .into_iter()
            .map(|key| {
                let value = computed.get(&key).cloned().unwrap_or(MetricValue::Null);
                MetricEntry { key, value }
            })
            .collect())
    }

    fn run_visualize(&self, node: &WorkflowNode, model: &ModelNodeOutput) -> Result<Vec<String>> {
        let config: VisualizeConfig = serde_json::from_value(node.config.clone())
            .map_err(|e| FlowError::ConfigError(format!("visualize node {}: {}", node.id, e)))?;

        let capabilities = model.plugin.capabilities(model.task);
        let requested: Vec<String> = match config.plots {
            Some(plots) => plots,
            None => capabilities
                .default_plots
                .iter()
                .map(|p| p.to_string())
                .collect(),
        };

        for plot in &requested {
            if !capabilities.supported_plots.iter().any(|p| *p == plot) {
                return Err(FlowError::ConfigError(format!(
                    "plot '{}' is not supported by {} for {} tasks",
                    plot,
                    model.plugin.slug(),
                    model.task
                )));
            }
        }

        // Rendering happens in the out-of-scope visualization layer; the
        // executor records what was requested and verified
        Ok(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SampleDatasets;
    use crate::workflow::WorkflowEdge;
    use std::sync::Mutex;

    fn simple_definition(operator: &str) -> WorkflowDefinition {
        WorkflowDefinition::new(
            vec![
                WorkflowNode::new(
                    "data",
                    NodeKind::Dataset,
                    serde_json::json!({"source": "iris"}),
                ),
                WorkflowNode::new(
                    "prep",
                    NodeKind::Preprocess,
                    serde_json::json!({"operator": operator}),
                ),
                WorkflowNode::new(
                    "model",
                    NodeKind::Model,
                    serde_json::json!({
                        "algorithm": "random_forest",
                        "task": "classification",
                        "hyperparameters": {"n_estimators": 10}
                    }),
                ),
                WorkflowNode::new("eval", NodeKind::Evaluate, serde_json::json!({})),
            ],
            vec![
                WorkflowEdge::new("data", "prep"),
                WorkflowEdge::new("prep", "model"),
                WorkflowEdge::new("model", "eval"),
            ],
        )
    }

    #[test]
    fn test_successful_run() {
        let registry = PluginRegistry::builtin();
        let datasets = SampleDatasets::new();
        let dir = tempfile::tempdir().unwrap();
        let executor = WorkflowExecutor::new(&registry, &datasets, dir.path());

        let run = executor.execute(&simple_definition("duplicate_removal")).unwrap();
        assert_eq!(run.status, WorkflowStatus::Completed);
        assert!(run.node_statuses.values().all(|s| *s == NodeStatus::Completed));

        let report = run.report.unwrap();
        assert_eq!(report.algorithm, "random_forest");
        assert!(!report.metrics.is_empty());
        assert!(report.metrics.iter().any(|m| m.key == "accuracy"));
    }

    static RUNNING_LOG: Mutex<Vec<String>> = Mutex::new(Vec::new());

    #[test]
    fn test_failing_preprocess_propagates() {
        let registry = PluginRegistry::builtin();
        let datasets = SampleDatasets::new();
        let dir = tempfile::tempdir().unwrap();
        let executor = WorkflowExecutor::new(&registry, &datasets, dir.path())
            .with_status_callback(Box::new(|id: &str, status, _err| {
                if status == NodeStatus::Running {
                    RUNNING_LOG.lock().unwrap().push(id.to_string());
                }
            }));

        // iris has no string column, so encoding a numeric one fails at fit
        let mut def = simple_definition("duplicate_removal");
        def.nodes[1] = WorkflowNode::new(
            "prep",
            NodeKind::Preprocess,
            serde_json::json!({
                "operator": "label_encoder",
                "params": {"columns": ["sepal_length"]}
            }),
        );

        let run = executor.execute(&def).unwrap();
        assert_eq!(run.status, WorkflowStatus::Failed);
        assert_eq!(run.node_statuses["prep"], NodeStatus::Failed);
        assert_eq!(run.node_statuses["model"], NodeStatus::Failed);
        assert_eq!(run.node_statuses["eval"], NodeStatus::Failed);
        assert!(run.error.is_some());

        // Downstream nodes never entered running
        let log = RUNNING_LOG.lock().unwrap();
        assert!(!log.contains(&"model".to_string()));
        assert!(!log.contains(&"eval".to_string()));
    }

    #[test]
    fn test_unsupported_metric_is_config_error() {
        let registry = PluginRegistry::builtin();
        let datasets = SampleDatasets::new();
        let dir = tempfile::tempdir().unwrap();
        let executor = WorkflowExecutor::new(&registry, &datasets, dir.path());

        let mut def = simple_definition("duplicate_removal");
        def.nodes[3] = WorkflowNode::new(
            "eval",
            NodeKind::Evaluate,
            serde_json::json!({"metrics": ["mse"]}),
        );

        let run = executor.execute(&def).unwrap();
        assert_eq!(run.status, WorkflowStatus::Failed);
        assert!(run.node_errors["eval"].contains("not supported"));
    }

    #[test]
    fn test_static_validation_runs_nothing() {
        let registry = PluginRegistry::builtin();
        let datasets = SampleDatasets::new();
        let dir = tempfile::tempdir().unwrap();
        let executor = WorkflowExecutor::new(&registry, &datasets, dir.path());

        // evaluate with no upstream model: static config error
        let def = WorkflowDefinition::new(
            vec![
                WorkflowNode::new(
                    "data",
                    NodeKind::Dataset,
                    serde_json::json!({"source": "iris"}),
                ),
                WorkflowNode::new("eval", NodeKind::Evaluate, serde_json::json!({})),
            ],
            vec![WorkflowEdge::new("data", "eval")],
        );
        let err = executor.execute(&def).unwrap_err();
        assert!(matches!(err, FlowError::ConfigError(_)));
    }
}
