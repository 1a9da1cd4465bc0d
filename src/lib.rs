//! flowtrain — workflow-driven AutoML training core
//!
//! The backend core of a no-code AutoML platform: users configure a visual
//! workflow graph (dataset → preprocess → model → evaluate → visualize) and
//! run it to train a model. This crate provides:
//!
//! - [`data`] - versioned tabular container with transformation history
//! - [`preprocessing`] - fit/transform operators (dedup, scaling, imputation,
//!   encoding, datetime extraction)
//! - [`training`] - one polymorphic trainer contract over ten algorithm
//!   families, with hyperparameter validation and artifact persistence
//! - [`evaluation`] - classification/regression/clustering evaluators with
//!   per-metric failure degradation
//! - [`plugin`] - declarative algorithm metadata (schemas, capabilities) and
//!   the slug-keyed registry used by the no-code layer
//! - [`workflow`] - the graph executor: dependency-ordered node execution,
//!   per-node status tracking, failure propagation
//!
//! The REST surface, auth, task queue, database, and object storage live in
//! collaborating services; this crate consumes data containers and
//! hyperparameter maps and produces trained artifacts, metrics, and status
//! signals.

pub mod data;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod plugin;
pub mod preprocessing;
pub mod training;
pub mod validation;
pub mod workflow;

pub use error::{FlowError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::data::{DataContainer, HistoryEntry};
    pub use crate::dataset::{DatasetRef, DatasetSource, SampleDatasets};
    pub use crate::error::{FlowError, Result};
    pub use crate::evaluation::{
        ClassificationEvaluator, ClusteringEvaluator, MetricValue, Metrics, RegressionEvaluator,
    };
    pub use crate::plugin::{Capabilities, HyperparamSchema, Plugin, PluginRegistry, TrainContext};
    pub use crate::preprocessing::{
        DatetimeFeatures, DropDuplicates, ImputeStrategy, Imputer, LabelEncoder, Operator, Scaler,
        ScalerKind,
    };
    pub use crate::training::{
        load_trainer, HyperParams, HyperValue, ModelFamily, ModelOutput, TaskKind, Trainer,
        TrainerDocument, TrainerMeta,
    };
    pub use crate::workflow::{
        NodeKind, NodeStatus, RunReport, WorkflowDefinition, WorkflowEdge, WorkflowExecutor,
        WorkflowNode, WorkflowRun, WorkflowStatus,
    };
}
