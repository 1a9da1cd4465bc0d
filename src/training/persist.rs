//! Trainer persistence
//!
//! Two artifacts per saved trainer: `model.json` (the fitted algorithm
//! state) and `metadata.json` (name, task, hyperparameters, training
//! metadata). `load_trainer` dispatches on the document's name to
//! reconstruct the same concrete family with identical hyperparameters and
//! fitted state.

use crate::error::{FlowError, Result};
use crate::training::params::HyperParams;
use crate::training::{
    DecisionTreeTrainer, GradientBoostingTrainer, KMeansTrainer, KnnTrainer,
    LinearRegressionTrainer, LogisticRegressionTrainer, NeuralNetworkTrainer, PcaTrainer,
    RandomForestTrainer, TaskKind, Trainer, TrainerMeta, XgboostTrainer,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

const MODEL_FILE: &str = "model.json";
const METADATA_FILE: &str = "metadata.json";

/// JSON-serializable trainer metadata document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerDocument {
    pub name: String,
    pub task: TaskKind,
    pub hyperparameters: HyperParams,
    pub metadata: TrainerMeta,
}

/// Write both artifacts into `dir`, creating it if absent.
pub fn write_artifacts(
    dir: &Path,
    document: &TrainerDocument,
    model_state: &serde_json::Value,
) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(
        dir.join(MODEL_FILE),
        serde_json::to_string_pretty(model_state)?,
    )?;
    std::fs::write(
        dir.join(METADATA_FILE),
        serde_json::to_string_pretty(document)?,
    )?;
    Ok(())
}

/// Read back the artifact pair from `dir`.
pub fn read_artifacts(dir: &Path) -> Result<(TrainerDocument, serde_json::Value)> {
    let document: TrainerDocument =
        serde_json::from_str(&std::fs::read_to_string(dir.join(METADATA_FILE))?)?;
    let model_state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join(MODEL_FILE))?)?;
    Ok((document, model_state))
}

/// Reconstruct a trainer from a saved directory. The concrete family is
/// chosen by the document's `name`.
pub fn load_trainer(dir: &Path) -> Result<Box<dyn Trainer>> {
    let (document, model_state) = read_artifacts(dir)?;
    match document.name.as_str() {
        "linear_regression" => Ok(Box::new(LinearRegressionTrainer::from_artifacts(
            document,
            model_state,
        )?)),
        "logistic_regression" => Ok(Box::new(LogisticRegressionTrainer::from_artifacts(
            document,
            model_state,
        )?)),
        "knn" => Ok(Box::new(KnnTrainer::from_artifacts(document, model_state)?)),
        "decision_tree" => Ok(Box::new(DecisionTreeTrainer::from_artifacts(
            document,
            model_state,
        )?)),
        "random_forest" => Ok(Box::new(RandomForestTrainer::from_artifacts(
            document,
            model_state,
        )?)),
        "gradient_boosting" => Ok(Box::new(GradientBoostingTrainer::from_artifacts(
            document,
            model_state,
        )?)),
        "xgboost" => Ok(Box::new(XgboostTrainer::from_artifacts(
            document,
            model_state,
        )?)),
        "neural_network" => Ok(Box::new(NeuralNetworkTrainer::from_artifacts(
            document,
            model_state,
        )?)),
        "kmeans" => Ok(Box::new(KMeansTrainer::from_artifacts(
            document,
            model_state,
        )?)),
        "pca" => Ok(Box::new(PcaTrainer::from_artifacts(document, model_state)?)),
        other => Err(FlowError::SerializationError(format!(
            "unknown trainer name in metadata document: {}",
            other
        ))),
    }
}
