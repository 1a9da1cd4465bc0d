//! Plugin layer: declarative algorithm metadata for the no-code workflow
//!
//! Each trainer family is described by exactly one [`Plugin`]: slug, display
//! metadata, a hyperparameter schema for UI rendering, per-task capability
//! lookups (supported/default metrics and plots), and a `train` entrypoint
//! that is the single sanitization boundary between raw JSON-shaped
//! hyperparameters and a fitted trainer.

pub mod catalog;
pub mod registry;
pub mod schema;

pub use registry::PluginRegistry;
pub use schema::{FieldType, HyperparamSchema, SchemaField};

use crate::error::Result;
use crate::training::params::HyperParams;
use crate::training::{TaskKind, Trainer};
use ndarray::{Array1, Array2};
use serde::Serialize;

/// Per-task capability descriptor consumed by the evaluate/visualize nodes
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub supported_metrics: Vec<&'static str>,
    pub default_metrics: Vec<&'static str>,
    pub supported_plots: Vec<&'static str>,
    pub default_plots: Vec<&'static str>,
}

impl Capabilities {
    pub fn supports_metric(&self, metric: &str) -> bool {
        self.supported_metrics.iter().any(|m| *m == metric)
    }
}

/// Platform-controlled training context. Set by the orchestration layer,
/// never derived from user hyperparameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrainContext {
    /// Whether this run is entitled to GPU devices
    pub allow_gpu: bool,
}

/// Declarative metadata plus training entrypoint for one algorithm family.
pub trait Plugin: Send + Sync {
    /// Unique registry key
    fn slug(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn icon(&self) -> &'static str;

    fn category(&self) -> &'static str;

    fn supported_tasks(&self) -> &'static [TaskKind];

    fn schema(&self) -> HyperparamSchema;

    fn capabilities(&self, task: TaskKind) -> Capabilities;

    /// Sanitize hyperparameters (defaults merge, sentinel nulls, deprecated
    /// and incompatible option combinations, task-variant stripping), then
    /// construct and fit the matching trainer.
    fn train(
        &self,
        x: &Array2<f64>,
        y: Option<&Array1<f64>>,
        params: &HyperParams,
        task: TaskKind,
        ctx: &TrainContext,
    ) -> Result<Box<dyn Trainer>>;
}

/// Shared pre-train sanitation: sentinel-null normalization for maps built
/// programmatically, then documented-defaults merge (caller wins).
pub(crate) fn sanitized(defaults: &HyperParams, caller: &HyperParams) -> HyperParams {
    let mut merged = defaults.merged(caller);
    merged.normalize_nulls();
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_merges_and_normalizes() {
        let mut defaults = HyperParams::new();
        defaults.set("n_estimators", 100i64);
        defaults.set("max_depth", crate::training::HyperValue::Null);

        let mut caller = HyperParams::new();
        caller.set("max_depth", "none");
        caller.set("n_estimators", 10i64);

        let merged = sanitized(&defaults, &caller);
        assert!(merged.get("max_depth").unwrap().is_null());
        assert_eq!(merged.get("n_estimators").and_then(|v| v.as_i64()), Some(10));
    }
}
