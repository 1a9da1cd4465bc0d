//! Preprocessing operators
//!
//! Each operator is a named, parameterized fit/transform unit: `fit` learns
//! per-column state from a container, `transform` produces a new container
//! with an appended history entry. `transform` before `fit` is a state
//! error, never a silent no-op.

mod datetime;
mod dedup;
mod encoder;
mod imputer;
mod scaler;

pub use datetime::DatetimeFeatures;
pub use dedup::DropDuplicates;
pub use encoder::LabelEncoder;
pub use imputer::{ImputeStrategy, Imputer};
pub use scaler::{Scaler, ScalerKind};

use crate::data::DataContainer;
use crate::error::{FlowError, Result};

/// A fit/transform preprocessing unit.
pub trait Operator: Send + std::fmt::Debug {
    /// Operator name as it appears in workflow configs and history entries
    fn name(&self) -> &str;

    /// Parameters the operator was constructed with
    fn params(&self) -> serde_json::Value;

    fn is_fitted(&self) -> bool;

    /// Learn per-column state from the container. Idempotent.
    fn fit(&mut self, data: &DataContainer) -> Result<()>;

    /// Produce the transformed successor container. Must fail with
    /// [`FlowError::NotFitted`] before `fit`.
    fn transform(&mut self, data: &DataContainer) -> Result<DataContainer>;

    /// Parameters learned from data at fit time
    fn fit_metadata(&self) -> serde_json::Value;

    /// What changed on the last transform (rows dropped, columns added, ...)
    fn transform_metadata(&self) -> serde_json::Value;

    fn fit_transform(&mut self, data: &DataContainer) -> Result<DataContainer> {
        self.fit(data)?;
        self.transform(data)
    }
}

/// Build an operator from a workflow node config.
pub fn build_operator(name: &str, params: &serde_json::Value) -> Result<Box<dyn Operator>> {
    match name {
        "duplicate_removal" => Ok(Box::new(DropDuplicates::new())),
        "scaler" => Scaler::from_params(params).map(|op| Box::new(op) as Box<dyn Operator>),
        "imputer" => Imputer::from_params(params).map(|op| Box::new(op) as Box<dyn Operator>),
        "label_encoder" => {
            LabelEncoder::from_params(params).map(|op| Box::new(op) as Box<dyn Operator>)
        }
        "datetime_features" => {
            DatetimeFeatures::from_params(params).map(|op| Box::new(op) as Box<dyn Operator>)
        }
        other => Err(FlowError::ConfigError(format!(
            "unknown preprocessing operator: {}",
            other
        ))),
    }
}
