//! Missing value imputation operator

use super::Operator;
use crate::data::{DataContainer, HistoryEntry};
use crate::error::{FlowError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fill strategy for missing values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputeStrategy {
    Mean,
    Median,
    /// Most frequent value
    Mode,
    Constant(f64),
}

/// Learns a per-column fill value at fit time and applies it at transform.
#[derive(Debug)]
pub struct Imputer {
    strategy: ImputeStrategy,
    columns: Option<Vec<String>>,
    fill_values: HashMap<String, f64>,
    fitted: bool,
    last_transform: Option<serde_json::Value>,
}

impl Imputer {
    pub fn new(strategy: ImputeStrategy, columns: Option<Vec<String>>) -> Self {
        Self {
            strategy,
            columns,
            fill_values: HashMap::new(),
            fitted: false,
            last_transform: None,
        }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let strategy = match params.get("strategy").and_then(|v| v.as_str()) {
            None | Some("mean") => ImputeStrategy::Mean,
            Some("median") => ImputeStrategy::Median,
            Some("mode") => ImputeStrategy::Mode,
            Some("constant") => {
                let value = params
                    .get("fill_value")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
                ImputeStrategy::Constant(value)
            }
            Some(other) => {
                return Err(FlowError::ConfigError(format!(
                    "unknown impute strategy: {}",
                    other
                )))
            }
        };
        let columns = params.get("columns").and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        });
        Ok(Self::new(strategy, columns))
    }

    fn target_columns(&self, data: &DataContainer) -> Vec<String> {
        match &self.columns {
            Some(cols) => cols.clone(),
            None => data.feature_names(),
        }
    }

    fn fill_value(&self, ca: &Float64Chunked) -> f64 {
        match self.strategy {
            ImputeStrategy::Mean => ca.mean().unwrap_or(0.0),
            ImputeStrategy::Median => ca.median().unwrap_or(0.0),
            ImputeStrategy::Mode => {
                // Most frequent value, ties broken toward the smaller one
                let mut counts: HashMap<u64, (f64, usize)> = HashMap::new();
                for v in ca.into_iter().flatten() {
                    let entry = counts.entry(v.to_bits()).or_insert((v, 0));
                    entry.1 += 1;
                }
                counts
                    .into_values()
                    .max_by(|a, b| {
                        a.1.cmp(&b.1)
                            .then(b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal))
                    })
                    .map(|(v, _)| v)
                    .unwrap_or(0.0)
            }
            ImputeStrategy::Constant(value) => value,
        }
    }
}

impl Operator for Imputer {
    fn name(&self) -> &str {
        "imputer"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "strategy": serde_json::to_value(self.strategy).unwrap_or(serde_json::Value::Null),
            "columns": self.columns,
        })
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn fit(&mut self, data: &DataContainer) -> Result<()> {
        self.fill_values.clear();
        for name in self.target_columns(data) {
            let column = data
                .features()
                .column(&name)
                .map_err(|_| FlowError::DataError(format!("column not found: {}", name)))?;
            let ca = column
                .cast(&DataType::Float64)?
                .f64()
                .map_err(|e| FlowError::DataError(e.to_string()))?
                .clone();
            self.fill_values.insert(name, self.fill_value(&ca));
        }
        self.fitted = true;
        Ok(())
    }

    fn transform(&mut self, data: &DataContainer) -> Result<DataContainer> {
        if !self.fitted {
            return Err(FlowError::NotFitted);
        }

        let mut features = data.features().clone();
        let mut nulls_filled = 0usize;
        for (name, fill) in &self.fill_values {
            if let Ok(column) = data.features().column(name) {
                let series = column.as_materialized_series();
                let nulls = series.null_count();
                if nulls == 0 {
                    continue;
                }
                let ca = series
                    .cast(&DataType::Float64)?
                    .f64()
                    .map_err(|e| FlowError::DataError(e.to_string()))?
                    .clone();
                let filled: Float64Chunked =
                    ca.into_iter().map(|opt| Some(opt.unwrap_or(*fill))).collect();
                features = features
                    .with_column(filled.with_name(series.name().clone()).into_series())
                    .map_err(|e| FlowError::DataError(e.to_string()))?
                    .clone();
                nulls_filled += nulls;
            }
        }

        let changes = serde_json::json!({"nulls_filled": nulls_filled});
        self.last_transform = Some(changes.clone());
        data.with_transformed(
            features,
            data.target().cloned(),
            HistoryEntry::new(self.name(), self.params(), changes),
        )
    }

    fn fit_metadata(&self) -> serde_json::Value {
        serde_json::to_value(&self.fill_values).unwrap_or(serde_json::Value::Null)
    }

    fn transform_metadata(&self) -> serde_json::Value {
        self.last_transform
            .clone()
            .unwrap_or(serde_json::Value::Null)
    }
}
