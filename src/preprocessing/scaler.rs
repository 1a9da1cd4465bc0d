//! Feature scaling operator

use super::Operator;
use crate::data::{DataContainer, HistoryEntry};
use crate::error::{FlowError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scaling strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerKind {
    /// Z-score normalization: (x - mean) / std
    Standard,
    /// (x - min) / (max - min)
    MinMax,
    /// (x - median) / IQR
    Robust,
}

/// Per-column fitted scaling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ColumnParams {
    center: f64,
    scale: f64,
}

/// Column scaler. Fit learns a center and scale per configured column;
/// transform replaces those columns in a new container.
#[derive(Debug)]
pub struct Scaler {
    kind: ScalerKind,
    columns: Option<Vec<String>>,
    params: HashMap<String, ColumnParams>,
    fitted: bool,
    last_transform: Option<serde_json::Value>,
}

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Float64
            | DataType::Float32
            | DataType::Int64
            | DataType::Int32
            | DataType::Int16
            | DataType::Int8
            | DataType::UInt64
            | DataType::UInt32
            | DataType::UInt16
            | DataType::UInt8
    )
}

impl Scaler {
    pub fn new(kind: ScalerKind, columns: Option<Vec<String>>) -> Self {
        Self {
            kind,
            columns,
            params: HashMap::new(),
            fitted: false,
            last_transform: None,
        }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let kind = match params.get("kind").and_then(|v| v.as_str()) {
            None | Some("standard") => ScalerKind::Standard,
            Some("minmax") => ScalerKind::MinMax,
            Some("robust") => ScalerKind::Robust,
            Some(other) => {
                return Err(FlowError::ConfigError(format!(
                    "unknown scaler kind: {}",
                    other
                )))
            }
        };
        let columns = params.get("columns").and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        });
        Ok(Self::new(kind, columns))
    }

    fn target_columns(&self, data: &DataContainer) -> Vec<String> {
        match &self.columns {
            Some(cols) => cols.clone(),
            None => data
                .features()
                .get_columns()
                .iter()
                .filter(|c| is_numeric(c.dtype()))
                .map(|c| c.name().to_string())
                .collect(),
        }
    }

    fn compute_params(&self, ca: &Float64Chunked) -> ColumnParams {
        match self.kind {
            ScalerKind::Standard => {
                let mean = ca.mean().unwrap_or(0.0);
                let std = ca.std(1).unwrap_or(1.0);
                ColumnParams {
                    center: mean,
                    scale: if std == 0.0 { 1.0 } else { std },
                }
            }
            ScalerKind::MinMax => {
                let min = ca.min().unwrap_or(0.0);
                let max = ca.max().unwrap_or(1.0);
                let range = max - min;
                ColumnParams {
                    center: min,
                    scale: if range == 0.0 { 1.0 } else { range },
                }
            }
            ScalerKind::Robust => {
                let median = ca.median().unwrap_or(0.0);
                let q1 = ca
                    .quantile(0.25, QuantileMethod::Linear)
                    .unwrap_or(Some(0.0))
                    .unwrap_or(0.0);
                let q3 = ca
                    .quantile(0.75, QuantileMethod::Linear)
                    .unwrap_or(Some(1.0))
                    .unwrap_or(1.0);
                let iqr = q3 - q1;
                ColumnParams {
                    center: median,
                    scale: if iqr == 0.0 { 1.0 } else { iqr },
                }
            }
        }
    }

    fn scaled_series(&self, series: &Series, params: &ColumnParams) -> Result<Series> {
        let ca = series
            .cast(&DataType::Float64)?
            .f64()
            .map_err(|e| FlowError::DataError(e.to_string()))?
            .clone();
        let scaled: Float64Chunked = ca
            .into_iter()
            .map(|opt| opt.map(|v| (v - params.center) / params.scale))
            .collect();
        Ok(scaled.with_name(series.name().clone()).into_series())
    }

    /// Undo the scaling on previously transformed data.
    pub fn inverse_transform(&self, data: &DataContainer) -> Result<DataContainer> {
        if !self.fitted {
            return Err(FlowError::NotFitted);
        }

        let mut features = data.features().clone();
        for (name, params) in &self.params {
            if let Ok(column) = data.features().column(name) {
                let series = column.as_materialized_series();
                let ca = series
                    .cast(&DataType::Float64)?
                    .f64()
                    .map_err(|e| FlowError::DataError(e.to_string()))?
                    .clone();
                let unscaled: Float64Chunked = ca
                    .into_iter()
                    .map(|opt| opt.map(|v| v * params.scale + params.center))
                    .collect();
                features = features
                    .with_column(unscaled.with_name(series.name().clone()).into_series())
                    .map_err(|e| FlowError::DataError(e.to_string()))?
                    .clone();
            }
        }

        data.with_transformed(
            features,
            data.target().cloned(),
            HistoryEntry::new(
                "scaler_inverse",
                self.params(),
                serde_json::json!({"columns_restored": self.params.len()}),
            ),
        )
    }
}

impl Operator for Scaler {
    fn name(&self) -> &str {
        "scaler"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": serde_json::to_value(self.kind).unwrap_or(serde_json::Value::Null),
            "columns": self.columns,
        })
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn fit(&mut self, data: &DataContainer) -> Result<()> {
        self.params.clear();
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
            self.params.insert(name, self.compute_params(&ca));
        }
        self.fitted = true;
        Ok(())
    }

    fn transform(&mut self, data: &DataContainer) -> Result<DataContainer> {
        if !self.fitted {
            return Err(FlowError::NotFitted);
        }

        let mut features = data.features().clone();
        let mut scaled_count = 0usize;
        for (name, params) in &self.params {
            if let Ok(column) = data.features().column(name) {
                let series = column.as_materialized_series();
                features = features
                    .with_column(self.scaled_series(series, params)?)
                    .map_err(|e| FlowError::DataError(e.to_string()))?
                    .clone();
                scaled_count += 1;
            }
        }

        let changes = serde_json::json!({"columns_scaled": scaled_count});
        self.last_transform = Some(changes.clone());
        data.with_transformed(
            features,
            data.target().cloned(),
            HistoryEntry::new(self.name(), self.params(), changes),
        )
    }

    fn fit_metadata(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or(serde_json::Value::Null)
    }

    fn transform_metadata(&self) -> serde_json::Value {
        self.last_transform
            .clone()
            .unwrap_or(serde_json::Value::Null)
    }
}
