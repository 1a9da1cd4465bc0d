//! Datetime feature extraction operator

use super::Operator;
use crate::data::{DataContainer, HistoryEntry};
use crate::error::{FlowError, Result};
use polars::prelude::*;

/// Expands datetime columns into year/month/day/weekday numeric columns and
/// drops the source column.
#[derive(Debug)]
pub struct DatetimeFeatures {
    columns: Vec<String>,
    fitted: bool,
    last_transform: Option<serde_json::Value>,
}

impl DatetimeFeatures {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            fitted: false,
            last_transform: None,
        }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let columns: Vec<String> = params
            .get("columns")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        if columns.is_empty() {
            return Err(FlowError::ConfigError(
                "datetime_features requires a non-empty columns list".to_string(),
            ));
        }
        Ok(Self::new(columns))
    }

    fn as_datetime(series: &Series) -> Result<Series> {
        series
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .map_err(|e| {
                FlowError::DataError(format!(
                    "column {} is not datetime-like: {}",
                    series.name(),
                    e
                ))
            })
    }
}

impl Operator for DatetimeFeatures {
    fn name(&self) -> &str {
        "datetime_features"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({"columns": self.columns})
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn fit(&mut self, data: &DataContainer) -> Result<()> {
        // Validate configured columns are present and datetime-castable.
        for name in &self.columns {
            let column = data
                .features()
                .column(name)
                .map_err(|_| FlowError::DataError(format!("column not found: {}", name)))?;
            Self::as_datetime(column.as_materialized_series())?;
        }
        self.fitted = true;
        Ok(())
    }

    fn transform(&mut self, data: &DataContainer) -> Result<DataContainer> {
        if !self.fitted {
            return Err(FlowError::NotFitted);
        }

        let mut features = data.features().clone();
        let mut columns_added = Vec::new();
        for name in &self.columns {
            let column = data
                .features()
                .column(name)
                .map_err(|_| FlowError::DataError(format!("column not found: {}", name)))?;
            let dt = Self::as_datetime(column.as_materialized_series())?;

            let parts: [(&str, Series); 4] = [
                ("year", dt.year()?.into_series()),
                ("month", dt.month()?.into_series()),
                ("day", dt.day()?.into_series()),
                ("weekday", dt.weekday()?.into_series()),
            ];
            for (suffix, series) in parts {
                let col_name = format!("{}_{}", name, suffix);
                let series = series
                    .cast(&DataType::Float64)?
                    .with_name(col_name.as_str().into());
                features = features
                    .with_column(series)
                    .map_err(|e| FlowError::DataError(e.to_string()))?
                    .clone();
                columns_added.push(col_name);
            }
            features = features
                .drop(name)
                .map_err(|e| FlowError::DataError(e.to_string()))?;
        }

        let changes = serde_json::json!({
            "columns_added": columns_added,
            "columns_removed": self.columns,
        });
        self.last_transform = Some(changes.clone());
        data.with_transformed(
            features,
            data.target().cloned(),
            HistoryEntry::new(self.name(), self.params(), changes),
        )
    }

    fn fit_metadata(&self) -> serde_json::Value {
        serde_json::json!({"columns": self.columns})
    }

    fn transform_metadata(&self) -> serde_json::Value {
        self.last_transform
            .clone()
            .unwrap_or(serde_json::Value::Null)
    }
}
