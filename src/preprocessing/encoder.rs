//! Categorical encoding operator

use super::Operator;
use crate::data::{DataContainer, HistoryEntry};
use crate::error::{FlowError, Result};
use polars::prelude::*;
use std::collections::HashMap;

/// Ordinal label encoder for string columns. Fit learns the sorted category
/// table per column; transform maps values to their ordinal codes. A
/// category unseen at fit time is an input error, not a silent null.
#[derive(Debug)]
pub struct LabelEncoder {
    columns: Option<Vec<String>>,
    categories: HashMap<String, Vec<String>>,
    fitted: bool,
    last_transform: Option<serde_json::Value>,
}

impl LabelEncoder {
    pub fn new(columns: Option<Vec<String>>) -> Self {
        Self {
            columns,
            categories: HashMap::new(),
            fitted: false,
            last_transform: None,
        }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let columns = params.get("columns").and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        });
        Ok(Self::new(columns))
    }

    fn target_columns(&self, data: &DataContainer) -> Vec<String> {
        match &self.columns {
            Some(cols) => cols.clone(),
            None => data
                .features()
                .get_columns()
                .iter()
                .filter(|c| matches!(c.dtype(), DataType::String))
                .map(|c| c.name().to_string())
                .collect(),
        }
    }
}

impl Operator for LabelEncoder {
    fn name(&self) -> &str {
        "label_encoder"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({"columns": self.columns})
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn fit(&mut self, data: &DataContainer) -> Result<()> {
        self.categories.clear();
        for name in self.target_columns(data) {
            let column = data
                .features()
                .column(&name)
                .map_err(|_| FlowError::DataError(format!("column not found: {}", name)))?;
            let ca = column
                .as_materialized_series()
                .str()
                .map_err(|e| FlowError::DataError(e.to_string()))?
                .clone();
            let mut cats: Vec<String> = ca
                .into_iter()
                .flatten()
                .map(|s| s.to_string())
                .collect();
            cats.sort();
            cats.dedup();
            self.categories.insert(name, cats);
        }
        self.fitted = true;
        Ok(())
    }

    fn transform(&mut self, data: &DataContainer) -> Result<DataContainer> {
        if !self.fitted {
            return Err(FlowError::NotFitted);
        }

        let mut features = data.features().clone();
        let mut encoded_count = 0usize;
        for (name, cats) in &self.categories {
            if let Ok(column) = data.features().column(name) {
                let lookup: HashMap<&str, f64> = cats
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (c.as_str(), i as f64))
                    .collect();
                let ca = column
                    .as_materialized_series()
                    .str()
                    .map_err(|e| FlowError::DataError(e.to_string()))?
                    .clone();
                let mut codes = Vec::with_capacity(ca.len());
                for opt in ca.into_iter() {
                    match opt {
                        Some(value) => match lookup.get(value) {
                            Some(code) => codes.push(Some(*code)),
                            None => {
                                return Err(FlowError::InvalidInput(format!(
                                    "unseen category '{}' in column {}",
                                    value, name
                                )))
                            }
                        },
                        None => codes.push(None),
                    }
                }
                let encoded: Float64Chunked =
                    Float64Chunked::from_iter_options(name.as_str().into(), codes.into_iter());
                features = features
                    .with_column(encoded.into_series())
                    .map_err(|e| FlowError::DataError(e.to_string()))?
                    .clone();
                encoded_count += 1;
            }
        }

        let changes = serde_json::json!({"columns_encoded": encoded_count});
        self.last_transform = Some(changes.clone());
        data.with_transformed(
            features,
            data.target().cloned(),
            HistoryEntry::new(self.name(), self.params(), changes),
        )
    }

    fn fit_metadata(&self) -> serde_json::Value {
        serde_json::to_value(&self.categories).unwrap_or(serde_json::Value::Null)
    }

    fn transform_metadata(&self) -> serde_json::Value {
        self.last_transform
            .clone()
            .unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> DataContainer {
        let features = df!(
            "color" => &["red", "blue", "red", "green"],
            "size" => &[1.0, 2.0, 3.0, 4.0]
        )
        .unwrap();
        DataContainer::new(features, None).unwrap()
    }

    #[test]
    fn test_encodes_sorted_categories() {
        let data = container();
        let mut encoder = LabelEncoder::new(None);
        let out = encoder.fit_transform(&data).unwrap();

        let col = out
            .features()
            .column("color")
            .unwrap()
            .f64()
            .unwrap()
            .clone();
        // sorted categories: blue=0, green=1, red=2
        assert_eq!(col.get(0).unwrap(), 2.0);
        assert_eq!(col.get(1).unwrap(), 0.0);
        assert_eq!(col.get(3).unwrap(), 1.0);
    }

    #[test]
    fn test_unseen_category_fails() {
        let data = container();
        let mut encoder = LabelEncoder::new(None);
        encoder.fit(&data).unwrap();

        let new_features = df!(
            "color" => &["red", "purple"],
            "size" => &[1.0, 2.0]
        )
        .unwrap();
        let new_data = DataContainer::new(new_features, None).unwrap();
        let err = encoder.transform(&new_data).unwrap_err();
        assert!(err.to_string().contains("unseen category"));
    }

    #[test]
    fn test_numeric_columns_untouched() {
        let data = container();
        let mut encoder = LabelEncoder::new(None);
        let out = encoder.fit_transform(&data).unwrap();
        let size = out.features().column("size").unwrap().f64().unwrap().clone();
        assert_eq!(size.get(2).unwrap(), 3.0);
    }
}
