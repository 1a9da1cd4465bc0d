//! Duplicate row removal

use super::Operator;
use crate::data::{DataContainer, HistoryEntry};
use crate::error::{FlowError, Result};
use polars::prelude::*;
use std::collections::HashSet;

/// Removes exact duplicate feature rows, keeping the first occurrence.
/// Target rows are dropped in lockstep so the row-count invariant holds.
#[derive(Debug, Default)]
pub struct DropDuplicates {
    fitted: bool,
    last_transform: Option<serde_json::Value>,
}

impl DropDuplicates {
    pub fn new() -> Self {
        Self::default()
    }

    fn row_key(df: &DataFrame, row: usize) -> String {
        let mut key = String::new();
        for col in df.get_columns() {
            let value = col
                .get(row)
                .map(|v| v.to_string())
                .unwrap_or_else(|_| "∅".to_string());
            key.push_str(&value);
            key.push('\u{1f}');
        }
        key
    }
}

impl Operator for DropDuplicates {
    fn name(&self) -> &str {
        "duplicate_removal"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn fit(&mut self, _data: &DataContainer) -> Result<()> {
        // Nothing learned from data; the fit/transform protocol still applies.
        self.fitted = true;
        Ok(())
    }

    fn transform(&mut self, data: &DataContainer) -> Result<DataContainer> {
        if !self.fitted {
            return Err(FlowError::NotFitted);
        }

        let df = data.features();
        let n = df.height();
        let mut seen = HashSet::with_capacity(n);
        let mut keep = Vec::with_capacity(n);
        for row in 0..n {
            keep.push(seen.insert(Self::row_key(df, row)));
        }

        let mask = BooleanChunked::from_slice("keep".into(), &keep);
        let features = df
            .filter(&mask)
            .map_err(|e| FlowError::DataError(e.to_string()))?;
        let target = match data.target() {
            Some(t) => Some(
                t.filter(&mask)
                    .map_err(|e| FlowError::DataError(e.to_string()))?,
            ),
            None => None,
        };

        let rows_dropped = n - features.height();
        let changes = serde_json::json!({
            "rows_before": n,
            "rows_after": features.height(),
            "rows_dropped": rows_dropped,
        });
        self.last_transform = Some(changes.clone());

        data.with_transformed(
            features,
            target,
            HistoryEntry::new(self.name(), self.params(), changes),
        )
    }

    fn fit_metadata(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    fn transform_metadata(&self) -> serde_json::Value {
        self.last_transform
            .clone()
            .unwrap_or(serde_json::Value::Null)
    }
}
