//! Versioned tabular data container
//!
//! A [`DataContainer`] is one preprocessing snapshot: a feature table, an
//! optional target column, and a metadata record carrying the ordered log of
//! the transformations that produced it. Containers are never mutated in
//! place — every transform yields a new container with an appended history
//! entry, so each pipeline stage exclusively owns the snapshot it produced.

use crate::error::{FlowError, Result};
use chrono::Utc;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// One entry in the container's transformation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Operator that produced this snapshot
    pub operator: String,
    /// Parameters the operator ran with
    pub params: serde_json::Value,
    /// Observed changes (rows dropped, columns added, ...)
    pub changes: serde_json::Value,
}

impl HistoryEntry {
    pub fn new(
        operator: impl Into<String>,
        params: serde_json::Value,
        changes: serde_json::Value,
    ) -> Self {
        Self {
            operator: operator.into(),
            params,
            changes,
        }
    }
}

/// Container metadata: creation time, history, shapes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMeta {
    pub created_at: String,
    pub history: Vec<HistoryEntry>,
    pub original_shape: (usize, usize),
    pub current_shape: (usize, usize),
}

/// Snapshot of a tabular dataset plus transformation history
#[derive(Debug, Clone)]
pub struct DataContainer {
    features: DataFrame,
    target: Option<Series>,
    target_name: Option<String>,
    meta: ContainerMeta,
}

impl DataContainer {
    /// Create a container from a feature frame and an optional target column.
    pub fn new(features: DataFrame, target: Option<Series>) -> Result<Self> {
        if let Some(ref t) = target {
            if t.len() != features.height() {
                return Err(FlowError::InvalidInput(format!(
                    "feature table has {} rows but target has {}",
                    features.height(),
                    t.len()
                )));
            }
        }

        let shape = (features.height(), features.width());
        let target_name = target.as_ref().map(|t| t.name().to_string());
        Ok(Self {
            features,
            target,
            target_name,
            meta: ContainerMeta {
                created_at: Utc::now().to_rfc3339(),
                history: Vec::new(),
                original_shape: shape,
                current_shape: shape,
            },
        })
    }

    pub fn features(&self) -> &DataFrame {
        &self.features
    }

    pub fn target(&self) -> Option<&Series> {
        self.target.as_ref()
    }

    pub fn target_name(&self) -> Option<&str> {
        self.target_name.as_deref()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn n_rows(&self) -> usize {
        self.features.height()
    }

    pub fn n_features(&self) -> usize {
        self.features.width()
    }

    pub fn meta(&self) -> &ContainerMeta {
        &self.meta
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.meta.history
    }

    /// Produce the successor snapshot: same provenance, one more history
    /// entry, restamped shape. The current container is left untouched.
    pub fn with_transformed(
        &self,
        features: DataFrame,
        target: Option<Series>,
        entry: HistoryEntry,
    ) -> Result<Self> {
        if let Some(ref t) = target {
            if t.len() != features.height() {
                return Err(FlowError::InvalidInput(format!(
                    "transformed feature table has {} rows but target has {}",
                    features.height(),
                    t.len()
                )));
            }
        }

        let mut meta = self.meta.clone();
        meta.history.push(entry);
        meta.current_shape = (features.height(), features.width());
        let target_name = target.as_ref().map(|t| t.name().to_string());
        Ok(Self {
            features,
            target,
            target_name,
            meta,
        })
    }

    /// Extract all feature columns as a row-major f64 matrix.
    /// Column-wise collection first, then cache-friendly construction.
    pub fn feature_matrix(&self) -> Result<Array2<f64>> {
        let names = self.feature_names();
        let n_rows = self.features.height();
        let n_cols = names.len();

        let col_data: Vec<Vec<f64>> = names
            .iter()
            .map(|name| {
                let series = self
                    .features
                    .column(name)
                    .map_err(|_| FlowError::DataError(format!("column not found: {}", name)))?;
                let series_f64 = series
                    .cast(&DataType::Float64)
                    .map_err(|e| FlowError::DataError(e.to_string()))?;
                let values: Vec<f64> = series_f64
                    .f64()
                    .map_err(|e| FlowError::DataError(e.to_string()))?
                    .into_iter()
                    .map(|v| v.unwrap_or(0.0))
                    .collect();
                Ok(values)
            })
            .collect::<Result<Vec<Vec<f64>>>>()?;

        let col_refs: Vec<&[f64]> = col_data.iter().map(|c| c.as_slice()).collect();
        Ok(Array2::from_shape_fn((n_rows, n_cols), |(r, c)| {
            col_refs[c][r]
        }))
    }

    /// Target column as an f64 vector.
    pub fn target_vector(&self) -> Result<Array1<f64>> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| FlowError::InvalidInput("container has no target column".to_string()))?;
        let target_f64 = target
            .cast(&DataType::Float64)
            .map_err(|e| FlowError::DataError(e.to_string()))?;
        let values: Vec<f64> = target_f64
            .f64()
            .map_err(|e| FlowError::DataError(e.to_string()))?
            .into_iter()
            .map(|v| v.unwrap_or(0.0))
            .collect();
        Ok(Array1::from_vec(values))
    }

    /// Seeded shuffled train/holdout split.
    pub fn train_test_split(&self, test_fraction: f64, seed: u64) -> Result<(Self, Self)> {
        if !(0.0..1.0).contains(&test_fraction) || test_fraction == 0.0 {
            return Err(FlowError::InvalidInput(format!(
                "test_fraction must be in (0, 1), got {}",
                test_fraction
            )));
        }

        let n = self.n_rows();
        let test_size = ((n as f64) * test_fraction).round().max(1.0) as usize;
        if test_size >= n {
            return Err(FlowError::InvalidInput(format!(
                "test_fraction {} leaves no training rows for {} samples",
                test_fraction, n
            )));
        }

        let mut indices: Vec<u32> = (0..n as u32).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let test_idx = IdxCa::from_vec("idx".into(), indices[..test_size].to_vec());
        let train_idx = IdxCa::from_vec("idx".into(), indices[test_size..].to_vec());

        let take = |idx: &IdxCa| -> Result<Self> {
            let features = self
                .features
                .take(idx)
                .map_err(|e| FlowError::DataError(e.to_string()))?;
            let target = match &self.target {
                Some(t) => Some(t.take(idx).map_err(|e| FlowError::DataError(e.to_string()))?),
                None => None,
            };
            let mut meta = self.meta.clone();
            meta.current_shape = (features.height(), features.width());
            Ok(Self {
                features,
                target,
                target_name: self.target_name.clone(),
                meta,
            })
        };

        Ok((take(&train_idx)?, take(&test_idx)?))
    }
}
