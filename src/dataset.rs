//! Dataset resolution boundary
//!
//! The executor resolves a dataset node's configured reference (sample key
//! or dataset UUID) into a [`DataContainer`] through the [`DatasetSource`]
//! trait. Real uploaded datasets live behind an out-of-scope storage
//! collaborator; [`SampleDatasets`] ships the built-in sample data used by
//! demos and tests.

use crate::data::DataContainer;
use crate::error::{FlowError, Result};
use polars::prelude::*;
use uuid::Uuid;

/// Reference to a dataset: a built-in sample key or a stored dataset id
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetRef {
    Sample(String),
    Uuid(Uuid),
}

impl DatasetRef {
    /// Parse from the dataset node's config string. Anything that parses as
    /// a UUID is a stored dataset; everything else is a sample key.
    pub fn parse(s: &str) -> Self {
        match Uuid::parse_str(s) {
            Ok(id) => DatasetRef::Uuid(id),
            Err(_) => DatasetRef::Sample(s.to_string()),
        }
    }
}

/// Resolves dataset references into data containers.
pub trait DatasetSource {
    fn load(&self, reference: &DatasetRef, target: Option<&str>) -> Result<DataContainer>;
}

/// Built-in sample datasets
#[derive(Debug, Default)]
pub struct SampleDatasets;

impl SampleDatasets {
    pub fn new() -> Self {
        Self
    }

    fn iris(target: Option<&str>) -> Result<DataContainer> {
        let n = IRIS.len();
        let mut sepal_length = Vec::with_capacity(n);
        let mut sepal_width = Vec::with_capacity(n);
        let mut petal_length = Vec::with_capacity(n);
        let mut petal_width = Vec::with_capacity(n);
        let mut species = Vec::with_capacity(n);
        for row in IRIS.iter() {
            sepal_length.push(row[0]);
            sepal_width.push(row[1]);
            petal_length.push(row[2]);
            petal_width.push(row[3]);
            species.push(row[4]);
        }

        let features = df!(
            "sepal_length" => &sepal_length,
            "sepal_width" => &sepal_width,
            "petal_length" => &petal_length,
            "petal_width" => &petal_width
        )
        .map_err(|e| FlowError::DataError(e.to_string()))?;

        let target_name = target.unwrap_or("species");
        if target_name != "species" {
            return Err(FlowError::DataError(format!(
                "iris has no column named {}",
                target_name
            )));
        }
        let target_series = Series::new("species".into(), &species);
        DataContainer::new(features, Some(target_series))
    }

    /// Noise-free linear data for regression demos: y = 3*x1 + 2*x2 + 1.
    fn linear(target: Option<&str>) -> Result<DataContainer> {
        let n = 60usize;
        let x1: Vec<f64> = (0..n).map(|i| i as f64 * 0.5).collect();
        let x2: Vec<f64> = (0..n).map(|i| ((i * 7) % 13) as f64).collect();
        let y: Vec<f64> = x1
            .iter()
            .zip(x2.iter())
            .map(|(a, b)| 3.0 * a + 2.0 * b + 1.0)
            .collect();

        let features =
            df!("x1" => &x1, "x2" => &x2).map_err(|e| FlowError::DataError(e.to_string()))?;
        let target_name = target.unwrap_or("y");
        if target_name != "y" {
            return Err(FlowError::DataError(format!(
                "linear has no column named {}",
                target_name
            )));
        }
        let target_series = Series::new("y".into(), &y);
        DataContainer::new(features, Some(target_series))
    }
}

impl DatasetSource for SampleDatasets {
    fn load(&self, reference: &DatasetRef, target: Option<&str>) -> Result<DataContainer> {
        match reference {
            DatasetRef::Sample(key) => match key.as_str() {
                "iris" => Self::iris(target),
                "linear" => Self::linear(target),
                other => Err(FlowError::DatasetNotFound(other.to_string())),
            },
            DatasetRef::Uuid(id) => Err(FlowError::DatasetNotFound(id.to_string())),
        }
    }
}

/// Fisher's iris: sepal length/width, petal length/width, class (0/1/2).
#[rustfmt::skip]
const IRIS: [[f64; 5]; 150] = [
    [5.1, 3.5, 1.4, 0.2, 0.0], [4.9, 3.0, 1.4, 0.2, 0.0], [4.7, 3.2, 1.3, 0.2, 0.0],
    [4.6, 3.1, 1.5, 0.2, 0.0], [5.0, 3.6, 1.4, 0.2, 0.0], [5.4, 3.9, 1.7, 0.4, 0.0],
    [4.6, 3.4, 1.4, 0.3, 0.0], [5.0, 3.4, 1.5, 0.2, 0.0], [4.4, 2.9, 1.4, 0.2, 0.0],
    [4.9, 3.1, 1.5, 0.1, 0.0], [5.4, 3.7, 1.5, 0.2, 0.0], [4.8, 3.4, 1.6, 0.2, 0.0],
    [4.8, 3.0, 1.4, 0.1, 0.0], [4.3, 3.0, 1.1, 0.1, 0.0], [5.8, 4.0, 1.2, 0.2, 0.0],
    [5.7, 4.4, 1.5, 0.4, 0.0], [5.4, 3.9, 1.3, 0.4, 0.0], [5.1, 3.5, 1.4, 0.3, 0.0],
    [5.7, 3.8, 1.7, 0.3, 0.0], [5.1, 3.8, 1.5, 0.3, 0.0], [5.4, 3.4, 1.7, 0.2, 0.0],
    [5.1, 3.7, 1.5, 0.4, 0.0], [4.6, 3.6, 1.0, 0.2, 0.0], [5.1, 3.3, 1.7, 0.5, 0.0],
    [4.8, 3.4, 1.9, 0.2, 0.0], [5.0, 3.0, 1.6, 0.2, 0.0], [5.0, 3.4, 1.6, 0.4, 0.0],
    [5.2, 3.5, 1.5, 0.2, 0.0], [5.2, 3.4, 1.4, 0.2, 0.0], [4.7, 3.2, 1.6, 0.2, 0.0],
    [4.8, 3.1, 1.6, 0.2, 0.0], [5.4, 3.4, 1.5, 0.4, 0.0], [5.2, 4.1, 1.5, 0.1, 0.0],
    [5.5, 4.2, 1.4, 0.2, 0.0], [4.9, 3.1, 1.5, 0.2, 0.0], [5.0, 3.2, 1.2, 0.2, 0.0],
    [5.5, 3.5, 1.3, 0.2, 0.0], [4.9, 3.6, 1.4, 0.1, 0.0], [4.4, 3.0, 1.3, 0.2, 0.0],
    [5.1, 3.4, 1.5, 0.2, 0.0], [5.0, 3.5, 1.3, 0.3, 0.0], [4.5, 2.3, 1.3, 0.3, 0.0],
    [4.4, 3.2, 1.3, 0.2, 0.0], [5.0, 3.5, 1.6, 0.6, 0.0], [5.1, 3.8, 1.9, 0.4, 0.0],
    [4.8, 3.0, 1.4, 0.3, 0.0], [5.1, 3.8, 1.6, 0.2, 0.0], [4.6, 3.2, 1.4, 0.2, 0.0],
    [5.3, 3.7, 1.5, 0.2, 0.0], [5.0, 3.3, 1.4, 0.2, 0.0],
    [7.0, 3.2, 4.7, 1.4, 1.0], [6.4, 3.2, 4.5, 1.5, 1.0], [6.9, 3.1, 4.9, 1.5, 1.0],
    [5.5, 2.3, 4.0, 1.3, 1.0], [6.5, 2.8, 4.6, 1.5, 1.0], [5.7, 2.8, 4.5, 1.3, 1.0],
    [6.3, 3.3, 4.7, 1.6, 1.0], [4.9, 2.4, 3.3, 1.0, 1.0], [6.6, 2.9, 4.6, 1.3, 1.0],
    [5.2, 2.7, 3.9, 1.4, 1.0], [5.0, 2.0, 3.5, 1.0, 1.0], [5.9, 3.0, 4.2, 1.5, 1.0],
    [6.0, 2.2, 4.0, 1.0, 1.0], [6.1, 2.9, 4.7, 1.4, 1.0], [5.6, 2.9, 3.6, 1.3, 1.0],
    [6.7, 3.1, 4.4, 1.4, 1.0], [5.6, 3.0, 4.5, 1.5, 1.0], [5.8, 2.7, 4.1, 1.0, 1.0],
    [6.2, 2.2, 4.5, 1.5, 1.0], [5.6, 2.5, 3.9, 1.1, 1.0], [5.9, 3.2, 4.8, 1.8, 1.0],
    [6.1, 2.8, 4.0, 1.3, 1.0], [6.3, 2.5, 4.9, 1.5, 1.0], [6.1, 2.8, 4.7, 1.2, 1.0],
    [6.4, 2.9, 4.3, 1.3, 1.0], [6.6, 3.0, 4.4, 1.4, 1.0], [6.8, 2.8, 4.8, 1.4, 1.0],
    [6.7, 3.0, 5.0, 1.7, 1.0], [6.0, 2.9, 4.5, 1.5, 1.0], [5.7, 2.6, 3.5, 1.0, 1.0],
    [5.5, 2.4, 3.8, 1.1, 1.0], [5.5, 2.4, 3.7, 1.0, 1.0], [5.8, 2.7, 3.9, 1.2, 1.0],
    [6.0, 2.7, 5.1, 1.6, 1.0], [5.4, 3.0, 4.5, 1.5, 1.0], [6.0, 3.4, 4.5, 1.6, 1.0],
    [6.7, 3.1, 4.7, 1.5, 1.0], [6.3, 2.3, 4.4, 1.3, 1.0], [5.6, 3.0, 4.1, 1.3, 1.0],
    [5.5, 2.5, 4.0, 1.3, 1.0], [5.5, 2.6, 4.4, 1.2, 1.0], [6.1, 3.0, 4.6, 1.4, 1.0],
    [5.8, 2.6, 4.0, 1.2, 1.0], [5.0, 2.3, 3.3, 1.0, 1.0], [5.6, 2.7, 4.2, 1.3, 1.0],
    [5.7, 3.0, 4.2, 1.2, 1.0], [5.7, 2.9, 4.2, 1.3, 1.0], [6.2, 2.9, 4.3, 1.3, 1.0],
    [5.1, 2.5, 3.0, 1.1, 1.0], [5.7, 2.8, 4.1, 1.3, 1.0],
    [6.3, 3.3, 6.0, 2.5, 2.0], [5.8, 2.7, 5.1, 1.9, 2.0], [7.1, 3.0, 5.9, 2.1, 2.0],
    [6.3, 2.9, 5.6, 1.8, 2.0], [6.5, 3.0, 5.8, 2.2, 2.0], [7.6, 3.0, 6.6, 2.1, 2.0],
    [4.9, 2.5, 4.5, 1.7, 2.0], [7.3, 2.9, 6.3, 1.8, 2.0], [6.7, 2.5, 5.8, 1.8, 2.0],
    [7.2, 3.6, 6.1, 2.5, 2.0], [6.5, 3.2, 5.1, 2.0, 2.0], [6.4, 2.7, 5.3, 1.9, 2.0],
    [6.8, 3.0, 5.5, 2.1, 2.0], [5.7, 2.5, 5.0, 2.0, 2.0], [5.8, 2.8, 5.1, 2.4, 2.0],
    [6.4, 3.2, 5.3, 2.3, 2.0], [6.5, 3.0, 5.5, 1.8, 2.0], [7.7, 3.8, 6.7, 2.2, 2.0],
    [7.7, 2.6, 6.9, 2.3, 2.0], [6.0, 2.2, 5.0, 1.5, 2.0], [6.9, 3.2, 5.7, 2.3, 2.0],
    [5.6, 2.8, 4.9, 2.0, 2.0], [7.7, 2.8, 6.7, 2.0, 2.0], [6.3, 2.7, 4.9, 1.8, 2.0],
    [6.7, 3.3, 5.7, 2.1, 2.0], [7.2, 3.2, 6.0, 1.8, 2.0], [6.2, 2.8, 4.8, 1.8, 2.0],
    [6.1, 3.0, 4.9, 1.8, 2.0], [6.4, 2.8, 5.6, 2.1, 2.0], [7.2, 3.0, 5.8, 1.6, 2.0],
    [7.4, 2.8, 6.1, 1.9, 2.0], [7.9, 3.8, 6.4, 2.0, 2.0], [6.4, 2.8, 5.6, 2.2, 2.0],
    [6.3, 2.8, 5.1, 1.5, 2.0], [6.1, 2.6, 5.6, 1.4, 2.0], [7.7, 3.0, 6.1, 2.3, 2.0],
    [6.3, 3.4, 5.6, 2.4, 2.0], [6.4, 3.1, 5.5, 1.8, 2.0], [6.0, 3.0, 4.8, 1.8, 2.0],
    [6.9, 3.1, 5.4, 2.1, 2.0], [6.7, 3.1, 5.6, 2.4, 2.0], [6.9, 3.1, 5.1, 2.3, 2.0],
    [5.8, 2.7, 5.1, 1.9, 2.0], [6.8, 3.2, 5.9, 2.3, 2.0], [6.7, 3.3, 5.7, 2.5, 2.0],
    [6.7, 3.0, 5.2, 2.3, 2.0], [6.3, 2.5, 5.0, 1.9, 2.0], [6.5, 3.0, 5.2, 2.0, 2.0],
    [6.2, 3.4, 5.4, 2.3, 2.0], [5.9, 3.0, 5.1, 1.8, 2.0],
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_parse() {
        assert_eq!(
            DatasetRef::parse("iris"),
            DatasetRef::Sample("iris".to_string())
        );
        let id = "a1a2a3a4-b1b2-c1c2-d1d2-e1e2e3e4e5e6";
        assert!(matches!(DatasetRef::parse(id), DatasetRef::Uuid(_)));
    }

    #[test]
    fn test_iris_shape() {
        let source = SampleDatasets::new();
        let c = source
            .load(&DatasetRef::Sample("iris".to_string()), None)
            .unwrap();
        assert_eq!(c.n_rows(), 150);
        assert_eq!(c.n_features(), 4);
        let y = c.target_vector().unwrap();
        assert_eq!(y.iter().filter(|&&v| v == 0.0).count(), 50);
        assert_eq!(y.iter().filter(|&&v| v == 2.0).count(), 50);
    }

    #[test]
    fn test_unknown_sample_key() {
        let source = SampleDatasets::new();
        let err = source
            .load(&DatasetRef::Sample("titanic".to_string()), None)
            .unwrap_err();
        assert!(matches!(err, FlowError::DatasetNotFound(_)));
    }
}
