//! Model evaluators
//!
//! Three stateless evaluators, one per problem family. Individual metric
//! failures degrade to [`MetricValue::Null`] (logged), never aborting the
//! whole evaluation — partial metrics are still useful to the end user.

use crate::error::{FlowError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// One computed metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    Matrix(Vec<Vec<f64>>),
    Null,
}

impl MetricValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MetricValue::Null)
    }
}

/// Metric-name → value mapping
pub type Metrics = BTreeMap<String, MetricValue>;

fn check_lengths(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<()> {
    if y_true.is_empty() {
        return Err(FlowError::InvalidInput(
            "evaluation inputs are empty".to_string(),
        ));
    }
    if y_true.len() != y_pred.len() {
        return Err(FlowError::InvalidInput(format!(
            "y_true has length {} but y_pred has length {}",
            y_true.len(),
            y_pred.len()
        )));
    }
    Ok(())
}

fn sorted_distinct(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.collect();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    v.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    v
}

fn class_index(classes: &[f64], label: f64) -> Option<usize> {
    classes.iter().position(|&c| (c - label).abs() < 1e-9)
}

// ───────────────────────────────────────────────────────────────────────────
//  Classification
// ───────────────────────────────────────────────────────────────────────────

/// Accuracy, precision/recall/F1, confusion matrix, and ROC-AUC.
///
/// Averaging is binary when exactly two distinct labels appear in `y_true`
/// and support-weighted otherwise (source platform behavior, kept as-is).
#[derive(Debug, Default)]
pub struct ClassificationEvaluator;

impl ClassificationEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        y_true: &Array1<f64>,
        y_pred: &Array1<f64>,
        proba: Option<&Array2<f64>>,
    ) -> Result<Metrics> {
        check_lengths(y_true, y_pred)?;

        let n = y_true.len();
        let true_classes = sorted_distinct(y_true.iter().copied());
        let all_classes = sorted_distinct(y_true.iter().chain(y_pred.iter()).copied());
        let k = all_classes.len();

        // Confusion matrix: row = true class, col = predicted class,
        // sorted class order
        let mut cm = vec![vec![0.0f64; k]; k];
        for (t, p) in y_true.iter().zip(y_pred.iter()) {
            if let (Some(i), Some(j)) = (class_index(&all_classes, *t), class_index(&all_classes, *p))
            {
                cm[i][j] += 1.0;
            }
        }

        let correct = y_true
            .iter()
            .zip(y_pred.iter())
            .filter(|(t, p)| (**t - **p).abs() < 1e-9)
            .count();
        let accuracy = correct as f64 / n as f64;

        // Per-class precision/recall/F1 from the matrix
        let mut precision = vec![0.0; k];
        let mut recall = vec![0.0; k];
        let mut f1 = vec![0.0; k];
        let mut support = vec![0.0; k];
        for i in 0..k {
            let tp = cm[i][i];
            let fp: f64 = (0..k).map(|r| cm[r][i]).sum::<f64>() - tp;
            let fn_: f64 = cm[i].iter().sum::<f64>() - tp;
            support[i] = cm[i].iter().sum();
            precision[i] = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
            recall[i] = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
            f1[i] = if precision[i] + recall[i] > 0.0 {
                2.0 * precision[i] * recall[i] / (precision[i] + recall[i])
            } else {
                0.0
            };
        }

        let (p_avg, r_avg, f_avg) = if true_classes.len() == 2 {
            // Binary: report the positive (greater) class
            let pos = class_index(&all_classes, true_classes[1]).unwrap_or(k - 1);
            (precision[pos], recall[pos], f1[pos])
        } else {
            // Weighted by true-class support
            let total: f64 = support.iter().sum();
            let weighted = |values: &[f64]| {
                values
                    .iter()
                    .zip(support.iter())
                    .map(|(v, s)| v * s)
                    .sum::<f64>()
                    / total.max(1.0)
            };
            (weighted(&precision), weighted(&recall), weighted(&f1))
        };

        let mut metrics = Metrics::new();
        metrics.insert("accuracy".to_string(), MetricValue::Scalar(accuracy));
        metrics.insert("precision".to_string(), MetricValue::Scalar(p_avg));
        metrics.insert("recall".to_string(), MetricValue::Scalar(r_avg));
        metrics.insert("f1_score".to_string(), MetricValue::Scalar(f_avg));
        metrics.insert("confusion_matrix".to_string(), MetricValue::Matrix(cm));

        if let Some(proba) = proba {
            let auc = if true_classes.len() == 2 {
                self.roc_auc(y_true, proba, &true_classes)
            } else {
                None
            };
            match auc {
                Some(v) => {
                    metrics.insert("roc_auc".to_string(), MetricValue::Scalar(v));
                }
                None => {
                    warn!("roc_auc computation failed, reporting null");
                    metrics.insert("roc_auc".to_string(), MetricValue::Null);
                }
            }
        }

        Ok(metrics)
    }

    /// Rank-based (Mann-Whitney) AUC with tie-averaged ranks. The positive
    /// class is the greater label; its score is column 1 when the matrix has
    /// two or more columns, column 0 otherwise.
    fn roc_auc(
        &self,
        y_true: &Array1<f64>,
        proba: &Array2<f64>,
        true_classes: &[f64],
    ) -> Option<f64> {
        if proba.nrows() != y_true.len() || proba.ncols() == 0 {
            return None;
        }
        let score_col = if proba.ncols() >= 2 { 1 } else { 0 };
        let positive = true_classes[1];

        let mut pairs: Vec<(f64, bool)> = y_true
            .iter()
            .enumerate()
            .map(|(i, &t)| (proba[[i, score_col]], (t - positive).abs() < 1e-9))
            .collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let n_pos = pairs.iter().filter(|(_, p)| *p).count() as f64;
        let n_neg = pairs.len() as f64 - n_pos;
        if n_pos == 0.0 || n_neg == 0.0 {
            return None;
        }

        // Average ranks over score ties
        let n = pairs.len();
        let mut rank_sum_pos = 0.0;
        let mut i = 0;
        while i < n {
            let mut j = i;
            while j + 1 < n && (pairs[j + 1].0 - pairs[i].0).abs() < 1e-12 {
                j += 1;
            }
            let avg_rank = ((i + 1 + j + 1) as f64) / 2.0;
            for pair in pairs.iter().take(j + 1).skip(i) {
                if pair.1 {
                    rank_sum_pos += avg_rank;
                }
            }
            i = j + 1;
        }

        Some((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
    }
}

// ───────────────────────────────────────────────────────────────────────────
//  Regression
// ───────────────────────────────────────────────────────────────────────────

/// MSE, RMSE, MAE and R².
#[derive(Debug, Default)]
pub struct RegressionEvaluator;

impl RegressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<Metrics> {
        check_lengths(y_true, y_pred)?;

        let n = y_true.len() as f64;
        let errors: Vec<f64> = y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(t, p)| t - p)
            .collect();

        let mse: f64 = errors.iter().map(|e| e * e).sum::<f64>() / n;
        let mae: f64 = errors.iter().map(|e| e.abs()).sum::<f64>() / n;

        let y_mean: f64 = y_true.iter().sum::<f64>() / n;
        let ss_tot: f64 = y_true.iter().map(|y| (y - y_mean).powi(2)).sum();
        let ss_res: f64 = errors.iter().map(|e| e.powi(2)).sum();
        let r2 = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res.abs() < 1e-12 {
            1.0
        } else {
            0.0
        };

        let mut metrics = Metrics::new();
        metrics.insert("mse".to_string(), MetricValue::Scalar(mse));
        metrics.insert("rmse".to_string(), MetricValue::Scalar(mse.sqrt()));
        metrics.insert("mae".to_string(), MetricValue::Scalar(mae));
        metrics.insert("r2_score".to_string(), MetricValue::Scalar(r2));
        Ok(metrics)
    }
}

// ───────────────────────────────────────────────────────────────────────────
//  Clustering
// ───────────────────────────────────────────────────────────────────────────

/// Silhouette, Davies-Bouldin, Calinski-Harabasz, inertia.
#[derive(Debug, Default)]
pub struct ClusteringEvaluator;

impl ClusteringEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// `inertia` may be supplied by the trainer; otherwise it is computed
    /// from the feature matrix and cluster assignments.
    pub fn evaluate(
        &self,
        x: &Array2<f64>,
        labels: &Array1<f64>,
        inertia: Option<f64>,
    ) -> Result<Metrics> {
        if labels.len() != x.nrows() {
            return Err(FlowError::InvalidInput(format!(
                "X has {} rows but labels has length {}",
                x.nrows(),
                labels.len()
            )));
        }

        let clusters = sorted_distinct(labels.iter().copied());
        if clusters.len() < 2 {
            return Err(FlowError::InvalidInput(
                "clustering metrics require at least 2 distinct clusters".to_string(),
            ));
        }

        let mut metrics = Metrics::new();
        let mut insert = |name: &str, value: Option<f64>| match value {
            Some(v) if v.is_finite() => {
                metrics.insert(name.to_string(), MetricValue::Scalar(v));
            }
            _ => {
                warn!(metric = name, "clustering metric computation failed, reporting null");
                metrics.insert(name.to_string(), MetricValue::Null);
            }
        };

        insert("silhouette_score", self.silhouette(x, labels, &clusters));
        insert("davies_bouldin", self.davies_bouldin(x, labels, &clusters));
        insert(
            "calinski_harabasz",
            self.calinski_harabasz(x, labels, &clusters),
        );
        insert(
            "inertia",
            inertia.or_else(|| self.inertia(x, labels, &clusters)),
        );

        Ok(metrics)
    }

    fn member_indices(labels: &Array1<f64>, cluster: f64) -> Vec<usize> {
        labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| (l - cluster).abs() < 1e-9)
            .map(|(i, _)| i)
            .collect()
    }

    fn row_distance(x: &Array2<f64>, a: usize, b: usize) -> f64 {
        x.row(a)
            .iter()
            .zip(x.row(b).iter())
            .map(|(u, v)| (u - v).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    fn centroid(x: &Array2<f64>, members: &[usize]) -> Vec<f64> {
        let d = x.ncols();
        let mut c = vec![0.0; d];
        for &i in members {
            for j in 0..d {
                c[j] += x[[i, j]];
            }
        }
        for v in &mut c {
            *v /= members.len().max(1) as f64;
        }
        c
    }

    fn dist_to_point(x: &Array2<f64>, i: usize, point: &[f64]) -> f64 {
        x.row(i)
            .iter()
            .zip(point.iter())
            .map(|(u, v)| (u - v).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    fn silhouette(&self, x: &Array2<f64>, labels: &Array1<f64>, clusters: &[f64]) -> Option<f64> {
        let n = x.nrows();
        let memberships: Vec<Vec<usize>> = clusters
            .iter()
            .map(|&c| Self::member_indices(labels, c))
            .collect();

        let mut total = 0.0;
        for i in 0..n {
            let own = class_index(clusters, labels[i])?;
            let own_members = &memberships[own];
            if own_members.len() <= 1 {
                continue;
            }

            let a: f64 = own_members
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| Self::row_distance(x, i, j))
                .sum::<f64>()
                / (own_members.len() - 1) as f64;

            let b = memberships
                .iter()
                .enumerate()
                .filter(|(c, members)| *c != own && !members.is_empty())
                .map(|(_, members)| {
                    members
                        .iter()
                        .map(|&j| Self::row_distance(x, i, j))
                        .sum::<f64>()
                        / members.len() as f64
                })
                .fold(f64::MAX, f64::min);

            total += (b - a) / a.max(b).max(1e-12);
        }
        Some(total / n as f64)
    }

    fn davies_bouldin(
        &self,
        x: &Array2<f64>,
        labels: &Array1<f64>,
        clusters: &[f64],
    ) -> Option<f64> {
        let k = clusters.len();
        let memberships: Vec<Vec<usize>> = clusters
            .iter()
            .map(|&c| Self::member_indices(labels, c))
            .collect();
        let centroids: Vec<Vec<f64>> = memberships.iter().map(|m| Self::centroid(x, m)).collect();
        let scatters: Vec<f64> = memberships
            .iter()
            .zip(centroids.iter())
            .map(|(members, centroid)| {
                members
                    .iter()
                    .map(|&i| Self::dist_to_point(x, i, centroid))
                    .sum::<f64>()
                    / members.len().max(1) as f64
            })
            .collect();

        let mut db = 0.0;
        for i in 0..k {
            let mut worst: f64 = 0.0;
            for j in 0..k {
                if i == j {
                    continue;
                }
                let dist: f64 = centroids[i]
                    .iter()
                    .zip(centroids[j].iter())
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    .sqrt();
                if dist <= 1e-12 {
                    return None;
                }
                worst = worst.max((scatters[i] + scatters[j]) / dist);
            }
            db += worst;
        }
        Some(db / k as f64)
    }

    fn calinski_harabasz(
        &self,
        x: &Array2<f64>,
        labels: &Array1<f64>,
        clusters: &[f64],
    ) -> Option<f64> {
        let n = x.nrows();
        let k = clusters.len();
        if n <= k {
            return None;
        }

        let all: Vec<usize> = (0..n).collect();
        let global = Self::centroid(x, &all);

        let mut between = 0.0;
        let mut within = 0.0;
        for &c in clusters {
            let members = Self::member_indices(labels, c);
            let centroid = Self::centroid(x, &members);
            let centroid_dist: f64 = centroid
                .iter()
                .zip(global.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            between += members.len() as f64 * centroid_dist;
            within += members
                .iter()
                .map(|&i| Self::dist_to_point(x, i, &centroid).powi(2))
                .sum::<f64>();
        }

        if within <= 1e-12 {
            return None;
        }
        Some((between / (k - 1) as f64) / (within / (n - k) as f64))
    }

    fn inertia(&self, x: &Array2<f64>, labels: &Array1<f64>, clusters: &[f64]) -> Option<f64> {
        let mut total = 0.0;
        for &c in clusters {
            let members = Self::member_indices(labels, c);
            let centroid = Self::centroid(x, &members);
            total += members
                .iter()
                .map(|&i| Self::dist_to_point(x, i, &centroid).powi(2))
                .sum::<f64>();
        }
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_classification_scenario() {
        let y_true = array![0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let y_pred = array![0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0];

        let metrics = ClassificationEvaluator::new()
            .evaluate(&y_true, &y_pred, None)
            .unwrap();

        assert_eq!(metrics["accuracy"].as_scalar().unwrap(), 0.75);
        match &metrics["confusion_matrix"] {
            MetricValue::Matrix(cm) => {
                assert_eq!(cm.len(), 2);
                assert_eq!(cm[0].len(), 2);
                // true 0: 3 predicted 0, 1 predicted 1
                assert_eq!(cm[0], vec![3.0, 1.0]);
                assert_eq!(cm[1], vec![1.0, 3.0]);
            }
            other => panic!("expected matrix, got {:?}", other),
        }
    }

    #[test]
    fn test_binary_averaging_uses_positive_class() {
        let y_true = array![0.0, 0.0, 1.0, 1.0];
        let y_pred = array![0.0, 1.0, 1.0, 1.0];
        let metrics = ClassificationEvaluator::new()
            .evaluate(&y_true, &y_pred, None)
            .unwrap();
        // positive class 1: tp=2 fp=1 fn=0
        assert!((metrics["precision"].as_scalar().unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(metrics["recall"].as_scalar().unwrap(), 1.0);
    }

    #[test]
    fn test_roc_auc_perfect_separation() {
        let y_true = array![0.0, 0.0, 1.0, 1.0];
        let y_pred = array![0.0, 0.0, 1.0, 1.0];
        let proba = array![[0.9, 0.1], [0.8, 0.2], [0.2, 0.8], [0.1, 0.9]];
        let metrics = ClassificationEvaluator::new()
            .evaluate(&y_true, &y_pred, Some(&proba))
            .unwrap();
        assert_eq!(metrics["roc_auc"].as_scalar().unwrap(), 1.0);
    }

    #[test]
    fn test_roc_auc_null_for_multiclass() {
        let y_true = array![0.0, 1.0, 2.0];
        let y_pred = array![0.0, 1.0, 2.0];
        let proba = array![[0.8, 0.1, 0.1], [0.1, 0.8, 0.1], [0.1, 0.1, 0.8]];
        let metrics = ClassificationEvaluator::new()
            .evaluate(&y_true, &y_pred, Some(&proba))
            .unwrap();
        assert!(metrics["roc_auc"].is_null());
    }

    #[test]
    fn test_length_mismatch() {
        let y_true = array![0.0, 1.0];
        let y_pred = array![0.0];
        assert!(ClassificationEvaluator::new()
            .evaluate(&y_true, &y_pred, None)
            .is_err());
    }

    #[test]
    fn test_regression_identical_vectors() {
        let y = array![1.0, 2.0, 3.0, 4.0];
        let metrics = RegressionEvaluator::new().evaluate(&y, &y).unwrap();
        assert_eq!(metrics["mse"].as_scalar().unwrap(), 0.0);
        assert_eq!(metrics["rmse"].as_scalar().unwrap(), 0.0);
        assert_eq!(metrics["mae"].as_scalar().unwrap(), 0.0);
        assert_eq!(metrics["r2_score"].as_scalar().unwrap(), 1.0);
    }

    #[test]
    fn test_regression_rmse_is_sqrt_mse() {
        let y_true = array![1.0, 2.0, 3.0, 4.0];
        let y_pred = array![1.5, 2.5, 2.5, 4.5];
        let metrics = RegressionEvaluator::new().evaluate(&y_true, &y_pred).unwrap();
        let mse = metrics["mse"].as_scalar().unwrap();
        let rmse = metrics["rmse"].as_scalar().unwrap();
        assert!((rmse - mse.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_clustering_two_tight_clusters() {
        let x = array![
            [0.0, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [10.0, 10.0],
            [10.1, 10.0],
            [10.0, 10.1]
        ];
        let labels = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let metrics = ClusteringEvaluator::new().evaluate(&x, &labels, None).unwrap();

        let silhouette = metrics["silhouette_score"].as_scalar().unwrap();
        assert!(silhouette > 0.9, "tight clusters: silhouette {}", silhouette);
        assert!(metrics["davies_bouldin"].as_scalar().unwrap() < 0.1);
        assert!(metrics["calinski_harabasz"].as_scalar().unwrap() > 100.0);
        assert!(metrics["inertia"].as_scalar().unwrap() < 1.0);
    }

    #[test]
    fn test_clustering_single_cluster_rejected() {
        let x = array![[0.0, 0.0], [1.0, 1.0]];
        let labels = array![0.0, 0.0];
        let err = ClusteringEvaluator::new()
            .evaluate(&x, &labels, None)
            .unwrap_err();
        assert!(err.to_string().contains("2 distinct clusters"));
    }

    #[test]
    fn test_clustering_supplied_inertia_passthrough() {
        let x = array![[0.0, 0.0], [0.1, 0.0], [10.0, 10.0], [10.1, 10.0]];
        let labels = array![0.0, 0.0, 1.0, 1.0];
        let metrics = ClusteringEvaluator::new()
            .evaluate(&x, &labels, Some(123.5))
            .unwrap();
        assert_eq!(metrics["inertia"].as_scalar().unwrap(), 123.5);
    }
}
