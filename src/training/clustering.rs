//! K-means clustering trainer
//!
//! Unsupervised: `fit` takes X only and silently ignores any target.
//! K-means++ initialization, Lloyd iterations parallelized over samples.

use crate::error::{FlowError, Result};
use crate::training::params::HyperParams;
use crate::training::persist::TrainerDocument;
use crate::training::{
    check_predict_features, check_unsupervised_inputs, ModelFamily, ModelOutput, TaskKind,
    Trainer, TrainerMeta,
};
use crate::validation;
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KMeansCore {
    centroids: Array2<f64>,
    inertia: f64,
    n_features: usize,
}

fn euclidean_sq(a: &[f64], b: ndarray::ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// K-means++ seeding: centroids spread proportionally to squared distance.
fn kmeans_pp_init(x: &Array2<f64>, k: usize, rng: &mut ChaCha8Rng) -> Array2<f64> {
    let n = x.nrows();
    let d = x.ncols();
    let mut centroids = Array2::zeros((k, d));

    let first = rng.gen_range(0..n);
    centroids.row_mut(0).assign(&x.row(first));

    for c in 1..k {
        let dists: Vec<f64> = (0..n)
            .map(|i| {
                let row: Vec<f64> = x.row(i).iter().copied().collect();
                (0..c)
                    .map(|j| euclidean_sq(&row, centroids.row(j)))
                    .fold(f64::MAX, f64::min)
            })
            .collect();

        let total: f64 = dists.iter().sum();
        let chosen = if total <= 0.0 {
            rng.gen_range(0..n)
        } else {
            let r = rng.gen_range(0.0..total);
            let mut cumulative = 0.0;
            let mut pick = n - 1;
            for (i, &dist) in dists.iter().enumerate() {
                cumulative += dist;
                if cumulative >= r {
                    pick = i;
                    break;
                }
            }
            pick
        };
        centroids.row_mut(c).assign(&x.row(chosen));
    }

    centroids
}

/// K-means trainer.
#[derive(Debug, Serialize, Deserialize)]
pub struct KMeansTrainer {
    task: TaskKind,
    params: HyperParams,
    meta: TrainerMeta,
    core: Option<KMeansCore>,
}

impl KMeansTrainer {
    pub const NAME: &'static str = "kmeans";

    pub fn defaults() -> HyperParams {
        let mut p = HyperParams::new();
        p.set("n_clusters", 8i64);
        p.set("max_iter", 300i64);
        p.set("tol", 1e-4f64);
        p.set("random_state", 42i64);
        p
    }

    pub fn new(task: TaskKind, overrides: HyperParams) -> Result<Self> {
        let params = Self::defaults().merged(&overrides);
        Self::validate(&params)?;
        Ok(Self {
            task,
            params,
            meta: TrainerMeta::new(),
            core: None,
        })
    }

    fn validate(params: &HyperParams) -> Result<()> {
        if let Some(v) = params.get("n_clusters") {
            validation::require_positive_int("n_clusters", v)?;
        }
        if let Some(v) = params.get("max_iter") {
            validation::require_positive_int("max_iter", v)?;
        }
        if let Some(v) = params.get("tol") {
            validation::require_positive_float("tol", v)?;
        }
        if let Some(v) = params.get("random_state") {
            validation::require_positive_int_or_null("random_state", v)?;
        }
        Ok(())
    }

    /// Sum of squared within-cluster distances after fit.
    pub fn inertia(&self) -> Result<f64> {
        Ok(self.fitted_core()?.inertia)
    }

    pub(crate) fn from_artifacts(
        document: TrainerDocument,
        model_state: serde_json::Value,
    ) -> Result<Self> {
        Self::validate(&document.hyperparameters)?;
        Ok(Self {
            task: document.task,
            params: document.hyperparameters,
            meta: document.metadata,
            core: Some(serde_json::from_value(model_state)?),
        })
    }

    fn fitted_core(&self) -> Result<&KMeansCore> {
        self.core.as_ref().ok_or(FlowError::NotFitted)
    }

    fn assign(core: &KMeansCore, x: &Array2<f64>) -> Array1<f64> {
        let k = core.centroids.nrows();
        let labels: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row: Vec<f64> = x.row(i).iter().copied().collect();
                let mut best = 0usize;
                let mut best_dist = f64::MAX;
                for c in 0..k {
                    let dist = euclidean_sq(&row, core.centroids.row(c));
                    if dist < best_dist {
                        best_dist = dist;
                        best = c;
                    }
                }
                best as f64
            })
            .collect();
        Array1::from_vec(labels)
    }
}

impl Trainer for KMeansTrainer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn task(&self) -> TaskKind {
        self.task
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::Clustering
    }

    fn hyperparameters(&self) -> &HyperParams {
        &self.params
    }

    fn update_hyperparameters(&mut self, updates: HyperParams) -> Result<()> {
        let merged = self.params.merged(&updates);
        Self::validate(&merged)?;
        self.params = merged;
        Ok(())
    }

    fn fit(&mut self, x: &Array2<f64>, _y: Option<&Array1<f64>>) -> Result<()> {
        if self.task != TaskKind::Clustering {
            return Err(crate::training::unsupported_task(Self::NAME, self.task));
        }
        check_unsupervised_inputs(x)?;

        let k = self
            .params
            .get("n_clusters")
            .and_then(|v| v.as_usize())
            .unwrap_or(8);
        let max_iter = self
            .params
            .get("max_iter")
            .and_then(|v| v.as_usize())
            .unwrap_or(300);
        let tol = self.params.get("tol").and_then(|v| v.as_f64()).unwrap_or(1e-4);
        let seed = self
            .params
            .get("random_state")
            .and_then(|v| v.as_usize())
            .unwrap_or(42) as u64;

        let n = x.nrows();
        let d = x.ncols();
        if n < k {
            return Err(FlowError::TrainingError(format!(
                "n_samples ({}) < n_clusters ({})",
                n, k
            )));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut centroids = kmeans_pp_init(x, k, &mut rng);

        for _ in 0..max_iter {
            // Assignment step
            let labels: Vec<usize> = (0..n)
                .into_par_iter()
                .map(|i| {
                    let row: Vec<f64> = x.row(i).iter().copied().collect();
                    let mut best = 0usize;
                    let mut best_dist = f64::MAX;
                    for c in 0..k {
                        let dist = euclidean_sq(&row, centroids.row(c));
                        if dist < best_dist {
                            best_dist = dist;
                            best = c;
                        }
                    }
                    best
                })
                .collect();

            // Update step
            let mut sums = Array2::<f64>::zeros((k, d));
            let mut counts = vec![0usize; k];
            for (i, &c) in labels.iter().enumerate() {
                counts[c] += 1;
                for j in 0..d {
                    sums[[c, j]] += x[[i, j]];
                }
            }
            let mut new_centroids = centroids.clone();
            for c in 0..k {
                if counts[c] > 0 {
                    for j in 0..d {
                        new_centroids[[c, j]] = sums[[c, j]] / counts[c] as f64;
                    }
                }
            }

            let shift: f64 = (0..k)
                .map(|c| {
                    let row: Vec<f64> = new_centroids.row(c).iter().copied().collect();
                    euclidean_sq(&row, centroids.row(c))
                })
                .sum();
            centroids = new_centroids;
            if shift < tol {
                break;
            }
        }

        // Final inertia on the fitted centroids
        let inertia: f64 = (0..n)
            .map(|i| {
                let row: Vec<f64> = x.row(i).iter().copied().collect();
                (0..k)
                    .map(|c| euclidean_sq(&row, centroids.row(c)))
                    .fold(f64::MAX, f64::min)
            })
            .sum();

        self.core = Some(KMeansCore {
            centroids,
            inertia,
            n_features: d,
        });
        self.meta.stamp_fit(n, d);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<ModelOutput> {
        let core = self.fitted_core()?;
        check_predict_features(core.n_features, x.ncols())?;
        Ok(ModelOutput::Labels(Self::assign(core, x)))
    }

    fn metadata(&self) -> &TrainerMeta {
        &self.meta
    }

    fn document(&self) -> TrainerDocument {
        TrainerDocument {
            name: Self::NAME.to_string(),
            task: self.task,
            hyperparameters: self.params.clone(),
            metadata: self.meta.clone(),
        }
    }

    fn model_state(&self) -> Result<serde_json::Value> {
        let core = self.fitted_core()?;
        Ok(serde_json::to_value(core)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_cluster_data() -> Array2<f64> {
        array![
            [0.0, 0.0],
            [0.1, 0.1],
            [0.2, 0.0],
            [0.0, 0.2],
            [10.0, 10.0],
            [10.1, 10.1],
            [10.2, 10.0],
            [10.0, 10.2]
        ]
    }

    fn k2() -> HyperParams {
        let mut p = HyperParams::new();
        p.set("n_clusters", 2i64);
        p
    }

    #[test]
    fn test_separates_two_clusters() {
        let x = two_cluster_data();
        let mut trainer = KMeansTrainer::new(TaskKind::Clustering, k2()).unwrap();
        trainer.fit(&x, None).unwrap();

        let labels = trainer.predict(&x).unwrap().into_labels().unwrap();
        assert!(labels.iter().all(|&l| l == 0.0 || l == 1.0));
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[4]);
    }

    #[test]
    fn test_ignores_target() {
        let x = two_cluster_data();
        let y = array![9.0, 9.0, 9.0, 9.0, 9.0, 9.0, 9.0, 9.0];
        let mut trainer = KMeansTrainer::new(TaskKind::Clustering, k2()).unwrap();
        trainer.fit(&x, Some(&y)).unwrap();
        let labels = trainer.predict(&x).unwrap().into_labels().unwrap();
        assert!(labels.iter().all(|&l| l == 0.0 || l == 1.0));
    }

    #[test]
    fn test_inertia_positive_and_small_for_tight_clusters() {
        let x = two_cluster_data();
        let mut trainer = KMeansTrainer::new(TaskKind::Clustering, k2()).unwrap();
        trainer.fit(&x, None).unwrap();
        let inertia = trainer.inertia().unwrap();
        assert!(inertia >= 0.0);
        assert!(inertia < 1.0, "tight clusters should have low inertia: {}", inertia);
    }

    #[test]
    fn test_too_few_samples() {
        let x = array![[0.0, 0.0], [1.0, 1.0]];
        let mut p = HyperParams::new();
        p.set("n_clusters", 5i64);
        let mut trainer = KMeansTrainer::new(TaskKind::Clustering, p).unwrap();
        assert!(trainer.fit(&x, None).is_err());
    }

    #[test]
    fn test_negative_clusters_rejected() {
        let mut p = HyperParams::new();
        p.set("n_clusters", -3i64);
        let err = KMeansTrainer::new(TaskKind::Clustering, p).unwrap_err();
        assert!(err.to_string().contains("positive integer"));
    }
}
