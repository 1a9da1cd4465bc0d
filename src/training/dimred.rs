//! PCA dimensionality-reduction trainer
//!
//! Covariance eigenvectors via power iteration with deflation. `predict`
//! returns the projected matrix as [`ModelOutput::Embedding`] — a transform
//! exposed through the uniform predict name so executor code stays
//! polymorphic.

use crate::error::{FlowError, Result};
use crate::training::params::HyperParams;
use crate::training::persist::TrainerDocument;
use crate::training::{
    check_predict_features, check_unsupervised_inputs, unsupported_task, ModelFamily,
    ModelOutput, TaskKind, Trainer, TrainerMeta,
};
use crate::validation;
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PcaCore {
    /// n_components × n_features projection matrix
    components: Array2<f64>,
    mean: Array1<f64>,
    eigenvalues: Vec<f64>,
    explained_variance_ratio: Vec<f64>,
    n_features: usize,
}

/// Power iteration with deflation: top-k eigenpairs of a symmetric matrix.
fn top_eigenpairs(cov: &Array2<f64>, k: usize, seed: u64) -> (Vec<f64>, Array2<f64>) {
    let d = cov.nrows();
    let max_iter = 300;
    let tol = 1e-10;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut work = cov.clone();
    let mut eigenvalues = Vec::with_capacity(k);
    let mut vectors = Array2::zeros((k, d));

    for component in 0..k {
        let mut v: Array1<f64> = Array1::from_shape_fn(d, |_| rng.gen_range(-1.0..1.0));
        let norm = v.dot(&v).sqrt().max(1e-12);
        v.mapv_inplace(|x| x / norm);

        let mut eigenvalue = 0.0;
        for _ in 0..max_iter {
            let w = work.dot(&v);
            let new_eigenvalue = v.dot(&w);
            let w_norm = w.dot(&w).sqrt().max(1e-12);
            let new_v = w.mapv(|x| x / w_norm);

            let diff = (&new_v - &v).mapv(|x| x * x).sum().sqrt();
            v = new_v;
            eigenvalue = new_eigenvalue;
            if diff < tol {
                break;
            }
        }

        let eigenvalue = eigenvalue.max(0.0);
        eigenvalues.push(eigenvalue);
        vectors.row_mut(component).assign(&v);

        // Deflate: remove the found component
        for i in 0..d {
            for j in 0..d {
                work[[i, j]] -= eigenvalue * v[i] * v[j];
            }
        }
    }

    (eigenvalues, vectors)
}

/// PCA trainer.
#[derive(Debug, Serialize, Deserialize)]
pub struct PcaTrainer {
    task: TaskKind,
    params: HyperParams,
    meta: TrainerMeta,
    core: Option<PcaCore>,
}

impl PcaTrainer {
    pub const NAME: &'static str = "pca";

    pub fn defaults() -> HyperParams {
        let mut p = HyperParams::new();
        p.set("n_components", 2i64);
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
        if let Some(v) = params.get("n_components") {
            validation::require_positive_int("n_components", v)?;
        }
        if let Some(v) = params.get("random_state") {
            validation::require_positive_int_or_null("random_state", v)?;
        }
        Ok(())
    }

    /// Fraction of total variance captured per component.
    pub fn explained_variance_ratio(&self) -> Result<Vec<f64>> {
        Ok(self.fitted_core()?.explained_variance_ratio.clone())
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

    fn fitted_core(&self) -> Result<&PcaCore> {
        self.core.as_ref().ok_or(FlowError::NotFitted)
    }
}

impl Trainer for PcaTrainer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn task(&self) -> TaskKind {
        self.task
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::Dimensionality
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
        if self.task != TaskKind::DimensionalityReduction {
            return Err(unsupported_task(Self::NAME, self.task));
        }
        check_unsupervised_inputs(x)?;

        let n = x.nrows();
        let d = x.ncols();
        if n < 2 {
            return Err(FlowError::InvalidInput(
                "PCA requires at least 2 samples".to_string(),
            ));
        }

        let requested = self
            .params
            .get("n_components")
            .and_then(|v| v.as_usize())
            .unwrap_or(2);
        let k = requested.min(d).min(n);
        let seed = self
            .params
            .get("random_state")
            .and_then(|v| v.as_usize())
            .unwrap_or(42) as u64;

        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let centered = x - &mean;
        let cov = centered.t().dot(&centered) / (n as f64 - 1.0);

        let (eigenvalues, components) = top_eigenpairs(&cov, k, seed);
        let total_variance: f64 = (0..d).map(|i| cov[[i, i]]).sum::<f64>().max(1e-12);
        let explained_variance_ratio: Vec<f64> = eigenvalues
            .iter()
            .map(|&ev| (ev / total_variance).max(0.0))
            .collect();

        self.core = Some(PcaCore {
            components,
            mean,
            eigenvalues,
            explained_variance_ratio,
            n_features: d,
        });
        self.meta.stamp_fit(n, d);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<ModelOutput> {
        let core = self.fitted_core()?;
        check_predict_features(core.n_features, x.ncols())?;
        let centered = x - &core.mean;
        Ok(ModelOutput::Embedding(centered.dot(&core.components.t())))
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
