//! Decision tree trainer
//!
//! The tree core (node layout, growing, prediction) is shared with the
//! forest and boosting trainers in this module tree.

use crate::error::{FlowError, Result};
use crate::training::params::{HyperParams, HyperValue};
use crate::training::persist::TrainerDocument;
use crate::training::{
    check_predict_features, check_supervised_inputs, distinct_classes, unsupported_task,
    ModelFamily, ModelOutput, TaskKind, Trainer, TrainerMeta,
};
use crate::validation;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Impurity criterion for split scoring
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) enum SplitCriterion {
    Gini,
    Entropy,
    SquaredError,
}

/// One tree node. Classification leaves carry the class distribution so
/// probability estimates fall out of a plain tree walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum TreeNode {
    Leaf {
        value: f64,
        dist: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

/// Growth limits shared by every tree-based trainer
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeSettings {
    pub criterion: SplitCriterion,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

/// A fully grown tree with its raw importance gains
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TreeCore {
    pub root: TreeNode,
    pub n_features: usize,
    /// Sorted class labels; empty for regression trees
    pub classes: Vec<f64>,
    /// Raw accumulated impurity-decrease per feature (unnormalized)
    pub importances: Vec<f64>,
}

impl TreeCore {
    /// Grow a tree on the rows in `indices`, considering only the features
    /// in `feature_pool` at each split.
    pub fn grow(
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        feature_pool: &[usize],
        classes: &[f64],
        settings: &TreeSettings,
    ) -> Self {
        let mut importances = vec![0.0; x.ncols()];
        let root = grow_node(x, y, indices, feature_pool, classes, settings, 0, &mut importances);
        Self {
            root,
            n_features: x.ncols(),
            classes: classes.to_vec(),
            importances,
        }
    }

    fn walk(&self, row: &[f64]) -> &TreeNode {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { .. } => return node,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        match self.walk(row) {
            TreeNode::Leaf { value, .. } => *value,
            TreeNode::Split { .. } => unreachable!("walk terminates at a leaf"),
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        Array1::from_iter((0..x.nrows()).map(|i| {
            let row: Vec<f64> = x.row(i).iter().copied().collect();
            self.predict_row(&row)
        }))
    }

    /// Leaf class distribution for one row (classification trees only)
    pub fn class_distribution(&self, row: &[f64]) -> Vec<f64> {
        match self.walk(row) {
            TreeNode::Leaf { dist, .. } => dist.clone(),
            TreeNode::Split { .. } => unreachable!("walk terminates at a leaf"),
        }
    }
}

fn class_counts(y: &Array1<f64>, indices: &[usize], classes: &[f64]) -> Vec<f64> {
    let mut counts = vec![0.0; classes.len()];
    for &i in indices {
        if let Ok(pos) = classes.binary_search_by(|c| {
            c.partial_cmp(&y[i]).unwrap_or(std::cmp::Ordering::Equal)
        }) {
            counts[pos] += 1.0;
        }
    }
    counts
}

fn impurity_from_counts(counts: &[f64], n: f64, criterion: SplitCriterion) -> f64 {
    match criterion {
        SplitCriterion::Gini => {
            1.0 - counts
                .iter()
                .map(|&c| {
                    let p = c / n;
                    p * p
                })
                .sum::<f64>()
        }
        SplitCriterion::Entropy => counts
            .iter()
            .filter(|&&c| c > 0.0)
            .map(|&c| {
                let p = c / n;
                -p * p.log2()
            })
            .sum::<f64>(),
        SplitCriterion::SquaredError => unreachable!("counts impurity is classification-only"),
    }
}

#[allow(clippy::too_many_arguments)]
fn grow_node(
    x: &Array2<f64>,
    y: &Array1<f64>,
    indices: &[usize],
    feature_pool: &[usize],
    classes: &[f64],
    settings: &TreeSettings,
    depth: usize,
    importances: &mut [f64],
) -> TreeNode {
    let n = indices.len();
    let is_classification = settings.criterion != SplitCriterion::SquaredError;

    let make_leaf = |indices: &[usize]| -> TreeNode {
        if is_classification {
            let counts = class_counts(y, indices, classes);
            let total: f64 = counts.iter().sum();
            let dist: Vec<f64> = counts.iter().map(|&c| c / total.max(1.0)).collect();
            let best = counts
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i)
                .unwrap_or(0);
            TreeNode::Leaf {
                value: classes.get(best).copied().unwrap_or(0.0),
                dist,
            }
        } else {
            let mean = indices.iter().map(|&i| y[i]).sum::<f64>() / n.max(1) as f64;
            TreeNode::Leaf {
                value: mean,
                dist: Vec::new(),
            }
        }
    };

    let is_pure = {
        let first = y[indices[0]];
        indices.iter().all(|&i| (y[i] - first).abs() < 1e-12)
    };
    if n < settings.min_samples_split
        || is_pure
        || settings.max_depth.map_or(false, |d| depth >= d)
    {
        return make_leaf(indices);
    }

    let best = find_best_split(x, y, indices, feature_pool, classes, settings);
    match best {
        Some(split) if split.gain > 1e-12 => {
            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .partition(|&&i| x[[i, split.feature]] <= split.threshold);
            if left_idx.len() < settings.min_samples_leaf
                || right_idx.len() < settings.min_samples_leaf
            {
                return make_leaf(indices);
            }

            importances[split.feature] += split.gain * n as f64;

            let left = grow_node(
                x, y, &left_idx, feature_pool, classes, settings, depth + 1, importances,
            );
            let right = grow_node(
                x, y, &right_idx, feature_pool, classes, settings, depth + 1, importances,
            );
            TreeNode::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        _ => make_leaf(indices),
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

fn find_best_split(
    x: &Array2<f64>,
    y: &Array1<f64>,
    indices: &[usize],
    feature_pool: &[usize],
    classes: &[f64],
    settings: &TreeSettings,
) -> Option<SplitCandidate> {
    let n = indices.len() as f64;
    let is_classification = settings.criterion != SplitCriterion::SquaredError;

    let parent_impurity = if is_classification {
        let counts = class_counts(y, indices, classes);
        impurity_from_counts(&counts, n, settings.criterion)
    } else {
        let sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let sumsq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
        sumsq / n - (sum / n).powi(2)
    };

    let mut best: Option<SplitCandidate> = None;

    for &feature in feature_pool {
        let mut sorted: Vec<usize> = indices.to_vec();
        sorted.sort_by(|&a, &b| {
            x[[a, feature]]
                .partial_cmp(&x[[b, feature]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Incremental left-side statistics as the candidate threshold moves
        let mut left_counts = vec![0.0; classes.len()];
        let mut left_sum = 0.0;
        let mut left_sumsq = 0.0;
        let total_counts = if is_classification {
            class_counts(y, indices, classes)
        } else {
            Vec::new()
        };
        let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let total_sumsq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();

        for pos in 0..sorted.len() - 1 {
            let i = sorted[pos];
            let yi = y[i];
            if is_classification {
                if let Ok(c) = classes.binary_search_by(|c| {
                    c.partial_cmp(&yi).unwrap_or(std::cmp::Ordering::Equal)
                }) {
                    left_counts[c] += 1.0;
                }
            }
            left_sum += yi;
            left_sumsq += yi * yi;

            let v = x[[i, feature]];
            let v_next = x[[sorted[pos + 1], feature]];
            if (v_next - v).abs() < 1e-12 {
                continue;
            }

            let nl = (pos + 1) as f64;
            let nr = n - nl;
            if (nl as usize) < settings.min_samples_leaf
                || (nr as usize) < settings.min_samples_leaf
            {
                continue;
            }

            let (imp_left, imp_right) = if is_classification {
                let right_counts: Vec<f64> = total_counts
                    .iter()
                    .zip(left_counts.iter())
                    .map(|(t, l)| t - l)
                    .collect();
                (
                    impurity_from_counts(&left_counts, nl, settings.criterion),
                    impurity_from_counts(&right_counts, nr, settings.criterion),
                )
            } else {
                let right_sum = total_sum - left_sum;
                let right_sumsq = total_sumsq - left_sumsq;
                (
                    left_sumsq / nl - (left_sum / nl).powi(2),
                    right_sumsq / nr - (right_sum / nr).powi(2),
                )
            };

            let gain = parent_impurity - (nl * imp_left + nr * imp_right) / n;
            if best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: (v + v_next) / 2.0,
                    gain,
                });
            }
        }
    }

    best
}

/// Decision tree trainer, classification or regression selected at fit time.
#[derive(Debug, Serialize, Deserialize)]
pub struct DecisionTreeTrainer {
    task: TaskKind,
    params: HyperParams,
    meta: TrainerMeta,
    core: Option<TreeCore>,
}

impl DecisionTreeTrainer {
    pub const NAME: &'static str = "decision_tree";

    pub fn defaults() -> HyperParams {
        let mut p = HyperParams::new();
        p.set("max_depth", HyperValue::Null);
        p.set("min_samples_split", 2i64);
        p.set("min_samples_leaf", 1i64);
        p.set("criterion", "gini");
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
        if let Some(v) = params.get("max_depth") {
            validation::require_positive_int_or_null("max_depth", v)?;
        }
        if let Some(v) = params.get("min_samples_split") {
            validation::require_positive_int("min_samples_split", v)?;
        }
        if let Some(v) = params.get("min_samples_leaf") {
            validation::require_positive_int("min_samples_leaf", v)?;
        }
        if let Some(v) = params.get("criterion") {
            validation::require_one_of("criterion", v, &["gini", "entropy", "squared_error"])?;
        }
        Ok(())
    }

    pub(crate) fn settings(params: &HyperParams, task: TaskKind) -> TreeSettings {
        let criterion = match task {
            TaskKind::Regression => SplitCriterion::SquaredError,
            _ => match params.get("criterion").and_then(|v| v.as_str()) {
                Some("entropy") => SplitCriterion::Entropy,
                _ => SplitCriterion::Gini,
            },
        };
        TreeSettings {
            criterion,
            max_depth: params.get("max_depth").and_then(|v| v.as_usize()),
            min_samples_split: params
                .get("min_samples_split")
                .and_then(|v| v.as_usize())
                .unwrap_or(2),
            min_samples_leaf: params
                .get("min_samples_leaf")
                .and_then(|v| v.as_usize())
                .unwrap_or(1),
        }
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

    fn fitted_core(&self) -> Result<&TreeCore> {
        self.core.as_ref().ok_or(FlowError::NotFitted)
    }
}

impl Trainer for DecisionTreeTrainer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn task(&self) -> TaskKind {
        self.task
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::Tree
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

    fn fit(&mut self, x: &Array2<f64>, y: Option<&Array1<f64>>) -> Result<()> {
        let classes = match self.task {
            TaskKind::Classification => {
                let y = check_supervised_inputs(self.task, x, y)?;
                distinct_classes(y)
            }
            TaskKind::Regression => {
                check_supervised_inputs(self.task, x, y)?;
                Vec::new()
            }
            other => return Err(unsupported_task(Self::NAME, other)),
        };
        let y = y.expect("supervised guard validated y");

        let settings = Self::settings(&self.params, self.task);
        let indices: Vec<usize> = (0..x.nrows()).collect();
        let feature_pool: Vec<usize> = (0..x.ncols()).collect();
        let mut core = TreeCore::grow(x, y, &indices, &feature_pool, &classes, &settings);

        // Single trees report normalized importances
        let total: f64 = core.importances.iter().sum();
        if total > 0.0 {
            for imp in &mut core.importances {
                *imp /= total;
            }
        }

        self.core = Some(core);
        self.meta.stamp_fit(x.nrows(), x.ncols());
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<ModelOutput> {
        let core = self.fitted_core()?;
        check_predict_features(core.n_features, x.ncols())?;
        Ok(ModelOutput::Labels(core.predict(x)))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.task != TaskKind::Classification {
            return Err(FlowError::NotSupported(
                "predict_proba is only available for classification tasks".to_string(),
            ));
        }
        let core = self.fitted_core()?;
        check_predict_features(core.n_features, x.ncols())?;

        let k = core.classes.len();
        let mut out = Array2::zeros((x.nrows(), k));
        for i in 0..x.nrows() {
            let row: Vec<f64> = x.row(i).iter().copied().collect();
            let dist = core.class_distribution(&row);
            for (j, p) in dist.iter().enumerate() {
                out[[i, j]] = *p;
            }
        }
        Ok(out)
    }

    fn feature_importance(&self) -> Result<Array1<f64>> {
        let core = self.fitted_core()?;
        Ok(Array1::from_vec(core.importances.clone()))
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
