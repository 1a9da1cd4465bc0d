//! Plugin registry
//!
//! Explicit registration replaces the source platform's reflection-based
//! namespace scan: the builtin catalog is a static list, and the
//! process-wide registry is initialized exactly once behind a `OnceLock`
//! (first caller wins; racing callers observe the same registry). Tests
//! construct their own registries instead of resetting the global one.

use super::catalog;
use super::Plugin;
use crate::training::TaskKind;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

static GLOBAL: OnceLock<PluginRegistry> = OnceLock::new();

/// Slug-keyed, read-only-after-construction plugin registry
pub struct PluginRegistry {
    plugins: BTreeMap<&'static str, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: BTreeMap::new(),
        }
    }

    /// Registry with every builtin plugin registered.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for plugin in catalog::builtin_plugins() {
            registry.register(plugin);
        }
        debug!(count = registry.plugins.len(), "plugin registry initialized");
        registry
    }

    /// Process-wide registry, initialized on first access.
    pub fn global() -> &'static PluginRegistry {
        GLOBAL.get_or_init(Self::builtin)
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(plugin.slug(), plugin);
    }

    pub fn get(&self, slug: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(slug).cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.values().cloned().collect()
    }

    /// Plugins declaring support for `task`.
    pub fn by_task(&self, task: TaskKind) -> Vec<Arc<dyn Plugin>> {
        self.plugins
            .values()
            .filter(|p| p.supported_tasks().contains(&task))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_has_all_families() {
        let registry = PluginRegistry::builtin();
        assert_eq!(registry.len(), 10);
        for slug in [
            "linear_regression",
            "logistic_regression",
            "knn",
            "decision_tree",
            "random_forest",
            "gradient_boosting",
            "xgboost",
            "neural_network",
            "kmeans",
            "pca",
        ] {
            assert!(registry.get(slug).is_some(), "missing plugin {}", slug);
        }
    }

    #[test]
    fn test_by_task_filters() {
        let registry = PluginRegistry::builtin();
        let classification: Vec<&str> = registry
            .by_task(TaskKind::Classification)
            .iter()
            .map(|p| p.slug())
            .collect();
        assert!(classification.contains(&"logistic_regression"));
        assert!(classification.contains(&"random_forest"));
        assert!(!classification.contains(&"linear_regression"));
        assert!(!classification.contains(&"pca"));

        let clustering: Vec<&str> = registry
            .by_task(TaskKind::Clustering)
            .iter()
            .map(|p| p.slug())
            .collect();
        assert_eq!(clustering, vec!["kmeans"]);
    }

    #[test]
    fn test_global_is_stable() {
        let a = PluginRegistry::global();
        let b = PluginRegistry::global();
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.len(), 10);
    }

    #[test]
    fn test_unknown_slug() {
        let registry = PluginRegistry::builtin();
        assert!(registry.get("svm").is_none());
    }
}
