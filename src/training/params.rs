//! Hyperparameter values and maps
//!
//! Hyperparameters arrive from a JSON configuration layer where `null` is
//! sometimes encoded as the strings "none"/"None"/"null". Normalization to
//! [`HyperValue::Null`] happens once, at deserialization, so trainers and
//! plugins never see the sentinel strings.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// A single hyperparameter value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HyperValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl<'de> Deserialize<'de> for HyperValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(HyperValue::from_json(value))
    }
}

impl HyperValue {
    /// Convert a JSON value, mapping the "none"/"None"/"null" sentinel
    /// strings to `Null`.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => HyperValue::Null,
            serde_json::Value::Bool(b) => HyperValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    HyperValue::Int(i)
                } else {
                    HyperValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => match s.as_str() {
                "none" | "None" | "null" => HyperValue::Null,
                _ => HyperValue::Str(s),
            },
            other => HyperValue::Str(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HyperValue::Null)
    }

    /// Integer view (accepts `Int` only)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HyperValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Non-negative integer view, for counts and sizes
    pub fn as_usize(&self) -> Option<usize> {
        match self {
            HyperValue::Int(i) if *i >= 0 => Some(*i as usize),
            _ => None,
        }
    }

    /// Numeric view (accepts `Int` and `Float`)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HyperValue::Int(i) => Some(*i as f64),
            HyperValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HyperValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HyperValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Display form used in error messages
    pub fn display(&self) -> String {
        match self {
            HyperValue::Null => "null".to_string(),
            HyperValue::Bool(b) => b.to_string(),
            HyperValue::Int(i) => i.to_string(),
            HyperValue::Float(f) => f.to_string(),
            HyperValue::Str(s) => s.clone(),
        }
    }
}

impl From<i64> for HyperValue {
    fn from(v: i64) -> Self {
        HyperValue::Int(v)
    }
}

impl From<f64> for HyperValue {
    fn from(v: f64) -> Self {
        HyperValue::Float(v)
    }
}

impl From<bool> for HyperValue {
    fn from(v: bool) -> Self {
        HyperValue::Bool(v)
    }
}

impl From<&str> for HyperValue {
    fn from(v: &str) -> Self {
        HyperValue::Str(v.to_string())
    }
}

/// Ordered hyperparameter mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HyperParams(pub BTreeMap<String, HyperValue>);

impl HyperParams {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&HyperValue> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<HyperValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<HyperValue> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HyperValue)> {
        self.0.iter()
    }

    /// Merge `overrides` on top of `self`, overrides win.
    pub fn merged(&self, overrides: &HyperParams) -> HyperParams {
        let mut out = self.clone();
        for (k, v) in overrides.iter() {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    /// Re-apply the sentinel normalization for maps built programmatically
    /// rather than through serde.
    pub fn normalize_nulls(&mut self) {
        for value in self.0.values_mut() {
            if let HyperValue::Str(s) = value {
                if matches!(s.as_str(), "none" | "None" | "null") {
                    *value = HyperValue::Null;
                }
            }
        }
    }

    /// Parse from a JSON object value.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut params = HyperParams::new();
        if let serde_json::Value::Object(map) = value {
            for (k, v) in map {
                params.0.insert(k.clone(), HyperValue::from_json(v.clone()));
            }
        }
        params
    }
}

impl FromIterator<(String, HyperValue)> for HyperParams {
    fn from_iter<T: IntoIterator<Item = (String, HyperValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_string_becomes_null() {
        let params: HyperParams = serde_json::from_str(r#"{"max_depth": "none"}"#).unwrap();
        assert_eq!(params.get("max_depth"), Some(&HyperValue::Null));

        let params: HyperParams = serde_json::from_str(r#"{"max_depth": "None"}"#).unwrap();
        assert_eq!(params.get("max_depth"), Some(&HyperValue::Null));

        let params: HyperParams = serde_json::from_str(r#"{"max_depth": "null"}"#).unwrap();
        assert_eq!(params.get("max_depth"), Some(&HyperValue::Null));
    }

    #[test]
    fn test_regular_strings_survive() {
        let params: HyperParams = serde_json::from_str(r#"{"criterion": "gini"}"#).unwrap();
        assert_eq!(params.get("criterion").and_then(|v| v.as_str()), Some("gini"));
    }

    #[test]
    fn test_merged_overrides_win() {
        let mut defaults = HyperParams::new();
        defaults.set("n_estimators", 100i64);
        defaults.set("max_depth", HyperValue::Null);

        let mut overrides = HyperParams::new();
        overrides.set("n_estimators", 10i64);

        let merged = defaults.merged(&overrides);
        assert_eq!(merged.get("n_estimators").and_then(|v| v.as_i64()), Some(10));
        assert!(merged.get("max_depth").unwrap().is_null());
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(HyperValue::Int(5).as_f64(), Some(5.0));
        assert_eq!(HyperValue::Float(0.5).as_f64(), Some(0.5));
        assert_eq!(HyperValue::Float(0.5).as_i64(), None);
        assert_eq!(HyperValue::Int(-1).as_usize(), None);
    }

    #[test]
    fn test_normalize_nulls_programmatic() {
        let mut params = HyperParams::new();
        params.set("device", "none");
        params.normalize_nulls();
        assert!(params.get("device").unwrap().is_null());
    }
}
