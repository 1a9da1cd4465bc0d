//! Hyperparameter schemas
//!
//! Declarative field descriptions rendered by the no-code UI. Serializes to
//! the `{main: [...], advanced: [...]}` JSON shape the frontend consumes,
//! camelCase keys included.

use crate::training::params::{HyperParams, HyperValue};
use serde::Serialize;

/// UI widget type for a schema field
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int,
    Float,
    Select,
    Bool,
    Range,
}

/// One hyperparameter field description
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    pub key: &'static str,
    pub name: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub default: HyperValue,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null_label: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<&'static str>>,
    pub required: bool,
}

impl SchemaField {
    pub fn new(
        key: &'static str,
        name: &'static str,
        field_type: FieldType,
        default: HyperValue,
    ) -> Self {
        Self {
            key,
            name,
            field_type,
            default,
            description: "",
            min: None,
            max: None,
            step: None,
            nullable: None,
            null_label: None,
            options: None,
            required: true,
        }
    }

    pub fn int(key: &'static str, name: &'static str, default: i64) -> Self {
        Self::new(key, name, FieldType::Int, HyperValue::Int(default))
    }

    pub fn float(key: &'static str, name: &'static str, default: f64) -> Self {
        Self::new(key, name, FieldType::Float, HyperValue::Float(default))
    }

    pub fn bool(key: &'static str, name: &'static str, default: bool) -> Self {
        Self::new(key, name, FieldType::Bool, HyperValue::Bool(default))
    }

    pub fn select(
        key: &'static str,
        name: &'static str,
        default: &'static str,
        options: &[&'static str],
    ) -> Self {
        let mut field = Self::new(key, name, FieldType::Select, HyperValue::from(default));
        field.options = Some(options.to_vec());
        field
    }

    pub fn describe(mut self, text: &'static str) -> Self {
        self.description = text;
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    /// Mark nullable with the label shown for the null choice.
    pub fn nullable(mut self, label: &'static str) -> Self {
        self.nullable = Some(true);
        self.null_label = Some(label);
        if matches!(self.default, HyperValue::Int(_) | HyperValue::Float(_)) {
            // Nullable numeric fields default to null in the UI
            self.default = HyperValue::Null;
        }
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Ordered main/advanced field groups
#[derive(Debug, Clone, Serialize)]
pub struct HyperparamSchema {
    pub main: Vec<SchemaField>,
    pub advanced: Vec<SchemaField>,
}

impl HyperparamSchema {
    pub fn new(main: Vec<SchemaField>, advanced: Vec<SchemaField>) -> Self {
        Self { main, advanced }
    }

    /// Documented defaults of every field, used as the base of the
    /// defaults-then-overrides merge in plugin train.
    pub fn defaults(&self) -> HyperParams {
        let mut params = HyperParams::new();
        for field in self.main.iter().chain(self.advanced.iter()) {
            params.set(field.key, field.default.clone());
        }
        params
    }

    pub fn field(&self, key: &str) -> Option<&SchemaField> {
        self.main
            .iter()
            .chain(self.advanced.iter())
            .find(|f| f.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_camel_case() {
        let field = SchemaField::int("max_depth", "Max depth", 6)
            .range(1.0, 32.0)
            .nullable("No limit");
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["type"], "int");
        assert_eq!(json["nullLabel"], "No limit");
        assert_eq!(json["key"], "max_depth");
        assert!(json["default"].is_null());
        assert!(json.get("step").is_none());
    }

    #[test]
    fn test_schema_groups() {
        let schema = HyperparamSchema::new(
            vec![SchemaField::int("n_estimators", "Trees", 100)],
            vec![SchemaField::bool("bootstrap", "Bootstrap", true)],
        );
        let json = serde_json::to_value(&schema).unwrap();
        assert!(json["main"].is_array());
        assert!(json["advanced"].is_array());
    }

    #[test]
    fn test_defaults_extraction() {
        let schema = HyperparamSchema::new(
            vec![
                SchemaField::int("n_estimators", "Trees", 100),
                SchemaField::select("criterion", "Criterion", "gini", &["gini", "entropy"]),
            ],
            vec![],
        );
        let defaults = schema.defaults();
        assert_eq!(defaults.get("n_estimators").and_then(|v| v.as_i64()), Some(100));
        assert_eq!(defaults.get("criterion").and_then(|v| v.as_str()), Some("gini"));
    }
}
