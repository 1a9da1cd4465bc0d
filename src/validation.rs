//! Hyperparameter predicate checks
//!
//! Shared by every trainer. Validation is deliberately loose: each trainer
//! checks only the parameters it ships with non-default semantics and leaves
//! fine-grained value validation to the algorithm itself at fit time.

use crate::error::{FlowError, Result};
use crate::training::params::HyperValue;

fn invalid(name: &str, value: &HyperValue, reason: &str) -> FlowError {
    FlowError::InvalidParameter {
        name: name.to_string(),
        value: value.display(),
        reason: reason.to_string(),
    }
}

/// Integer strictly greater than zero.
pub fn require_positive_int(name: &str, value: &HyperValue) -> Result<()> {
    match value.as_i64() {
        Some(i) if i > 0 => Ok(()),
        _ => Err(invalid(name, value, "must be a positive integer")),
    }
}

/// Integer greater than zero, or null.
pub fn require_positive_int_or_null(name: &str, value: &HyperValue) -> Result<()> {
    if value.is_null() {
        return Ok(());
    }
    require_positive_int(name, value)
}

/// Numeric strictly greater than zero.
pub fn require_positive_float(name: &str, value: &HyperValue) -> Result<()> {
    match value.as_f64() {
        Some(f) if f > 0.0 => Ok(()),
        _ => Err(invalid(name, value, "must be a positive number")),
    }
}

/// Numeric greater than or equal to zero.
pub fn require_non_negative_float(name: &str, value: &HyperValue) -> Result<()> {
    match value.as_f64() {
        Some(f) if f >= 0.0 => Ok(()),
        _ => Err(invalid(name, value, "must be a non-negative number")),
    }
}

/// Numeric in the closed interval [0, 1].
pub fn require_unit_interval(name: &str, value: &HyperValue) -> Result<()> {
    match value.as_f64() {
        Some(f) if (0.0..=1.0).contains(&f) => Ok(()),
        _ => Err(invalid(name, value, "must be a probability in [0, 1]")),
    }
}

pub fn require_bool(name: &str, value: &HyperValue) -> Result<()> {
    match value {
        HyperValue::Bool(_) => Ok(()),
        _ => Err(invalid(name, value, "must be a boolean")),
    }
}

/// String membership in a fixed option set.
pub fn require_one_of(name: &str, value: &HyperValue, options: &[&str]) -> Result<()> {
    match value.as_str() {
        Some(s) if options.contains(&s) => Ok(()),
        _ => Err(invalid(
            name,
            value,
            &format!("must be one of [{}]", options.join(", ")),
        )),
    }
}

/// Like `require_one_of` but tolerates null.
pub fn require_one_of_or_null(name: &str, value: &HyperValue, options: &[&str]) -> Result<()> {
    if value.is_null() {
        return Ok(());
    }
    require_one_of(name, value, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_int() {
        assert!(require_positive_int("k", &HyperValue::Int(5)).is_ok());
        let err = require_positive_int("k", &HyperValue::Int(-3)).unwrap_err();
        assert!(err.to_string().contains("positive integer"));
        assert!(require_positive_int("k", &HyperValue::Float(2.5)).is_err());
        assert!(require_positive_int("k", &HyperValue::Int(0)).is_err());
    }

    #[test]
    fn test_positive_int_or_null() {
        assert!(require_positive_int_or_null("max_depth", &HyperValue::Null).is_ok());
        assert!(require_positive_int_or_null("max_depth", &HyperValue::Int(3)).is_ok());
        assert!(require_positive_int_or_null("max_depth", &HyperValue::Int(0)).is_err());
    }

    #[test]
    fn test_unit_interval() {
        assert!(require_unit_interval("subsample", &HyperValue::Float(0.8)).is_ok());
        assert!(require_unit_interval("subsample", &HyperValue::Int(1)).is_ok());
        let err = require_unit_interval("subsample", &HyperValue::Float(1.5)).unwrap_err();
        assert!(err.to_string().contains("[0, 1]"));
    }

    #[test]
    fn test_one_of() {
        let opts = ["uniform", "distance"];
        assert!(require_one_of("weights", &HyperValue::from("uniform"), &opts).is_ok());
        assert!(require_one_of("weights", &HyperValue::from("cosine"), &opts).is_err());
        assert!(require_one_of("weights", &HyperValue::Int(1), &opts).is_err());
    }

    #[test]
    fn test_bool() {
        assert!(require_bool("bootstrap", &HyperValue::Bool(false)).is_ok());
        let err = require_bool("bootstrap", &HyperValue::Int(1)).unwrap_err();
        assert!(err.to_string().contains("boolean"));
    }
}
