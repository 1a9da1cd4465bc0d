//! Error types for the flowtrain core

use thiserror::Error;

/// Result type alias for flowtrain operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Main error type for the flowtrain core
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Model not fitted")]
    NotFitted,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Evaluation error: {0}")]
    EvaluationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<polars::error::PolarsError> for FlowError {
    fn from(err: polars::error::PolarsError) -> Self {
        FlowError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for FlowError {
    fn from(err: ndarray::ShapeError) -> Self {
        FlowError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FlowError::TrainingError("bad split".to_string());
        assert_eq!(err.to_string(), "Training error: bad split");
    }

    #[test]
    fn test_not_fitted_message() {
        assert!(FlowError::NotFitted.to_string().contains("not fitted"));
    }

    #[test]
    fn test_invalid_parameter_message() {
        let err = FlowError::InvalidParameter {
            name: "n_estimators".to_string(),
            value: "-5".to_string(),
            reason: "must be a positive integer".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("n_estimators"));
        assert!(msg.contains("positive integer"));
    }
}
