//! Error types for the Plantwise recommender
//!
//! This module provides structured error handling using thiserror for
//! library errors, with anyhow reserved for the binary boundary.

use thiserror::Error;

/// Main error type for Plantwise operations
#[derive(Error, Debug)]
pub enum PlantwiseError {
    /// Catalog or feedback store could not be reached or returned nothing usable
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// A raw rule or condition could not be mapped onto the canonical schema
    #[error("Normalization error: {0}")]
    Normalization(String),

    /// Classification model failed for a single candidate
    #[error("Scoring error: {0}")]
    Scoring(String),

    /// Every scoring path was exhausted without a single score
    #[error("No recommendation available: {0}")]
    NoRecommendationPossible(String),

    /// A stage of the retrain pipeline failed
    #[error("Retrain stage '{stage}' failed: {message}")]
    RetrainStage { stage: String, message: String },

    /// KB file changed underneath a read-modify-write cycle
    #[error("Knowledge base conflict: {0}")]
    KbConflict(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid operation (e.g. feedback without a pending recommendation)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Plantwise operations
pub type Result<T> = std::result::Result<T, PlantwiseError>;

impl From<rusqlite::Error> for PlantwiseError {
    fn from(err: rusqlite::Error) -> Self {
        PlantwiseError::Database(err.to_string())
    }
}

impl From<config::ConfigError> for PlantwiseError {
    fn from(err: config::ConfigError) -> Self {
        PlantwiseError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for PlantwiseError {
    fn from(err: toml::de::Error) -> Self {
        PlantwiseError::Config(err.to_string())
    }
}

/// Convert anyhow::Error to PlantwiseError
impl From<anyhow::Error> for PlantwiseError {
    fn from(err: anyhow::Error) -> Self {
        PlantwiseError::Other(err.to_string())
    }
}
