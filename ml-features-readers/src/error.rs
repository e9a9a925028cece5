//! Error types for example readers

use thiserror::Error;

use ml_features_core::DataType;

/// Error type for example readers
#[derive(Error, Debug)]
pub enum Error {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] ml_features_core::Error),

    /// Record (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Feature required by the spec is absent and has no default
    #[error("Feature {feature} is required but missing in example {example}")]
    MissingFeature {
        /// Example name or batch position
        example: String,
        /// Feature name
        feature: String,
    },

    /// Feature has the wrong kind or number of values
    #[error("Format error in example {example}, feature {feature}: {message}")]
    Format {
        /// Example name or batch position
        example: String,
        /// Feature name
        feature: String,
        /// What was wrong
        message: String,
    },

    /// Conflicting parse specs for the same feature
    #[error("Schema error: {0}")]
    Schema(String),

    /// Data type that the record format cannot carry
    #[error("Unsupported parse type {dtype} for feature {feature}")]
    UnsupportedType {
        /// Feature name
        feature: String,
        /// Requested type
        dtype: DataType,
    },

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for example readers
pub type Result<T> = std::result::Result<T, Error>;
