//! Error types for feature columns and layer builders

use thiserror::Error;

use ml_features_core::DataType;

/// Error type for feature columns and layer builders
#[derive(Error, Debug)]
pub enum Error {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] ml_features_core::Error),

    /// Example parsing error
    #[error("Reader error: {0}")]
    Reader(#[from] ml_features_readers::Error),

    /// Two columns in one set share a key
    #[error("Duplicate feature column key found: {0}")]
    DuplicateKey(String),

    /// Column did not produce a transformed tensor
    #[error("Column {0} is not supported.")]
    UnsupportedColumn(String),

    /// Real-valued columns cannot be inferred from sparse tensors
    #[error("SparseTensor is not supported for auto detection. Please define corresponding FeatureColumn for '{0}'.")]
    SparseNotInferable(String),

    /// Real-valued columns can only be inferred from numeric tensors
    #[error("Non integer or non floating types are not supported for auto detection. Please define corresponding FeatureColumn for '{name}' ({dtype}).")]
    NonNumericNotInferable {
        /// Tensor name
        name: String,
        /// Tensor element type
        dtype: DataType,
    },

    /// Column has no dense rendering
    #[error("Column {0} is not supported in DNN. Please use an embedding column instead.")]
    UnsupportedInDnn(String),

    /// Column has no linear rendering
    #[error("Column {0} is not supported in linear models.")]
    UnsupportedInLinear(String),

    /// Column was constructed with invalid parameters
    #[error("Invalid feature column: {0}")]
    InvalidColumn(String),

    /// Raw input field is absent from the mapping
    #[error("Input tensor {0} not found")]
    MissingInput(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration (de)serialization error
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for feature columns and layer builders
pub type Result<T> = std::result::Result<T, Error>;
