//! Error types for tensors, ops and the variable graph

use thiserror::Error;

use crate::schema::DataType;

/// Result type for core tensor and graph operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for core tensor and graph operations
#[derive(Error, Debug)]
pub enum Error {
    /// Index out of bounds
    #[error("Index out of bounds: {index} >= {bound}")]
    IndexOutOfBounds {
        /// Offending index
        index: usize,
        /// Exclusive upper bound
        bound: usize,
    },

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Shape mismatch between operands
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Data type mismatch
    #[error("Data type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Type the operation required
        expected: DataType,
        /// Type that was supplied
        actual: DataType,
    },

    /// A dense tensor was required but a sparse one was supplied, or vice versa
    #[error("Tensor layout mismatch: {0}")]
    LayoutMismatch(String),

    /// A variable with the same fully qualified name already exists
    #[error("Variable {0} already exists")]
    DuplicateVariable(String),

    /// Invalid initializer parameters
    #[error("Invalid initializer: {0}")]
    Initializer(String),
}
