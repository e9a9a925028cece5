//! Core tensors, ops and graph abstractions for feature-column preprocessing
//!
//! This crate provides the eager substrate feature columns build on: typed
//! dense and sparse tensors, the tensor ops that transform and combine
//! columns, weight initializers, and the [`Graph`] that owns variables,
//! collections, name scopes and the op ledger of one model-building pass.

#![warn(missing_docs)]

pub mod error;
pub mod graph;
pub mod initializer;
pub mod ops;
pub mod schema;
pub mod tensor;
pub mod variable;

// Re-export key types for convenience
pub use error::{Error, Result};
pub use graph::{graph_keys, Graph, GraphConfig};
pub use initializer::{Initializer, InitializerConfig};
pub use ops::Combiner;
pub use schema::DataType;
pub use tensor::{DenseTensor, SparseTensor, Tensor, TensorData};
pub use variable::Variable;
