//! Example records and schema-driven parsing for feature columns
//!
//! This crate provides the serialized record format feature columns are fed
//! from, and the parser that turns a batch of records into named tensors
//! according to a per-feature [`ParseSpec`].

#![warn(missing_docs)]

pub mod error;
pub mod example;
pub mod parser;
pub mod spec;

pub use error::{Error, Result};
pub use example::{Example, Feature};
pub use parser::parse_example;
pub use spec::{merge_spec, FeatureSpec, ParseSpec};

// Re-export core types
pub use ml_features_core::{DataType, Tensor};
